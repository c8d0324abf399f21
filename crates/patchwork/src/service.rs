//! Autoconnect service: owns the media-server connection, the reconcilers
//! and the background loop.
//!
//! One mutex serializes every reconciliation pass, whether it comes from
//! the loop or from a caller, and the shutdown cleanup. Callers block until
//! their pass completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use patchconf::{PatchConfig, RoutingConfig};
use tracing::{debug, error, info, warn};

use crate::audio::{audio_disconnect_sysout, AudioContext, AudioReconciler};
use crate::device::DeviceLibrary;
use crate::error::AutoconnectError;
use crate::graph::{MediaGraph, MediaServer, PassReport, XrunMonitor};
use crate::midi::{MidiContext, MidiReconciler};
use crate::schedule::{Pending, PendingOracle, RequestFlags, TickSchedule};
use crate::slots::DeviceSlotTable;
use crate::topology::ChainTopology;

/// Service settings, usually derived from [`PatchConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct AutoconnectConfig {
    pub client_name: String,
    pub refresh: Duration,
    pub device_poll: Duration,
    pub routing: RoutingConfig,
}

impl Default for AutoconnectConfig {
    fn default() -> Self {
        Self::from(&PatchConfig::default())
    }
}

impl From<&PatchConfig> for AutoconnectConfig {
    fn from(config: &PatchConfig) -> Self {
        Self {
            client_name: config.infra.server.client_name.clone(),
            refresh: config.refresh_interval(),
            device_poll: config.device_poll_interval(),
            routing: config.bootstrap.routing.clone(),
        }
    }
}

/// State guarded by the reconciliation lock.
struct EngineState {
    graph: Option<Box<dyn MediaGraph>>,
    midi: MidiReconciler,
    audio: AudioReconciler,
    routing: RoutingConfig,
    /// Device-poll accumulator. Every MIDI pass restarts it, whoever runs it.
    schedule: TickSchedule,
}

struct Shared {
    client_name: String,
    device_poll: Duration,
    state: Mutex<EngineState>,
    slots: Arc<DeviceSlotTable>,
    devices: Arc<dyn DeviceLibrary>,
    topology: Arc<dyn ChainTopology>,
    requests: RequestFlags,
    oracle: Option<Arc<dyn PendingOracle>>,
    xruns: Arc<XrunMonitor>,
    exit: AtomicBool,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, EngineState>, AutoconnectError> {
        self.state.lock().map_err(|_| AutoconnectError::LockPoisoned)
    }

    fn take_pending(&self) -> Pending {
        let requested = self.requests.take_pending();
        match &self.oracle {
            Some(oracle) => requested.merge(oracle.take_pending()),
            None => requested,
        }
    }

    fn midi_pass(&self, state: &mut EngineState, force: bool) -> Result<PassReport, AutoconnectError> {
        let EngineState {
            graph,
            midi,
            routing,
            schedule,
            ..
        } = state;
        let graph = graph.as_deref().ok_or(AutoconnectError::NotRunning)?;
        schedule.midi_ran();
        let topology = self.topology.snapshot();
        let ctx = MidiContext {
            slots: &self.slots,
            devices: self.devices.as_ref(),
            routing,
            topology: &topology,
        };
        Ok(midi.run(graph, &ctx, force)?)
    }

    fn audio_pass(&self, state: &mut EngineState, force: bool) -> Result<PassReport, AutoconnectError> {
        let graph = state.graph.as_deref().ok_or(AutoconnectError::NotRunning)?;
        let topology = self.topology.snapshot();
        let ctx = AudioContext {
            routing: &state.routing,
            topology: &topology,
        };
        Ok(state.audio.run(graph, &ctx, force)?)
    }

    /// One loop tick: run whatever `pending` and the device poll call for.
    /// A failed MIDI pass does not keep a requested audio pass from running.
    fn tick(&self, pending: Pending) -> Result<(), AutoconnectError> {
        let mut state = self.lock()?;
        let plan = state.schedule.plan(pending);
        let midi = match plan.midi {
            Some(force) => self.midi_pass(&mut state, force).map(drop),
            None => Ok(()),
        };
        let audio = if plan.audio {
            self.audio_pass(&mut state, true).map(drop)
        } else {
            Ok(())
        };
        midi.and(audio)
    }

    fn advance_clock(&self) -> Result<(), AutoconnectError> {
        self.lock()?.schedule.advance();
        Ok(())
    }
}

/// The autoconnect service. `STOPPED → RUNNING → STOPPED`.
pub struct Autoconnect {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Autoconnect {
    pub fn new(
        config: AutoconnectConfig,
        topology: Arc<dyn ChainTopology>,
        devices: Arc<dyn DeviceLibrary>,
    ) -> Self {
        Self::build(config, topology, devices, None)
    }

    /// Like [`Autoconnect::new`], also polling `oracle` for pending passes.
    pub fn with_oracle(
        config: AutoconnectConfig,
        topology: Arc<dyn ChainTopology>,
        devices: Arc<dyn DeviceLibrary>,
        oracle: Arc<dyn PendingOracle>,
    ) -> Self {
        Self::build(config, topology, devices, Some(oracle))
    }

    fn build(
        config: AutoconnectConfig,
        topology: Arc<dyn ChainTopology>,
        devices: Arc<dyn DeviceLibrary>,
        oracle: Option<Arc<dyn PendingOracle>>,
    ) -> Self {
        let state = EngineState {
            graph: None,
            midi: MidiReconciler::new(),
            audio: AudioReconciler::new(),
            routing: config.routing,
            schedule: TickSchedule::new(config.refresh, config.device_poll),
        };
        Self {
            shared: Arc::new(Shared {
                client_name: config.client_name,
                device_poll: config.device_poll,
                state: Mutex::new(state),
                slots: Arc::new(DeviceSlotTable::new()),
                devices,
                topology,
                requests: RequestFlags::new(),
                oracle,
                xruns: Arc::new(XrunMonitor::new()),
                exit: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    fn thread_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.thread.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect to the media server and launch the background loop.
    ///
    /// If the server cannot be reached the error is logged and returned and
    /// the service stays stopped.
    pub fn start(&self, server: &dyn MediaServer, refresh: Duration) -> Result<(), AutoconnectError> {
        let mut handle = self.thread_handle();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(AutoconnectError::AlreadyRunning);
        }
        if let Some(stale) = handle.take() {
            let _ = stale.join();
        }

        let graph = match server.open(&self.shared.client_name, Arc::clone(&self.shared.xruns)) {
            Ok(graph) => graph,
            Err(e) => {
                error!("can't connect to media server: {}", e);
                return Err(e.into());
            }
        };

        {
            let mut state = self.shared.lock()?;
            state.graph = Some(graph);
            state.midi.invalidate();
            state.schedule = TickSchedule::new(refresh, self.shared.device_poll);
        }
        self.shared.slots.refresh_all_modes(self.shared.devices.as_ref());
        self.shared.exit.store(false, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("autoconnect".to_string())
            .spawn(move || run_loop(shared, refresh));
        match spawned {
            Ok(thread) => *handle = Some(thread),
            Err(e) => {
                self.shared.lock()?.graph = None;
                return Err(e.into());
            }
        }

        info!(
            "autoconnect started as {} (refresh {:?})",
            self.shared.client_name, refresh
        );
        Ok(())
    }

    /// Stop the loop, silence the system outputs and drop the server
    /// connection.
    pub fn stop(&self) -> Result<(), AutoconnectError> {
        let thread = self.thread_handle().take().ok_or(AutoconnectError::NotRunning)?;

        self.shared.exit.store(true, Ordering::Release);
        if thread.join().is_err() {
            warn!("autoconnect thread panicked");
        }

        let mut state = self.shared.lock()?;
        if let Some(graph) = state.graph.as_deref() {
            match audio_disconnect_sysout(graph) {
                Ok(report) => debug!("released {} system output edges", report.disconnected),
                Err(e) => warn!("failed to disconnect system outputs: {}", e),
            }
        }
        state.graph = None;
        info!("autoconnect stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Run a MIDI pass now. A non-forced pass only runs if the device set
    /// changed.
    pub fn midi_autoconnect(&self, force: bool) -> Result<PassReport, AutoconnectError> {
        let mut state = self.shared.lock()?;
        self.shared.midi_pass(&mut state, force)
    }

    /// Run an audio pass now. Does nothing unless `force` is set.
    pub fn audio_autoconnect(&self, force: bool) -> Result<PassReport, AutoconnectError> {
        let mut state = self.shared.lock()?;
        self.shared.audio_pass(&mut state, force)
    }

    pub fn autoconnect(&self, force: bool) -> Result<PassReport, AutoconnectError> {
        let mut report = self.midi_autoconnect(force)?;
        report.merge(&self.audio_autoconnect(force)?);
        Ok(report)
    }

    /// Ask the loop for a forced MIDI pass on its next tick.
    pub fn request_midi(&self) {
        self.shared.requests.request_midi();
    }

    /// Ask the loop for a forced audio pass on its next tick.
    pub fn request_audio(&self) {
        self.shared.requests.request_audio();
    }

    pub fn slots(&self) -> Arc<DeviceSlotTable> {
        Arc::clone(&self.shared.slots)
    }

    /// Read-and-clear the "device set changed" flag.
    pub fn take_device_changes(&self) -> bool {
        self.shared.slots.take_changed()
    }

    pub fn routing(&self) -> Result<RoutingConfig, AutoconnectError> {
        Ok(self.shared.lock()?.routing.clone())
    }

    /// Replace the routing policy. Applied by the next forced pass.
    pub fn set_routing(&self, routing: RoutingConfig) -> Result<(), AutoconnectError> {
        self.shared.lock()?.routing = routing;
        Ok(())
    }

    pub fn set_input_enabled(&self, identity: &str, enabled: bool) -> Result<PassReport, AutoconnectError> {
        self.edit_routing(|routing| routing.set_input_enabled(identity, enabled))
    }

    pub fn set_output_enabled(&self, identity: &str, enabled: bool) -> Result<PassReport, AutoconnectError> {
        self.edit_routing(|routing| routing.set_output_enabled(identity, enabled))
    }

    pub fn set_feedback_enabled(&self, identity: &str, enabled: bool) -> Result<PassReport, AutoconnectError> {
        self.edit_routing(|routing| routing.set_feedback_enabled(identity, enabled))
    }

    fn edit_routing(
        &self,
        edit: impl FnOnce(&mut RoutingConfig) -> bool,
    ) -> Result<PassReport, AutoconnectError> {
        let mut state = self.shared.lock()?;
        if !edit(&mut state.routing) {
            return Ok(PassReport::skipped());
        }
        self.shared.midi_pass(&mut state, true)
    }

    /// Hand input slot `slot` to an external device driver.
    pub fn claim_device(&self, slot: usize) -> Result<PassReport, AutoconnectError> {
        self.set_device_claimed(slot, true)
    }

    pub fn release_device(&self, slot: usize) -> Result<PassReport, AutoconnectError> {
        self.set_device_claimed(slot, false)
    }

    fn set_device_claimed(&self, slot: usize, claimed: bool) -> Result<PassReport, AutoconnectError> {
        let mut state = self.shared.lock()?;
        self.shared.devices.set_extdev_routing(slot, claimed);
        self.shared.midi_pass(&mut state, true)
    }

    fn with_graph<T>(&self, read: impl FnOnce(&dyn MediaGraph) -> T) -> Option<T> {
        let state = self.shared.lock().ok()?;
        state.graph.as_deref().map(read)
    }

    /// Server DSP load in percent; 0 when stopped.
    pub fn cpu_load(&self) -> f32 {
        self.with_graph(|g| g.cpu_load()).unwrap_or(0.0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.with_graph(|g| g.sample_rate()).unwrap_or(0)
    }

    pub fn buffer_size(&self) -> u32 {
        self.with_graph(|g| g.buffer_size()).unwrap_or(0)
    }

    pub fn xrun_count(&self) -> u64 {
        self.shared.xruns.count()
    }

    /// Read-and-clear the "x-run happened" flag.
    pub fn take_xrun(&self) -> bool {
        self.shared.xruns.take()
    }
}

impl Drop for Autoconnect {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("autoconnect shutdown failed: {}", e);
            }
        }
    }
}

fn run_loop(shared: Arc<Shared>, refresh: Duration) {
    let mut xruns_seen = shared.xruns.count();

    while !shared.exit.load(Ordering::Acquire) {
        let xruns = shared.xruns.count();
        if xruns > xruns_seen {
            warn!("media server x-run ({} total)", xruns);
            xruns_seen = xruns;
        }

        if let Err(e) = shared.tick(shared.take_pending()) {
            error!("autoconnect pass failed: {}", e);
        }

        thread::sleep(refresh);
        if let Err(e) = shared.advance_clock() {
            error!("autoconnect clock stalled: {}", e);
        }
    }
    debug!("autoconnect loop exited");
}
