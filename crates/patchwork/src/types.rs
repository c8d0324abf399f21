//! Port model shared by the query layer, the backends and the reconcilers.

use serde::{Deserialize, Serialize};

/// Direction as seen by the media graph.
///
/// A graph `Output` port produces data: for hardware this is a device
/// *input* (a keyboard sending notes into the system). A graph `Input` port
/// consumes data: for hardware this is a device *output*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Midi,
}

/// A port in the media graph. Owned by the graph; we only keep copies of
/// its attributes and refer to it by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Full `client:port` name, unique per server.
    pub name: String,
    pub direction: PortDirection,
    pub kind: MediaKind,
    pub physical: bool,
    /// Hardware identity hints, most specific first.
    pub aliases: Vec<String>,
}

impl PortInfo {
    pub fn new(name: impl Into<String>, direction: PortDirection, kind: MediaKind) -> Self {
        Self {
            name: name.into(),
            direction,
            kind,
            physical: false,
            aliases: Vec::new(),
        }
    }

    pub fn physical(mut self) -> Self {
        self.physical = true;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Owning client name (everything before the first `:`).
    pub fn client_name(&self) -> &str {
        self.name.split_once(':').map_or(self.name.as_str(), |(client, _)| client)
    }

    /// Port name without the client prefix.
    pub fn short_name(&self) -> &str {
        self.name.split_once(':').map_or(self.name.as_str(), |(_, short)| short)
    }
}

/// Filter for port enumeration. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortQuery {
    /// Substring of the full port name.
    pub name: Option<String>,
    pub direction: Option<PortDirection>,
    pub physical: Option<bool>,
    pub kind: Option<MediaKind>,
}

impl PortQuery {
    pub fn midi() -> Self {
        Self {
            kind: Some(MediaKind::Midi),
            ..Default::default()
        }
    }

    pub fn audio() -> Self {
        Self {
            kind: Some(MediaKind::Audio),
            ..Default::default()
        }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn inputs(mut self) -> Self {
        self.direction = Some(PortDirection::Input);
        self
    }

    pub fn outputs(mut self) -> Self {
        self.direction = Some(PortDirection::Output);
        self
    }

    pub fn physical(mut self) -> Self {
        self.physical = Some(true);
        self
    }

    pub fn software(mut self) -> Self {
        self.physical = Some(false);
        self
    }

    pub fn matches(&self, port: &PortInfo) -> bool {
        self.name.as_deref().map_or(true, |n| port.name.contains(n))
            && self.direction.map_or(true, |d| port.direction == d)
            && self.physical.map_or(true, |p| port.physical == p)
            && self.kind.map_or(true, |k| port.kind == k)
    }
}
