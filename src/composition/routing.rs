// Routing - Output devices, channels and recording input filters

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an output/input device in the routing table
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Where an event goes: a device and a MIDI channel (0-15)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceChannelRoute {
    pub device: DeviceId,
    pub channel: u8,
}

impl DeviceChannelRoute {
    pub fn new(device: DeviceId, channel: u8) -> Self {
        Self { device, channel }
    }
}

impl fmt::Display for DeviceChannelRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/ch{}", self.device, self.channel + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
}

/// Devices known to the document's studio configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    devices: Vec<DeviceInfo>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, id: DeviceId, name: impl Into<String>) {
        let name = name.into();
        match self.devices.iter_mut().find(|d| d.id == id) {
            Some(existing) => existing.name = name,
            None => self.devices.push(DeviceInfo { id, name }),
        }
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.iter().any(|d| d.id == id)
    }

    pub fn name_of(&self, id: DeviceId) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.name.as_str())
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Check a route against the table
    pub fn check(&self, route: &DeviceChannelRoute) -> Result<(), String> {
        if route.channel > 15 {
            return Err(format!("channel {} out of range", route.channel));
        }
        if !self.contains(route.device) {
            return Err(format!("unknown device {}", route.device));
        }
        Ok(())
    }
}

/// Which incoming events a recording track accepts
/// `None` means any device / any channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFilter {
    pub device: Option<DeviceId>,
    pub channel: Option<u8>,
}

impl SourceFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn accepts(&self, device: DeviceId, channel: Option<u8>) -> bool {
        let device_ok = self.device.is_none_or(|d| d == device);
        let channel_ok = match (self.channel, channel) {
            (None, _) => true,
            (Some(wanted), Some(got)) => wanted == got,
            // Channel-less messages can only match an unfiltered channel
            (Some(_), None) => false,
        };
        device_ok && channel_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_check() {
        let mut table = RoutingTable::new();
        table.add_device(DeviceId(1), "Synth");
        assert!(table.check(&DeviceChannelRoute::new(DeviceId(1), 0)).is_ok());
        assert!(table.check(&DeviceChannelRoute::new(DeviceId(2), 0)).is_err());
        assert!(table.check(&DeviceChannelRoute::new(DeviceId(1), 16)).is_err());
        assert_eq!(table.name_of(DeviceId(1)), Some("Synth"));
    }

    #[test]
    fn test_source_filter() {
        let any = SourceFilter::any();
        assert!(any.accepts(DeviceId(3), Some(5)));
        assert!(any.accepts(DeviceId(3), None));

        let filtered = SourceFilter {
            device: Some(DeviceId(1)),
            channel: Some(2),
        };
        assert!(filtered.accepts(DeviceId(1), Some(2)));
        assert!(!filtered.accepts(DeviceId(1), Some(3)));
        assert!(!filtered.accepts(DeviceId(4), Some(2)));
        assert!(!filtered.accepts(DeviceId(1), None));
    }
}
