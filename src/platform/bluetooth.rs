//! Live Bluetooth device table keyed by hardware address.
//!
//! Bluetooth sightings are shown, never persisted. A newer sighting of an
//! address replaces the older entry; service UUIDs discovered later are merged
//! onto whatever entry is current.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::process::{Command, Stdio};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::core::errors::{Result, WsnError};
use crate::pipeline::records::now_seconds;

pub const UNKNOWN_DEVICE_NAME: &str = "Unknown device";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BluetoothDevice {
    pub address: String,
    pub name: String,
    pub rssi: Option<i32>,
    pub device_class: Option<u32>,
    pub service_uuids: Vec<String>,
    pub last_seen: NaiveDateTime,
}

impl BluetoothDevice {
    #[must_use]
    pub fn new(address: &str, name: Option<&str>) -> Self {
        Self {
            address: normalize_address(address),
            name: name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(UNKNOWN_DEVICE_NAME)
                .to_string(),
            rssi: None,
            device_class: None,
            service_uuids: Vec::new(),
            last_seen: now_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightingOutcome {
    Added,
    Replaced,
}

#[derive(Debug, Default)]
pub struct BluetoothDeviceTable {
    devices: BTreeMap<String, BluetoothDevice>,
}

impl BluetoothDeviceTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovery; the newer sighting wins wholesale.
    pub fn record_sighting(&mut self, device: BluetoothDevice) -> SightingOutcome {
        match self.devices.insert(device.address.clone(), device) {
            Some(_) => SightingOutcome::Replaced,
            None => SightingOutcome::Added,
        }
    }

    /// Attach service UUIDs to a known device. Unknown addresses are ignored.
    pub fn merge_service_uuids(&mut self, address: &str, uuids: &[String]) -> bool {
        let Some(device) = self.devices.get_mut(&normalize_address(address)) else {
            return false;
        };
        for uuid in uuids {
            let uuid = uuid.to_ascii_lowercase();
            if !device.service_uuids.contains(&uuid) {
                device.service_uuids.push(uuid);
            }
        }
        true
    }

    #[must_use]
    pub fn get(&self, address: &str) -> Option<&BluetoothDevice> {
        self.devices.get(&normalize_address(address))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices ordered strongest first; devices without a reading go last.
    #[must_use]
    pub fn devices(&self) -> Vec<BluetoothDevice> {
        let mut out: Vec<BluetoothDevice> = self.devices.values().cloned().collect();
        out.sort_by(|a, b| {
            b.rssi
                .unwrap_or(i32::MIN)
                .cmp(&a.rssi.unwrap_or(i32::MIN))
                .then_with(|| a.address.cmp(&b.address))
        });
        out
    }
}

#[must_use]
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

/// Parse `bluetoothctl devices` output (`Device <addr> <name...>`).
#[must_use]
pub fn parse_bluetoothctl_devices(raw: &str) -> Vec<BluetoothDevice> {
    raw.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (address, name) = match rest.split_once(' ') {
                Some((addr, name)) => (addr, Some(name)),
                None => (rest, None),
            };
            if address.split(':').count() != 6 {
                return None;
            }
            // bluetoothctl echoes the address as the name when none is known.
            let name = name.filter(|n| !n.trim().eq_ignore_ascii_case(address));
            Some(BluetoothDevice::new(address, name))
        })
        .collect()
}

/// Snapshot the devices BlueZ currently knows about.
pub fn discover_with_bluetoothctl() -> Result<BluetoothDeviceTable> {
    let out = Command::new("bluetoothctl")
        .arg("devices")
        .stdin(Stdio::null())
        .output()
        .map_err(|err| WsnError::ScanSource {
            source_name: "bluetoothctl",
            details: err.to_string(),
        })?;
    if !out.status.success() {
        return Err(WsnError::ScanSource {
            source_name: "bluetoothctl",
            details: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    let mut table = BluetoothDeviceTable::new();
    for device in parse_bluetoothctl_devices(&String::from_utf8_lossy(&out.stdout)) {
        table.record_sighting(device);
    }
    Ok(table)
}
