//! Host integration: radio scan sources, location, Bluetooth discovery.

pub mod bluetooth;
pub mod location;
#[cfg(target_os = "linux")]
pub mod nmcli;
pub mod pal;
