use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::source::CaptureError;

/// Interface name that asks the engine to pick one itself.
pub const AUTO_INTERFACE: &str = "auto";

const LOOPBACK_NAMES: [&str; 2] = ["lo", "localhost"];

/// Capture-capable interface as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_up: bool,
    pub is_loopback: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<IpAddr>,
}

impl InterfaceInfo {
    fn looks_like_loopback(&self) -> bool {
        self.is_loopback || LOOPBACK_NAMES.contains(&self.name.as_str())
    }
}

/// Interface names in backend order.
///
/// # Errors
/// Returns `CaptureError::NoInterfaces` when the list is empty.
pub fn interface_names(interfaces: &[InterfaceInfo]) -> Result<Vec<String>, CaptureError> {
    if interfaces.is_empty() {
        return Err(CaptureError::NoInterfaces);
    }
    Ok(interfaces.iter().map(|iface| iface.name.clone()).collect())
}

/// Pick the default capture interface.
///
/// Preference order: first interface that is up and not loopback, then the
/// first non-loopback interface, then the first interface at all.
///
/// # Examples
/// ```
/// use flowtap_core::{InterfaceInfo, auto_select};
///
/// let lo = InterfaceInfo {
///     name: "lo".to_string(),
///     description: None,
///     is_up: true,
///     is_loopback: true,
///     addresses: Vec::new(),
/// };
/// let eth = InterfaceInfo { name: "eth0".to_string(), is_loopback: false, ..lo.clone() };
/// assert_eq!(auto_select(&[lo, eth]).unwrap().name, "eth0");
/// ```
pub fn auto_select(interfaces: &[InterfaceInfo]) -> Result<&InterfaceInfo, CaptureError> {
    interfaces
        .iter()
        .find(|iface| iface.is_up && !iface.looks_like_loopback())
        .or_else(|| interfaces.iter().find(|iface| !iface.looks_like_loopback()))
        .or_else(|| interfaces.first())
        .ok_or(CaptureError::NoInterfaces)
}
