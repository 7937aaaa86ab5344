//! Runtime platform detection and transport eligibility.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime the client is hosted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    /// Browser-hosted runtime (wasm)
    Web,
    Linux,
    #[serde(rename = "macos")]
    MacOs,
    Windows,
    Other,
}

impl Platform {
    /// Platform of the compile target.
    pub fn current() -> Self {
        if cfg!(target_arch = "wasm32") {
            Platform::Web
        } else if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Other
        }
    }

    pub fn is_mobile(self) -> bool {
        matches!(self, Platform::Android | Platform::Ios)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Web => "web",
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
            Platform::Other => "other",
        };
        f.write_str(name)
    }
}

/// Whether the Bluetooth LE transport is attempted at all.
///
/// Only handheld platforms qualify; desktop and browser runtimes go straight
/// to the socket transport.
pub fn wireless_eligible(platform: Platform) -> bool {
    platform.is_mobile()
}

/// Whether the TCP socket transport is available.
pub fn socket_eligible(platform: Platform) -> bool {
    platform != Platform::Web
}
