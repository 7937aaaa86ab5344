//! Controller configuration.
//! Every field but the identity token has a default matching the stock room
//! controller, so a JSON config only needs to name what differs.

use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_DEVICE_NAME: &str = "ROOM_7";
pub const DEFAULT_HOST: &str = "192.168.1.100";
pub const DEFAULT_PORT: u16 = 7000;
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_GATT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Settings shared by both transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Exact advertised name of the controller.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret presented on the identify control point and in every
    /// socket request.
    pub token: String,
    #[serde(default = "default_scan_timeout", with = "duration_ms")]
    pub scan_timeout: Duration,
    #[serde(default = "default_gatt_timeout", with = "duration_ms")]
    pub gatt_timeout: Duration,
    #[serde(default = "default_socket_timeout", with = "duration_ms")]
    pub socket_timeout: Duration,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Overrides the detected runtime platform.
    #[serde(default)]
    pub platform: Option<Platform>,
}

impl ControllerConfig {
    pub fn new<T: Into<String>>(token: T) -> Self {
        Self {
            device_name: default_device_name(),
            host: default_host(),
            port: DEFAULT_PORT,
            token: token.into(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            gatt_timeout: DEFAULT_GATT_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            platform: None,
        }
    }

    /// Loads a config from a JSON document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::current)
    }
}

fn default_device_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_scan_timeout() -> Duration {
    DEFAULT_SCAN_TIMEOUT
}

fn default_gatt_timeout() -> Duration {
    DEFAULT_GATT_TIMEOUT
}

fn default_socket_timeout() -> Duration {
    DEFAULT_SOCKET_TIMEOUT
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

/// Durations as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
