//! # roomctl
//!
//! Asynchronous client for a hotel-room controller (lights, door lock, two
//! switched channels and climate sensors). The controller is reached over a
//! Bluetooth LE GATT link when the platform has one, with a local TCP socket
//! as the fallback transport.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roomctl::{Command, ControllerBuilder};
//!
//! # async fn run() -> Result<(), roomctl::ControllerError> {
//! let controller = ControllerBuilder::new("ROOM_TOKEN").host("192.168.1.100").build();
//! controller.set_state(Command::LightOn).await?;
//! let state = controller.get_state().await?;
//! println!("{:.1} °C", state.temperature_c);
//! # Ok(())
//! # }
//! ```
//!
#[macro_use]
mod macros;
pub mod ble;
pub mod config;
pub mod controller;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod socket;
pub mod wireless;

pub use config::ControllerConfig;
pub use controller::{Controller, ControllerBuilder, Transport};
pub use error::{ControllerError, RadioError, SocketError, WirelessError};
pub use platform::Platform;
pub use protocol::{Command, DeviceState};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
