//! Room controller façade.
//! Tries the wireless transport first where the platform allows it and falls
//! back to the socket transport, whose outcome is final.

use crate::ble::Radio;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, SocketError, WirelessError};
use crate::platform::{self, Platform};
use crate::protocol::{Command, DeviceState};
use crate::socket::{SocketConfig, SocketTransport};
use crate::wireless::{WirelessConfig, WirelessTransport};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A specialized Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Transport that served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Wireless,
    Socket,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Wireless => f.write_str("wireless"),
            Transport::Socket => f.write_str("socket"),
        }
    }
}

/// Builder for [`Controller`].
pub struct ControllerBuilder {
    config: ControllerConfig,
    radio: Option<Arc<dyn Radio>>,
}

impl ControllerBuilder {
    /// Starts from the default config with the given identity token.
    pub fn new<T: Into<String>>(token: T) -> Self {
        Self::from_config(ControllerConfig::new(token))
    }

    pub fn from_config(config: ControllerConfig) -> Self {
        Self {
            config,
            radio: None,
        }
    }

    pub fn device_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.device_name = name.into();
        self
    }

    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.config.scan_timeout = timeout;
        self
    }

    pub fn gatt_timeout(mut self, timeout: Duration) -> Self {
        self.config.gatt_timeout = timeout;
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout = timeout;
        self
    }

    /// Overrides the detected runtime platform.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.config.platform = Some(platform);
        self
    }

    /// Radio backend for the wireless transport. Without one, every call
    /// goes over the socket.
    pub fn radio(mut self, radio: Arc<dyn Radio>) -> Self {
        self.radio = Some(radio);
        self
    }

    pub fn build(self) -> Controller {
        Controller::new(self.config, self.radio)
    }
}

/// Reads and mutates the room controller's state.
///
/// Calls on one instance are serialized; a second `get_state`/`set_state`
/// waits for the first to finish.
pub struct Controller {
    platform: Platform,
    wireless: Option<WirelessTransport>,
    socket: SocketTransport,
    op_lock: tokio::sync::Mutex<()>,
    last_transport: Mutex<Option<Transport>>,
    cancel_token: CancellationToken,
}

impl Controller {
    pub fn new(config: ControllerConfig, radio: Option<Arc<dyn Radio>>) -> Self {
        let platform = config.platform();
        let cancel_token = CancellationToken::new();

        let wireless = match radio {
            Some(radio) if platform::wireless_eligible(platform) => {
                Some(WirelessTransport::with_cancel_token(
                    radio,
                    WirelessConfig::from(&config),
                    platform,
                    cancel_token.child_token(),
                ))
            }
            Some(_) => {
                info!("Wireless transport disabled on {}", platform);
                None
            }
            None => None,
        };
        let socket = SocketTransport::with_cancel_token(
            SocketConfig::from(&config),
            platform,
            cancel_token.child_token(),
        );

        Self {
            platform,
            wireless,
            socket,
            op_lock: tokio::sync::Mutex::new(()),
            last_transport: Mutex::new(None),
            cancel_token,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// The wireless transport, when the platform and config enable it.
    pub fn wireless(&self) -> Option<&WirelessTransport> {
        self.wireless.as_ref()
    }

    /// Transport that served the last successful call.
    pub fn last_transport(&self) -> Option<Transport> {
        *self.last_transport.lock()
    }

    /// Reads the current device state.
    pub async fn get_state(&self) -> Result<DeviceState> {
        let _op = self.op_lock.lock().await;
        if self.cancel_token.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }

        if let Some(wireless) = &self.wireless {
            match Self::wireless_read(wireless).await {
                Ok(state) => {
                    self.served_by(Transport::Wireless);
                    return Ok(state);
                }
                Err(WirelessError::Cancelled) => return Err(ControllerError::Cancelled),
                Err(e) => {
                    warn!("Wireless get_state failed ({}), falling back to socket", e);
                    wireless.disconnect().await;
                }
            }
        } else {
            debug!("Skipping wireless transport on {}", self.platform);
        }

        match self.socket.read_state().await {
            Ok(state) => {
                self.served_by(Transport::Socket);
                Ok(state)
            }
            Err(SocketError::Cancelled) => Err(ControllerError::Cancelled),
            Err(e) => {
                error!("get_state failed on every transport: {}", e);
                Err(ControllerError::StateUnavailable(e))
            }
        }
    }

    /// Applies one command. Call [`get_state`](Self::get_state) afterwards to
    /// observe the result.
    pub async fn set_state(&self, cmd: Command) -> Result<()> {
        let _op = self.op_lock.lock().await;
        if self.cancel_token.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }

        if let Some(wireless) = &self.wireless {
            match Self::wireless_write(wireless, cmd).await {
                Ok(()) => {
                    self.served_by(Transport::Wireless);
                    return Ok(());
                }
                Err(WirelessError::Cancelled) => return Err(ControllerError::Cancelled),
                Err(e) => {
                    warn!(
                        "Wireless set_state {} failed ({}), falling back to socket",
                        cmd, e
                    );
                    wireless.disconnect().await;
                }
            }
        } else {
            debug!("Skipping wireless transport on {}", self.platform);
        }

        match self.socket.write_command(cmd).await {
            Ok(()) => {
                self.served_by(Transport::Socket);
                Ok(())
            }
            Err(SocketError::Cancelled) => Err(ControllerError::Cancelled),
            Err(e) => {
                error!("set_state {} failed on every transport: {}", cmd, e);
                Err(ControllerError::CommandNotApplied(e))
            }
        }
    }

    /// Aborts in-flight waits and releases the wireless session. Further
    /// calls fail with [`ControllerError::Cancelled`].
    pub async fn shutdown(&self) {
        info!("Shutting down room controller client");
        self.cancel_token.cancel();
        if let Some(wireless) = &self.wireless {
            wireless.disconnect().await;
        }
    }

    async fn wireless_read(
        wireless: &WirelessTransport,
    ) -> std::result::Result<DeviceState, WirelessError> {
        wireless.connect().await?;
        wireless.read_state().await
    }

    async fn wireless_write(
        wireless: &WirelessTransport,
        cmd: Command,
    ) -> std::result::Result<(), WirelessError> {
        wireless.connect().await?;
        wireless.write_command(cmd).await
    }

    fn served_by(&self, transport: Transport) {
        debug!("Served by {} transport", transport);
        *self.last_transport.lock() = Some(transport);
    }
}
