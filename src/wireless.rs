//! Bluetooth LE transport to the room controller.
//! Discovers the controller by its advertised name, runs the identify
//! handshake and reads/writes the state control points over the session.

use crate::ble::{GattLink, PeerId, Radio, ScanEvent, ScanEvents, WriteKind};
use crate::config::ControllerConfig;
use crate::error::{RadioError, Result, WirelessError};
use crate::platform::{self, Platform};
use crate::protocol::{
    self, CHAR_GET_STATE, CHAR_IDENTIFY, CHAR_SET_STATE, Command, DeviceState, SERVICE_UUID,
};
use futures_util::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{Duration, Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;

/// Connection state of the wireless transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Idle,
    Scanning,
    Connecting,
    Authenticating,
    /// A session is installed
    Ready,
    /// The last connect attempt failed; `connect()` may be retried
    Failed,
}

#[derive(Debug, Clone)]
pub struct WirelessConfig {
    pub device_name: String,
    pub token: String,
    pub scan_timeout: Duration,
    /// Bound for each GATT step (connect, discover, read, write)
    pub gatt_timeout: Duration,
}

impl From<&ControllerConfig> for WirelessConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            device_name: config.device_name.clone(),
            token: config.token.clone(),
            scan_timeout: config.scan_timeout,
            gatt_timeout: config.gatt_timeout,
        }
    }
}

/// Authenticated link to the controller.
struct WirelessSession {
    link: Arc<dyn GattLink>,
    established: Instant,
}

/// Bluetooth LE transport.
///
/// Holds at most one session. A `connect()` issued while another is
/// scanning or connecting fails with [`WirelessError::AlreadyConnecting`]
/// instead of starting a second scan.
pub struct WirelessTransport {
    radio: Arc<dyn Radio>,
    config: WirelessConfig,
    eligible: bool,
    phase: Mutex<LinkPhase>,
    session: tokio::sync::Mutex<Option<WirelessSession>>,
    cancel_token: CancellationToken,
}

impl WirelessTransport {
    pub fn new(radio: Arc<dyn Radio>, config: WirelessConfig, platform: Platform) -> Self {
        Self::with_cancel_token(radio, config, platform, CancellationToken::new())
    }

    /// Creates a transport whose waits are aborted when `cancel_token` fires.
    pub fn with_cancel_token(
        radio: Arc<dyn Radio>,
        config: WirelessConfig,
        platform: Platform,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            radio,
            config,
            eligible: platform::wireless_eligible(platform),
            phase: Mutex::new(LinkPhase::Idle),
            session: tokio::sync::Mutex::new(None),
            cancel_token,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        *self.phase.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == LinkPhase::Ready
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    /// Scans for the controller, connects and identifies.
    ///
    /// Returns immediately when a session is already installed.
    pub async fn connect(&self) -> Result<()> {
        if !self.eligible {
            return Err(WirelessError::Unsupported);
        }
        if self.cancel_token.is_cancelled() {
            return Err(WirelessError::Cancelled);
        }

        let guard = {
            let mut phase = self.phase.lock();
            match *phase {
                LinkPhase::Ready => {
                    debug!("Reusing wireless session");
                    return Ok(());
                }
                LinkPhase::Scanning | LinkPhase::Connecting | LinkPhase::Authenticating => {
                    debug!("Rejecting connect while {:?}", *phase);
                    return Err(WirelessError::AlreadyConnecting);
                }
                LinkPhase::Idle | LinkPhase::Failed => *phase = LinkPhase::Scanning,
            }
            PhaseGuard {
                phase: &self.phase,
                armed: true,
            }
        };

        match self.establish(&guard).await {
            Ok(pending) => {
                let mut slot = self.session.lock().await;
                info!("Wireless session ready with {}", pending.link.peer());
                *slot = Some(WirelessSession {
                    link: pending.install(),
                    established: Instant::now(),
                });
                guard.finish(LinkPhase::Ready);
                Ok(())
            }
            Err(e) => {
                warn!("Wireless connect failed: {}", e);
                guard.finish(LinkPhase::Failed);
                Err(e)
            }
        }
    }

    /// Reads and decodes the get-state control point.
    pub async fn read_state(&self) -> Result<DeviceState> {
        let mut slot = self.session.lock().await;
        let session = slot.as_ref().ok_or(WirelessError::NotConnected)?;
        let result = self.read_from(session.link.as_ref()).await;
        if let Err(e) = &result {
            warn!("Wireless read failed, dropping session: {}", e);
            self.teardown(&mut slot).await;
        }
        result
    }

    /// Writes `{"set_state": <tag>}` to the set-state control point.
    pub async fn write_command(&self, cmd: Command) -> Result<()> {
        let mut slot = self.session.lock().await;
        let session = slot.as_ref().ok_or(WirelessError::NotConnected)?;
        let payload = protocol::command_payload(cmd);
        let result = self
            .bounded(
                "write set-state",
                session.link.write(
                    SERVICE_UUID,
                    CHAR_SET_STATE,
                    &payload,
                    WriteKind::WithResponse,
                ),
                WirelessError::WriteError,
            )
            .await;
        match &result {
            Ok(()) => debug!("Sent {} over wireless", cmd),
            Err(e) => {
                warn!("Wireless write failed, dropping session: {}", e);
                self.teardown(&mut slot).await;
            }
        }
        result
    }

    /// Releases the session. Tolerates links the peer already severed.
    pub async fn disconnect(&self) {
        let mut slot = self.session.lock().await;
        self.teardown(&mut slot).await;
    }

    async fn read_from(&self, link: &dyn GattLink) -> Result<DeviceState> {
        let raw = self
            .bounded(
                "read get-state",
                link.read(SERVICE_UUID, CHAR_GET_STATE),
                WirelessError::ReadError,
            )
            .await?;
        debug!("get-state payload: {}", raw);
        match protocol::decode_state_payload(&raw) {
            Ok(state) => Ok(state),
            Err(e) => Err(WirelessError::DecodeError {
                reason: e.to_string(),
                raw,
            }),
        }
    }

    /// Runs the handshake. The returned link is released on drop until it is
    /// installed as the session.
    async fn establish(&self, guard: &PhaseGuard<'_>) -> Result<PendingLink> {
        let peer = self.scan_for_device().await?;

        guard.advance(LinkPhase::Connecting);
        info!("Connecting to '{}' ({})", self.config.device_name, peer);
        let link: Arc<dyn GattLink> = self
            .bounded(
                "connect",
                self.radio.connect(&peer),
                WirelessError::HandshakeError,
            )
            .await?
            .into();
        let pending = PendingLink {
            link,
            limit: self.config.gatt_timeout,
            armed: true,
        };

        if let Err(e) = self.authenticate(pending.link.as_ref(), guard).await {
            pending.release().await;
            return Err(e);
        }
        Ok(pending)
    }

    async fn authenticate(&self, link: &dyn GattLink, guard: &PhaseGuard<'_>) -> Result<()> {
        self.bounded(
            "discover services",
            link.discover_services(),
            WirelessError::HandshakeError,
        )
        .await?;

        guard.advance(LinkPhase::Authenticating);
        let token = protocol::identify_payload(&self.config.token);
        self.bounded(
            "identify",
            link.write(SERVICE_UUID, CHAR_IDENTIFY, &token, WriteKind::WithResponse),
            WirelessError::HandshakeError,
        )
        .await?;
        debug!("Identify accepted by {}", link.peer());
        Ok(())
    }

    /// Scans until the configured name advertises, the scan times out, the
    /// radio reports an error or the transport is cancelled. The scan is
    /// stopped exactly once whichever comes first.
    async fn scan_for_device(&self) -> Result<PeerId> {
        let deadline = Instant::now() + self.config.scan_timeout;

        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return Err(WirelessError::Cancelled),
            res = self.radio.wait_powered_on() => {
                res.map_err(|e| WirelessError::ScanError(e.to_string()))?
            }
            _ = sleep_until(deadline) => {
                warn!("Bluetooth adapter not powered on within {:?}", self.config.scan_timeout);
                return Err(WirelessError::DeviceNotFound);
            }
        }

        info!(
            "Scanning for '{}' ({:?} timeout)",
            self.config.device_name, self.config.scan_timeout
        );
        let mut scan = ScanSubscription::start(self.radio.clone()).await?;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break Err(WirelessError::Cancelled),
                event = scan.next() => match event {
                    Some(ScanEvent::Discovered(adv))
                        if adv.local_name.as_deref() == Some(self.config.device_name.as_str()) =>
                    {
                        info!("Found '{}' at {} (rssi {:?})", self.config.device_name, adv.id, adv.rssi);
                        break Ok(adv.id);
                    }
                    Some(ScanEvent::Discovered(adv)) => {
                        debug!("Ignoring {} ({:?})", adv.id, adv.local_name);
                    }
                    Some(ScanEvent::Error(e)) => break Err(WirelessError::ScanError(e)),
                    None => break Err(WirelessError::ScanError("scan ended unexpectedly".to_string())),
                },
                _ = sleep_until(deadline) => {
                    warn!(
                        "No '{}' advertisement within {:?}",
                        self.config.device_name, self.config.scan_timeout
                    );
                    break Err(WirelessError::DeviceNotFound);
                }
            }
        };

        scan.stop().await;
        outcome
    }

    /// Runs one radio step bounded by the GATT timeout and the cancel token.
    async fn bounded<T, F>(
        &self,
        step: &str,
        fut: F,
        wrap: fn(String) -> WirelessError,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, RadioError>>,
    {
        tokio::select! {
            _ = self.cancel_token.cancelled() => Err(WirelessError::Cancelled),
            res = timeout(self.config.gatt_timeout, fut) => match res {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(wrap(format!("{step}: {e}"))),
                Err(_) => Err(wrap(format!(
                    "{step}: no response within {:?}",
                    self.config.gatt_timeout
                ))),
            },
        }
    }

    async fn teardown(&self, slot: &mut Option<WirelessSession>) {
        let session = slot.take();
        {
            let mut phase = self.phase.lock();
            if matches!(*phase, LinkPhase::Ready | LinkPhase::Failed) {
                *phase = LinkPhase::Idle;
            }
        }
        if let Some(session) = session {
            info!(
                "Disconnecting from {} after {:?}",
                session.link.peer(),
                session.established.elapsed()
            );
            release_link(session.link.as_ref(), self.config.gatt_timeout).await;
        }
    }
}

/// Best-effort disconnect; never waits on the cancel token so it still runs
/// during shutdown.
async fn release_link(link: &dyn GattLink, limit: Duration) {
    match timeout(limit, link.disconnect()).await {
        Ok(Ok(())) => debug!("Disconnected from {}", link.peer()),
        Ok(Err(e)) => debug!("Ignoring disconnect error from {}: {}", link.peer(), e),
        Err(_) => warn!("Disconnect from {} timed out", link.peer()),
    }
}

/// Link opened by a connect attempt that has not become the session yet.
/// Dropping it, e.g. when the connect future is abandoned mid-handshake,
/// disconnects the peer in the background.
struct PendingLink {
    link: Arc<dyn GattLink>,
    limit: Duration,
    armed: bool,
}

impl PendingLink {
    fn install(mut self) -> Arc<dyn GattLink> {
        self.armed = false;
        self.link.clone()
    }

    async fn release(mut self) {
        release_link(self.link.as_ref(), self.limit).await;
        self.armed = false;
    }
}

impl Drop for PendingLink {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let link = self.link.clone();
            let limit = self.limit;
            handle.spawn(async move {
                release_link(link.as_ref(), limit).await;
            });
        }
    }
}

/// Moves the phase forward during a connect attempt and marks it `Failed`
/// if the attempt is dropped before finishing.
struct PhaseGuard<'a> {
    phase: &'a Mutex<LinkPhase>,
    armed: bool,
}

impl PhaseGuard<'_> {
    fn advance(&self, next: LinkPhase) {
        *self.phase.lock() = next;
    }

    fn finish(mut self, last: LinkPhase) {
        self.armed = false;
        *self.phase.lock() = last;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.phase.lock() = LinkPhase::Failed;
        }
    }
}

/// Active scan. The radio's scan is stopped exactly once: by `stop()`, or
/// from `Drop` when the owning future is abandoned.
struct ScanSubscription {
    radio: Option<Arc<dyn Radio>>,
    events: ScanEvents,
}

impl ScanSubscription {
    async fn start(radio: Arc<dyn Radio>) -> Result<Self> {
        match radio.start_scan().await {
            Ok(events) => Ok(Self {
                radio: Some(radio),
                events,
            }),
            Err(e) => {
                if let Err(stop_err) = radio.stop_scan().await {
                    debug!("Ignoring stop_scan error after failed start: {}", stop_err);
                }
                Err(WirelessError::ScanError(e.to_string()))
            }
        }
    }

    async fn next(&mut self) -> Option<ScanEvent> {
        self.events.next().await
    }

    async fn stop(mut self) {
        if let Some(radio) = self.radio.take() {
            if let Err(e) = radio.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
    }
}

impl Drop for ScanSubscription {
    fn drop(&mut self) {
        if let Some(radio) = self.radio.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = radio.stop_scan().await;
                });
            }
        }
    }
}
