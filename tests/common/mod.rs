#![allow(dead_code)]

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream;
use roomctl::RadioError;
use roomctl::ble::{Advertisement, GattLink, PeerId, Radio, ScanEvent, ScanEvents, WriteKind};
use roomctl::protocol::encode_characteristic;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

pub const TOKEN: &str = "test-token";
pub const DEVICE_NAME: &str = "ROOM_7";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn advert(name: &str) -> ScanEvent {
    ScanEvent::Discovered(Advertisement {
        id: PeerId(format!("peer-{name}")),
        local_name: Some(name.to_string()),
        rssi: Some(-60),
    })
}

pub fn state_payload(json: &str) -> String {
    encode_characteristic(json.as_bytes())
}

enum ScanScript {
    Events(Vec<ScanEvent>),
    Channel(Option<mpsc::Receiver<ScanEvent>>),
}

/// Shared state of the links handed out by [`MockRadio`].
pub struct LinkState {
    pub writes: Mutex<Vec<(Uuid, String)>>,
    pub read_value: Mutex<Result<String, RadioError>>,
    pub fail_discover: AtomicBool,
    pub hang_discover: AtomicBool,
    pub fail_identify: AtomicBool,
    pub fail_write: AtomicBool,
    pub severed: AtomicBool,
    pub disconnects: AtomicUsize,
    pub reads: AtomicUsize,
}

impl LinkState {
    fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            read_value: Mutex::new(Ok(state_payload("{}"))),
            fail_discover: AtomicBool::new(false),
            hang_discover: AtomicBool::new(false),
            fail_identify: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            severed: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn set_read_value(&self, value: Result<String, RadioError>) {
        *self.read_value.lock().unwrap() = value;
    }

    pub fn writes_to(&self, characteristic: Uuid) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == characteristic)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

/// In-memory radio with scripted scan results and counters for every call.
pub struct MockRadio {
    script: Mutex<ScanScript>,
    powered_on: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_connect: AtomicBool,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub listener_drops: Arc<AtomicUsize>,
    pub link: Arc<LinkState>,
}

impl MockRadio {
    /// Every scan yields `events` and then stays silent.
    pub fn with_events(events: Vec<ScanEvent>) -> Self {
        Self::build(ScanScript::Events(events))
    }

    /// The first scan yields whatever is sent on the returned channel.
    pub fn with_channel() -> (Self, mpsc::Sender<ScanEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (Self::build(ScanScript::Channel(Some(rx))), tx)
    }

    /// A radio that finds the controller right away.
    pub fn finding_device() -> Self {
        Self::with_events(vec![advert("LOBBY_TV"), advert(DEVICE_NAME)])
    }

    fn build(script: ScanScript) -> Self {
        Self {
            script: Mutex::new(script),
            powered_on: AtomicBool::new(true),
            fail_start: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            listener_drops: Arc::new(AtomicUsize::new(0)),
            link: Arc::new(LinkState::new()),
        }
    }

    pub fn powered_off(self) -> Self {
        self.powered_on.store(false, Ordering::SeqCst);
        self
    }

    pub fn starts(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.listener_drops.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.link.disconnects.load(Ordering::SeqCst)
    }
}

/// Counts how many times the scan listener is released.
struct TrackedEvents {
    inner: ScanEvents,
    drops: Arc<AtomicUsize>,
}

impl Stream for TrackedEvents {
    type Item = ScanEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ScanEvent>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for TrackedEvents {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn wait_powered_on(&self) -> Result<(), RadioError> {
        if self.powered_on.load(Ordering::SeqCst) {
            Ok(())
        } else {
            std::future::pending().await
        }
    }

    async fn start_scan(&self) -> Result<ScanEvents, RadioError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RadioError::Backend("scan refused".to_string()));
        }
        let inner: ScanEvents = match &mut *self.script.lock().unwrap() {
            ScanScript::Events(events) => {
                Box::pin(stream::iter(events.clone()).chain(stream::pending()))
            }
            ScanScript::Channel(rx) => match rx.take() {
                Some(rx) => Box::pin(ReceiverStream::new(rx)),
                None => Box::pin(stream::pending()),
            },
        };
        Ok(Box::pin(TrackedEvents {
            inner,
            drops: self.listener_drops.clone(),
        }))
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, peer: &PeerId) -> Result<Box<dyn GattLink>, RadioError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(RadioError::Backend("connection rejected".to_string()));
        }
        self.link.severed.store(false, Ordering::SeqCst);
        Ok(Box::new(MockLink {
            peer: peer.clone(),
            state: self.link.clone(),
        }))
    }
}

struct MockLink {
    peer: PeerId,
    state: Arc<LinkState>,
}

#[async_trait]
impl GattLink for MockLink {
    fn peer(&self) -> &PeerId {
        &self.peer
    }

    async fn discover_services(&self) -> Result<(), RadioError> {
        if self.state.hang_discover.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.state.fail_discover.load(Ordering::SeqCst) {
            return Err(RadioError::Backend("discovery failed".to_string()));
        }
        Ok(())
    }

    async fn read(&self, _service: Uuid, _characteristic: Uuid) -> Result<String, RadioError> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        self.state.read_value.lock().unwrap().clone()
    }

    async fn write(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        value: &str,
        _kind: WriteKind,
    ) -> Result<(), RadioError> {
        if characteristic == roomctl::protocol::CHAR_IDENTIFY
            && self.state.fail_identify.load(Ordering::SeqCst)
        {
            return Err(RadioError::Backend("identify rejected".to_string()));
        }
        if characteristic == roomctl::protocol::CHAR_SET_STATE
            && self.state.fail_write.load(Ordering::SeqCst)
        {
            return Err(RadioError::Disconnected);
        }
        self.state
            .writes
            .lock()
            .unwrap()
            .push((characteristic, value.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.state.severed.swap(true, Ordering::SeqCst) {
            return Err(RadioError::Disconnected);
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Loopback controller
// -------------------------------------------------------------------------

/// What a one-shot server saw.
#[derive(Debug)]
pub struct Exchange {
    pub request: serde_json::Value,
    /// The client closed its side before the server gave up waiting.
    pub client_closed: bool,
}

/// Accepts one connection, reads one request line, optionally replies, then
/// waits for the client to close.
pub async fn one_shot_server(reply: Option<&'static [u8]>) -> (u16, JoinHandle<Exchange>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let request = serde_json::from_str(line.trim()).unwrap();

        if let Some(reply) = reply {
            reader.get_mut().write_all(reply).await.unwrap();
        }

        let mut rest = Vec::new();
        let client_closed = matches!(
            timeout(Duration::from_secs(5), reader.read_to_end(&mut rest)).await,
            Ok(Ok(_))
        );
        Exchange {
            request,
            client_closed,
        }
    });
    (port, handle)
}

/// Accepts and drops one connection without replying.
pub async fn hang_up_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut line = [0u8; 256];
        let _ = stream.read(&mut line).await;
    });
    port
}

/// A port with nothing listening.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
