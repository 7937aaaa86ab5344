//! TCP fallback transport.
//! Every call is one connection, one request frame, one response frame and
//! one close. Nothing is kept between calls.

use crate::config::ControllerConfig;
use crate::error::SocketError;
use crate::platform::{self, Platform};
use crate::protocol::{self, Command, DeviceState, FrameStatus, SocketRequest};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

const READ_CHUNK: usize = 1024;

/// A specialized Result type for socket operations.
pub type Result<T> = std::result::Result<T, SocketError>;

#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub host: String,
    pub port: u16,
    pub token: String,
    /// Bound for each of connect, write and read
    pub timeout: Duration,
    pub max_frame_len: usize,
}

impl From<&ControllerConfig> for SocketConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            token: config.token.clone(),
            timeout: config.socket_timeout,
            max_frame_len: config.max_frame_len,
        }
    }
}

/// How the end of the response frame is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameMode {
    /// One complete JSON value, or whatever arrived before EOF
    Document,
    /// Any inbound data acknowledges the request
    Ack,
}

pub struct SocketTransport {
    config: SocketConfig,
    eligible: bool,
    cancel_token: CancellationToken,
}

impl SocketTransport {
    pub fn new(config: SocketConfig, platform: Platform) -> Self {
        Self::with_cancel_token(config, platform, CancellationToken::new())
    }

    pub fn with_cancel_token(
        config: SocketConfig,
        platform: Platform,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            eligible: platform::socket_eligible(platform),
            cancel_token,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Sends `get_state` and decodes the nested `state` object of the reply.
    pub async fn read_state(&self) -> Result<DeviceState> {
        let frame = self
            .exchange(SocketRequest::GetState, FrameMode::Document)
            .await?;
        debug!("get_state response: {}", String::from_utf8_lossy(&frame));
        protocol::decode_state_response(&frame).map_err(|e| SocketError::Protocol(e.to_string()))
    }

    /// Sends `set_state`. The controller has no status field; any reply
    /// counts as acknowledgment.
    pub async fn write_command(&self, cmd: Command) -> Result<()> {
        let frame = self
            .exchange(SocketRequest::SetState(cmd), FrameMode::Ack)
            .await?;
        debug!("{} acknowledged ({} bytes)", cmd, frame.len());
        Ok(())
    }

    async fn exchange(&self, request: SocketRequest, mode: FrameMode) -> Result<Vec<u8>> {
        if !self.eligible {
            return Err(SocketError::Unsupported);
        }
        if self.cancel_token.is_cancelled() {
            return Err(SocketError::Cancelled);
        }

        let payload = request
            .encode(&self.config.token)
            .map_err(|e| SocketError::Protocol(e.to_string()))?;
        let addr = self.address();

        info!("Connecting to controller at {}", addr);
        let mut stream = tokio::select! {
            _ = self.cancel_token.cancelled() => return Err(SocketError::Cancelled),
            res = timeout(self.config.timeout, TcpStream::connect(&addr)) => match res {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(SocketError::Connect(format!("{addr}: {e}"))),
                Err(_) => {
                    return Err(SocketError::Connect(format!(
                        "{addr}: no connection within {:?}",
                        self.config.timeout
                    )));
                }
            },
        };
        let _ = stream.set_nodelay(true);

        let result = tokio::select! {
            _ = self.cancel_token.cancelled() => Err(SocketError::Cancelled),
            res = self.round_trip(&mut stream, &payload, mode) => res,
        };

        // Close on every path, including timeout and cancellation.
        if let Err(e) = stream.shutdown().await {
            debug!("Ignoring shutdown error for {}: {}", addr, e);
        }
        drop(stream);

        if let Err(e) = &result {
            warn!("Socket exchange with {} failed: {}", addr, e);
        }
        result
    }

    async fn round_trip(
        &self,
        stream: &mut TcpStream,
        payload: &[u8],
        mode: FrameMode,
    ) -> Result<Vec<u8>> {
        debug!("Sending {}", String::from_utf8_lossy(payload).trim_end());
        timeout(self.config.timeout, stream.write_all(payload))
            .await
            .map_err(|_| SocketError::Timeout)??;

        timeout(self.config.timeout, self.read_frame(stream, mode))
            .await
            .map_err(|_| SocketError::Timeout)?
    }

    async fn read_frame(&self, stream: &mut TcpStream, mode: FrameMode) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                if frame.is_empty() {
                    return Err(SocketError::Protocol(
                        "connection closed before a response frame arrived".to_string(),
                    ));
                }
                return Ok(frame);
            }
            frame.extend_from_slice(&chunk[..n]);

            if mode == FrameMode::Ack {
                return Ok(frame);
            }
            match protocol::frame_status(&frame) {
                FrameStatus::Complete(end) => {
                    frame.truncate(end);
                    return Ok(frame);
                }
                FrameStatus::Malformed => {
                    return Err(SocketError::Protocol(format!(
                        "malformed response frame: {}",
                        String::from_utf8_lossy(&frame)
                    )));
                }
                FrameStatus::Partial => {}
            }
            if frame.len() > self.config.max_frame_len {
                return Err(SocketError::Protocol(format!(
                    "response frame exceeds {} bytes",
                    self.config.max_frame_len
                )));
            }
        }
    }
}
