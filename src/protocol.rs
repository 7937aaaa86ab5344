//! Room controller wire protocol.
//! Handles the JSON state/command documents shared by both transports, the
//! base64 framing of GATT characteristic values, and socket request frames.

use crate::error::CodecError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde::de::IgnoredAny;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// GATT service exposed by the controller.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);
/// Identify control point (write).
pub const CHAR_IDENTIFY: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);
/// Set-state control point (write with response).
pub const CHAR_SET_STATE: Uuid = Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);
/// Get-state control point (read).
pub const CHAR_GET_STATE: Uuid = Uuid::from_u128(0x0000fff2_0000_1000_8000_00805f9b34fb);

const KEY_LIGHT_ON: &str = "light_on";
const KEY_DOOR_LOCK: &str = "door_lock";
const KEY_CHANNEL_1: &str = "channel_1";
const KEY_CHANNEL_2: &str = "channel_2";
const KEY_TEMPERATURE: &str = "temperature";
const KEY_PRESSURE: &str = "pressure";
const KEY_HUMIDITY: &str = "humidity";
const KEY_STATE: &str = "state";
const KEY_SET_STATE: &str = "set_state";

define_command! {
    LightOn = 0 => "light_on",
    LightOff = 1 => "light_off",
    DoorLockOpen = 2 => "door_lock_open",
    DoorLockClose = 3 => "door_lock_close",
    Channel1On = 4 => "channel1_on",
    Channel1Off = 5 => "channel1_off",
    Channel2On = 6 => "channel2_on",
    Channel2Off = 7 => "channel2_off",
}

impl Command {
    pub fn light(on: bool) -> Self {
        if on { Command::LightOn } else { Command::LightOff }
    }

    pub fn door_lock(open: bool) -> Self {
        if open {
            Command::DoorLockOpen
        } else {
            Command::DoorLockClose
        }
    }

    pub fn channel1(on: bool) -> Self {
        if on {
            Command::Channel1On
        } else {
            Command::Channel1Off
        }
    }

    pub fn channel2(on: bool) -> Self {
        if on {
            Command::Channel2On
        } else {
            Command::Channel2Off
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label(), self.tag())
    }
}

impl FromStr for Command {
    type Err = String;

    /// Accepts either the label (`channel1_on`) or the numeric tag (`4`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(tag) = s.parse::<u8>() {
            return Command::from_tag(tag).ok_or_else(|| format!("unknown command tag {tag}"));
        }
        Command::from_label(&s.to_ascii_lowercase().replace('-', "_"))
            .ok_or_else(|| format!("unknown command '{s}'"))
    }
}

/// Snapshot of the controller's actuators and sensors.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DeviceState {
    #[serde(rename = "light_on")]
    pub light_on: bool,
    #[serde(rename = "door_lock")]
    pub door_lock_open: bool,
    #[serde(rename = "channel_1")]
    pub channel1_on: bool,
    #[serde(rename = "channel_2")]
    pub channel2_on: bool,
    #[serde(rename = "temperature")]
    pub temperature_c: f64,
    #[serde(rename = "pressure")]
    pub pressure_hpa: f64,
    #[serde(rename = "humidity")]
    pub humidity_pct: f64,
}

impl DeviceState {
    /// Builds a state from a JSON object.
    ///
    /// Never fails: missing or unusable booleans read as `false`, missing or
    /// unusable numbers read as `0`.
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        Self {
            light_on: truthy(obj.get(KEY_LIGHT_ON)),
            door_lock_open: truthy(obj.get(KEY_DOOR_LOCK)),
            channel1_on: truthy(obj.get(KEY_CHANNEL_1)),
            channel2_on: truthy(obj.get(KEY_CHANNEL_2)),
            temperature_c: number(obj.get(KEY_TEMPERATURE)),
            pressure_hpa: number(obj.get(KEY_PRESSURE)),
            humidity_pct: number(obj.get(KEY_HUMIDITY)),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Loose truthiness: any non-empty string counts, including `"false"` and `"0"`.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
        Some(Value::Null) | None => false,
    }
}

/// Loose numeric coercion; anything unusable reads as `0`.
fn number(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::String(s)) => parse_number(s.trim()),
        _ => 0.0,
    };
    if n.is_finite() { n } else { 0.0 }
}

fn parse_number(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let radix = match s.get(..2) {
        Some("0x" | "0X") => 16,
        Some("0o" | "0O") => 8,
        Some("0b" | "0B") => 2,
        _ => return s.parse::<f64>().unwrap_or(0.0),
    };
    u64::from_str_radix(&s[2..], radix).map_or(0.0, |v| v as f64)
}

/// Parses a JSON state document (the top-level object is the state).
pub fn decode_state_document(bytes: &[u8]) -> Result<DeviceState, CodecError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(obj) => Ok(DeviceState::from_object(&obj)),
        _ => Err(CodecError::NotObject),
    }
}

// -------------------------------------------------------------------------
// GATT characteristic framing
// -------------------------------------------------------------------------

/// Frames raw bytes as a characteristic value.
pub fn encode_characteristic(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Unframes a characteristic value into raw bytes.
pub fn decode_characteristic(value: &str) -> Result<Vec<u8>, CodecError> {
    BASE64
        .decode(value.trim())
        .map_err(|e| CodecError::Base64(e.to_string()))
}

/// Value written to the identify control point.
pub fn identify_payload(token: &str) -> String {
    encode_characteristic(token.as_bytes())
}

/// Value written to the set-state control point: `{"set_state": <tag>}`.
pub fn command_payload(cmd: Command) -> String {
    let doc = serde_json::json!({ KEY_SET_STATE: cmd.tag() });
    encode_characteristic(doc.to_string().as_bytes())
}

/// Decodes a value read from the get-state control point.
pub fn decode_state_payload(value: &str) -> Result<DeviceState, CodecError> {
    let bytes = decode_characteristic(value)?;
    let text = std::str::from_utf8(&bytes).map_err(|_| CodecError::Utf8)?;
    decode_state_document(text.as_bytes())
}

// -------------------------------------------------------------------------
// Socket frames
// -------------------------------------------------------------------------

/// One outbound socket request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRequest {
    GetState,
    SetState(Command),
}

#[derive(Serialize)]
struct RequestFrame<'a> {
    identify: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    get_state: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    set_state: Option<u8>,
}

impl SocketRequest {
    /// Serializes the request as a single JSON document followed by `\n`.
    ///
    /// The stock controller parses whatever arrives as one JSON value and
    /// skips the trailing newline as whitespace; line-based peers use it as
    /// the frame delimiter.
    pub fn encode(&self, token: &str) -> Result<Vec<u8>, CodecError> {
        let frame = match self {
            SocketRequest::GetState => RequestFrame {
                identify: token,
                get_state: Some(Map::new()),
                set_state: None,
            },
            SocketRequest::SetState(cmd) => RequestFrame {
                identify: token,
                get_state: None,
                set_state: Some(cmd.tag()),
            },
        };
        let mut bytes = serde_json::to_vec(&frame)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Extracts the nested `state` object from a get-state response frame.
pub fn decode_state_response(frame: &[u8]) -> Result<DeviceState, CodecError> {
    let doc = match serde_json::from_slice::<Value>(frame)? {
        Value::Object(obj) => obj,
        _ => return Err(CodecError::NotObject),
    };
    match doc.get(KEY_STATE) {
        Some(Value::Object(state)) => Ok(DeviceState::from_object(state)),
        None | Some(Value::Null) => Err(CodecError::MissingState),
        Some(_) => Err(CodecError::NotObject),
    }
}

/// How far a buffered response frame has come.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// One complete JSON value ending at the given offset
    Complete(usize),
    /// A prefix of a JSON value; more bytes are needed
    Partial,
    /// Not JSON, and no further bytes can make it so
    Malformed,
}

/// Classifies the bytes received so far by the first JSON value in them.
/// Whitespace, including newlines inside a pretty-printed document, never
/// ends a frame on its own.
pub fn frame_status(buf: &[u8]) -> FrameStatus {
    let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<IgnoredAny>();
    match values.next() {
        Some(Ok(_)) => FrameStatus::Complete(values.byte_offset()),
        Some(Err(e)) if e.is_eof() => FrameStatus::Partial,
        Some(Err(_)) => FrameStatus::Malformed,
        None => FrameStatus::Partial,
    }
}
