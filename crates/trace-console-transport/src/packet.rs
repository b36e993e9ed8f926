//! Engine.IO v4 / Socket.IO protocol v5 (server v4) text packet codec.
//!
//! Only the default namespace and text packets are supported.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Packet decode error.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("Empty packet")]
    Empty,
    #[error("Unknown engine packet type '{0}'")]
    UnknownEngineType(char),
    #[error("Unknown socket packet type '{0}'")]
    UnknownSocketType(char),
    #[error("Binary packets are not supported")]
    Binary,
    #[error("Namespace '{0}' is not supported")]
    Namespace(String),
    #[error("Event packet without an event name")]
    MissingEventName,
    #[error("Invalid packet payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine.IO open handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

/// Socket.IO packet carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        args: Vec<Value>,
        ack: Option<u64>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

/// Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

impl Packet {
    /// Socket.IO event packet for the default namespace.
    #[must_use]
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Message(SocketPacket::Event {
            name: name.into(),
            args,
            ack: None,
        })
    }

    /// Decode a text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a valid packet.
    pub fn decode(frame: &str) -> Result<Self, PacketError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let body = chars.as_str();
        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(body)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(body.to_string())),
            '3' => Ok(Self::Pong(body.to_string())),
            '4' => Ok(Self::Message(SocketPacket::decode(body)?)),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(PacketError::UnknownEngineType(other)),
        }
    }

    /// Encode as a text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(packet) => format!("4{}", packet.encode()),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

impl SocketPacket {
    fn decode(body: &str) -> Result<Self, PacketError> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(PacketError::Binary);
        }

        if rest.starts_with('/') {
            let (nsp, tail) = rest.split_once(',').unwrap_or((rest, ""));
            if nsp != "/" {
                return Err(PacketError::Namespace(nsp.to_string()));
            }
            rest = tail;
        }

        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let ack = rest[..digits].parse::<u64>().ok();
        let payload = &rest[digits..];

        match kind {
            '0' => Ok(Self::Connect(parse_optional(payload)?)),
            '1' => Ok(Self::Disconnect),
            '2' => {
                let mut args: Vec<Value> = serde_json::from_str(payload)?;
                if args.is_empty() {
                    return Err(PacketError::MissingEventName);
                }
                let Value::String(name) = args.remove(0) else {
                    return Err(PacketError::MissingEventName);
                };
                Ok(Self::Event { name, args, ack })
            }
            '3' => Ok(Self::Ack {
                id: ack.unwrap_or_default(),
                args: serde_json::from_str(payload)?,
            }),
            '4' => Ok(Self::ConnectError(
                parse_optional(payload)?.unwrap_or(Value::Null),
            )),
            other => Err(PacketError::UnknownSocketType(other)),
        }
    }

    fn encode(&self) -> String {
        match self {
            Self::Connect(None) => "0".to_string(),
            Self::Connect(Some(auth)) => format!("0{auth}"),
            Self::Disconnect => "1".to_string(),
            Self::Event { name, args, ack } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                let ack = ack.map(|id| id.to_string()).unwrap_or_default();
                format!("2{ack}{}", Value::Array(items))
            }
            Self::Ack { id, args } => format!("3{id}{}", Value::Array(args.clone())),
            Self::ConnectError(data) => format!("4{data}"),
        }
    }
}

fn parse_optional(payload: &str) -> Result<Option<Value>, serde_json::Error> {
    if payload.is_empty() {
        Ok(None)
    } else {
        serde_json::from_str(payload).map(Some)
    }
}
