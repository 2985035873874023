//! Wire DTOs exchanged with the card service over the channel.
//!
//! Every frame is a Base64url-encoded JSON [`Message`]; its `Data` field is
//! another Base64url-encoded JSON document whose shape depends on `Type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    card::{CardType, Purpose},
    codec::{self, CodecError},
};

/// Version of the `GetCardDataEx` parameters understood by the service.
pub const PROTOCOL_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Reply = 0,
    Notification = 1,
    AsyncNotification = 2,
}

impl TryFrom<i64> for MessageType {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Reply),
            1 => Ok(MessageType::Notification),
            2 => Ok(MessageType::AsyncNotification),
            other => Err(other),
        }
    }
}

/// Outer envelope of every inbound frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "Type", default)]
    pub kind: Option<i64>,
    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Message {
    pub fn new(kind: MessageType, data: impl Into<String>) -> Self {
        Self {
            kind: Some(kind as i64),
            data: Some(data.into()),
        }
    }

    pub fn decode(frame: &str) -> Result<Self, CodecError> {
        codec::from_base64_url(frame)
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        codec::to_base64_url(self)
    }

    /// Decodes the inner payload. A missing payload decodes as an empty string.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, CodecError> {
        codec::from_base64_url(self.data.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum MethodType {
    EnumerateReaders = 1,
    EnumerateCards = 2,
    GetCardInfo = 3,
    GetCardUid = 4,
    GetCardAuthData = 5,
    GetCardEnrollData = 6,
    GetCardDataEx = 10,
    GetCardCancel = 11,
    Subscribe = 100,
    Unsubscribe = 101,
}

impl From<MethodType> for u32 {
    fn from(method: MethodType) -> Self {
        method as u32
    }
}

impl TryFrom<u32> for MethodType {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MethodType::EnumerateReaders,
            2 => MethodType::EnumerateCards,
            3 => MethodType::GetCardInfo,
            4 => MethodType::GetCardUid,
            5 => MethodType::GetCardAuthData,
            6 => MethodType::GetCardEnrollData,
            10 => MethodType::GetCardDataEx,
            11 => MethodType::GetCardCancel,
            100 => MethodType::Subscribe,
            101 => MethodType::Unsubscribe,
            other => return Err(format!("Unknown method: {other}")),
        })
    }
}

/// Request sent to the card service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "Method")]
    pub method: MethodType,
    #[serde(rename = "Parameters", default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
}

impl Command {
    pub fn new(method: MethodType) -> Self {
        Self {
            method,
            parameters: None,
        }
    }

    pub fn with_parameters<P: Serialize>(
        method: MethodType,
        params: &P,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            method,
            parameters: Some(codec::to_base64_url(params)?),
        })
    }

    pub fn get_card_data(
        purpose: Purpose,
        card_type: Option<&CardType>,
    ) -> Result<Self, CodecError> {
        Self::with_parameters(
            MethodType::GetCardDataEx,
            &CaptureParameters::new(purpose, card_type),
        )
    }

    pub fn cancel() -> Self {
        Self::new(MethodType::GetCardCancel)
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        codec::to_base64_url(self)
    }
}

/// Parameters of `GetCardDataEx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureParameters {
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "Case")]
    pub purpose: Purpose,
    /// Card type filter, empty for any card
    #[serde(rename = "Type")]
    pub card_type: String,
}

impl CaptureParameters {
    pub fn new(purpose: Purpose, card_type: Option<&CardType>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            purpose,
            card_type: card_type.map(|t| t.as_str().to_string()).unwrap_or_default(),
        }
    }
}

/// Status codes carried by [`Reply::result`].
pub struct ReplyCode;

impl ReplyCode {
    pub const OK: u32 = 0;
    /// `HRESULT_FROM_WIN32(ERROR_CANCELLED)`
    pub const CANCELLED: u32 = 0x8007_04C7;

    pub fn is_failure(code: u32) -> bool {
        code > 0x7FFF_FFFF
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    #[serde(rename = "Method", default)]
    pub method: Option<u32>,
    /// Raw status, may be sent signed
    #[serde(rename = "Result", default)]
    pub result: Option<i64>,
    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Reply {
    pub fn is_for(&self, method: MethodType) -> bool {
        self.method == Some(method.into())
    }

    /// Status reinterpreted as an unsigned 32-bit value.
    pub fn status(&self) -> u32 {
        self.result.unwrap_or(0) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    ReaderConnected = 1,
    ReaderDisconnected = 2,
    CardInserted = 3,
    CardRemoved = 4,
}

impl TryFrom<i64> for NotificationType {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NotificationType::ReaderConnected),
            2 => Ok(NotificationType::ReaderDisconnected),
            3 => Ok(NotificationType::CardInserted),
            4 => Ok(NotificationType::CardRemoved),
            other => Err(other),
        }
    }
}

/// Reader or card hardware event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "Event", default)]
    pub event: Option<i64>,
    #[serde(rename = "Reader", default, skip_serializing_if = "Option::is_none")]
    pub reader: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationExType {
    Paused = -1,
    Complete = 0,
    NoReader = 1,
    NoCard = 2,
    CardError = 3,
    TooMany = 4,
}

impl TryFrom<i64> for NotificationExType {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(NotificationExType::Paused),
            0 => Ok(NotificationExType::Complete),
            1 => Ok(NotificationExType::NoReader),
            2 => Ok(NotificationExType::NoCard),
            3 => Ok(NotificationExType::CardError),
            4 => Ok(NotificationExType::TooMany),
            other => Err(other),
        }
    }
}

/// Progress notification sent while a capture is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncNotification {
    #[serde(rename = "Event", default, skip_serializing_if = "Option::is_none")]
    pub event: Option<i64>,
    #[serde(rename = "Reader", default, skip_serializing_if = "Option::is_none")]
    pub reader: Option<String>,
    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
