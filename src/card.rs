use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::capture::CaptureError;

/// Purpose of the card data collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Card data will be used for authentication
    Auth,
    /// Card data will be used for enrollment
    Enroll,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Auth => "auth",
            Purpose::Enroll => "enroll",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(CaptureError::EmptyPurpose),
            "auth" => Ok(Purpose::Auth),
            "enroll" => Ok(Purpose::Enroll),
            other => Err(CaptureError::Internal(format!("Unknown purpose: {other}"))),
        }
    }
}

/// Card type, as requested and as reported back by the card service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardType {
    /// Contactless ID
    #[serde(rename = "CID")]
    ContactlessId,
    /// Contactless Writable
    #[serde(rename = "CW")]
    ContactlessWritable,
    /// Any other type reported by a newer service
    #[serde(untagged)]
    Other(String),
}

impl CardType {
    pub fn as_str(&self) -> &str {
        match self {
            CardType::ContactlessId => "CID",
            CardType::ContactlessWritable => "CW",
            CardType::Other(name) => name,
        }
    }
}

impl FromStr for CardType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("Empty card type".to_string()),
            "CID" => Ok(CardType::ContactlessId),
            "CW" => Ok(CardType::ContactlessWritable),
            other => Ok(CardType::Other(other.to_string())),
        }
    }
}

/// Card technology tag reported by the card service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardTechnology {
    #[serde(rename = "Proximity 125 kHz")]
    Proximity125Khz,
    #[serde(rename = "iClass Legacy")]
    IClassLegacy,
    #[serde(rename = "MIFARE Classic")]
    MifareClassic,
    #[serde(rename = "Seos")]
    Seos,
    #[serde(rename = "MIFARE DESFire")]
    MifareDesfire,
    /// Cards from non PC/SC Sony PaSoRi readers, CUID only
    #[serde(rename = "FeliCa Sony PaSoRi")]
    FelicaSonyPasori,
    /// Cards from RFIdeas readers, CUID only
    #[serde(rename = "RFIdeas")]
    RfIdeas,
    /// Cards from non PC/SC Legic readers, CUID only
    #[serde(rename = "LEGIC")]
    Legic,
    /// Card CUID from high frequency readers
    #[serde(rename = "Card Serial Number (CSN)")]
    CardSerialNumber,
    #[serde(untagged)]
    Other(String),
}

/// Data returned for an authentication capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationData {
    /// Base64url blob with the card CUID (Contactless ID cards)
    #[serde(rename = "UID", default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(rename = "OTP", default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

/// Data returned for an enrollment capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentData {
    #[serde(rename = "UID", default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(rename = "tech", default, skip_serializing_if = "Option::is_none")]
    pub technology: Option<CardTechnology>,
    /// Address of the record on iClass Legacy or MIFARE Classic cards
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub address: Option<String>,
    /// Base64url AES-256 key for Contactless Writable cards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CardData {
    Authentication(AuthenticationData),
    Enrollment(EnrollmentData),
}

impl CardData {
    /// Interprets a raw `cardData` object according to the capture purpose.
    pub fn from_value(purpose: Purpose, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match purpose {
            Purpose::Auth => CardData::Authentication(serde_json::from_value(value)?),
            Purpose::Enroll => CardData::Enrollment(serde_json::from_value(value)?),
        })
    }
}

/// Terminal success payload of [`capture`](crate::capture::capture).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<Purpose>,
    pub card_type: CardType,
    #[serde(rename = "tech", skip_serializing_if = "Option::is_none")]
    pub technology: Option<CardTechnology>,
    pub card_data: CardData,
}

/// `CaptureResult` as it arrives in a reply, before `cardData` is typed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireCaptureResult {
    #[serde(default)]
    pub purpose: Option<Purpose>,
    pub card_type: CardType,
    #[serde(rename = "tech", default)]
    pub technology: Option<CardTechnology>,
    #[serde(default)]
    pub card_data: Value,
}

impl WireCaptureResult {
    /// Types the card data with the session's purpose. A purpose echoed by
    /// the service takes precedence.
    pub fn into_result(self, requested: Purpose) -> Result<CaptureResult, serde_json::Error> {
        let purpose = self.purpose.unwrap_or(requested);
        let raw = match self.card_data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Ok(CaptureResult {
            purpose: self.purpose,
            card_type: self.card_type,
            technology: self.technology,
            card_data: CardData::from_value(purpose, raw)?,
        })
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or a number, got {other}"
        ))),
    }
}
