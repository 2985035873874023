//! Base64url / JSON helpers used for every frame exchanged with the card service.
//!
//! The chain is `text <-> UTF-8 <-> Base64 <-> Base64url`. Encoding always
//! strips padding; decoding restores it before handing the data to the
//! standard Base64 engine.

use base64::{Engine as _, engine::general_purpose};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

const BOM: char = '\u{FEFF}';

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid base64url length: {0}")]
    InvalidLength(usize),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, CodecError>;

/// Converts a Base64-encoded string to its Base64url form (no padding).
pub fn base64_to_base64_url(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '=')
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect()
}

/// Converts a Base64url-encoded string back to padded standard Base64.
pub fn base64_url_to_base64(s: &str) -> Result<String> {
    let padding = match s.len() % 4 {
        0 => "",
        2 => "==",
        3 => "=",
        _ => return Err(CodecError::InvalidLength(s.len())),
    };
    let mut out: String = s
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    out.push_str(padding);
    Ok(out)
}

/// Encodes text as UTF-8 and then as Base64url. A leading BOM is dropped.
pub fn text_to_base64_url(s: &str) -> String {
    let s = s.strip_prefix(BOM).unwrap_or(s);
    base64_to_base64_url(&general_purpose::STANDARD.encode(s.as_bytes()))
}

/// Decodes a Base64url string into UTF-8 text.
pub fn text_from_base64_url(s: &str) -> Result<String> {
    let standard = base64_url_to_base64(s)?;
    let bytes = general_purpose::STANDARD.decode(standard)?;
    Ok(String::from_utf8(bytes)?)
}

/// Serializes `value` as JSON and encodes it as Base64url.
///
/// Strings are encoded as JSON string literals, so every output of this
/// function decodes with [`from_base64_url`].
pub fn to_base64_url<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(text_to_base64_url(&json))
}

/// Decodes a Base64url string and parses the JSON it contains.
pub fn from_base64_url<T: DeserializeOwned>(s: &str) -> Result<T> {
    let json = text_from_base64_url(s)?;
    Ok(serde_json::from_str(&json)?)
}
