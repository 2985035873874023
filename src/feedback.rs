use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::messages::{AsyncNotification, NotificationExType};

/// Well-known feedback messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackMessage {
    /// The capture process is starting
    Starting,
    /// The capture process is paused, e.g. the page lost focus
    Paused,
    /// Card reader is disconnected or not found
    ConnectReader,
    /// Generic prompt to insert, tap or swipe a card
    UseCard,
    /// A card was not read or recognized
    UseDifferentCard,
    /// A card of unexpected type was used
    UseDifferentCardType,
    /// Multiple cards were used at once
    UseSingleCard,
}

impl FeedbackMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackMessage::Starting => "Starting",
            FeedbackMessage::Paused => "Paused",
            FeedbackMessage::ConnectReader => "ConnectReader",
            FeedbackMessage::UseCard => "UseCard",
            FeedbackMessage::UseDifferentCard => "UseDifferentCard",
            FeedbackMessage::UseDifferentCardType => "UseDifferentCardType",
            FeedbackMessage::UseSingleCard => "UseSingleCard",
        }
    }
}

impl fmt::Display for FeedbackMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-terminal progress notification delivered to the caller.
///
/// Notifications from the card service keep their JSON object in `payload`.
/// `message` and `code` are filled in where the payload is recognized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Feedback {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            code: None,
            payload: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn is(&self, message: FeedbackMessage) -> bool {
        self.message.as_deref() == Some(message.as_str())
    }

    /// Wraps an async notification payload into a feedback.
    ///
    /// Returns `None` only when the payload is not a JSON object.
    pub fn from_notification(payload: Value) -> Option<Self> {
        if !payload.is_object() {
            return None;
        }
        if let Some(message) = payload.get("message").and_then(Value::as_str) {
            return Some(Feedback {
                message: Some(message.to_string()),
                code: payload.get("code").and_then(Value::as_i64),
                payload: Some(payload),
            });
        }

        let note = AsyncNotification::deserialize(&payload).ok();
        let message = note
            .as_ref()
            .and_then(|note| note.event)
            .and_then(|event| match NotificationExType::try_from(event) {
                Ok(NotificationExType::Complete) => None,
                Ok(NotificationExType::Paused) => Some(FeedbackMessage::Paused.to_string()),
                Ok(NotificationExType::NoReader) => {
                    Some(FeedbackMessage::ConnectReader.to_string())
                }
                Ok(NotificationExType::NoCard) => Some(FeedbackMessage::UseCard.to_string()),
                Ok(NotificationExType::CardError) => {
                    Some(FeedbackMessage::UseDifferentCard.to_string())
                }
                Ok(NotificationExType::TooMany) => Some(FeedbackMessage::UseSingleCard.to_string()),
                Err(event) => Some(event.to_string()),
            });
        let code = note
            .as_ref()
            .and_then(|note| note.data.as_ref())
            .and_then(Value::as_i64)
            .or_else(|| payload.get("code").and_then(Value::as_i64));
        Some(Feedback {
            message,
            code,
            payload: Some(payload),
        })
    }
}

impl From<FeedbackMessage> for Feedback {
    fn from(message: FeedbackMessage) -> Self {
        Feedback::new(message.as_str())
    }
}

/// Caller-supplied feedback callback.
pub type FeedbackHandler = Arc<dyn Fn(&Feedback) + Send + Sync>;

/// Delivers feedback to an optional handler, containing any panic it raises.
#[derive(Clone, Default)]
pub struct FeedbackNotifier {
    handler: Option<FeedbackHandler>,
}

impl FeedbackNotifier {
    pub fn new(handler: Option<FeedbackHandler>) -> Self {
        Self { handler }
    }

    /// Returns `false` if the handler panicked.
    pub fn notify(&self, feedback: &Feedback) -> bool {
        let Some(handler) = &self.handler else {
            return true;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| handler(feedback))) {
            Ok(()) => true,
            Err(_) => {
                warn!(message = ?feedback.message, "Feedback handler panicked");
                false
            }
        }
    }
}

impl fmt::Debug for FeedbackNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackNotifier")
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_notification_mapping() {
        let cases = [
            (json!({"Event": -1}), "Paused"),
            (json!({"Event": 1, "Reader": "HID OMNIKEY 5022"}), "ConnectReader"),
            (json!({"Event": 2}), "UseCard"),
            (json!({"Event": 3}), "UseDifferentCard"),
            (json!({"Event": 4}), "UseSingleCard"),
            (json!({"Event": 42}), "42"),
        ];
        for (payload, expected) in cases {
            let feedback = Feedback::from_notification(payload.clone()).unwrap();
            assert_eq!(feedback.message.as_deref(), Some(expected));
            assert_eq!(feedback.payload, Some(payload));
        }
    }

    #[test]
    fn test_notification_code_and_verbatim_message() {
        let feedback = Feedback::from_notification(json!({"Event": 3, "Data": 17})).unwrap();
        assert!(feedback.is(FeedbackMessage::UseDifferentCard));
        assert_eq!(feedback.code, Some(17));

        let feedback =
            Feedback::from_notification(json!({"message": "UseDifferentCardType", "code": 5}))
                .unwrap();
        assert!(feedback.is(FeedbackMessage::UseDifferentCardType));
        assert_eq!(feedback.code, Some(5));
    }

    #[test]
    fn test_unrecognized_objects_are_forwarded() {
        let completion = json!({"Event": 0, "Reader": "R1"});
        let feedback = Feedback::from_notification(completion.clone()).unwrap();
        assert_eq!(feedback.message, None);
        assert_eq!(feedback.payload, Some(completion));

        let status = json!({"Reader": "R1", "Status": "Waiting"});
        let feedback = Feedback::from_notification(status.clone()).unwrap();
        assert_eq!(feedback.message, None);
        assert_eq!(feedback.code, None);
        assert_eq!(feedback.payload, Some(status));

        let odd = json!({"Event": "soon", "code": 9});
        assert_eq!(Feedback::from_notification(odd).unwrap().code, Some(9));

        assert!(Feedback::from_notification(json!("text")).is_none());
        assert!(Feedback::from_notification(json!([1, 2])).is_none());
    }

    #[test]
    fn test_notifier_contains_panics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier = FeedbackNotifier::new(Some(Arc::new(move |f: &Feedback| {
            sink.lock().unwrap().push(f.message.clone());
            panic!("handler failure");
        })));

        assert!(!notifier.notify(&FeedbackMessage::Starting.into()));
        assert_eq!(*seen.lock().unwrap(), vec![Some("Starting".to_string())]);
        assert!(FeedbackNotifier::default().notify(&Feedback::new("UseCard")));
    }
}
