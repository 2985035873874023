//! Card data capture through the local card service.
//!
//! [`capture`] opens a channel to the service, requests authentication or
//! enrollment data and waits for a single reply, reporting progress through
//! an optional feedback handler.

pub mod capture;
pub mod card;
pub mod channel;
pub mod codec;
pub mod config;
pub mod feedback;
pub mod messages;
pub mod telemetry;

pub use capture::{ApiError, ApiErrorKind, CaptureError, CaptureOptions, capture};
pub use card::{
    AuthenticationData, CaptureResult, CardData, CardTechnology, CardType, EnrollmentData, Purpose,
};
pub use channel::{Channel, ChannelConfig, ChannelError, ChannelFactory, ChannelListener};
pub use feedback::{Feedback, FeedbackHandler, FeedbackMessage};
