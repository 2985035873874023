mod error;
mod session;

pub use error::{ApiError, ApiErrorKind, CaptureError};
pub use session::SessionState;

use std::{fmt, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, error, info_span};
use uuid::Uuid;

use crate::{
    card::{CaptureResult, CardType, Purpose},
    channel::{CHANNEL_NAME, ChannelConfig, ChannelFactory, ChannelListener},
    config::CaptureSettings,
    feedback::{Feedback, FeedbackHandler},
};
use session::CaptureSession;

pub(crate) const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_millis(200);

/// Options of a single [`capture`] call. Every field is optional.
#[derive(Clone)]
pub struct CaptureOptions {
    /// Card type filter, `None` accepts any card
    pub card_type: Option<CardType>,
    /// Inactivity timeout, `None` waits forever
    pub inactivity_timeout: Option<Duration>,
    /// Caller-owned cancellation token, observed by the session
    pub cancellation_token: Option<CancellationToken>,
    pub on_feedback: Option<FeedbackHandler>,
    /// Passed through to the channel factory
    pub channel_config: ChannelConfig,
    /// Log protocol traffic at debug level
    pub debug: bool,
    /// Period of the cancellation and inactivity checks
    pub watchdog_interval: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            card_type: None,
            inactivity_timeout: None,
            cancellation_token: None,
            on_feedback: None,
            channel_config: ChannelConfig::default(),
            debug: false,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
        }
    }
}

impl CaptureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds options from loaded settings.
    ///
    /// # Examples
    ///
    /// ```
    /// # use card_capture::capture::CaptureOptions;
    /// # use card_capture::config::Config;
    /// let config = Config::load().expect("failed to load config");
    /// let options = CaptureOptions::from_settings(&config.capture);
    /// assert!(!options.debug);
    /// ```
    pub fn from_settings(settings: &CaptureSettings) -> Self {
        Self {
            card_type: settings.card_type.clone(),
            inactivity_timeout: settings.inactivity_timeout_secs.map(Duration::from_secs),
            cancellation_token: None,
            on_feedback: None,
            channel_config: settings.channel.clone(),
            debug: settings.debug,
            watchdog_interval: Duration::from_millis(settings.watchdog_interval_ms),
        }
    }

    pub fn with_card_type(mut self, card_type: CardType) -> Self {
        self.card_type = Some(card_type);
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    pub fn with_feedback<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Feedback) + Send + Sync + 'static,
    {
        self.on_feedback = Some(Arc::new(handler));
        self
    }

    pub fn with_channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the watchdog period. Zero falls back to the default period.
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    pub(crate) fn effective_watchdog_interval(&self) -> Duration {
        if self.watchdog_interval.is_zero() {
            DEFAULT_WATCHDOG_INTERVAL
        } else {
            self.watchdog_interval
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

impl fmt::Debug for CaptureOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("card_type", &self.card_type)
            .field("inactivity_timeout", &self.inactivity_timeout)
            .field("cancellation_token", &self.cancellation_token.is_some())
            .field("on_feedback", &self.on_feedback.is_some())
            .field("channel_config", &self.channel_config)
            .field("debug", &self.debug)
            .field("watchdog_interval", &self.watchdog_interval)
            .finish()
    }
}

/// Captures card data from the local card service.
///
/// Opens a channel named [`CHANNEL_NAME`] through `channels`, requests card
/// data for `purpose` and waits for the reply. The channel is always
/// disconnected before this function returns, and also when the returned
/// future is dropped early.
///
/// Fails without opening a channel when `purpose` is `None`
/// ([`CaptureError::EmptyPurpose`]) or when the cancellation token is
/// already cancelled ([`ApiErrorKind::Aborted`]).
pub async fn capture<F>(
    channels: &F,
    purpose: impl Into<Option<Purpose>>,
    options: CaptureOptions,
) -> Result<CaptureResult, CaptureError>
where
    F: ChannelFactory + ?Sized,
{
    let Some(purpose) = purpose.into() else {
        return Err(CaptureError::EmptyPurpose);
    };
    if options.is_cancelled() {
        return Err(ApiError::aborted().into());
    }

    let span = info_span!("capture", session = %Uuid::new_v4(), %purpose);
    async move {
        if options.debug {
            tracing::debug!(?options, "Starting capture");
        }
        let (listener, events) = ChannelListener::new();
        let channel = channels
            .create(CHANNEL_NAME, &options.channel_config, listener)
            .map_err(|err| {
                error!("Failed to create channel: {}", err);
                CaptureError::from(err)
            })?;
        CaptureSession::new(channel, purpose, options)
            .run(events)
            .await
    }
    .instrument(span)
    .await
}
