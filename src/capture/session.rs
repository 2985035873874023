use std::{future, pin::Pin, time::Duration};

use serde_json::Value;
use tokio::{
    sync::mpsc::UnboundedReceiver,
    time::{Instant, Sleep, sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{ApiError, ApiErrorKind, CaptureError, CaptureOptions};
use crate::{
    card::{CaptureResult, CardType, Purpose, WireCaptureResult},
    channel::{Channel, ChannelError, ChannelEvent},
    codec,
    feedback::{Feedback, FeedbackMessage, FeedbackNotifier},
    messages::{
        Command, Message, MessageType, MethodType, Notification, NotificationType, Reply,
        ReplyCode,
    },
};

type Outcome = Result<CaptureResult, CaptureError>;

// Protocol chatter, only emitted when the caller asked for it.
macro_rules! verbose {
    ($session:expr, $($arg:tt)+) => {
        if $session.debug {
            debug!($($arg)+);
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingReply,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_settled(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }
}

/// Why the watchdog ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Cancelled,
    Inactive,
}

/// Self-rescheduling single-shot timer checking cancellation and inactivity.
///
/// Kept apart from the channel so that it keeps ticking while a channel
/// call is pending.
struct Watchdog {
    timer: Option<Pin<Box<Sleep>>>,
    interval: Duration,
    inactivity_timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
    last_activity: Instant,
}

impl Watchdog {
    fn new(options: &CaptureOptions) -> Self {
        Self {
            timer: None,
            interval: options.effective_watchdog_interval(),
            inactivity_timeout: options.inactivity_timeout,
            cancellation: options.cancellation_token.clone(),
            last_activity: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Schedules the next check one interval from now.
    fn arm(&mut self) {
        let deadline = Instant::now() + self.interval;
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().reset(deadline),
            None => self.timer = Some(Box::pin(sleep(self.interval))),
        }
    }

    fn stop(&mut self) {
        self.timer = None;
    }

    async fn elapsed(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().await,
            None => future::pending().await,
        }
    }

    /// Runs one check, re-arming the timer unless the session has to end.
    fn check(&mut self) -> Option<Expiry> {
        if self.is_cancelled() {
            return Some(Expiry::Cancelled);
        }
        if let Some(limit) = self.inactivity_timeout {
            if self.last_activity.elapsed() > limit {
                return Some(Expiry::Inactive);
            }
        }
        self.arm();
        None
    }

    /// Awaits a channel call while checks keep running.
    async fn guard<T, F>(&mut self, call: F) -> Result<Result<T, ChannelError>, Expiry>
    where
        F: Future<Output = Result<T, ChannelError>>,
    {
        tokio::pin!(call);
        loop {
            tokio::select! {
                biased;
                done = &mut call => return Ok(done),
                () = self.elapsed() => {
                    if let Some(expiry) = self.check() {
                        return Err(expiry);
                    }
                }
            }
        }
    }
}

/// State machine of a single capture.
///
/// Owns the channel and the watchdog timer. Both are released exactly once,
/// when the session settles or when it is dropped before that.
pub(super) struct CaptureSession {
    channel: Box<dyn Channel>,
    purpose: Purpose,
    card_type: Option<CardType>,
    feedback: FeedbackNotifier,
    watchdog: Watchdog,
    debug: bool,
    state: SessionState,
    aborting: bool,
    torn_down: bool,
}

impl CaptureSession {
    pub(super) fn new(
        channel: Box<dyn Channel>,
        purpose: Purpose,
        options: CaptureOptions,
    ) -> Self {
        Self {
            channel,
            purpose,
            watchdog: Watchdog::new(&options),
            card_type: options.card_type,
            feedback: FeedbackNotifier::new(options.on_feedback),
            debug: options.debug,
            state: SessionState::Idle,
            aborting: false,
            torn_down: false,
        }
    }

    /// Drives the session until it settles.
    ///
    /// Channel events are handled strictly one at a time, in arrival order.
    pub(super) async fn run(mut self, mut events: UnboundedReceiver<ChannelEvent>) -> Outcome {
        self.feedback.notify(&FeedbackMessage::Starting.into());

        self.watchdog.arm();
        if let Some(outcome) = self.connect().await {
            return self.settle(outcome);
        }

        let mut listening = true;
        loop {
            let step = tokio::select! {
                biased;
                event = events.recv(), if listening => match event {
                    Some(event) => self.on_event(event).await,
                    None => {
                        warn!("Channel dropped its listener");
                        listening = false;
                        None
                    }
                },
                () = self.watchdog.elapsed() => self.on_watchdog().await,
            };
            if let Some(outcome) = step {
                return self.settle(outcome);
            }
        }
    }

    /// Records activity. Returns `true` if the caller cancelled meanwhile.
    fn bump(&mut self) -> bool {
        if !self.aborting && self.watchdog.is_cancelled() {
            return true;
        }
        self.watchdog.touch();
        false
    }

    async fn connect(&mut self) -> Option<Outcome> {
        if self.bump() {
            return Some(self.abort().await);
        }
        self.state = SessionState::Connecting;
        verbose!(self, "Connecting");
        match self.watchdog.guard(self.channel.connect()).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                error!("Failed to connect channel: {}", err);
                Some(Err(err.into()))
            }
            Err(expiry) => Some(self.expire(expiry).await),
        }
    }

    async fn send(&mut self, command: &Command) -> Option<Outcome> {
        if self.bump() {
            return Some(self.abort().await);
        }
        verbose!(self, ?command, "Sending command");
        let payload = match command.encode() {
            Ok(payload) => payload,
            Err(err) => return Some(Err(err.into())),
        };
        match self.watchdog.guard(self.channel.send_text(payload)).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                error!("Failed to send command: {}", err);
                Some(Err(err.into()))
            }
            Err(expiry) => Some(self.expire(expiry).await),
        }
    }

    /// Sends the cancel command without waiting for its acknowledgement.
    ///
    /// A send that does not complete within one watchdog interval is given up.
    async fn abort(&mut self) -> Outcome {
        self.aborting = true;
        self.watchdog.touch();
        verbose!(self, "Aborting");
        match Command::cancel().encode() {
            Ok(payload) => {
                match timeout(self.watchdog.interval, self.channel.send_text(payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!("Failed to send cancel command: {}", err),
                    Err(_) => warn!("Cancel command still pending, giving up"),
                }
            }
            Err(err) => warn!("Failed to encode cancel command: {}", err),
        }
        Err(ApiError::aborted().into())
    }

    async fn expire(&mut self, expiry: Expiry) -> Outcome {
        match expiry {
            Expiry::Cancelled => self.abort().await,
            Expiry::Inactive => {
                verbose!(self, state = ?self.state, "Inactivity timeout");
                Err(ApiError::timeout().into())
            }
        }
    }

    async fn on_event(&mut self, event: ChannelEvent) -> Option<Outcome> {
        match event {
            ChannelEvent::ConnectionFailed => Some(Err(ApiError::bad_connection().into())),
            ChannelEvent::ConnectionSucceeded => self.on_connected().await,
            ChannelEvent::DataReceived(frame) => self.on_data(&frame).await,
        }
    }

    async fn on_connected(&mut self) -> Option<Outcome> {
        if self.state != SessionState::Connecting {
            verbose!(self, state = ?self.state, "Ignoring repeated connection");
            return None;
        }
        let command = match Command::get_card_data(self.purpose, self.card_type.as_ref()) {
            Ok(command) => command,
            Err(err) => return Some(Err(err.into())),
        };
        self.state = SessionState::AwaitingReply;
        self.send(&command).await
    }

    async fn on_data(&mut self, frame: &str) -> Option<Outcome> {
        // any frame counts as activity, even unrelated ones
        if self.bump() {
            return Some(self.abort().await);
        }
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                warn!("Ignoring undecodable frame: {}", err);
                return None;
            }
        };
        match message.kind.map(MessageType::try_from) {
            Some(Ok(MessageType::Reply)) => self.on_reply(&message).await,
            Some(Ok(MessageType::Notification)) => {
                self.on_notification(&message);
                None
            }
            Some(Ok(MessageType::AsyncNotification)) => {
                self.on_async_notification(&message);
                None
            }
            Some(Err(kind)) => {
                warn!(kind, "Unknown message type");
                None
            }
            None => {
                warn!("Message without type");
                None
            }
        }
    }

    async fn on_reply(&mut self, message: &Message) -> Option<Outcome> {
        let reply: Reply = match message.payload() {
            Ok(reply) => reply,
            Err(err) => {
                warn!("Ignoring undecodable reply: {}", err);
                return None;
            }
        };
        verbose!(self, ?reply, "Got reply");
        if !reply.is_for(MethodType::GetCardDataEx) {
            verbose!(self, method = ?reply.method, "Ignoring unexpected reply");
            return None;
        }

        match reply.status() {
            ReplyCode::OK => {
                let Some(data) = reply.data.as_deref() else {
                    verbose!(self, "Reply without data, waiting");
                    return None;
                };
                Some(self.decode_result(data))
            }
            ReplyCode::CANCELLED => Some(self.abort().await),
            status if ReplyCode::is_failure(status) => Some(Err(failure(&reply, status).into())),
            status => {
                verbose!(self, status, "Ignoring reply status");
                None
            }
        }
    }

    fn decode_result(&self, data: &str) -> Outcome {
        let wire: WireCaptureResult = codec::from_base64_url(data).map_err(|err| {
            warn!("Undecodable capture result: {}", err);
            ApiError::bad_response()
        })?;
        wire.into_result(self.purpose).map_err(|err| {
            warn!("Invalid card data: {}", err);
            ApiError::bad_response().into()
        })
    }

    fn on_notification(&self, message: &Message) {
        match message.payload::<Notification>() {
            Ok(note) => {
                let event = note.event.map(NotificationType::try_from);
                verbose!(self, ?event, reader = ?note.reader, "Ignoring device notification");
            }
            Err(err) => warn!("Ignoring undecodable notification: {}", err),
        }
    }

    fn on_async_notification(&self, message: &Message) {
        let payload: Value = match message.payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Ignoring undecodable async notification: {}", err);
                return;
            }
        };
        verbose!(self, %payload, "Got async notification");
        match Feedback::from_notification(payload) {
            Some(feedback) => {
                self.feedback.notify(&feedback);
            }
            None => warn!("Ignoring async notification that is not an object"),
        }
    }

    async fn on_watchdog(&mut self) -> Option<Outcome> {
        match self.watchdog.check() {
            Some(expiry) => Some(self.expire(expiry).await),
            None => None,
        }
    }

    fn settle(&mut self, outcome: Outcome) -> Outcome {
        self.teardown();
        match &outcome {
            Ok(result) => {
                self.state = SessionState::Done;
                verbose!(self, ?result, "Capture done");
            }
            Err(err) => {
                self.state = SessionState::Failed;
                debug!("Capture failed: {}", err);
            }
        }
        outcome
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.watchdog.stop();
        self.channel.disconnect();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if !self.state.is_settled() {
            debug!(state = ?self.state, "Capture dropped before settling");
        }
        self.teardown();
    }
}

/// Error of a failure reply. The message in `Data` may be a JSON string,
/// Base64url text or plain text.
fn failure(reply: &Reply, status: u32) -> ApiError {
    let kind = reply
        .data
        .as_deref()
        .and_then(failure_message)
        .map(|message| ApiErrorKind::from_message(&message))
        .unwrap_or(ApiErrorKind::BadResponse);
    ApiError::new(kind).with_code(status)
}

fn failure_message(data: &str) -> Option<String> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if let Ok(message) = codec::from_base64_url::<String>(data) {
        return is_readable(&message).then_some(message);
    }
    match codec::text_from_base64_url(data) {
        Ok(text) if is_readable(&text) => Some(text),
        _ => Some(data.to_string()),
    }
}

fn is_readable(message: &str) -> bool {
    !message.trim().is_empty() && !message.chars().any(char::is_control)
}
