use std::sync::OnceLock;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt as _,
    registry::LookupSpan,
    util::SubscriberInitExt as _,
};

static INIT: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber, filtered by `RUST_LOG` (default `info`).
/// Later calls are no-ops.
///
/// Every capture runs inside a `capture` span tagged with a session id and
/// the purpose. Closing the span logs how long the session was busy and idle.
pub fn init_tracing() {
    let _ = INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(capture_layer(std::io::stdout))
            .with(env_filter)
            .try_init();
    });
}

fn capture_layer<S, W>(make_writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(make_writer)
        .with_span_events(FmtSpan::CLOSE)
}
