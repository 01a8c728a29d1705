use std::borrow::Cow;
use std::env;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber writing to stderr. The level comes from `LOG_LEVEL`
/// (`error`, `warn`, `info`, `debug`), default `info`. Safe to call more than once.
pub fn init_logging() {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

/// Percent-decodes `s`. Input that does not decode to UTF-8 is returned unchanged.
pub fn decode_uri_component(s: &str) -> String {
    urlencoding::decode(s)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| s.to_string())
}

/// Percent-encodes one path segment.
pub fn encode_uri_component(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}
