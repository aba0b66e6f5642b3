use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use terabox_relay_core::config::RelaySettings;
use terabox_relay_transport_telegram::config::{BotSettings, TelegramSettings};
use terabox_relay_transport_telegram::runner::run_bot;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

const REDACTED: &str = "[TELEGRAM_TOKEN]";

/// Anything shaped like a bot token, for tokens other than the configured one.
const TOKEN_SHAPE: &str = r"[0-9]{8,10}:[A-Za-z0-9_-]{35}";

/// Masks the configured bot token, and anything token-shaped, in log output.
#[derive(Debug)]
struct TokenRedactor {
    pattern: Regex,
}

impl TokenRedactor {
    /// Build a redactor for `token`. An empty token only masks token-shaped text.
    fn new(token: &str) -> Result<Self, regex::Error> {
        let token = token.trim();
        let pattern = if token.is_empty() {
            Regex::new(TOKEN_SHAPE)?
        } else {
            // Telegram puts the token in the request path, sometimes with ':' escaped
            let escaped = regex::escape(token);
            let encoded = regex::escape(&token.replace(':', "%3A"));
            Regex::new(&format!("{escaped}|{encoded}|{TOKEN_SHAPE}"))?
        };
        Ok(Self { pattern })
    }

    fn redact<'a>(&self, input: &'a str) -> std::borrow::Cow<'a, str> {
        self.pattern.replace_all(input, REDACTED)
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    redactor: Arc<TokenRedactor>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.inner.write_all(self.redactor.redact(&text).as_bytes())?;
        // The caller must see its own length even though the output changed
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    redactor: Arc<TokenRedactor>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            redactor: Arc::clone(&self.redactor),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Settings are read before the subscriber exists so the token can be masked;
    // errors are reported once logging is up.
    let telegram = TelegramSettings::new();
    let token = telegram
        .as_ref()
        .map(|s| s.telegram_api_key.as_str())
        .unwrap_or_default();
    let redactor = TokenRedactor::new(token).map_err(|e| {
        eprintln!("Failed to build log redaction pattern: {e}");
        e
    })?;
    init_logging(Arc::new(redactor));

    info!("Starting Terabox Relay TG Bot...");

    let telegram = match telegram {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load telegram configuration: {}", e);
            std::process::exit(1);
        }
    };
    let relay = match RelaySettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load relay configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration loaded successfully.");

    run_bot(Arc::new(BotSettings::new(relay, telegram))).await;

    Ok(())
}

fn init_logging(redactor: Arc<TokenRedactor>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        redactor,
    };

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    let default_directives = if debug_mode {
        "debug"
    } else {
        "terabox_relay_core=info,terabox_relay_transport_telegram=info,terabox_relay_bot=info,reqwest=warn,teloxide=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}
