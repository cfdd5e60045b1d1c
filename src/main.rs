use dotenvy::dotenv;
use oxide_relay::bot::handlers::{
    self, get_user_id_safe, is_operator_callback, is_operator_message, Command, DownloadClient,
};
use oxide_relay::bot::media::classify_media;
use oxide_relay::config::{
    Settings, DOWNLOAD_READ_TIMEOUT_SECS, PUBLISHED_CACHE_MAX_SIZE, PUBLISHED_CACHE_TTL_SECS,
    SHUTDOWN_GRACE_SECS, TELEGRAM_API_TIMEOUT_SECS,
};
use oxide_relay::storage::{ObjectStore, R2Storage};
use oxide_relay::transfer::{PublishedViews, TransferContext, TransferRegistry, TransferSupervisor};
use regex::Regex;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::update_listeners::webhooks;
use tracing::{debug, error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    bot_url: Regex,
    bot_token: Regex,
    access_key: Regex,
    secret_key: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            bot_url: Regex::new(r"(/(?:file/)?bot)[0-9]+:[A-Za-z0-9_-]+")?,
            bot_token: Regex::new(r"[0-9]{8,10}:[A-Za-z0-9_-]{35}")?,
            access_key: Regex::new(r"(R2_ACCESS_KEY(?:_ID)?=)[^\s&]+")?,
            secret_key: Regex::new(r"(R2_SECRET(?:_ACCESS)?_KEY=)[^\s&]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self.bot_url.replace_all(input, "$1[TELEGRAM_TOKEN]");
        let output = self.bot_token.replace_all(&output, "[TELEGRAM_TOKEN]");
        let output = self.access_key.replace_all(&output, "$1[MASKED]");
        let output = self.secret_key.replace_all(&output, "$1[MASKED]");
        output.into_owned()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length even though the redacted text may differ.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Redaction must be ready before the first log line.
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Oxide Relay...");

    let settings = init_settings();
    let store = init_storage(&settings).await;

    tokio::fs::create_dir_all(&settings.staging_dir).await?;
    info!(path = %settings.staging_dir.display(), "Staging directory ready.");

    let supervisor = Arc::new(TransferSupervisor::new(TransferContext::new(
        store,
        Arc::new(TransferRegistry::new()),
        PublishedViews::new(PUBLISHED_CACHE_TTL_SECS, PUBLISHED_CACHE_MAX_SIZE),
        settings.public_base(),
    )));

    let api_client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(TELEGRAM_API_TIMEOUT_SECS))
        .build()?;
    let bot = Bot::with_client(settings.telegram_token.clone(), api_client);

    let download_client = DownloadClient(
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(TELEGRAM_API_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(DOWNLOAD_READ_TIMEOUT_SECS))
            .build()?,
    );

    let handler = setup_handler();

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![
            settings.clone(),
            supervisor.clone(),
            download_client
        ])
        .enable_ctrlc_handler()
        .build();

    if let Some(url) = settings.webhook_url.as_deref() {
        let addr: SocketAddr = settings.webhook_addr.parse()?;
        let listener = webhooks::axum(bot, webhooks::Options::new(addr, url.parse()?)).await?;
        info!(%addr, "Bot is running (webhook)...");
        dispatcher
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("An error from the update listener"),
            )
            .await;
    } else {
        info!("Bot is running (long polling)...");
        dispatcher.dispatch().await;
    }

    info!("Dispatcher stopped, shutting down transfers...");
    supervisor
        .shutdown(Duration::from_secs(SHUTDOWN_GRACE_SECS))
        .await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    info!("Configuration loaded successfully.");
    Arc::new(settings)
}

async fn init_storage(settings: &Settings) -> Arc<dyn ObjectStore> {
    match R2Storage::new(settings).await {
        Ok(s) => {
            info!("R2 Storage initialized.");
            if s.check_connection().await.is_err() {
                // Not fatal: the bucket may come back before the first upload.
                error!("R2 Storage connection check returned error.");
            }
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to initialize R2 Storage: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery, settings: Arc<Settings>| {
                    is_operator_callback(&q, &settings)
                })
                .endpoint(handle_callback),
        )
        .branch(Update::filter_callback_query().endpoint(handle_unauthorized_callback))
        .branch(
            Update::filter_message().branch(
                dptree::filter(|msg: Message, settings: Arc<Settings>| {
                    is_operator_message(&msg, &settings)
                })
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| classify_media(&msg).is_some())
                        .endpoint(handle_media),
                )
                .branch(dptree::endpoint(handle_text)),
            ),
        )
        .branch(
            // Everyone else is ignored without a reply.
            Update::filter_message().endpoint(handle_unauthorized),
        )
}

async fn handle_unauthorized(msg: Message) -> Result<(), teloxide::RequestError> {
    debug!(user_id = get_user_id_safe(&msg), "Ignoring message from non-operator");
    respond(())
}

async fn handle_unauthorized_callback(
    bot: Bot,
    q: CallbackQuery,
) -> Result<(), teloxide::RequestError> {
    debug!(
        user_id = q.from.id.0.cast_signed(),
        "Ignoring callback from non-operator"
    );
    let _ = bot.answer_callback_query(q.id).await;
    respond(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    supervisor: Arc<TransferSupervisor>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_command(bot, msg, cmd, supervisor).await {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_media(
    bot: Bot,
    msg: Message,
    supervisor: Arc<TransferSupervisor>,
    http: DownloadClient,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_media(bot, msg, supervisor, http, settings).await {
        error!("Media handler error: {}", e);
    }
    respond(())
}

async fn handle_text(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_text(bot, msg).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    supervisor: Arc<TransferSupervisor>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_callback(bot, q, supervisor).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_token_in_file_urls() {
        let patterns = RedactionPatterns::new().expect("patterns");
        let line = "GET https://api.telegram.org/file/bot123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw1/documents/file_1.pdf failed";
        let redacted = patterns.redact(line);
        assert!(!redacted.contains("AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw1"));
        assert!(redacted.contains("/file/bot[TELEGRAM_TOKEN]/documents/file_1.pdf"));
    }

    #[test]
    fn redacts_r2_credentials() {
        let patterns = RedactionPatterns::new().expect("patterns");
        let redacted = patterns.redact("R2_ACCESS_KEY_ID=abc R2_SECRET_KEY=def&x=1");
        assert_eq!(redacted, "R2_ACCESS_KEY_ID=[MASKED] R2_SECRET_KEY=[MASKED]&x=1");
    }
}
