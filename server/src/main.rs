mod auth;
mod email;
mod error;
mod model;
mod request_tracing;
mod routes;
mod server_config;
mod sheets;
#[cfg(test)]
mod testing;
mod util;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use auth::GoogleCredentials;
use axum::{extract::FromRef, Router};
use email::{AssetStore, MessageComposer, TemplateRenderer};
use lettre::message::Mailbox;
use lib_email_clients::{gmail::GmailSender, DeliveryClient, MailTransport, RetryPolicy};
use mimalloc::MiMalloc;
use routes::AppRouter;
use server_config::ServerConfig;
use sheets::{GoogleSheetsClient, TabularSource};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;
pub type ServerConfigRef = Arc<ServerConfig>;
pub type SheetSource = Arc<dyn TabularSource>;
pub type RendererRef = Arc<TemplateRenderer>;
pub type ComposerRef = Arc<MessageComposer>;
pub type Delivery = Arc<DeliveryClient<Arc<dyn MailTransport>>>;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub config: ServerConfigRef,
    pub sheets: SheetSource,
    pub renderer: RendererRef,
    pub composer: ComposerRef,
    pub delivery: Delivery,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        sheets: SheetSource,
        transport: Arc<dyn MailTransport>,
    ) -> anyhow::Result<Self> {
        let from = config
            .mail
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("mail.from is not a mailbox: {}", config.mail.from))?;
        let bcc = config
            .mail
            .bcc
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .map(|b| {
                b.parse::<Mailbox>()
                    .with_context(|| format!("mail.bcc is not a mailbox: {b}"))
            })
            .transpose()?;

        let renderer = TemplateRenderer::new(
            config.template_dir(),
            config.timezone,
            &config.settings.asset_base,
        );
        let composer = MessageComposer::new(from, bcc, AssetStore::new(&config.root));
        let delivery = DeliveryClient::new(transport, RetryPolicy::from(&config.mail.retry));

        Ok(Self {
            config: Arc::new(config),
            sheets,
            renderer: Arc::new(renderer),
            composer: Arc::new(composer),
            delivery: Arc::new(delivery),
        })
    }

    /// Logs every catalog entry whose inline images are not on disk. Sending
    /// with such a template fails, the server still starts.
    fn check_assets(&self) {
        for entry in self.config.catalog.entries() {
            let missing = self.composer.assets().missing(&entry.inline);
            if !missing.is_empty() {
                tracing::warn!(
                    "Template {} has missing inline assets: {}",
                    entry.id,
                    missing.join(", ")
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let config = ServerConfig::load()?;
    println!("{}", config);

    let http_client: HttpClient = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
    let credentials = Arc::new(
        GoogleCredentials::load(
            http_client.clone(),
            config.token_path(),
            config.google_client.clone(),
        )
        .await?,
    );

    let sheets = Arc::new(GoogleSheetsClient::new(
        http_client.clone(),
        config.sheets.spreadsheet_id.clone(),
        credentials.clone(),
    ));
    let gmail = GmailSender::new(http_client, credentials);
    match gmail.profile_email().await {
        Ok(address) => tracing::info!("Sending mail as {}", address),
        Err(e) => tracing::warn!("Gmail profile check failed: {:#}", e),
    }

    let port = config.settings.port;
    let state = ServerState::new(config, sheets, Arc::new(gmail))?;
    state.check_assets();

    let router = AppRouter::create(state)?;
    run_server(router, port).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutting down");
}

async fn run_server(router: Router, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Trials server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
