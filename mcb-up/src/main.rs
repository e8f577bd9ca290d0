//! mcb-up - Mapillary→Commons batch upload client
//!
//! Headless driver: connects the duplex upload channel, refreshes the
//! filename denylist, optionally starts a collection import, and dispatches
//! inbound server pushes into the upload orchestrator until the channel
//! closes.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use mcb_common::config::TomlConfig;
use mcb_common::types::TitleStatus;
use mcb_up::denylist::Denylist;
use mcb_up::orchestrator::UploadOrchestrator;
use mcb_up::store::{GlobalDefaults, Store};
use mcb_up::verify::TitleVerifier;
use mcb_up::{channel, store};

#[derive(Debug, Parser)]
#[command(name = "mcb-up", version, about = "Mapillary→Commons batch upload client")]
struct Cli {
    /// Config file path (falls back to MCB_CONFIG, then the platform
    /// config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Channel endpoint override, host:port
    #[arg(long, value_name = "HOST:PORT")]
    endpoint: Option<String>,

    /// Collection source handle to import at startup
    #[arg(long, value_name = "HANDLE")]
    input: Option<String>,

    /// After the import completes, verify every title and upload all items
    /// that pass verification
    #[arg(long)]
    upload_all: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    info!("Starting mcb-up");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TomlConfig::load(cli.config.as_deref())?;
    if let Some(endpoint) = &cli.endpoint {
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("endpoint must be host:port"))?;
        config.channel.host = host.to_string();
        config.channel.port = port.parse()?;
    }
    info!(
        endpoint = format!("{}:{}", config.channel.host, config.channel.port),
        api = %config.api.base_url,
        "Configuration resolved"
    );

    let globals = GlobalDefaults {
        handler: config.upload.handler.clone(),
        description: store::Description {
            language: config.upload.language.clone(),
            value: String::new(),
        },
        ..GlobalDefaults::default()
    };
    let shared_store = Store::shared(globals);
    let shared_denylist = Denylist::shared();

    // Denylist refresh fails soft; verification proceeds with empty lists
    // until a refresh succeeds.
    let http = reqwest::Client::builder()
        .user_agent(concat!("mcb-up/", env!("CARGO_PKG_VERSION")))
        .build()?;
    {
        let mut denylist = shared_denylist.write().await;
        denylist.refresh(&http, &config.api).await;
        if let Some(error) = &denylist.last_error {
            tracing::warn!(error, "denylist refresh failed");
        }
    }

    let verifier = TitleVerifier::new(
        shared_store.clone(),
        shared_denylist.clone(),
        &config.api,
    )?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();

    let channel_config = config.channel.clone();
    let channel_task = tokio::spawn(async move {
        channel::run_channel(&channel_config, outbound_rx, inbound_tx).await
    });

    let orchestrator = UploadOrchestrator::new(shared_store.clone(), outbound_tx);

    if let Some(input) = &cli.input {
        info!(input, "Requesting collection import");
        orchestrator.fetch_images(input).await;
    }

    let mut upload_started = false;
    while let Some(message) = inbound_rx.recv().await {
        orchestrator.handle_message(message).await;

        if cli.upload_all && !upload_started {
            let import_done = {
                let store = shared_store.read().await;
                !store.items().is_empty() && !store.is_loading
            };
            if import_done {
                upload_started = true;
                let ids: Vec<String> = {
                    let mut store = shared_store.write().await;
                    store.select_all(true);
                    store.items().iter().map(|i| i.id.clone()).collect()
                };
                info!(items = ids.len(), "Import complete, verifying titles");
                verifier.verify(&ids, false).await;

                // Only items with a verified-available title may upload
                {
                    let mut store = shared_store.write().await;
                    for id in &ids {
                        let available = store
                            .item(id)
                            .map(|i| i.meta.title_status == Some(TitleStatus::Available))
                            .unwrap_or(false);
                        if !available {
                            store.set_selected(id, false);
                        }
                    }
                }
                orchestrator.start_upload().await;
            }
        }
    }

    channel_task.await??;
    info!("Channel closed, shutting down");

    Ok(())
}
