use std::fs;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use tokoplay_core::auth::{AccountIdentity, CredentialStore};
use tokoplay_core::client::{GameApi, TokoplayClient};
use tokoplay_core::energy::EnergyTracker;
use tokoplay_core::{BotConfig, GameLoopScheduler, SchedulerSettings, StatusBus};

mod token_store;
use token_store::JsonTokenStore;

#[derive(Parser, Debug, Clone)]
#[command(name = "tokoplay")]
#[command(author, version, about = "Tokoplay autoplay bot")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: String,

    /// Override the init-data file named in the config
    #[arg(long)]
    data_file: Option<String>,

    /// Run without the live dashboard (log output only)
    #[arg(long, default_value = "false")]
    headless: bool,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("tokoplay=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub)
        .expect("Failed to set global subscriber");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    info!("Tokoplay bot starting. config={}, headless={}", args.config, args.headless);

    let config = BotConfig::load(&args.config)?;

    let data_file = args.data_file.as_deref().unwrap_or(&config.data_file);
    let init_data = fs::read_to_string(data_file)
        .map_err(|e| anyhow::anyhow!("could not read init data from {data_file}: {e}"))?;
    let account = AccountIdentity::from_init_data(&init_data)?;
    info!(user_id = account.user_id, "account identity loaded");

    let client: Arc<dyn GameApi> = Arc::new(TokoplayClient::new(&config)?);
    let creds = CredentialStore::new(
        Arc::clone(&client),
        account,
        config.token_safety_margin(),
        Some(Box::new(JsonTokenStore::new(&config.token_file))),
    );
    let energy = EnergyTracker::new(config.regen_interval_fallback());

    let status = StatusBus::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Ctrl-C flips the shutdown flag; the loop notices at its next
    // suspension point.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; shutting down");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let dashboard = if args.headless {
        None
    } else {
        Some(tokio::spawn(tokoplay_tui::run_dashboard(
            status.subscribe(),
            shutdown_rx.clone(),
        )))
    };

    let scheduler = GameLoopScheduler::new(
        client,
        creds,
        energy,
        SchedulerSettings::from_config(&config),
        status,
        shutdown_rx,
    );

    let result = scheduler.run().await;
    let _ = shutdown_tx.send(true);
    if let Some(handle) = dashboard {
        let _ = handle.await;
    }

    if let Err(e) = result {
        error!("game loop failed: {e}");
        return Err(e.into());
    }
    Ok(())
}
