use std::sync::Arc;

use clap::Parser;
use clowdr_actions::{
    ActionsConfig, AppState, ChimeProvider, DisabledProvider, EmailSender, HasuraClient,
    LogOnlySender, MeetingProvider, MemoryStore, SendGridSender, serve,
};
use clowdr_core::SystemClock;
use clowdr_logging::{ClowdrSubscriberBuilder, LogConfig};

#[derive(Parser)]
#[command(name = "clowdr-actions", about = "Clowdr actions service for Hasura")]
struct Cli {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
    /// Human-readable console output instead of JSON lines
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging = ClowdrSubscriberBuilder::new().with_config(LogConfig::from_env("clowdr-actions")?);
    if let Some(level) = cli.log_level {
        logging = logging.with_level(level);
    }
    if cli.pretty {
        logging = logging.with_pretty(true);
    }
    let _log_guard = logging.init();

    let mut config = ActionsConfig::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    let sender: Arc<dyn EmailSender> = match &config.sendgrid {
        Some(sendgrid) => Arc::new(SendGridSender::new(sendgrid.clone())),
        None => Arc::new(LogOnlySender),
    };
    let provider: Arc<dyn MeetingProvider> = match config.chime.clone() {
        Some(chime) => Arc::new(ChimeProvider::new(chime)?),
        None => {
            tracing::warn!("No Chime configured, room meetings are unavailable");
            Arc::new(DisabledProvider)
        }
    };
    let clock = Arc::new(SystemClock);

    let state = match config.hasura.clone() {
        Some(hasura) => {
            let store = Arc::new(HasuraClient::new(hasura));
            AppState::new(config, store, provider, sender, clock)
        }
        None => {
            tracing::warn!("No Hasura configured, using in-memory store");
            AppState::new(config, Arc::new(MemoryStore::new()), provider, sender, clock)
        }
    };

    serve(state).await?;
    clowdr_logging::shutdown();
    Ok(())
}
