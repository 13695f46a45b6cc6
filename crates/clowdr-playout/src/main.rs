use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clowdr_core::sigv4::AwsCredentials;
use clowdr_logging::{ClowdrSubscriberBuilder, LogConfig};
use clowdr_playout::{
    AwsService, HttpConfirmer, NotifyState, PlayoutConfig, SnsSubscriber, TemplateDirDeployer,
    build_router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "clowdr-playout", about = "Clowdr broadcast channel stack service")]
struct Cli {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Directory synthesized stack templates are written to
    #[arg(long, default_value = "cdk.out")]
    template_dir: PathBuf,
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

    let mut logging = ClowdrSubscriberBuilder::new().with_config(LogConfig::from_env("clowdr-playout")?);
    if let Some(level) = cli.log_level {
        logging = logging.with_level(level);
    }
    if cli.pretty {
        logging = logging.with_pretty(true);
    }
    let _log_guard = logging.init();

    let mut config = PlayoutConfig::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    let credentials = AwsCredentials::from_env()?;
    let subscriber = SnsSubscriber::new(credentials, config.aws.region.clone())?;
    let aws = Arc::new(AwsService::new(
        config.aws,
        config.host,
        Arc::new(TemplateDirDeployer::new(cli.template_dir)),
        Arc::new(subscriber),
    ));
    aws.init().await?;

    let mut events = aws.stack_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.is_stack_event() => {
                    info!(stack = %event.stack_name, status = %event.resource_status, "Stack status");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Stack event listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let state = NotifyState {
        aws,
        confirmer: Arc::new(HttpConfirmer::new()),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Playout service listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    clowdr_logging::shutdown();
    Ok(())
}
