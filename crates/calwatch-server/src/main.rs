//! calwatch webhook service entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use calwatch_core::{TracingConfig, TracingOutputFormat, init_tracing};
use calwatch_providers::{CalendarApi, InMemoryCalendar};
use calwatch_server::{
    BroadcastSink, FanoutSink, ReminderService, ServerConfig, ServerError, ServerResult,
    StateStore, TimerScheduler, router,
};

/// calwatch - calendar reminders that follow their events
#[derive(Debug, Parser)]
#[command(name = "calwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CALWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides `listen_addr`)
    #[arg(long, short)]
    listen: Option<SocketAddr>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    debug: bool,

    /// Human-readable logs instead of JSON lines
    #[arg(long)]
    pretty: bool,

    /// Serve from an in-memory calendar instead of Google
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.debug {
        TracingConfig::debug()
    } else if cli.pretty {
        TracingConfig::service().with_format(TracingOutputFormat::Pretty)
    } else {
        TracingConfig::service()
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "calwatch stopped");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    let mut config = match cli.config {
        Some(ref path) => ServerConfig::load_from(path)?,
        None => ServerConfig::load()?,
    };
    if let Some(listen) = cli.listen {
        config = config.with_listen_addr(listen);
    }
    config.validate()?;

    let api = build_api(&config, cli.memory)?;
    let (scheduler, due) = TimerScheduler::new();
    let broadcast = BroadcastSink::new(config.notify.broadcast_capacity);
    let sink = FanoutSink::from_config(&config.notify, broadcast, config.request_timeout())?;

    let mut service = ReminderService::new(
        api,
        Arc::new(scheduler),
        Arc::new(sink),
        config.channel_settings(),
    );
    let store = config.state_path.as_ref().map(StateStore::new);
    let snapshot = match store {
        Some(ref store) => match store.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %store.path().display(), error = %e, "Ignoring unreadable state");
                None
            }
        },
        None => None,
    };
    if let Some(store) = store {
        service = service.with_store(store);
    }

    let service = Arc::new(service);
    service.spawn_dispatcher(due);
    if let Some(snapshot) = snapshot {
        service.restore(snapshot).await;
    }

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(
        addr = %config.listen_addr,
        callback = %config.callback_url(),
        provider = %service.api().name(),
        "calwatch listening"
    );

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("calwatch shut down");
    Ok(())
}

fn build_api(config: &ServerConfig, memory: bool) -> ServerResult<Arc<dyn CalendarApi>> {
    if memory {
        warn!("Using the in-memory calendar; no real events will be watched");
        return Ok(Arc::new(InMemoryCalendar::new()));
    }
    google_api(config)
}

#[cfg(feature = "google")]
fn google_api(config: &ServerConfig) -> ServerResult<Arc<dyn CalendarApi>> {
    use calwatch_providers::google::GoogleCalendarClient;

    let reference = config
        .access_token
        .as_deref()
        .ok_or_else(|| ServerError::config("access_token is required for the Google provider"))?;
    let token = calwatch_server::secret::resolve(reference)?;
    let client =
        GoogleCalendarClient::with_base_url(&config.api_base_url, token, config.request_timeout())?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "google"))]
fn google_api(_config: &ServerConfig) -> ServerResult<Arc<dyn CalendarApi>> {
    Err(ServerError::config(
        "built without the `google` feature; run with --memory",
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
