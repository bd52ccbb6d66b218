use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use bolt_runtime::config::RuntimeConfig;
use bolt_runtime::platform::{DokployClient, PlatformApi};
use bolt_runtime::server::{self, AppState, RemoteRuntime};
use bolt_runtime::session::{IdleSweeper, OrchestratorSettings, SessionOrchestrator};

#[derive(Parser)]
#[command(name = "bolt-runtime", about = "Remote runtime session broker")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve,
    /// Delete every expired session across all actors, then exit
    Sweep,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    // Default to Serve when no subcommand is given, but keep --help and
    // --version working.
    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve
    } else {
        Cli::parse()
    };

    match cli {
        Cli::Serve => run_server().await,
        Cli::Sweep => {
            run_sweep().await?;
            Ok(())
        }
    }
}

async fn run_server() -> Result<(), Box<dyn Error>> {
    let config = RuntimeConfig::from_env();
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bolt_runtime=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(false),
        )
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: false,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    let remote = build_remote(&config).await?;
    let app_state = AppState {
        config: Arc::new(config.clone()),
        remote,
    };

    let app = server::create_app(app_state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, environment = %config.environment, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_sweep() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bolt_runtime=info")),
        )
        .init();

    let config = RuntimeConfig::from_env();
    config.validate()?;
    let Some(remote) = build_remote(&config).await? else {
        anyhow::bail!("sweep requires RUNTIME_PROVIDER=dokploy");
    };

    let request_id = uuid::Uuid::new_v4().to_string();
    let actors = remote
        .sweeper
        .run_all(remote.platform.as_ref(), &request_id)
        .await
        .map_err(|e| anyhow::anyhow!("bulk sweep failed: {e}"))?;
    tracing::info!(actors, "bulk sweep complete");
    Ok(())
}

/// Assemble the platform client, orchestrator, and sweeper for remote mode.
/// Returns `None` when the deployment runs the legacy in-browser provider.
async fn build_remote(config: &RuntimeConfig) -> Result<Option<RemoteRuntime>> {
    if !config.is_remote() {
        tracing::info!("remote runtime disabled (RUNTIME_PROVIDER=webcontainer)");
        return Ok(None);
    }

    let base_url = config
        .dokploy_base_url
        .clone()
        .context("DOKPLOY_BASE_URL missing")?;
    let api_key = config
        .dokploy_api_key
        .clone()
        .context("DOKPLOY_API_KEY missing")?;
    let token_secret = config
        .token_secret
        .clone()
        .context("RUNTIME_TOKEN_SECRET missing")?;

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;
    let platform: Arc<dyn PlatformApi> = Arc::new(DokployClient::new(http, base_url, api_key));

    // Reachability probe: log, never gate startup on it.
    match platform
        .project_all(&uuid::Uuid::new_v4().to_string())
        .await
    {
        Ok(projects) => tracing::info!(projects = projects.len(), "platform reachable"),
        Err(e) => tracing::warn!(error = %e, "platform probe failed, continuing"),
    }

    let sweeper = Arc::new(IdleSweeper::new());
    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::clone(&platform),
        OrchestratorSettings {
            session_idle_min: config.session_idle_min,
            canary_percent: config.canary_rollout_percent,
            server_id: config.dokploy_server_id.clone(),
            canary_server_id: config.dokploy_canary_server_id.clone(),
            token_secret,
        },
        Arc::clone(&sweeper),
    ));

    Ok(Some(RemoteRuntime {
        platform,
        orchestrator,
        sweeper,
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
