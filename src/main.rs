use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aterges::auth::HostedAuthClient;
use aterges::cli::{self, Commands, IntegrationCommands};
use aterges::config::{self, Config, MASTER_KEY_PLACEHOLDER};
use aterges::jobs::sweeper::{self, SweepConfig};
use aterges::metrics::Metrics;
use aterges::store::memory::MemoryStore;
use aterges::store::postgres::PgStore;
use aterges::store::IntegrationStore;
use aterges::vault::VaultCrypto;
use aterges::verify::{self, CredentialVerifier};
use aterges::{api, upstream, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Migrate) => {
            let db = connect_pg(&cfg).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(Commands::Integration { command }) => {
            let db = connect_pg(&cfg).await?;
            handle_integration_command(&db, &cfg, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// fmt layer (JSON with `ATERGES_LOG_JSON=1`) plus an optional OTLP exporter
/// when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "aterges-gateway"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "aterges=debug,tower_http=debug".into()),
        ))
        .with(telemetry_layer);

    let json = matches!(
        std::env::var("ATERGES_LOG_JSON").as_deref(),
        Ok("1") | Ok("true")
    );
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(())
}

async fn connect_pg(cfg: &Config) -> anyhow::Result<PgStore> {
    let url = cfg
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for this command")?;
    let crypto = VaultCrypto::new(&cfg.master_key)
        .context("a valid ATERGES_MASTER_KEY is required with DATABASE_URL")?;
    PgStore::connect(url, crypto).await
}

/// Postgres when `DATABASE_URL` is set, otherwise the in-memory store.
async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn IntegrationStore>> {
    if cfg.database_url.is_some() {
        tracing::info!("Connecting to database...");
        let db = connect_pg(cfg).await?;
        tracing::info!("Running migrations...");
        db.migrate().await?;
        return Ok(Arc::new(db));
    }

    tracing::warn!("DATABASE_URL is not set; integrations are kept in memory only");
    let crypto = if cfg.master_key == MASTER_KEY_PLACEHOLDER {
        VaultCrypto::ephemeral()
    } else {
        VaultCrypto::new(&cfg.master_key)?
    };
    Ok(Arc::new(MemoryStore::new(crypto)))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let store = open_store(&cfg).await?;

    let identity = Arc::new(HostedAuthClient::new(
        upstream::http_client(Duration::from_secs(10))?,
        cfg.auth_url.clone(),
        cfg.auth_anon_key.clone(),
    ));
    if cfg.auth_jwt_secret.is_none() {
        tracing::info!("AUTH_JWT_SECRET not set; tokens are validated against the identity provider");
    }

    let state = AppState::start(cfg, store, identity)?;

    sweeper::spawn(
        state.store.clone(),
        state.verification.clone(),
        SweepConfig::from(&state.config.verify),
    );
    tracing::info!(
        interval_secs = state.config.verify.sweep_interval.as_secs(),
        "Pending verification sweeper started"
    );

    let app = api::app(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Aterges gateway listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_integration_command(
    db: &PgStore,
    cfg: &Config,
    cmd: IntegrationCommands,
) -> anyhow::Result<()> {
    match cmd {
        IntegrationCommands::List { user } => {
            let rows = db.list(user).await?;
            if rows.is_empty() {
                println!("No integrations for user {}.", user);
                return Ok(());
            }
            println!(
                "{:<36}  {:<12}  {:<10}  {:<6}  NAME",
                "ID", "TYPE", "STATUS", "ACTIVE"
            );
            for row in rows {
                println!(
                    "{:<36}  {:<12}  {:<10}  {:<6}  {}",
                    row.id, row.integration_type, row.status, row.is_active, row.name
                );
                if let Some(err) = row.error_message {
                    println!("{:>38}{}", "", err);
                }
            }
        }
        IntegrationCommands::Verify { user, id } => {
            let integration = db
                .get(user, id)
                .await?
                .context("integration not found for this user")?;
            let secret = db
                .get_credentials(user, id)
                .await?
                .context("no credentials stored for this integration")?;

            let verifier = CredentialVerifier::new(
                upstream::http_client(Duration::from_secs(15))?,
                cfg.openai_api_base.clone(),
            );
            let metrics = Metrics::new()?;
            let result = verifier
                .verify_observed(integration.integration_type, &secret, &metrics)
                .await;
            drop(secret);
            verify::record_outcome(db, id, &result).await?;

            let (status, _) = result.status();
            println!("{} -> {}: {}", integration.name, status, result.message);
            println!("{}", serde_json::to_string_pretty(&result.details)?);
        }
        IntegrationCommands::Delete { user, id } => {
            if db.delete_with_vault(user, id).await? {
                println!("Integration {} deleted.", id);
            } else {
                anyhow::bail!("integration {} not found for user {}", id, user);
            }
        }
    }
    Ok(())
}
