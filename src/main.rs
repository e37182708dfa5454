use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use secrets_manager::config::{self, Config};
use secrets_manager::models::group::SecretGroupPrototype;
use secrets_manager::models::pagination::Window;
use secrets_manager::models::prototype::SecretVersionPrototype;
use secrets_manager::store::postgres::PgStore;
use secrets_manager::store::SecretFilter;
use secrets_manager::{build_app, jobs, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Migrate) => {
            let url = cfg
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to run migrations")?;
            let db = PgStore::connect(url).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(cli::Commands::Group { command }) => {
            let state = AppState::connect(cfg).await?;
            handle_group_command(command, &state).await
        }
        Some(cli::Commands::Secret { command }) => {
            let state = AppState::connect(cfg).await?;
            handle_secret_command(command, &state).await
        }
        Some(cli::Commands::RotateDue) => {
            let state = AppState::connect(cfg).await?;
            let report = jobs::rotation::tick(&state.manager).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        None => run_server(cfg, None).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Stdout logging filtered by `RUST_LOG`, plus OTLP export when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "secrets-manager"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "secrets_manager=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run_server(cfg: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(cfg.port);
    let rotation_every = Duration::from_secs(cfg.rotation_interval_secs);
    let state = Arc::new(AppState::connect(cfg).await?);

    jobs::rotation::spawn(state.manager.clone(), rotation_every);
    tracing::info!(
        every_secs = rotation_every.as_secs(),
        "Background rotation job started"
    );

    let app = build_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("secrets manager listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn handle_group_command(cmd: cli::GroupCommands, state: &AppState) -> anyhow::Result<()> {
    match cmd {
        cli::GroupCommands::List => {
            let groups = state.manager.list_groups().await?;
            println!("{:<38} {:<32} {:<25}", "ID", "NAME", "CREATED");
            for g in groups {
                println!("{:<38} {:<32} {:<25}", g.id, g.name, g.created_at.to_rfc3339());
            }
        }
        cli::GroupCommands::Create { name, description } => {
            let group = state
                .manager
                .create_group(SecretGroupPrototype { name, description })
                .await?;
            println!("Secret group created:\n  Name: {}\n  ID:   {}", group.name, group.id);
        }
    }
    Ok(())
}

async fn handle_secret_command(cmd: cli::SecretCommands, state: &AppState) -> anyhow::Result<()> {
    match cmd {
        cli::SecretCommands::List { groups, search } => {
            let filter = SecretFilter {
                groups: groups.unwrap_or_default(),
                search,
                ..Default::default()
            };
            let (secrets, total) = state.manager.list_secrets(&filter, Window::all()).await?;
            if secrets.is_empty() {
                println!("No secrets found.");
                return Ok(());
            }
            println!(
                "{:<38} {:<28} {:<20} {:<14} {:<8}",
                "ID", "NAME", "TYPE", "STATE", "VERSIONS"
            );
            for s in &secrets {
                println!(
                    "{:<38} {:<28} {:<20} {:<14} {:<8}",
                    s.id,
                    s.name,
                    s.secret_type(),
                    s.state.as_str(),
                    s.versions_total
                );
            }
            println!("{} secret(s)", total);
        }
        cli::SecretCommands::Rotate { id } => {
            let id = uuid::Uuid::parse_str(&id).context("Invalid secret ID")?;
            let version = state
                .manager
                .create_version(id, SecretVersionPrototype::default())
                .await?;
            println!(
                "Secret {} rotated, new version {}",
                id,
                version["id"].as_str().unwrap_or("?")
            );
        }
    }
    Ok(())
}
