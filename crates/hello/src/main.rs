//! Reference binary for Switchyard.
//!
//! Usage:
//!   sy-hello [--config switchyard.toml] [serve]
//!   sy-hello call helloWorld --input '{"name":"Ada"}' [--http]
//!   sy-hello watch clock --input '{"interval_ms":500}'
//!   sy-hello validate
//!
//! Env vars:
//!   SY_CONFIG   config file (default: switchyard.toml)
//!   RUST_LOG    tracing filter

mod cli;
mod demo;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};

use sy_client::{CallError, Client, DuplexClientBuilder, DuplexLink, HttpLink, Link, LinkChain, LoggerLink};
use sy_domain::config::{Config, LogFormat, ObservabilityConfig, OtlpExport};
use sy_server::RpcServer;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        None | Some(Command::Serve) => {
            let tracer_provider = init_tracing(&config.observability);
            run_server(config, tracer_provider).await
        }
        Some(Command::Call { path, input, http }) => {
            init_cli_tracing();
            let input = cli::parse_input(input.as_deref())?;
            let client = build_client(&config, http)?;
            let out = client.at(&path).query_raw(input).await?;
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Some(Command::Watch { path, input }) => {
            init_cli_tracing();
            let input = cli::parse_input(input.as_deref())?;
            watch(&config, &path, input).await
        }
        Some(Command::Validate) => {
            if !cli::validate(&config, &cli.config) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Tracing for the `serve` command, formatted per `log_format`.
///
/// With an `[observability.otlp]` table spans are also exported over
/// OTLP/gRPC; the returned provider must be shut down on exit to flush
/// them.
fn init_tracing(obs: &ObservabilityConfig) -> Option<SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sy_server=debug"));

    let (json, compact) = match obs.log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Compact => (None, Some(tracing_subscriber::fmt::layer().compact())),
    };

    let provider = obs.otlp.as_ref().and_then(span_exporter);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("switchyard")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json)
        .with(compact)
        .with(otel_layer)
        .init();

    provider
}

/// `None` (after a warning on stderr) when the exporter cannot be built;
/// the server then runs with logs only.
fn span_exporter(otlp: &OtlpExport) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp.endpoint.clone())
        .build()
    {
        Ok(e) => e,
        Err(e) => {
            eprintln!(
                "WARNING: no span export to {}: {e}; continuing with logs only",
                otlp.endpoint
            );
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(otlp.service_name.clone())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(Sampler::TraceIdRatioBased(otlp.effective_ratio()))
            .with_resource(resource)
            .build(),
    )
}

/// Compact stderr-only tracing for the client commands, so stdout stays
/// clean for results.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run_server(
    config: Config,
    tracer_provider: Option<SdkTracerProvider>,
) -> anyhow::Result<()> {
    for issue in config.validate() {
        tracing::warn!(%issue, "config issue");
    }

    let server = RpcServer::builder(demo::router())
        .from_config(&config.server)
        .build();
    let app = server
        .into_router()
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent_requests,
        ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, ws_path = %config.server.ws_path, "Switchyard listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }
    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}

/// Logger in front of either the HTTP or the duplex transport.
fn build_client(config: &Config, http: bool) -> anyhow::Result<Client> {
    let transport: Arc<dyn Link> = if http {
        let base = format!(
            "http://{}:{}{}",
            config.server.host,
            config.server.port,
            config.server.prefix.as_deref().unwrap_or("")
        );
        Arc::new(HttpLink::new(base)?)
    } else {
        let duplex = DuplexClientBuilder::from_config(&config.client).build()?;
        Arc::new(DuplexLink::new(duplex))
    };
    Ok(Client::new(LinkChain::new(vec![Arc::new(LoggerLink::new()), transport])))
}

async fn watch(config: &Config, path: &str, input: Option<serde_json::Value>) -> anyhow::Result<()> {
    let client = build_client(config, false)?;
    let unsubscribe = client
        .at(path)
        .subscribe(&input, |msg: Result<serde_json::Value, CallError>| match msg {
            Ok(value) => println!("{value}"),
            Err(e) => eprintln!("subscription ended: {e}"),
        })
        .await?;

    let _ = tokio::signal::ctrl_c().await;
    unsubscribe();
    Ok(())
}
