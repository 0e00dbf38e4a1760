//! Gateway binary: wiring and lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_gateway::config::{self, Config};
use llm_gateway::guardrails::{Executor, ExecutorConfig, Registry};
use llm_gateway::http::{build_router, server};
use llm_gateway::lifecycle::{wait_for_signal, Shutdown};
use llm_gateway::providers::ProviderSet;
use llm_gateway::proxy::AppState;
use llm_gateway::storage::{
    LogBatchWriter, MemoryStorage, MetricBatchWriter, PostgresStorage, Sink, SinkConfig, Storage,
};

#[derive(Parser)]
#[command(name = "llm-gateway")]
#[command(about = "Reverse proxy for LLM APIs with guardrails and async logging")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "configs/gateway.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_gateway=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(config::load_config(&cli.config)?);
    tracing::info!(
        bind_address = %config.server.bind_address,
        providers = config.providers.len(),
        logging_enabled = config.logging.enabled,
        guardrails_enabled = config.guardrails.enabled,
        "configuration loaded"
    );

    // Storage is optional: with logging disabled, or unreachable storage and
    // skip_on_error set, the gateway proxies without persistence.
    let storage = setup_storage(&config).await?;

    let log_sink = storage.as_ref().map(|storage| {
        Arc::new(Sink::new(
            SinkConfig {
                buffer_size: config.logging.buffer_size,
                batch_size: config.logging.batch_size,
                flush_interval: config.logging.flush_interval,
                workers: config.logging.workers,
            },
            Arc::new(LogBatchWriter(storage.clone())),
        ))
    });

    let metrics_sink = match (&storage, config.guardrails.enabled) {
        (Some(storage), true) => Some(Arc::new(Sink::new(
            SinkConfig {
                buffer_size: config.guardrails.metrics_buffer_size,
                batch_size: config.guardrails.metrics_batch_size,
                flush_interval: config.logging.flush_interval,
                workers: config.guardrails.metrics_workers,
            },
            Arc::new(MetricBatchWriter(storage.clone())),
        ))),
        _ => None,
    };

    let executor = if config.guardrails.enabled {
        Some(Arc::new(setup_guardrails(&config, metrics_sink.clone())))
    } else {
        None
    };

    let providers = Arc::new(ProviderSet::from_config(&config.providers)?);

    let state = AppState {
        providers,
        executor,
        log_sink: log_sink.clone(),
        metrics_sink: metrics_sink.clone(),
        config: config.clone(),
    };
    let router = build_router(state);

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let shutdown = Shutdown::new(log_sink, metrics_sink, storage);
    let server_task = tokio::spawn(server::serve(listener, router, shutdown.drain_signal()));

    wait_for_signal().await;
    shutdown.run(server_task).await;
    Ok(())
}

async fn setup_storage(
    config: &Config,
) -> Result<Option<Arc<dyn Storage>>, Box<dyn std::error::Error>> {
    if !config.logging.enabled {
        return Ok(None);
    }

    match config.storage.backend.as_str() {
        "memory" => Ok(Some(Arc::new(MemoryStorage::new()) as Arc<dyn Storage>)),
        _ => match PostgresStorage::connect(&config.storage.postgres).await {
            Ok(storage) => Ok(Some(Arc::new(storage) as Arc<dyn Storage>)),
            Err(err) if config.logging.skip_on_error => {
                tracing::warn!(error = %err, "storage unavailable, logging disabled");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        },
    }
}

fn setup_guardrails(
    config: &Config,
    metrics_sink: Option<Arc<Sink<llm_gateway::storage::GuardrailMetric>>>,
) -> Executor {
    let registry = Registry::with_builtins();

    let (input_guardrails, input_errors) =
        registry.load_all(&config.guardrails.input_guardrails);
    let (output_guardrails, output_errors) =
        registry.load_all(&config.guardrails.output_guardrails);
    for err in input_errors.iter().chain(output_errors.iter()) {
        tracing::warn!(error = %err, "guardrail failed to load");
    }
    tracing::info!(
        input = input_guardrails.len(),
        output = output_guardrails.len(),
        "guardrails initialized"
    );

    Executor::new(ExecutorConfig {
        input_guardrails,
        output_guardrails,
        metrics: metrics_sink,
        timeout: config.guardrails.timeout,
    })
}
