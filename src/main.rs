use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use email_catcher::admission::AdmissionFilter;
use email_catcher::config::AppConfig;
use email_catcher::llm::{LlmProvider, create_provider};
use email_catcher::mail::KeyLayout;
use email_catcher::pipeline::{PipelineDeps, build_orchestrator, spawn_pipeline_trigger};
use email_catcher::server::hook_routes;
use email_catcher::store::{FsObjectStore, LibSqlMetadataStore, MetadataStore, ObjectStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Initialize tracing (stdout, plus a daily rolling file when configured)
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "email-catcher.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    // ── Stores ────────────────────────────────────────────────────────────
    let metadata: Arc<dyn MetadataStore> = Arc::new(
        LibSqlMetadataStore::new_local(&config.storage.db_path)
            .await
            .context("Failed to open metadata store")?,
    );
    let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.storage.object_root));
    tracing::info!(
        db = %config.storage.db_path.display(),
        objects = %config.storage.object_root.display(),
        namespace = %config.storage.namespace,
        "Storage ready"
    );

    // ── Summarizer ────────────────────────────────────────────────────────
    let summarizer: Option<Arc<dyn LlmProvider>> = match &config.summary {
        Some(llm_config) => Some(
            create_provider(llm_config).context("Failed to create summarization provider")?,
        ),
        None => {
            tracing::warn!("No summarization API key set; requested summaries will fail");
            None
        }
    };

    // ── Pipeline ──────────────────────────────────────────────────────────
    let deps = PipelineDeps {
        objects,
        metadata: Arc::clone(&metadata),
        summarizer,
        layout: KeyLayout::new(config.storage.namespace.clone()),
        keep_original_copy: config.storage.keep_original_copy,
    };
    let orchestrator = Arc::new(build_orchestrator(deps, &config.pipeline));
    let (trigger, trigger_handle) = spawn_pipeline_trigger(orchestrator);

    // ── HTTP ──────────────────────────────────────────────────────────────
    let admission = Arc::new(AdmissionFilter::new(metadata));
    let app = hook_routes(admission, trigger);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Email catcher listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    // Router dropped its trigger handle; wait for queued and running executions.
    let _ = trigger_handle.await;
    Ok(())
}
