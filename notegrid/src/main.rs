use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notegrid::config::{Config, OcrMode, ProcessOptions};
use notegrid::framework::{SharedSink, TracingSink};
use notegrid::ingest::{ingest_output, GraphExtractor, HttpGraphExtractor, InMemoryNoteStore};
use notegrid::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "notegrid")]
#[command(about = "Split a photographed page of handwritten notes into structured records")]
struct Args {
    /// Page image (JPEG, PNG, ...)
    image: PathBuf,

    /// Source of the page, e.g. "rocketbook"
    #[arg(long)]
    source_type: Option<String>,

    /// Extraction mode: "hybrid" (local OCR plus vision) or "llm" (vision only)
    #[arg(long, default_value = "hybrid")]
    ocr_mode: OcrMode,

    /// Vision model override, e.g. "openai/gpt-4o"
    #[arg(long)]
    vision_model: Option<String>,

    /// Treat the whole page as a single note
    #[arg(long)]
    single: bool,

    /// Process regions one at a time
    #[arg(long)]
    sequential: bool,

    /// Local confidence (0-100) under which a region is flagged
    #[arg(long, default_value_t = 60)]
    ocr_threshold: u8,

    /// Overall time budget in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Persist notes into an in-memory store and send them to graph extraction
    #[arg(long)]
    ingest_as: Option<String>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

impl Args {
    fn options(&self) -> ProcessOptions {
        ProcessOptions {
            ocr_confidence_threshold: self.ocr_threshold,
            vision_model_preference: self.vision_model.clone(),
            source_type: self.source_type.clone(),
            ocr_mode: self.ocr_mode,
            multi_note_detection_enabled: !self.single,
            parallel_processing: !self.sequential,
            timeout_secs: self.timeout_secs,
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "notegrid=info".into());
    let json = std::env::var("NOTEGRID_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn render<T: serde::Serialize>(value: &T, pretty: bool) -> anyhow::Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env();
    let sink: SharedSink = Arc::new(TracingSink);
    let orchestrator = Orchestrator::new(&config, sink);
    let options = args.options();

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    tracing::info!(image = %args.image.display(), mode = %options.ocr_mode, "processing page");
    let result = tokio::select! {
        result = orchestrator.process(&args.image, &options) => result,
        _ = cancel_token.cancelled() => {
            tracing::warn!("cancelled before processing finished");
            return Ok(ExitCode::from(130));
        }
    };

    let output = match result {
        Ok(output) => output,
        Err(partial) => {
            tracing::error!(error = partial.error_message(), "processing failed");
            println!("{}", render(&partial, args.pretty)?);
            return Ok(ExitCode::FAILURE);
        }
    };

    println!("{}", render(&output, args.pretty)?);

    if let Some(user_id) = &args.ingest_as {
        let graph: Option<Arc<dyn GraphExtractor>> = match &config.graph {
            Some(graph_config) => Some(Arc::new(HttpGraphExtractor::new(graph_config)?)),
            None => None,
        };
        let store = InMemoryNoteStore::new();
        let report = ingest_output(
            &output,
            user_id,
            options.source_type.as_deref(),
            &store,
            graph,
        )
        .await;

        // The process exits right after, so wait for graph extraction here.
        for task in report.graph_tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "graph extraction task panicked");
            }
        }
        tracing::info!(
            stored = report.stored.len(),
            skipped = report.skipped.len(),
            "ingest finished"
        );
    }

    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    cancel_token.cancel();
}
