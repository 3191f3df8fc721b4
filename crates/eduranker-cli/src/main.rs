//! Eduranker CLI
//!
//! Usage:
//!   eduranker run --question "how to learn rust"
//!   eduranker index-stats
//!
//! `run` wires the pipeline against in-memory stores and the configured
//! inference servers, executes one workflow, and prints the JSON response.
//! With no servers running every external call degrades and the response
//! reports the errors instead of failing, which makes this a usable smoke
//! check of the whole pipeline.

use clap::{Parser, Subcommand};
use eduranker_core::{
    AppConfig, DocumentStore, InferenceStore, MemoryDocumentStore, MemoryInferenceStore,
    MemoryQueryStore, QueryStore,
};
use eduranker_feedback::FeedbackLedger;
use eduranker_index::{RestEmbeddingGateway, VectorIndex};
use eduranker_rerank::{Reranker, RestCrossEncoderGateway};
use eduranker_workflow::{WorkflowOrchestrator, WorkflowRequest};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "eduranker")]
#[command(about = "Educational resource retrieval and reranking pipeline")]
#[command(version)]
struct Cli {
    /// Optional TOML config file; environment variables apply otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one retrieval-and-rerank workflow for a question
    Run {
        /// The question to answer
        #[arg(long)]
        question: String,

        /// Sources to ingest from (defaults to the configured list)
        #[arg(long)]
        source: Vec<String>,

        /// Final result count
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Inspect the persisted index snapshot
    IndexStats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("eduranker={}", config.logging.level).into());
    if config.logging.json_format {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::Run {
            question,
            source,
            top_k,
        } => run_workflow(config, question, source, top_k).await,
        Commands::IndexStats => index_stats(config).await,
    }
}

async fn run_workflow(
    config: AppConfig,
    question: String,
    sources: Vec<String>,
    top_k: Option<usize>,
) -> anyhow::Result<()> {
    // Initialization order: DocumentStore, VectorIndex, Reranker,
    // FeedbackLedger, Orchestrator.
    let documents = Arc::new(MemoryDocumentStore::new());
    let queries = Arc::new(MemoryQueryStore::new());
    let inferences = Arc::new(MemoryInferenceStore::new());

    let index = Arc::new(VectorIndex::new(
        Arc::clone(&documents) as Arc<dyn DocumentStore>,
        config.index.clone(),
    ));

    let cross_encoder = Arc::new(RestCrossEncoderGateway::connect(&config.rerank).await?);
    let reranker = Arc::new(Reranker::new(cross_encoder, config.rerank.clone()));

    let ledger = Arc::new(FeedbackLedger::new(
        Arc::clone(&inferences) as Arc<dyn InferenceStore>,
        Arc::clone(&queries) as Arc<dyn QueryStore>,
        Arc::clone(&documents) as Arc<dyn DocumentStore>,
        config.feedback.clone(),
    ));

    let embedder = Arc::new(RestEmbeddingGateway::from_config(
        &config.embedding,
        &config.index,
    )?);

    let orchestrator = WorkflowOrchestrator::new(
        documents,
        queries,
        index,
        reranker,
        ledger,
        embedder,
        config,
    );

    orchestrator.initialize().await?;

    let mut request = WorkflowRequest::new(question);
    request.sources = sources;
    request.final_top_k = top_k;

    let response = orchestrator.run(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    orchestrator.shutdown().await?;
    Ok(())
}

async fn index_stats(config: AppConfig) -> anyhow::Result<()> {
    let documents = Arc::new(MemoryDocumentStore::new());
    let index = VectorIndex::new(documents, config.index.clone());

    if !index.load().await {
        println!(
            "no persisted index at {}",
            config.index.path.display()
        );
        return Ok(());
    }

    let stats = index.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
