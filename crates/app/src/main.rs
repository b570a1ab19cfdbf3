use chrono::Utc;
use clap::{Parser, Subcommand};
use factsheet_core::{
    DocumentInput, Embedder, FundMetrics, OpenAiCompletion, OpenAiEmbedder, Pipeline,
    PipelineConfig, PipelineState, PineconeStore, VectorIndex, DEFAULT_OPENAI_BASE_URL,
    EMBEDDING_DIMENSIONS,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "factsheet", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: String,

    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: String,

    /// Embedding model name
    #[arg(long, env = "EMBED_MODEL", default_value = "text-embedding-3-small")]
    embed_model: String,

    /// Chat-completion model name
    #[arg(long, env = "GEN_MODEL", default_value = "gpt-5-nano")]
    gen_model: String,

    /// Vector index name
    #[arg(long, env = "PINECONE_INDEX", default_value = "finflow")]
    index: String,

    /// Cloud provider for the serverless index
    #[arg(long, env = "PINECONE_CLOUD", default_value = "aws")]
    cloud: String,

    /// Region for the serverless index
    #[arg(long, env = "PINECONE_REGION", default_value = "us-east-1")]
    region: String,

    /// Timeout in seconds applied to every external request
    #[arg(long, default_value = "30")]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question about a single fact sheet.
    Ask {
        /// Fact-sheet URL or local PDF path
        #[arg(long)]
        source: String,
        /// Question to answer
        #[arg(long, default_value = "What is the expense ratio?")]
        question: String,
    },
    /// Extract the key metrics from a single fact sheet.
    Metrics {
        /// Fact-sheet URL or local PDF path
        #[arg(long)]
        source: String,
    },
    /// Compare two fact sheets and print diff highlights.
    Compare {
        /// First fact-sheet URL or local PDF path
        #[arg(long)]
        source_a: String,
        /// Second fact-sheet URL or local PDF path
        #[arg(long)]
        source_b: String,
    },
    /// Delete the vector index entirely.
    DeleteIndex,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = PipelineConfig {
        openai_api_key: cli.openai_api_key.clone(),
        openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        embed_model: cli.embed_model.clone(),
        gen_model: cli.gen_model.clone(),
        pinecone_api_key: cli.pinecone_api_key.clone(),
        index_name: cli.index.clone(),
        cloud: cli.cloud.clone(),
        region: cli.region.clone(),
        request_timeout: Duration::from_secs(cli.timeout_secs),
    };

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index = %config.index_name,
        "factsheet boot"
    );

    match cli.command {
        Command::Ask { source, question } => {
            let pipeline = build_pipeline(&config)?;
            let input = DocumentInput::from_source(&source);
            let state = PipelineState::single(input.file, input.source, question)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let out = pipeline
                .run(state)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("source: {source}");
            print_metrics(out.extracted.as_ref());
            println!();
            println!("{}", out.answer_md);
        }
        Command::Metrics { source } => {
            let pipeline = build_pipeline(&config)?;
            let input = DocumentInput::from_source(&source);
            let state =
                PipelineState::single(input.file, input.source, factsheet_core::COMPARE_QUESTION)
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let out = pipeline
                .run(state)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("source: {source}");
            print_metrics(out.extracted.as_ref());
        }
        Command::Compare { source_a, source_b } => {
            let pipeline = build_pipeline(&config)?;
            let report = pipeline
                .compare(
                    DocumentInput::from_source(&source_a),
                    DocumentInput::from_source(&source_b),
                )
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            for row in &report.rows {
                println!("source: {}", row.source);
                print_metrics(row.metrics.as_ref());
                println!();
            }
            println!("{}", report.summary_md);
        }
        Command::DeleteIndex => {
            let store = PineconeStore::new(&config, EMBEDDING_DIMENSIONS)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            store
                .delete_index()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("index {} deleted (or did not exist)", config.index_name);
        }
    }

    Ok(())
}

fn build_pipeline(
    config: &PipelineConfig,
) -> anyhow::Result<Pipeline<OpenAiEmbedder, PineconeStore, OpenAiCompletion>> {
    let embedder =
        OpenAiEmbedder::new(config).map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let store = PineconeStore::new(config, embedder.dimensions())
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let model =
        OpenAiCompletion::new(config).map_err(|error| anyhow::anyhow!(error.to_string()))?;
    Ok(Pipeline::new(embedder, store, model))
}

fn print_metrics(metrics: Option<&FundMetrics>) {
    match metrics {
        Some(extracted) => {
            println!(
                "expense_ratio:       {}",
                extracted.expense_ratio.as_deref().unwrap_or("null")
            );
            println!(
                "aum:                 {}",
                extracted.aum.as_deref().unwrap_or("null")
            );
            println!(
                "inception_date:      {}",
                extracted.inception_date.as_deref().unwrap_or("null")
            );
            println!(
                "benchmark:           {}",
                extracted.benchmark.as_deref().unwrap_or("null")
            );
            if extracted.top_holdings_sample.is_empty() {
                println!("top_holdings_sample: null");
            } else {
                println!(
                    "top_holdings_sample: {}",
                    extracted.top_holdings_sample.join(", ")
                );
            }
        }
        None => println!("metrics: extraction incomplete"),
    }
}
