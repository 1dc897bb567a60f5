use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ragline_core::config::{resolve_with_base, Config, Settings, SynthesisMode, ENV_PREFIX};
use ragline_core::loader::DocumentLoader;
use ragline_core::{ChatMessage, CompletionOptions, EmbeddingProvider, LanguageModel};
use ragline_embed::get_default_embedder;
use ragline_llm::get_default_model;
use ragline_query::{QueryConfig, QueryEngine};
use ragline_vector::{IndexBuilder, VectorIndex};

/// Retrieval-augmented question answering over a directory of text files
#[derive(Parser, Debug)]
#[command(name = "ragline", version)]
struct Cli {
    /// Directory holding config.toml and config.<RUST_ENV>.toml
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    /// -v for debug logs, -vv for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct ModelArgs {
    /// Model name (overrides llm.model_name)
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum tokens to generate (overrides llm.max_output_tokens)
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Stop sequence; repeatable
    #[arg(long = "stop")]
    stop: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one prompt to the language model and print the reply
    Complete {
        prompt: String,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Send a system message plus user messages and print the reply
    Chat {
        #[arg(long, default_value = "You are a helpful assistant.")]
        system: String,
        #[arg(required = true)]
        messages: Vec<String>,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Load, embed and index a directory, then save the index snapshot
    Ingest {
        /// Directory to index (defaults to data.data_dir)
        dir: Option<PathBuf>,
        /// Read at most this many files
        #[arg(long)]
        limit: Option<usize>,
        /// Snapshot path (defaults to data.index_path)
        #[arg(long)]
        index: Option<PathBuf>,
    },
    /// Answer a question from the indexed documents
    Query {
        question: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Drop chunks scoring below this similarity
        #[arg(long)]
        cutoff: Option<f32>,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Number context blocks and ask the model to cite them
        #[arg(long)]
        cite: bool,
        /// Build an in-memory index from this directory instead of loading a snapshot
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        index: Option<PathBuf>,
        #[command(flatten)]
        model: ModelArgs,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    Compact,
    Refine,
}

impl From<ModeArg> for SynthesisMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Compact => SynthesisMode::Compact,
            ModeArg::Refine => SynthesisMode::Refine,
        }
    }
}

impl ModelArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(ref model) = self.model {
            settings.llm.model_name = model.clone();
        }
        if let Some(t) = self.temperature {
            settings.llm.temperature = t;
        }
        if let Some(n) = self.max_tokens {
            settings.llm.max_output_tokens = n;
        }
        if !self.stop.is_empty() {
            settings.llm.stop_sequences = self.stop.clone();
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "ragline=info",
        1 => "ragline=debug",
        _ => "ragline=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_settings(config_dir: &Path) -> Result<Settings> {
    let env_name = std::env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = Config::layered(config_dir, &env_name, ENV_PREFIX)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    Ok(config.settings()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = load_settings(&cli.config_dir)?;
    match cli.command {
        Command::Complete { prompt, model } => {
            model.apply(&mut settings);
            let options = checked_options(&settings)?;
            let llm = get_default_model(&settings.llm)?;
            let reply = llm.complete(&prompt, &options).await?;
            println!("{reply}");
        }
        Command::Chat { system, messages, model } => {
            model.apply(&mut settings);
            let options = checked_options(&settings)?;
            let llm = get_default_model(&settings.llm)?;
            let mut conversation = vec![ChatMessage::system(system)];
            conversation.extend(messages.into_iter().map(ChatMessage::user));
            let reply = llm.chat(&conversation, &options).await?;
            println!("{reply}");
        }
        Command::Ingest { dir, limit, index } => {
            let data_dir = dir.unwrap_or_else(|| resolve_with_base(&cli.config_dir, &settings.data.data_dir));
            let index_path = index.unwrap_or_else(|| resolve_with_base(&cli.config_dir, &settings.data.index_path));
            let embedder = get_default_embedder(&settings.embedding)?;
            let index = build_index(&settings, &data_dir, limit, Arc::clone(&embedder)).await?;
            index.save(&index_path)?;
            println!("Indexed {} chunks into {}", index.len(), index_path.display());
        }
        Command::Query { question, top_k, cutoff, mode, cite, dir, index, model } => {
            model.apply(&mut settings);
            if let Some(k) = top_k {
                settings.retrieval.top_k = k;
            }
            if cutoff.is_some() {
                settings.retrieval.similarity_cutoff = cutoff;
            }
            if let Some(mode) = mode {
                settings.synthesis.mode = mode.into();
            }
            settings.synthesis.cite_sources |= cite;
            settings.validate()?;

            let embedder = get_default_embedder(&settings.embedding)?;
            let index_path = index.unwrap_or_else(|| resolve_with_base(&cli.config_dir, &settings.data.index_path));
            let index = match dir {
                Some(dir) => build_index(&settings, &dir, None, Arc::clone(&embedder)).await?,
                None if index_path.exists() => {
                    let index = VectorIndex::load_for(&index_path, embedder.embedder_id())?;
                    println!("Number of documents: {}", index.document_count());
                    index
                }
                None => {
                    warn!(path = %index_path.display(), "no index snapshot, indexing data directory in memory");
                    let data_dir = resolve_with_base(&cli.config_dir, &settings.data.data_dir);
                    build_index(&settings, &data_dir, None, Arc::clone(&embedder)).await?
                }
            };

            let llm = get_default_model(&settings.llm)?;
            let engine = QueryEngine::new(Arc::new(index), embedder, llm, QueryConfig::from_settings(&settings))?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });
            let answer = engine.query_with_cancel(&question, &cancel).await?;
            println!("{answer}");
            if !answer.used_chunks.is_empty() {
                println!("\nSources:");
                for source in answer.sources() {
                    println!("  {source}");
                }
            }
        }
    }
    Ok(())
}

fn checked_options(settings: &Settings) -> Result<CompletionOptions> {
    let options = settings.llm.completion_options();
    options.validate()?;
    Ok(options)
}

async fn build_index(
    settings: &Settings,
    data_dir: &Path,
    limit: Option<usize>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<VectorIndex> {
    let loader = DocumentLoader::new(settings.chunking.clone());
    let chunks = match limit {
        Some(n) => loader.load_limited(data_dir, n)?,
        None => loader.load(data_dir)?,
    };
    let mut docs: Vec<&str> = chunks.iter().map(|c| c.doc_id.as_str()).collect();
    docs.dedup();
    println!("Number of documents: {}", docs.len());
    info!(dir = %data_dir.display(), chunks = chunks.len(), "indexing");

    let index = IndexBuilder::from_settings(embedder, &settings.embedding)
        .show_progress(true)
        .build(chunks)
        .await?;
    Ok(index)
}
