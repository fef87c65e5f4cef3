use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use log::{error, info};
use std::io::{self, Write};
use std::sync::Arc;

use atelier_rag::config::AppConfig;
use atelier_rag::engine::{ChatEngine, GREETING};
use atelier_rag::indexer::Indexer;
use atelier_rag::memory::MemoryBuffer;
use atelier_rag::router::LlmSelector;
use atelier_rag::session::{AppResources, SessionState};
use atelier_rag::{document, gemini::CompletionModel};

/// Chat over the Atelier document corpora with a hosted model
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build and persist the vector indexes from the document directories
    Index {
        /// Drop and rebuild collections that already exist
        #[arg(long)]
        rebuild: bool,
        /// Descend into subdirectories of each corpus directory
        #[arg(long)]
        recursive: bool,
    },
    /// Load the indexes and chat in the terminal
    Chat {
        /// Retrieval profile to run
        #[arg(long, value_enum, default_value = "routed")]
        profile: Profile,
        /// Corpus to serve in the condense profile
        #[arg(long, default_value = "faq")]
        corpus: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    /// Route each question across all corpora
    Routed,
    /// Condense follow-up questions against a single corpus
    Condense,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command {
        Commands::Index { rebuild, recursive } => run_index(&config, rebuild, recursive).await,
        Commands::Chat { profile, corpus } => run_chat(&config, profile, &corpus).await,
    }
}

async fn run_index(config: &AppConfig, rebuild: bool, recursive: bool) -> Result<()> {
    let resources = AppResources::get_or_init(config).await?;
    let indexer = Indexer::new(resources.gemini.clone(), resources.store.clone());

    for corpus in &config.corpora {
        let dir = config.data_dir.join(&corpus.subdir);
        let documents = document::load_directory(&dir, recursive)
            .with_context(|| format!("Cannot load documents for corpus {}", corpus.name))?;

        let stored = indexer
            .build_corpus(corpus, &documents, rebuild)
            .await
            .with_context(|| format!("Cannot index corpus {}", corpus.name))?;

        if stored > 0 {
            println!("Indexed corpus {}: {} chunks", corpus.name, stored);
        } else {
            println!("Corpus {} already indexed", corpus.name);
        }
    }

    Ok(())
}

async fn run_chat(config: &AppConfig, profile: Profile, corpus: &str) -> Result<()> {
    let resources = AppResources::get_or_init(config).await?;

    // Serving without the persisted indexes is a dead end; fail startup
    // with a pointer to the fix instead of erroring on every turn.
    for served in &config.corpora {
        let exists = resources.store.collection_exists(&served.name).await?;
        anyhow::ensure!(
            exists,
            "Corpus {} has no index yet. Run `atelier-rag index` first.",
            served.name
        );
    }

    let model: Arc<dyn CompletionModel> = resources.gemini.clone();
    let engine = match profile {
        Profile::Routed => {
            let selector = Arc::new(LlmSelector::new(model.clone()));
            let fallback = resources
                .tools
                .first()
                .map(|t| t.name.clone())
                .context("No corpora configured")?;
            ChatEngine::routed(
                selector,
                resources.tools.clone(),
                fallback,
                model,
                MemoryBuffer::default(),
            )?
        }
        Profile::Condense => {
            let tool = resources
                .tools
                .iter()
                .find(|t| t.name == corpus)
                .cloned()
                .with_context(|| format!("Unknown corpus {corpus:?}"))?;
            ChatEngine::condense(tool, model, MemoryBuffer::default())
        }
    };

    info!("Chat engine ready ({:?} profile)", profile);
    run_repl(&engine).await
}

/// Terminal presentation shell: one line in, one turn through the engine,
/// one reply out. Turn failures apologize and keep the loop alive.
async fn run_repl(engine: &ChatEngine) -> Result<()> {
    let mut session = SessionState::new(GREETING);
    println!("{}", GREETING);
    println!("Type 'exit' to quit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();

    loop {
        print!("\nYour question: ");
        stdout.flush()?;

        buffer.clear();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }

        let question = buffer.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        match engine.handle_turn(&mut session, question).await {
            Ok(reply) => println!("\n{}", reply),
            Err(e) => {
                error!("Turn failed: {e}");
                println!("\nI ran into a problem answering that. Please try again.");
            }
        }
    }

    Ok(())
}
