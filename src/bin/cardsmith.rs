//! cardsmith: run the generation pipeline against a local file.
//!
//! Uses the same configuration files as a deployed pipeline, so it doubles
//! as a smoke test for a generation service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cardsmith::builder::CardsmithBuilder;
use cardsmith::{
    CardsmithError, CheckOutcome, Config, ContentType, Difficulty, GenerationRequest, Owner,
    Secrets, UploadedFile,
};

/// Cardsmith CLI
#[derive(Parser)]
#[command(name = "cardsmith")]
#[command(version = cardsmith::version::PKG_VERSION)]
#[command(about = "Turn documents into flashcards, quizzes and exercises")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "CARDSMITH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate through the cache and background workers, polling until done
    Process {
        #[command(flatten)]
        input: Input,
        /// Upload as a guest with this session token
        #[arg(long)]
        guest: Option<String>,
        /// Seconds between status polls
        #[arg(long, default_value_t = 2)]
        poll_secs: u64,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 600)]
        wait_secs: u64,
    },

    /// Call the generation service once, bypassing the cache
    Generate {
        #[command(flatten)]
        input: Input,
    },

    /// Print version and build information
    Version,
}

#[derive(clap::Args)]
struct Input {
    /// Document to process
    file: PathBuf,
    /// ISO 639-1 language of the generated material
    #[arg(short, long, default_value = "en")]
    language: String,
    /// Difficulty: easy, medium or hard
    #[arg(short, long, default_value = "medium")]
    difficulty: Difficulty,
    /// Content types, comma separated
    #[arg(
        short,
        long,
        value_delimiter = ',',
        default_value = "flashcard,quiz,exercise"
    )]
    types: Vec<ContentType>,
}

impl Input {
    fn request(&self) -> Result<GenerationRequest, CardsmithError> {
        let bytes = std::fs::read(&self.file)?;
        let filename = file_name(&self.file);
        Ok(GenerationRequest::new(
            UploadedFile::new(filename, bytes),
            self.language.clone(),
            self.difficulty,
            self.types.iter().copied(),
        ))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Command::Version = args.command {
        println!("cardsmith {}", cardsmith::version::version_string());
        return Ok(());
    }

    let config = Config::load_or_default(args.config.as_deref())?;
    let secrets = Secrets::load()?;
    // Nothing else is waiting for a slot; start work immediately.
    let builder = CardsmithBuilder::from_config(&config, &secrets).initial_delay(Duration::ZERO);

    match args.command {
        Command::Process {
            input,
            guest,
            poll_secs,
            wait_secs,
        } => {
            let request = input.request()?;
            let owner = match guest {
                Some(token) => Owner::Guest(token),
                None => Owner::User(whoami()),
            };
            let pipeline = builder.start()?;
            let coordinator = pipeline.coordinator().clone();

            let mut outcome = coordinator.check_or_process(&request, &owner).await?;
            let deadline = tokio::time::Instant::now() + Duration::from_secs(wait_secs);
            while let CheckOutcome::Processing {
                document_id: Some(document_id),
                ..
            } = outcome
            {
                if tokio::time::Instant::now() >= deadline {
                    return Err("timed out waiting for generation".into());
                }
                tokio::time::sleep(Duration::from_secs(poll_secs.max(1))).await;
                outcome = coordinator
                    .document_status(document_id, Some(&request.content_types))
                    .await?;
            }
            info!(done = outcome.is_done(), "finished polling");

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            pipeline.shutdown();
        }
        Command::Generate { input } => {
            let request = input.request()?;
            let (coordinator, _receiver) = builder.build()?;
            let content = coordinator.generate_uncached(&request).await?;
            println!("{}", serde_json::to_string_pretty(&content)?);
        }
        Command::Version => {}
    }

    Ok(())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".to_string())
}
