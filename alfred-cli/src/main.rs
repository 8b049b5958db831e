use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alfred_core::{
    normalize_login, parse_comment, sign_payload, Commentator, REQUIRED_STRUCTURES,
};
use alfred_server::bootstrap::bootstrap;
use alfred_server::store::{Database, SqliteDatabase};
use alfred_server::stream::RedisStreamStore;

/// Alfred: operator tooling for the contributor pipeline
#[derive(Parser, Debug)]
#[command(name = "alfred")]
#[command(about = "Operator tooling for the alfred webhook pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the X-Hub-Signature-256 header for a payload
    Sign(SignArgs),
    /// Show how a comment would be parsed for a given role
    Parse(ParseArgs),
    /// Verify and create the required stream store structures
    Bootstrap(BootstrapArgs),
    /// Register maintainers and participants in the state database
    Seed(SeedArgs),
}

#[derive(Parser, Debug)]
struct SignArgs {
    /// Webhook secret shared with GitHub
    #[arg(long, env = "GITHUB_WEBHOOK_SECRET", hide_env_values = true)]
    secret: String,

    /// Payload file; reads stdin when omitted
    file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Role {
    Maintainer,
    Participant,
    Unknown,
}

impl From<Role> for Commentator {
    fn from(role: Role) -> Self {
        match role {
            Role::Maintainer => Commentator::Maintainer,
            Role::Participant => Commentator::Participant,
            Role::Unknown => Commentator::Unknown,
        }
    }
}

#[derive(Parser, Debug)]
struct ParseArgs {
    /// Role the author resolves to
    #[arg(long, value_enum)]
    role: Role,

    /// GitHub login of the comment author
    #[arg(long)]
    author: String,

    /// Comment body
    body: String,
}

#[derive(Parser, Debug)]
struct BootstrapArgs {
    /// Stream store URL
    #[arg(long, env = "VALKEY_URL", default_value = "redis://127.0.0.1:6379")]
    valkey_url: String,
}

#[derive(Parser, Debug)]
struct SeedArgs {
    /// Path to the state database
    #[arg(long, env = "ALFRED_DB", default_value = "alfred.db")]
    db: PathBuf,

    #[command(subcommand)]
    target: SeedTarget,
}

#[derive(Subcommand, Debug)]
enum SeedTarget {
    /// Make a user a maintainer of a repository, registering the repository if needed
    Maintainer {
        /// Repository URL, e.g. https://github.com/owner/name
        #[arg(long)]
        repo: String,
        username: String,
    },
    /// Register a participant
    Participant { username: String },
}

fn run_sign(args: SignArgs) -> Result<()> {
    let payload = match &args.file {
        Some(path) => {
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read payload from stdin")?;
            buf
        }
    };

    if args.secret.trim().is_empty() {
        bail!("Webhook secret must not be empty");
    }

    println!("{}", sign_payload(&args.secret, &payload));
    Ok(())
}

fn describe_parse(args: &ParseArgs) -> String {
    match parse_comment(&args.body, args.role.into(), &args.author) {
        Ok(Some(command)) => format!("command: {}", command),
        Ok(None) => "no action".to_string(),
        Err(e) => format!("syntax error: {}", e),
    }
}

async fn run_bootstrap(args: BootstrapArgs) -> Result<()> {
    let store = RedisStreamStore::connect(&args.valkey_url)
        .await
        .with_context(|| format!("Failed to connect to {}", args.valkey_url))?;

    let report = bootstrap(&store, REQUIRED_STRUCTURES)
        .await
        .context("Bootstrap failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "present": report.present,
            "created": report.created,
        }))?
    );
    Ok(())
}

async fn run_seed(args: SeedArgs) -> Result<()> {
    let db = SqliteDatabase::new(&args.db)
        .with_context(|| format!("Failed to open {}", args.db.display()))?;
    let mut tx = db.begin().await?;

    match args.target {
        SeedTarget::Maintainer { repo, username } => {
            let username = normalize_login(&username);
            tx.upsert_repository(&repo, None).await?;
            if tx.add_maintainer(&repo, &username).await? {
                info!("Added {} as a maintainer of {}", username, repo);
            } else {
                info!("{} is already a maintainer of {}", username, repo);
            }
        }
        SeedTarget::Participant { username } => {
            let username = normalize_login(&username);
            if tx.add_participant(&username).await? {
                info!("Registered participant {}", username);
            } else {
                info!("{} is already a participant", username);
            }
        }
    }

    tx.commit().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sign(args) => run_sign(args),
        Commands::Parse(args) => {
            println!("{}", describe_parse(&args));
            Ok(())
        }
        Commands::Bootstrap(args) => run_bootstrap(args).await,
        Commands::Seed(args) => run_seed(args).await,
    }
}
