//! cloudfetch CLI - download single objects from cloud blob storage.
//!
//! Resolves credentials, checks the object size against the configured
//! limit, signs a short-lived link and streams the object to disk.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cloudfetch_common::{ObjectLocator, Provider};
use cloudfetch_downloader::Downloader;

use crate::config::ProviderArgs;

/// Directory used when no output path is given.
const DEFAULT_DOWNLOAD_DIR: &str = "download";

#[derive(Parser)]
#[command(name = "cloudfetch")]
#[command(about = "cloudfetch - Download objects from Google Cloud Storage and Amazon S3")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    provider: ProviderArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one object to a local file.
    Download {
        /// Bucket name.
        #[arg(short, long)]
        bucket: String,

        /// Object key.
        #[arg(short, long)]
        key: String,

        /// Destination file (default: ./download/<file name>).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a signed download link for one object.
    Link {
        /// Bucket name.
        #[arg(short, long)]
        bucket: String,

        /// Object key.
        #[arg(short, long)]
        key: String,
    },

    /// List supported providers.
    Providers,
}

#[tokio::main]
async fn main() {
    load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(error) = run(cli).await {
        tracing::error!(error = %format!("{:#}", error), "cloudfetch failed");
        eprintln!("Error: {:#}", error);
        process::exit(1);
    }
}

/// Load `.env` before clap reads the environment.
fn load_dotenv() {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("Warning: failed to load .env file: {}", err);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = if verbose {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: failed to install logger: {}", err);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Download {
            bucket,
            key,
            output,
        } => cmd_download(&cli.provider, &bucket, &key, output).await,

        Commands::Link { bucket, key } => cmd_link(&cli.provider, &bucket, &key).await,

        Commands::Providers => {
            cmd_providers();
            Ok(())
        }
    }
}

fn build_downloader(args: &ProviderArgs) -> Result<Downloader> {
    let provider = args.provider()?;
    let credentials = args.credentials(provider)?;

    Downloader::from_settings(provider, credentials, &args.settings(), args.policy())
        .context("Invalid download configuration")
}

/// Default destination for an object: `./download/<file name>`.
fn default_output(bucket: &str, key: &str) -> Result<PathBuf> {
    let locator = ObjectLocator::new(bucket, key)?;
    Ok(PathBuf::from(DEFAULT_DOWNLOAD_DIR).join(locator.file_name()))
}

/// Download an object.
async fn cmd_download(
    args: &ProviderArgs,
    bucket: &str,
    key: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let destination = match output {
        Some(path) => path,
        None => default_output(bucket, key)?,
    };
    let downloader = build_downloader(args)?;

    let outcome = downloader
        .download(bucket, key, &destination)
        .await
        .context("Download failed")?;

    println!("Downloaded {} ({} bytes)", outcome.locator, outcome.bytes);
    println!("  Provider: {}", outcome.provider.display_name());
    println!("  Saved to: {}", outcome.destination.display());
    if let Some(content_type) = &outcome.metadata.content_type {
        println!("  Type: {}", content_type);
    }

    Ok(())
}

/// Print a fresh signed link.
async fn cmd_link(args: &ProviderArgs, bucket: &str, key: &str) -> Result<()> {
    let downloader = build_downloader(args)?;

    let link = downloader
        .signed_link(bucket, key)
        .await
        .context("Failed to sign link")?;

    println!("{}", link.url());
    eprintln!("Expires at {}", link.expires_at().to_rfc3339());

    Ok(())
}

/// List supported providers.
fn cmd_providers() {
    for provider in Provider::ALL {
        println!("{:<22} {}", provider.wire_id(), provider.display_name());
    }
}
