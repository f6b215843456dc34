//! flickd - command-line photo and video uploader
//!
//! Exchanges credentials for a token and uploads media with metadata to a
//! photo-sharing service. Tokens are printed, never stored; pass them back in
//! with `--token` or `FLICKD_TOKEN`.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flickd_client::{Credential, FlickdClient, ServiceConfig, Token};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::UploadOptions;
use crate::config::{Config, MergedConfig};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "flickd")]
#[command(author, version, about = "Photo and video uploader")]
#[command(propagate_version = true)]
struct Cli {
    /// Service base URL
    #[arg(short, long, env = "FLICKD_SERVER")]
    server: Option<String>,

    /// Service description (YAML: endpoints, field names, signing scheme)
    #[arg(long, env = "FLICKD_SERVICE")]
    service: Option<PathBuf>,

    /// Application key
    #[arg(long, env = "FLICKD_API_KEY")]
    api_key: Option<String>,

    /// Application secret
    #[arg(long, env = "FLICKD_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "FLICKD_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Exchange a username and password (or consumer key) for a token
    Login {
        /// Account name
        #[arg(short, long, env = "FLICKD_USERNAME")]
        username: Option<String>,

        /// Account password
        #[arg(short, long, env = "FLICKD_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Delegated consumer key
        #[arg(long)]
        consumer_key: Option<String>,

        /// Delegated consumer secret
        #[arg(long, hide_env_values = true)]
        consumer_secret: Option<String>,
    },

    /// Obtain a token by approving access in a browser
    Authorize {
        /// Requested permission: read, write, delete
        #[arg(long, default_value = "write")]
        perms: String,
    },

    /// Check that a token is still accepted
    Verify {
        /// Token to check
        #[arg(short, long, env = "FLICKD_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Upload a photo or video
    Upload {
        /// Media file path
        file: PathBuf,

        /// Token authorizing the upload
        #[arg(short, long, env = "FLICKD_TOKEN", hide_env_values = true)]
        token: String,

        /// Title
        #[arg(long)]
        title: Option<String>,

        /// Description
        #[arg(long)]
        description: Option<String>,

        /// Tag (repeatable; multi-word tags are quoted for you)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,

        /// Visible to everyone
        #[arg(long)]
        public: bool,

        /// Visible to friends
        #[arg(long)]
        friends: bool,

        /// Visible to family
        #[arg(long)]
        family: bool,

        /// Override the media content type
        #[arg(long)]
        content_type: Option<String>,

        /// Skip the token check before transferring
        #[arg(long)]
        skip_verify: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(
        cli.server.as_deref(),
        cli.service.as_deref(),
        cli.api_key.as_deref(),
        cli.api_secret.as_deref(),
        cli.no_color,
    );

    // Create output context
    let ctx = OutputContext::new(cli.output, merged.no_color, cli.quiet);
    let client = create_client(&merged)?;

    // Execute command
    match cli.command {
        Commands::Login {
            username,
            password,
            consumer_key,
            consumer_secret,
        } => {
            let mut credential = Credential::password(
                username.unwrap_or_default(),
                password.unwrap_or_default(),
            );
            if let (Some(key), Some(secret)) = (consumer_key, consumer_secret) {
                credential = credential.with_consumer(key, secret);
            }
            commands::login(&client, credential, &ctx).await?;
        }

        Commands::Authorize { perms } => {
            commands::authorize(&client, &perms, &ctx).await?;
        }

        Commands::Verify { token } => {
            commands::verify(&client, &Token::new(token), &ctx).await?;
        }

        Commands::Upload {
            file,
            token,
            title,
            description,
            tags,
            public,
            friends,
            family,
            content_type,
            skip_verify,
        } => {
            let options = UploadOptions {
                title,
                description,
                tags,
                public,
                friends,
                family,
                content_type,
                verify_first: !skip_verify,
            };
            commands::upload(&client, &file, Token::new(token), options, &ctx).await?;
        }
    }

    Ok(())
}

/// Build the service configuration and client from merged settings
fn create_client(merged: &MergedConfig) -> Result<FlickdClient> {
    let mut service = match &merged.service {
        Some(path) => ServiceConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load service description: {}", path.display()))?,
        None => ServiceConfig::builder(&merged.server).build(),
    };
    if merged.service.is_none() || merged.server_overridden {
        service.connection.base_url = merged.server.clone();
    }
    if let Some(key) = &merged.api_key {
        service.connection.api_key = key.clone();
    }
    if let Some(secret) = &merged.api_secret {
        service.connection.api_secret = Some(secret.clone());
    }

    FlickdClient::new(service).context("Failed to create client")
}
