//! Upload command - signed multipart media upload

use anyhow::{Context, Result};
use flickd_client::{
    FlickdClient, MediaKind, Token, TokenStatus, UploadError, UploadJob, UploadObserver,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use crate::output::{OutputContext, UploadRow};

/// Metadata and behaviour flags for an upload
#[derive(Debug, Default)]
pub struct UploadOptions {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub public: bool,
    pub friends: bool,
    pub family: bool,
    pub content_type: Option<String>,
    pub verify_first: bool,
}

/// Drives the progress bar from upload callbacks
struct BarObserver(ProgressBar);

impl UploadObserver for BarObserver {
    fn on_upload_progress(&self, fraction: f64) {
        self.0.set_position((fraction * 1000.0) as u64);
    }

    fn on_upload_result(&self, result: Result<String, UploadError>) {
        match result {
            Ok(_) => self.0.finish_with_message("Complete!"),
            Err(UploadError::Cancelled) => self.0.abandon_with_message("Cancelled"),
            Err(_) => self.0.abandon_with_message("Failed!"),
        }
    }
}

/// Upload one file
pub async fn upload(
    client: &FlickdClient,
    file_path: &Path,
    token: Token,
    options: UploadOptions,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!("Reading media from {}...", file_path.display()));
    let media = std::fs::read(file_path)
        .with_context(|| format!("Failed to read media file: {}", file_path.display()))?;
    let size = media.len();

    if options.verify_first {
        match client.uploads().verify_token(&token).await {
            TokenStatus::Valid => {}
            TokenStatus::Expired => anyhow::bail!("Token rejected; run `flickd login` again"),
            TokenStatus::Unreachable => ctx.warn("Could not verify token; uploading anyway"),
        }
    }

    let kind = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(MediaKind::from_extension)
        .unwrap_or_default();
    let filename = file_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let mut builder = UploadJob::builder(media, token)
        .kind(kind)
        .filename(filename.clone())
        .tags(options.tags)
        .visibility(options.public, options.friends, options.family);
    if let Some(title) = options.title {
        builder = builder.title(title);
    }
    if let Some(description) = options.description {
        builder = builder.description(description);
    }
    if let Some(content_type) = options.content_type {
        builder = builder.content_type(content_type);
    }

    // Create progress bar
    let pb = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(1000)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {percent}% {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );
    pb.set_message("Uploading...");

    let handle = client
        .uploads()
        .submit(builder.build(), BarObserver(pb.clone()));

    // Ctrl+C cancels the job
    let canceller = handle.clone();
    ctrlc::set_handler(move || canceller.cancel())?;

    let media_id = handle.outcome().await.context("Upload failed")?;

    ctx.print_one(&UploadRow {
        media_id,
        file: filename,
        bytes: size,
    });
    ctx.success("Upload completed successfully");
    Ok(())
}
