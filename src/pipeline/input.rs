//! Input resolution: load image bytes from local paths, URLs or memory.
//!
//! Multi-image jobs fetch every source concurrently, each under its own
//! timeout. One unreachable image is recorded as a [`UnitError`] and the
//! rest carry on; the caller decides what "nothing fetched" means.

use crate::config::FormsConfig;
use crate::error::{FormsError, UnitError};
use crate::pipeline::bounded;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Url(String),
    Bytes { name: String, bytes: Vec<u8> },
}

impl ImageSource {
    /// Classify a user-supplied string as a URL or a local path.
    pub fn parse(input: &str) -> Self {
        if is_url(input) {
            ImageSource::Url(input.to_string())
        } else {
            ImageSource::Path(PathBuf::from(input))
        }
    }

    /// Human-readable reference for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Path(p) => p.display().to_string(),
            ImageSource::Url(u) => u.clone(),
            ImageSource::Bytes { name, .. } => name.clone(),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load one image's bytes.
pub async fn fetch_image(
    client: &reqwest::Client,
    source: &ImageSource,
    timeout_secs: u64,
) -> Result<Vec<u8>, FormsError> {
    let source_ref = source.describe();
    let fail = |reason: String| FormsError::ImageFetchFailed {
        source_ref: source_ref.clone(),
        reason,
    };

    let bytes = match source {
        ImageSource::Bytes { bytes, .. } => bytes.clone(),
        ImageSource::Path(path) => bounded("image fetch", timeout_secs, async {
            tokio::fs::read(path).await.map_err(|e| fail(e.to_string()))
        })
        .await?,
        ImageSource::Url(url) => bounded("image fetch", timeout_secs, async {
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| fail(e.to_string()))?;
            if !response.status().is_success() {
                return Err(fail(format!("HTTP {}", response.status())));
            }
            let body = response.bytes().await.map_err(|e| fail(e.to_string()))?;
            Ok(body.to_vec())
        })
        .await?,
    };

    if bytes.is_empty() {
        return Err(fail("empty body".to_string()));
    }
    debug!("Fetched {} ({} bytes)", source_ref, bytes.len());
    Ok(bytes)
}

/// Fetch all sources with bounded concurrency.
///
/// Returns the successfully fetched `(source_index, bytes)` pairs in source
/// order, plus one [`UnitError::ImageFetchFailed`] per failure.
pub async fn fetch_all(
    sources: &[ImageSource],
    config: &FormsConfig,
) -> (Vec<(usize, Vec<u8>)>, Vec<UnitError>) {
    info!("Fetching {} image(s)", sources.len());
    let client = reqwest::Client::new();

    let mut results: Vec<(usize, Result<Vec<u8>, FormsError>)> =
        stream::iter(sources.iter().enumerate().map(|(index, source)| {
            let client = &client;
            async move {
                (
                    index,
                    fetch_image(client, source, config.fetch_timeout_secs).await,
                )
            }
        }))
        .buffer_unordered(config.fetch_concurrency)
        .collect()
        .await;
    results.sort_by_key(|(index, _)| *index);

    let mut fetched = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for (index, result) in results {
        match result {
            Ok(bytes) => fetched.push((index, bytes)),
            Err(e) => {
                warn!("Image {}: {}", index + 1, e);
                errors.push(UnitError::ImageFetchFailed {
                    index,
                    source_ref: sources[index].describe(),
                    detail: e.to_string(),
                });
            }
        }
    }
    (fetched, errors)
}
