// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Thumbnail probe and download proxy.
//!
//! Probing walks the host's quality ladder (maxres, hq, mq) with HEAD
//! requests and returns the first candidate that is a real image rather than
//! the host's placeholder. The proxy fetches an image server-side so the
//! browser can save it as an attachment.

use anyhow::{Context, Result};
use std::time::Duration;

/// Placeholder images on the thumbnail host are tiny; anything at or below
/// this byte count is treated as "not a real thumbnail".
const MIN_THUMBNAIL_BYTES: u64 = 5000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Candidate thumbnail URLs for a video id, best quality first.
pub fn candidate_urls(video_id: &str) -> [String; 3] {
    [
        format!("https://i.ytimg.com/vi/{}/maxresdefault.jpg", video_id),
        format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id),
        format!("https://i.ytimg.com/vi/{}/mqdefault.jpg", video_id),
    ]
}

fn passes_size_gate(content_length: Option<u64>) -> bool {
    content_length.map(|len| len > MIN_THUMBNAIL_BYTES).unwrap_or(false)
}

/// HTTP client for thumbnail lookups.
#[derive(Debug, Clone)]
pub struct ThumbnailClient {
    client: reqwest::Client,
}

impl ThumbnailClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build thumbnail HTTP client")?;
        Ok(Self { client })
    }

    /// Find the best available thumbnail for `video_id`, or `None` when every
    /// candidate is missing or a placeholder.
    pub async fn probe(&self, video_id: &str) -> Option<String> {
        for url in candidate_urls(video_id) {
            match self.client.head(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    if passes_size_gate(resp.content_length()) {
                        tracing::debug!(%url, "thumbnail probe hit");
                        return Some(url);
                    }
                    tracing::debug!(%url, "thumbnail too small, likely placeholder");
                }
                Ok(resp) => {
                    tracing::debug!(%url, status = %resp.status(), "thumbnail probe miss");
                }
                Err(e) => {
                    tracing::debug!(%url, error = %e, "thumbnail probe failed");
                }
            }
        }
        None
    }

    /// Fetch an image for the download proxy.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetch thumbnail {}", url))?
            .error_for_status()
            .context("thumbnail host rejected request")?;
        let bytes = resp.bytes().await.context("read thumbnail body")?;
        Ok(bytes.to_vec())
    }
}
