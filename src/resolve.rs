// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Metadata resolution collaborator.
//!
//! Shells out to the worker in JSON mode (`yt-dlp -J`) and maps the dump
//! into either a single item's metadata or a playlist listing. This is a
//! plain request/response wrapper: the engine only consumes its output as
//! submission input and validates nothing beyond a non-empty URL.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Resolved source metadata.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaInfo {
    Single {
        title: Option<String>,
        channel: Option<String>,
        thumbnail: Option<String>,
        duration: Option<f64>,
        duration_string: String,
        formats: Vec<FormatInfo>,
    },
    Playlist {
        title: String,
        uploader: String,
        #[serde(rename = "videoCount")]
        video_count: usize,
        videos: Vec<PlaylistEntry>,
        thumbnail: Option<String>,
    },
}

/// One downloadable format of a single item.
#[derive(Debug, Serialize)]
pub struct FormatInfo {
    pub format_id: String,
    pub ext: Option<String>,
    pub resolution: String,
    pub size_string: String,
    #[serde(rename = "isAudio")]
    pub is_audio: bool,
    #[serde(rename = "isVideo")]
    pub is_video: bool,
}

/// One entry of a playlist listing.
#[derive(Debug, Serialize)]
pub struct PlaylistEntry {
    pub title: String,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    pub channel: String,
    pub duration_string: String,
}

// Subset of the worker's -J dump we care about.
#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    duration_string: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
    entries: Option<Vec<Option<RawEntry>>>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: String,
    ext: Option<String>,
    resolution: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    title: Option<String>,
    url: Option<String>,
    channel: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<RawThumb>,
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawThumb {
    url: Option<String>,
}

/// Format a duration in seconds as HH:MM:SS; "N/A" when unknown.
pub fn format_duration(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s > 0.0 => {
            let total = s as u64;
            format!(
                "{:02}:{:02}:{:02}",
                total / 3600,
                (total % 3600) / 60,
                total % 60
            )
        }
        _ => "N/A".to_string(),
    }
}

fn size_string(format: &RawFormat) -> String {
    format
        .filesize
        .or(format.filesize_approx)
        .map(|b| format!("{:.2} MB", b / 1024.0 / 1024.0))
        .unwrap_or_else(|| "N/A".to_string())
}

fn resolution_string(format: &RawFormat) -> String {
    if let Some(res) = &format.resolution {
        return res.clone();
    }
    let vcodec = format.vcodec.as_deref().unwrap_or("none");
    if vcodec != "none" {
        match format.height {
            Some(h) => format!("{}p", h),
            None => "Unknown".to_string(),
        }
    } else {
        "Audio".to_string()
    }
}

/// Map a raw `-J` dump into the public shape. Exposed separately from the
/// subprocess call so it can be tested against fixtures.
pub fn parse_output(stdout: &str) -> Result<MediaInfo> {
    // The worker sometimes prefixes warnings; recover from the first line
    // that looks like JSON.
    let json_line = stdout
        .lines()
        .find(|l| l.starts_with('{'))
        .context("no JSON found in worker output")?;
    let info: RawInfo = serde_json::from_str(json_line).context("malformed worker JSON")?;

    if let Some(entries) = info.entries {
        let parent_channel = info.channel.clone();
        let videos: Vec<PlaylistEntry> = entries
            .into_iter()
            .flatten()
            .filter(|e| {
                e.title
                    .as_deref()
                    .map(|t| !t.contains("Private"))
                    .unwrap_or(false)
            })
            .map(|e| PlaylistEntry {
                title: e.title.clone().unwrap_or_default(),
                url: e.url.clone(),
                thumbnail: e
                    .thumbnail
                    .clone()
                    .or_else(|| e.thumbnails.first().and_then(|t| t.url.clone())),
                channel: e
                    .channel
                    .clone()
                    .or_else(|| parent_channel.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                duration_string: format_duration(e.duration),
            })
            .collect();

        let thumbnail = info
            .thumbnail
            .or_else(|| videos.first().and_then(|v| v.thumbnail.clone()));

        return Ok(MediaInfo::Playlist {
            title: info.title.unwrap_or_else(|| "Playlist".to_string()),
            uploader: info
                .uploader
                .or(info.channel)
                .unwrap_or_else(|| "Unknown".to_string()),
            video_count: videos.len(),
            videos,
            thumbnail,
        });
    }

    let formats = info
        .formats
        .iter()
        .map(|f| {
            let vcodec = f.vcodec.as_deref().unwrap_or("none");
            let acodec = f.acodec.as_deref().unwrap_or("none");
            FormatInfo {
                format_id: f.format_id.clone(),
                ext: f.ext.clone(),
                resolution: resolution_string(f),
                size_string: size_string(f),
                is_audio: vcodec == "none" && acodec != "none",
                is_video: vcodec != "none",
            }
        })
        .collect();

    Ok(MediaInfo::Single {
        duration_string: info
            .duration_string
            .clone()
            .unwrap_or_else(|| format_duration(info.duration)),
        title: info.title,
        channel: info.channel,
        thumbnail: info.thumbnail,
        duration: info.duration,
        formats,
    })
}

/// Run the worker in JSON mode against `url` and parse the result.
pub async fn fetch_info(worker_program: &str, url: &str) -> Result<MediaInfo> {
    let output = Command::new(worker_program)
        .args(["-J", "--ignore-errors", "--no-warnings", url])
        .output()
        .await
        .with_context(|| format!("run {} -J", worker_program))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.trim().is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("worker returned no metadata: {}", stderr.trim());
    }
    parse_output(&stdout)
}
