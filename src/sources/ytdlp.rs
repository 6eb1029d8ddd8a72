use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::{sort_renditions, MediaResolver, MediaSearch, Rendition, Resolution, ResolvedTrack, SearchHit};

/// Cliente de metadatos y búsqueda sobre `yt-dlp`
pub struct YtDlpClient {
    binary: String,
    // Limitar procesos concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    url: Option<String>,
    acodec: Option<String>,
    formats: Option<Vec<Format>>,
    entries: Option<Vec<YtDlpInfo>>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
}

impl YtDlpClient {
    pub fn new() -> Self {
        Self::with_binary("yt-dlp")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Semaphore::new(3),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let _permit = self.rate_limiter.acquire().await?;

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for YtDlpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaResolver for YtDlpClient {
    async fn resolve(&self, locator: &str) -> Result<Resolution> {
        debug!("📊 Obteniendo info de: {}", locator);

        let stdout = self
            .run(&["--dump-single-json", "--flat-playlist", "--no-warnings", locator])
            .await?;

        let info: YtDlpInfo =
            serde_json::from_str(&stdout).context("Error al parsear respuesta de yt-dlp")?;

        let resolution = info_to_resolution(info, locator);
        if let Resolution::Playlist(entries) = &resolution {
            info!("📋 Playlist con {} entradas: {}", entries.len(), locator);
        }

        Ok(resolution)
    }
}

#[async_trait]
impl MediaSearch for YtDlpClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        info!("🔍 Buscando: {}", query);

        let search_query = format!("ytsearch{}:{}", limit, query);
        let stdout = self
            .run(&[
                "--dump-json",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                &search_query,
            ])
            .await?;

        Ok(parse_search_lines(&stdout))
    }
}

fn info_to_resolution(info: YtDlpInfo, requested: &str) -> Resolution {
    if info.kind.as_deref() == Some("playlist") {
        let entries = info
            .entries
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                let fallback = entry.url.clone().unwrap_or_default();
                let track = info_to_track(entry, &fallback);
                (!track.locator.is_empty()).then_some(track)
            })
            .collect();
        return Resolution::Playlist(entries);
    }

    Resolution::Track(info_to_track(info, requested))
}

fn info_to_track(info: YtDlpInfo, requested: &str) -> ResolvedTrack {
    let mut renditions: Vec<Rendition> = info
        .formats
        .unwrap_or_default()
        .into_iter()
        .filter_map(|format| {
            let encoding = format.acodec.filter(|c| c != "none")?;
            Some(Rendition {
                url: format.url?,
                encoding: normalize_codec(&encoding),
                bitrate: format.abr,
            })
        })
        .collect();

    sort_renditions(&mut renditions);

    let encoding = renditions
        .first()
        .map(|r| r.encoding.clone())
        .or_else(|| info.acodec.as_deref().map(normalize_codec))
        .unwrap_or_else(|| "unknown".to_string());

    ResolvedTrack {
        title: info.title.unwrap_or_else(|| requested.to_string()),
        track_id: info.id.unwrap_or_default(),
        locator: info
            .webpage_url
            .or(info.url)
            .unwrap_or_else(|| requested.to_string()),
        duration_seconds: info.duration.map(|d| d.max(0.0) as u64).unwrap_or(0),
        encoding,
        renditions,
    }
}

/// `mp4a.40.2` → `mp4a`, `opus` → `opus`
fn normalize_codec(codec: &str) -> String {
    codec
        .split('.')
        .next()
        .unwrap_or(codec)
        .to_ascii_lowercase()
}

fn parse_search_lines(stdout: &str) -> Vec<SearchHit> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
        .filter_map(|info| {
            let locator = info.webpage_url.or(info.url)?;
            Some(SearchHit {
                title: info.title.unwrap_or_else(|| locator.clone()),
                locator,
            })
        })
        .collect()
}
