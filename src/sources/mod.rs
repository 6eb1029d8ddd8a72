pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub use ytdlp::YtDlpClient;

/// Una variante reproducible de un track (URL, codificación, bitrate)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendition {
    pub url: String,
    pub encoding: String,
    pub bitrate: Option<f64>,
}

/// Metadatos de un track resuelto junto con sus renditions ordenadas por preferencia
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub title: String,
    pub track_id: String,
    /// URL canónica del track (la que se persiste en la cola)
    pub locator: String,
    pub duration_seconds: u64,
    pub encoding: String,
    pub renditions: Vec<Rendition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Track(ResolvedTrack),
    Playlist(Vec<ResolvedTrack>),
}

/// Resultado de búsqueda cacheado por (guild, canal) para `sel <n>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(alias = "id")]
    pub locator: String,
    pub title: String,
}

/// Resuelve un locator remoto a metadatos y renditions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, locator: &str) -> Result<Resolution>;
}

/// Búsqueda de texto libre
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

fn encoding_rank(encoding: &str) -> u8 {
    match encoding {
        "opus" => 0,
        "vorbis" => 1,
        _ => 2,
    }
}

/// Orden de preferencia: opus, luego vorbis, luego mayor bitrate
pub fn compare_renditions(a: &Rendition, b: &Rendition) -> Ordering {
    encoding_rank(&a.encoding)
        .cmp(&encoding_rank(&b.encoding))
        .then_with(|| {
            let a = a.bitrate.unwrap_or(0.0);
            let b = b.bitrate.unwrap_or(0.0);
            b.partial_cmp(&a).unwrap_or(Ordering::Equal)
        })
}

pub fn sort_renditions(renditions: &mut [Rendition]) {
    renditions.sort_by(compare_renditions);
}
