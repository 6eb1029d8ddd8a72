use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, UserId};
use std::path::Path;

use crate::sources::ResolvedTrack;

/// Origen de un elemento de la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    /// Archivo local, se reproduce tal cual
    Local,
    /// Medio remoto; sus renditions se resuelven al sacarlo de la cola
    #[serde(alias = "YTDL")]
    Resolved,
}

/// Unidad de almacenamiento de la cola durable.
///
/// Se escribe una vez al final de la lista y se consume desde la cabeza; nunca
/// se modifica en el almacén.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub kind: MediaKind,
    pub owner_id: UserId,
    pub guild_id: GuildId,
    pub title: String,
    pub track_id: String,
    pub locator: String,
    pub encoding_hint: String,
    pub duration_seconds: u64,
}

impl QueueRecord {
    /// Registro para un archivo local (`/ruta/cancion.opus` o `file:///...`)
    pub fn local(owner_id: UserId, guild_id: GuildId, path: &str) -> Self {
        let path = path.strip_prefix("file://").unwrap_or(path);
        let file = Path::new(path);

        let title = file
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(path)
            .to_string();

        let encoding_hint = match file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
        {
            Some(ext) if ext == "opus" || ext == "webm" => "opus".to_string(),
            Some(ext) => ext,
            None => "unknown".to_string(),
        };

        Self {
            kind: MediaKind::Local,
            owner_id,
            guild_id,
            title,
            track_id: String::new(),
            locator: path.to_string(),
            encoding_hint,
            duration_seconds: 0,
        }
    }

    /// Registro a partir de un track resuelto por el resolver
    pub fn resolved(owner_id: UserId, guild_id: GuildId, track: &ResolvedTrack) -> Self {
        Self {
            kind: MediaKind::Resolved,
            owner_id,
            guild_id,
            title: track.title.clone(),
            track_id: track.track_id.clone(),
            locator: track.locator.clone(),
            encoding_hint: track
                .renditions
                .first()
                .map(|r| r.encoding.clone())
                .unwrap_or_else(|| track.encoding.clone()),
            duration_seconds: track.duration_seconds,
        }
    }
}
