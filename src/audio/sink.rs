use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::MusicError;

/// Fuente que se entrega al sink para codificar
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackSource {
    /// Rendition remota ya verificada por el fetcher
    Remote { url: String, encoding: String },
    /// Archivo local
    File { path: String, encoding: String },
}

impl PlaybackSource {
    pub fn encoding(&self) -> &str {
        match self {
            Self::Remote { encoding, .. } | Self::File { encoding, .. } => encoding,
        }
    }
}

/// Eventos que reporta el sink durante la reproducción
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// Posición actual en segundos
    Timestamp(f64),
    End,
    Error(String),
    Unpipe,
}

/// Control sobre un stream activo
pub trait EncoderHandle: Send + Sync {
    fn pause(&self);
    fn resume(&self);
    /// Detiene y libera el stream; el sink puede emitir `End` después
    fn stop(&self);
}

/// Destino de audio establecido (un canal de voz); acepta un stream a la vez
#[async_trait]
pub trait StreamingSink: Send + Sync {
    async fn bind(
        &self,
        source: PlaybackSource,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<Box<dyn EncoderHandle>>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<()>;
}

/// Establece sinks uniéndose a canales de voz
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn StreamingSink>, MusicError>;
}
