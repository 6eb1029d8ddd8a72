use anyhow::{anyhow, Result};
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{File, HttpRequest, Input},
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::sink::{EncoderHandle, PlaybackSource, SinkEvent, StreamingSink, VoiceGateway};
use crate::error::MusicError;

/// Gateway de voz sobre el manager de Songbird
pub struct SongbirdVoice {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdVoice {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self { manager, http }
    }
}

#[async_trait::async_trait]
impl VoiceGateway for SongbirdVoice {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn StreamingSink>, MusicError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| MusicError::Join(e.to_string()))?;

        info!("🔊 Conectado a canal de voz {} en guild {}", channel_id, guild_id);

        Ok(Arc::new(SongbirdSink {
            guild_id,
            call,
            manager: self.manager.clone(),
            http: self.http.clone(),
        }))
    }
}

pub struct SongbirdSink {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

#[async_trait::async_trait]
impl StreamingSink for SongbirdSink {
    async fn bind(
        &self,
        source: PlaybackSource,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<Box<dyn EncoderHandle>> {
        let input: Input = match source {
            PlaybackSource::Remote { url, .. } => HttpRequest::new(self.http.clone(), url).into(),
            PlaybackSource::File { path, .. } => File::new(path).into(),
        };

        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input)
        };

        let forwarders = [
            (Event::Track(TrackEvent::End), Forward::End),
            (Event::Track(TrackEvent::Error), Forward::Error),
            (Event::Periodic(Duration::from_secs(1), None), Forward::Position),
        ];

        for (event, kind) in forwarders {
            handle
                .add_event(
                    event,
                    SinkEventForwarder {
                        kind,
                        events: events.clone(),
                    },
                )
                .map_err(|e| anyhow!("Error al agregar event handler: {}", e))?;
        }

        Ok(Box::new(SongbirdEncoder(handle)))
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn disconnect(&self) -> Result<()> {
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| anyhow!("Error al salir del canal de voz: {}", e))?;

        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }
}

struct SongbirdEncoder(TrackHandle);

impl EncoderHandle for SongbirdEncoder {
    fn pause(&self) {
        let _ = self.0.pause();
    }

    fn resume(&self) {
        let _ = self.0.play();
    }

    fn stop(&self) {
        let _ = self.0.stop();
    }
}

#[derive(Debug, Clone, Copy)]
enum Forward {
    Position,
    End,
    Error,
}

/// Traduce eventos de pista de Songbird a [`SinkEvent`]
struct SinkEventForwarder {
    kind: Forward,
    events: mpsc::UnboundedSender<SinkEvent>,
}

#[async_trait::async_trait]
impl VoiceEventHandler for SinkEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let state = match ctx {
            EventContext::Track(tracks) => tracks.first().map(|(state, _)| *state),
            _ => None,
        };

        let event = match self.kind {
            Forward::Position => state.map(|s| SinkEvent::Timestamp(s.position.as_secs_f64())),
            Forward::End => Some(SinkEvent::End),
            Forward::Error => Some(SinkEvent::Error(
                state
                    .map(|s| format!("{:?}", s.playing))
                    .unwrap_or_else(|| "error de pista".to_string()),
            )),
        };

        if let Some(event) = event {
            if self.events.send(event).is_err() {
                debug!("Receptor de eventos cerrado, cancelando handler");
                return Some(Event::Cancel);
            }
        }

        None
    }
}
