use parking_lot::Mutex;
use serenity::model::mention::Mentionable;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    fetch::{ProbeOutcome, RenditionFetcher},
    record::{MediaKind, QueueRecord},
    sink::{EncoderHandle, PlaybackSource, SinkEvent, StreamingSink},
};
use crate::{
    error::MusicError,
    sources::{MediaResolver, Rendition, Resolution},
    ui::format::format_time,
};

/// Colaboradores compartidos por todos los elementos de una cola
#[derive(Clone)]
pub struct PlaybackContext {
    pub resolver: Arc<dyn MediaResolver>,
    pub fetcher: Arc<dyn RenditionFetcher>,
    /// Espera antes de reintentar la última rendition tras una redirección
    pub redirect_retry_delay: Duration,
}

/// Fase del ciclo de vida de un elemento en reproducción
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaPhase {
    Created,
    /// Probando la rendition con este índice
    Attempting(usize),
    Streaming,
    Failed,
    Done,
}

struct MediaState {
    phase: MediaPhase,
    renditions: Vec<Rendition>,
    rendition_index: usize,
    elapsed_seconds: Option<f64>,
    encoder: Option<Box<dyn EncoderHandle>>,
    stopped: bool,
    failed: bool,
}

/// Un registro de la cola ya extraído, junto con su reproducción en curso.
///
/// Cuando la reproducción termina (bien o mal) el elemento se envía una única
/// vez por `done_tx` a la cola que lo creó.
pub struct QueuedMedia {
    record: QueueRecord,
    context: PlaybackContext,
    done_tx: mpsc::UnboundedSender<Arc<QueuedMedia>>,
    state: Mutex<MediaState>,
    finished: AtomicBool,
}

impl QueuedMedia {
    pub fn new(
        record: QueueRecord,
        context: PlaybackContext,
        done_tx: mpsc::UnboundedSender<Arc<QueuedMedia>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            record,
            context,
            done_tx,
            state: Mutex::new(MediaState {
                phase: MediaPhase::Created,
                renditions: Vec::new(),
                rendition_index: 0,
                elapsed_seconds: None,
                encoder: None,
                stopped: false,
                failed: false,
            }),
            finished: AtomicBool::new(false),
        })
    }

    pub fn record(&self) -> &QueueRecord {
        &self.record
    }

    pub fn title(&self) -> &str {
        &self.record.title
    }

    pub fn phase(&self) -> MediaPhase {
        self.state.lock().phase
    }

    pub fn has_failed(&self) -> bool {
        self.state.lock().failed
    }

    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.state.lock().elapsed_seconds
    }

    pub fn rendition_index(&self) -> usize {
        self.state.lock().rendition_index
    }

    /// Inicia la reproducción en el sink. Nunca falla: cualquier error termina
    /// el elemento y se notifica por el canal de finalización.
    pub async fn play(self: &Arc<Self>, sink: Arc<dyn StreamingSink>) {
        match self.record.kind {
            MediaKind::Local => {
                self.set_phase(MediaPhase::Attempting(0));
                let source = PlaybackSource::File {
                    path: self.record.locator.clone(),
                    encoding: self.record.encoding_hint.clone(),
                };
                self.bind(sink, source).await;
            }
            MediaKind::Resolved => self.play_remote(sink).await,
        }
    }

    async fn play_remote(self: &Arc<Self>, sink: Arc<dyn StreamingSink>) {
        let renditions = match self.load_renditions().await {
            Ok(renditions) if !renditions.is_empty() => renditions,
            Ok(_) => {
                warn!("⚠️ Sin renditions reproducibles para {}", self.record.locator);
                self.finish(true);
                return;
            }
            Err(e) => {
                error!("❌ No se pudo resolver {}: {:?}", self.record.locator, e);
                self.finish(true);
                return;
            }
        };

        let mut index = 0;
        let mut retried_last = false;

        loop {
            if self.state.lock().stopped {
                debug!("⏹️ {} detenido antes de reproducir", self.record.title);
                self.finish(false);
                return;
            }

            let rendition = &renditions[index];
            {
                let mut state = self.state.lock();
                state.rendition_index = index;
                state.phase = MediaPhase::Attempting(index);
            }

            debug!(
                "🔗 Probando rendition {}/{} [{}] de {}",
                index + 1,
                renditions.len(),
                rendition.encoding,
                self.record.title
            );

            match self.context.fetcher.probe(&rendition.url).await {
                Ok(ProbeOutcome::Ready) => {
                    let source = PlaybackSource::Remote {
                        url: rendition.url.clone(),
                        encoding: rendition.encoding.clone(),
                    };
                    self.bind(sink, source).await;
                    return;
                }
                Ok(ProbeOutcome::Redirect(status)) if index + 1 < renditions.len() => {
                    info!("↪️ Redirección {} en rendition {}, probando la siguiente", status, index);
                    index += 1;
                }
                Ok(ProbeOutcome::Redirect(status)) if !retried_last => {
                    info!("↪️ Redirección {} en la última rendition, reintentando", status);
                    retried_last = true;
                    tokio::time::sleep(self.context.redirect_retry_delay).await;
                }
                Ok(ProbeOutcome::Redirect(status)) => {
                    warn!("⚠️ Redirección {} persistente, abandonando {}", status, self.record.title);
                    self.finish(true);
                    return;
                }
                Ok(ProbeOutcome::Rejected(status)) => {
                    let e = MusicError::Transport(format!("HTTP {}", status));
                    warn!("⚠️ {} en {}", e, self.record.title);
                    self.finish(true);
                    return;
                }
                Err(e) => {
                    let e = MusicError::Transport(format!("{:#}", e));
                    warn!("⚠️ {} en {}", e, self.record.title);
                    self.finish(true);
                    return;
                }
            }
        }
    }

    /// Resuelve las renditions una vez por elemento, al sacarlo de la cola
    async fn load_renditions(&self) -> anyhow::Result<Vec<Rendition>> {
        {
            let state = self.state.lock();
            if !state.renditions.is_empty() {
                return Ok(state.renditions.clone());
            }
        }

        let renditions = match self.context.resolver.resolve(&self.record.locator).await? {
            Resolution::Track(track) => track.renditions,
            Resolution::Playlist(_) => {
                anyhow::bail!("se esperaba un track y se obtuvo una playlist")
            }
        };

        self.state.lock().renditions = renditions.clone();
        Ok(renditions)
    }

    async fn bind(self: &Arc<Self>, sink: Arc<dyn StreamingSink>, source: PlaybackSource) {
        if self.state.lock().stopped {
            debug!("⏭️ {} se detuvo antes de abrir el stream", self.record.title);
            self.finish(false);
            return;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let encoding = source.encoding().to_string();

        let encoder = match sink.bind(source, events_tx).await {
            Ok(encoder) => encoder,
            Err(e) => {
                error!("❌ El sink rechazó {}: {:?}", self.record.title, e);
                self.finish(true);
                return;
            }
        };

        // Un skip pudo llegar mientras se abría el stream
        let late_stop = {
            let mut state = self.state.lock();
            if state.stopped {
                Some(encoder)
            } else {
                state.encoder = Some(encoder);
                state.phase = MediaPhase::Streaming;
                None
            }
        };

        if let Some(encoder) = late_stop {
            encoder.stop();
            self.finish(false);
            return;
        }

        info!("▶️ Reproduciendo [{}] {}", encoding, self.record.title);
        tokio::spawn(self.clone().pump(events_rx));
    }

    async fn pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SinkEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SinkEvent::Timestamp(seconds) => {
                    self.state.lock().elapsed_seconds = Some(seconds);
                }
                SinkEvent::End => {
                    debug!("⏹️ Fin de {}", self.record.title);
                    self.finish(false);
                    break;
                }
                SinkEvent::Error(reason) => {
                    warn!("⚠️ Error de stream en {}: {}", self.record.title, reason);
                    self.finish(true);
                    break;
                }
                SinkEvent::Unpipe => debug!("unpipe: {}", self.record.title),
            }
        }

        // El sink se descartó sin avisar
        self.finish(false);
    }

    fn finish(self: &Arc<Self>, failed: bool) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_playing();

        {
            let mut state = self.state.lock();
            if failed {
                state.failed = true;
                state.phase = MediaPhase::Failed;
            }
            state.phase = MediaPhase::Done;
        }

        if self.done_tx.send(self.clone()).is_err() {
            debug!("La cola de {} ya no existe", self.record.guild_id);
        }
    }

    /// Libera el stream activo, si lo hay. Se puede llamar varias veces.
    pub fn stop_playing(&self) {
        let encoder = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.encoder.take()
        };

        if let Some(encoder) = encoder {
            encoder.stop();
        }
    }

    pub fn pause(&self) {
        if let Some(encoder) = self.state.lock().encoder.as_ref() {
            encoder.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(encoder) = self.state.lock().encoder.as_ref() {
            encoder.resume();
        }
    }

    pub fn describe(&self) -> String {
        let elapsed = format_time(self.elapsed_seconds().unwrap_or(0.0).max(0.0) as u64);
        let record = &self.record;

        match record.kind {
            MediaKind::Resolved => format!(
                "({}/{}) `[{}]` **{}** ({}) ({})",
                elapsed,
                format_time(record.duration_seconds),
                record.encoding_hint,
                record.title,
                record.track_id,
                record.owner_id.mention()
            ),
            MediaKind::Local => format!(
                "LOCAL ({}) `[{}]` **{}** - {} ({})",
                elapsed,
                record.encoding_hint,
                record.title,
                record.locator,
                record.owner_id.mention()
            ),
        }
    }

    fn set_phase(&self, phase: MediaPhase) {
        self.state.lock().phase = phase;
    }
}
