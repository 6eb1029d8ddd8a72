//! Test doubles for the external collaborators of the music queue.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

use crate::{
    audio::{
        fetch::{ProbeOutcome, RenditionFetcher},
        record::{MediaKind, QueueRecord},
        sink::{EncoderHandle, PlaybackSource, SinkEvent, StreamingSink, VoiceGateway},
    },
    bot::transport::ChatTransport,
    error::MusicError,
    sources::{Rendition, ResolvedTrack},
};

pub const GUILD: GuildId = GuildId::new(1);
pub const OWNER: UserId = UserId::new(7);

/// Registro remoto con locator `https://example.com/<title>`
pub fn remote_record(title: &str) -> QueueRecord {
    QueueRecord {
        kind: MediaKind::Resolved,
        owner_id: OWNER,
        guild_id: GUILD,
        title: title.to_string(),
        track_id: format!("id-{}", title),
        locator: format!("https://example.com/{}", title),
        encoding_hint: "opus".to_string(),
        duration_seconds: 90,
    }
}

pub fn track_with(locator: &str, urls: &[&str]) -> ResolvedTrack {
    let title = locator.rsplit('/').next().unwrap_or(locator).to_string();
    ResolvedTrack {
        track_id: format!("id-{}", title),
        title,
        locator: locator.to_string(),
        duration_seconds: 90,
        encoding: "opus".to_string(),
        renditions: urls
            .iter()
            .map(|url| Rendition {
                url: url.to_string(),
                encoding: "opus".to_string(),
                bitrate: Some(128.0),
            })
            .collect(),
    }
}

/// Espera hasta ~2s a que se cumpla la condición
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<(ChannelId, String)>>,
    delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transporte que tarda `delay` en cada envío
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn sent(&self) -> Vec<(ChannelId, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send(&self, channel_id: ChannelId, content: &str) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().push((channel_id, content.to_string()));
        Ok(())
    }
}

/// Encoder que emite `End` la primera vez que se detiene
pub struct FakeEncoder {
    stops: Arc<AtomicUsize>,
    paused: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SinkEvent>,
}

impl EncoderHandle for FakeEncoder {
    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        if self.stops.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = self.events.send(SinkEvent::End);
        }
    }
}

pub struct FakeSink {
    binds: Mutex<Vec<PlaybackSource>>,
    /// Contador de stops por stream; en cero sigue vivo
    streams: Mutex<Vec<Arc<AtomicUsize>>>,
    max_live: AtomicUsize,
    events: Mutex<Option<mpsc::UnboundedSender<SinkEvent>>>,
    stops: Arc<AtomicUsize>,
    paused: Arc<AtomicBool>,
    connected: AtomicBool,
    disconnects: AtomicUsize,
}

impl FakeSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            binds: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            max_live: AtomicUsize::new(0),
            events: Mutex::new(None),
            stops: Arc::new(AtomicUsize::new(0)),
            paused: Arc::new(AtomicBool::new(false)),
            connected: AtomicBool::new(true),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn bound(&self) -> Vec<PlaybackSource> {
        self.binds.lock().clone()
    }

    pub fn bind_count(&self) -> usize {
        self.binds.lock().len()
    }

    /// Streams entregados que nadie ha detenido
    pub fn live_streams(&self) -> usize {
        self.streams
            .lock()
            .iter()
            .filter(|stops| stops.load(Ordering::SeqCst) == 0)
            .count()
    }

    /// Máximo de streams vivos observado en cada `bind`
    pub fn max_live_streams(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Emite un evento sobre el stream más reciente
    pub fn emit(&self, event: SinkEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    pub fn end_current(&self) {
        self.emit(SinkEvent::End);
    }

    /// Total de `stop()` sobre todos los encoders entregados
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamingSink for FakeSink {
    async fn bind(
        &self,
        source: PlaybackSource,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<Box<dyn EncoderHandle>> {
        self.binds.lock().push(source);
        *self.events.lock() = Some(events.clone());

        // Cada stream cuenta sus propios stops para emitir un único End
        let stops = Arc::new(AtomicUsize::new(0));
        let total = self.stops.clone();
        self.streams.lock().push(stops.clone());
        self.max_live.fetch_max(self.live_streams(), Ordering::SeqCst);
        let encoder = FakeEncoder {
            stops: stops.clone(),
            paused: self.paused.clone(),
            events,
        };

        Ok(Box::new(CountingEncoder {
            inner: encoder,
            total,
        }))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct CountingEncoder {
    inner: FakeEncoder,
    total: Arc<AtomicUsize>,
}

impl EncoderHandle for CountingEncoder {
    fn pause(&self) {
        self.inner.pause();
    }

    fn resume(&self) {
        self.inner.resume();
    }

    fn stop(&self) {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.inner.stop();
    }
}

/// Gateway que entrega siempre el mismo sink y puede fallar los primeros joins
pub struct FakeVoice {
    sink: Arc<FakeSink>,
    failures: Mutex<usize>,
    joins: Mutex<Vec<ChannelId>>,
}

impl FakeVoice {
    pub fn new(sink: Arc<FakeSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            failures: Mutex::new(0),
            joins: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_next_joins(&self, count: usize) {
        *self.failures.lock() = count;
    }

    pub fn joins(&self) -> Vec<ChannelId> {
        self.joins.lock().clone()
    }
}

#[async_trait]
impl VoiceGateway for FakeVoice {
    async fn join(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn StreamingSink>, MusicError> {
        self.joins.lock().push(channel_id);

        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(MusicError::Join("missing permissions".to_string()));
            }
        }

        self.sink.connected.store(true, Ordering::SeqCst);
        Ok(self.sink.clone())
    }
}

/// Fetcher con respuestas programadas; al agotarse devuelve `fallback`
pub struct FakeFetcher {
    script: Mutex<VecDeque<ProbeOutcome>>,
    fallback: ProbeOutcome,
    probed: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn always(outcome: ProbeOutcome) -> Arc<Self> {
        Self::scripted(Vec::new(), outcome)
    }

    pub fn scripted(script: Vec<ProbeOutcome>, fallback: ProbeOutcome) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            probed: Mutex::new(Vec::new()),
        })
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().clone()
    }
}

#[async_trait]
impl RenditionFetcher for FakeFetcher {
    async fn probe(&self, url: &str) -> Result<ProbeOutcome> {
        self.probed.lock().push(url.to_string());
        Ok(self.script.lock().pop_front().unwrap_or(self.fallback))
    }
}
