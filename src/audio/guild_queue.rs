use parking_lot::Mutex;
use serenity::model::{
    id::{ChannelId, GuildId, UserId},
    mention::Mentionable,
};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    queued_media::{PlaybackContext, QueuedMedia},
    record::QueueRecord,
    sink::{StreamingSink, VoiceGateway},
};
use crate::{bot::transport::ChatTransport, error::MusicError, storage::MusicStore};

/// Quién disparó una operación y dónde responderle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: UserId,
    /// Canal de texto donde llegó el comando
    pub channel_id: ChannelId,
    /// Canal de voz del usuario, si está conectado a uno
    pub voice_channel: Option<ChannelId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipOutcome {
    Skipped,
    NothingToSkip,
}

/// Colaboradores de una cola de guild
#[derive(Clone)]
pub struct QueueDeps {
    pub store: MusicStore,
    pub playback: PlaybackContext,
    pub voice: Arc<dyn VoiceGateway>,
    pub transport: Arc<dyn ChatTransport>,
}

enum SlotPhase {
    Idle,
    /// Un drenado tiene el slot reservado (pop/join/play en curso)
    Draining,
    Playing(Arc<QueuedMedia>),
}

struct Slot {
    phase: SlotPhase,
    /// Otro disparador llegó mientras se drenaba
    rerun: bool,
    /// Último solicitante en voz cuyo drenado encontró el slot ocupado
    pending: Option<Requester>,
}

enum DrainStep {
    /// El slot sigue reservado; repetir
    Again,
    Finished,
}

/// Máquina de estados de reproducción de un guild.
///
/// El slot `currently playing` se reserva de forma síncrona antes de cualquier
/// `.await`, de modo que disparos concurrentes de `drain` nunca extraen dos
/// registros a la vez.
pub struct GuildQueue {
    guild_id: GuildId,
    deps: QueueDeps,
    slot: Mutex<Slot>,
    sink: Mutex<Option<Arc<dyn StreamingSink>>>,
    done_tx: mpsc::UnboundedSender<Arc<QueuedMedia>>,
}

impl GuildQueue {
    pub fn new(guild_id: GuildId, deps: QueueDeps) -> Arc<Self> {
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let queue = Arc::new(Self {
            guild_id,
            deps,
            slot: Mutex::new(Slot {
                phase: SlotPhase::Idle,
                rerun: false,
                pending: None,
            }),
            sink: Mutex::new(None),
            done_tx,
        });

        tokio::spawn(Self::completion_loop(Arc::downgrade(&queue), done_rx));
        queue
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn current(&self) -> Option<Arc<QueuedMedia>> {
        match &self.slot.lock().phase {
            SlotPhase::Playing(item) => Some(item.clone()),
            _ => None,
        }
    }

    pub fn store(&self) -> &MusicStore {
        &self.deps.store
    }

    /// Persiste el registro y dispara el drenado
    pub async fn enqueue(
        self: &Arc<Self>,
        record: QueueRecord,
        requester: Option<Requester>,
    ) -> Result<usize, MusicError> {
        let len = self.deps.store.push_record(&record).await?;
        info!("➕ '{}' agregado a la cola de {} ({})", record.title, self.guild_id, len);

        self.drain(requester).await;
        Ok(len)
    }

    /// Persiste varios registros en orden y drena una sola vez
    pub async fn enqueue_many(
        self: &Arc<Self>,
        records: Vec<QueueRecord>,
        requester: Option<Requester>,
    ) -> Result<usize, MusicError> {
        let mut pushed = 0;
        for record in &records {
            if let Err(e) = self.deps.store.push_record(record).await {
                error!("❌ Error guardando '{}': {}", record.title, e);
                if pushed == 0 {
                    return Err(e);
                }
                break;
            }
            pushed += 1;
        }

        info!("📋 {} elementos agregados a la cola de {}", pushed, self.guild_id);
        self.drain(requester).await;
        Ok(pushed)
    }

    /// Saca el siguiente registro y lo reproduce si no hay nada sonando.
    pub async fn drain(self: &Arc<Self>, requester: Option<Requester>) {
        if !self.claim(requester.as_ref()) {
            return;
        }

        let mut requester = requester;
        while let DrainStep::Again = self.drain_step(&mut requester).await {}
    }

    async fn drain_step(self: &Arc<Self>, requester: &mut Option<Requester>) -> DrainStep {
        self.adopt_pending(requester);

        let len = match self.deps.store.queue_len(self.guild_id).await {
            Ok(len) => len,
            Err(e) => {
                error!("❌ No se pudo leer la cola de {}: {}", self.guild_id, e);
                return self.release_claim();
            }
        };

        if len == 0 {
            let held = self.sink.lock().take();
            if let Some(sink) = held {
                info!("👋 Cola vacía en {}, desconectando", self.guild_id);
                if let Err(e) = sink.disconnect().await {
                    warn!("⚠️ Error al desconectar de {}: {:?}", self.guild_id, e);
                }
            }
            return self.release_claim();
        }

        if requester.is_none() && !self.has_live_sink().await {
            debug!("⏸️ {} elementos esperando un canal de voz en {}", len, self.guild_id);
            return self.release_claim();
        }

        let record = match self.deps.store.pop_record(self.guild_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return self.release_claim(),
            Err(MusicError::Codec(e)) => {
                warn!("⚠️ Registro corrupto descartado en {}: {}", self.guild_id, e);
                return DrainStep::Again;
            }
            Err(e) => {
                error!("❌ No se pudo extraer de la cola de {}: {}", self.guild_id, e);
                return self.release_claim();
            }
        };

        let item = QueuedMedia::new(record, self.deps.playback.clone(), self.done_tx.clone());
        {
            let mut slot = self.slot.lock();
            slot.phase = SlotPhase::Playing(item.clone());
            slot.rerun = false;
        }

        let sink = match self.destination(requester.as_ref()).await {
            Ok(sink) => sink,
            Err(e) => {
                let retry_with = match e {
                    MusicError::NoVoiceChannel => {
                        if let Some(requester) = requester.as_ref() {
                            self.reply(
                                requester,
                                format!(
                                    "{}, Can you please join a voice channel I can play to?",
                                    requester.user_id.mention()
                                ),
                            )
                            .await;
                        }
                        None
                    }
                    other => {
                        warn!("⚠️ Descartando '{}': {}", item.title(), other);
                        if let Some(requester) = requester.as_ref() {
                            self.reply(
                                requester,
                                format!(
                                    "{}, I was not able to join your voice channel.",
                                    requester.user_id.mention()
                                ),
                            )
                            .await;
                        }
                        *requester
                    }
                };

                item.stop_playing();
                if !self.reclaim(&item) {
                    return DrainStep::Finished;
                }
                *requester = retry_with;
                return DrainStep::Again;
            }
        };

        item.play(sink).await;
        DrainStep::Finished
    }

    async fn destination(
        &self,
        requester: Option<&Requester>,
    ) -> Result<Arc<dyn StreamingSink>, MusicError> {
        let held = self.sink.lock().clone();
        if let Some(sink) = held {
            if sink.is_connected().await {
                return Ok(sink);
            }
        }

        let channel_id = requester
            .and_then(|r| r.voice_channel)
            .ok_or(MusicError::NoVoiceChannel)?;

        info!("🔊 Uniéndose al canal {} en {}", channel_id, self.guild_id);
        let sink = self.deps.voice.join(self.guild_id, channel_id).await?;
        *self.sink.lock() = Some(sink.clone());
        Ok(sink)
    }

    async fn has_live_sink(&self) -> bool {
        let held = self.sink.lock().clone();
        match held {
            Some(sink) => sink.is_connected().await,
            None => false,
        }
    }

    /// Reserva el slot si está libre; si hay un drenado en curso, le pide otra vuelta.
    ///
    /// Un solicitante rechazado que está en voz queda guardado para que el
    /// drenado en curso pueda usarlo si pierde su propio destino.
    fn claim(&self, requester: Option<&Requester>) -> bool {
        let mut slot = self.slot.lock();
        let claimed = match slot.phase {
            SlotPhase::Idle => {
                slot.phase = SlotPhase::Draining;
                slot.rerun = false;
                true
            }
            SlotPhase::Draining => {
                slot.rerun = true;
                false
            }
            SlotPhase::Playing(_) => false,
        };

        if !claimed {
            if let Some(requester) = requester.filter(|r| r.voice_channel.is_some()) {
                slot.pending = Some(*requester);
            }
        }
        claimed
    }

    /// Cambia a un solicitante pendiente si el actual no tiene canal de voz
    fn adopt_pending(&self, requester: &mut Option<Requester>) {
        let Some(pending) = self.slot.lock().pending.take() else {
            return;
        };

        if requester.map_or(true, |r| r.voice_channel.is_none()) {
            debug!("🔁 Drenado de {} continúa con el solicitante {}", self.guild_id, pending.user_id);
            *requester = Some(pending);
        }
    }

    fn release_claim(&self) -> DrainStep {
        let mut slot = self.slot.lock();
        if !matches!(slot.phase, SlotPhase::Draining) {
            return DrainStep::Finished;
        }

        if slot.rerun {
            slot.rerun = false;
            return DrainStep::Again;
        }

        slot.phase = SlotPhase::Idle;
        DrainStep::Finished
    }

    /// Devuelve el slot de `Playing(item)` a `Draining`
    fn reclaim(&self, item: &Arc<QueuedMedia>) -> bool {
        let mut slot = self.slot.lock();
        match &slot.phase {
            SlotPhase::Playing(current) if Arc::ptr_eq(current, item) => {
                slot.phase = SlotPhase::Draining;
                true
            }
            _ => false,
        }
    }

    /// Libera el slot solo si `item` sigue siendo el elemento actual
    fn release(&self, item: &Arc<QueuedMedia>) -> bool {
        let mut slot = self.slot.lock();
        match &slot.phase {
            SlotPhase::Playing(current) if Arc::ptr_eq(current, item) => {
                slot.phase = SlotPhase::Idle;
                true
            }
            _ => false,
        }
    }

    async fn completion_loop(
        queue: Weak<Self>,
        mut done: mpsc::UnboundedReceiver<Arc<QueuedMedia>>,
    ) {
        while let Some(item) = done.recv().await {
            let Some(queue) = queue.upgrade() else {
                break;
            };
            queue.on_done(item).await;
        }
    }

    /// Completa un elemento; se ignoran finalizaciones de elementos ya reemplazados.
    pub async fn on_done(self: &Arc<Self>, item: Arc<QueuedMedia>) {
        if !self.release(&item) {
            debug!("Finalización obsoleta de '{}' ignorada", item.title());
            return;
        }

        debug!("✅ '{}' terminó en {}", item.title(), self.guild_id);
        self.drain(None).await;
    }

    /// Detiene lo que suena y pasa al siguiente. La autorización es del llamador.
    pub async fn skip(self: &Arc<Self>, requester: Requester) -> Result<SkipOutcome, MusicError> {
        if let Some(item) = self.current() {
            info!("⏭️ Saltando '{}' en {}", item.title(), self.guild_id);
            item.stop_playing();
            self.release(&item);
            self.drain(Some(requester)).await;
            return Ok(SkipOutcome::Skipped);
        }

        if self.deps.store.queue_len(self.guild_id).await? == 0 {
            return Ok(SkipOutcome::NothingToSkip);
        }

        self.drain(Some(requester)).await;
        Ok(SkipOutcome::Skipped)
    }

    pub fn pause(&self) -> bool {
        self.current().map(|item| item.pause()).is_some()
    }

    pub fn resume(&self) -> bool {
        self.current().map(|item| item.resume()).is_some()
    }

    async fn reply(&self, requester: &Requester, content: String) {
        if let Err(e) = self.deps.transport.send(requester.channel_id, &content).await {
            warn!("⚠️ No se pudo responder en {}: {:?}", requester.channel_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::fetch::ProbeOutcome,
        sources::{MockMediaResolver, Resolution},
        storage::MemoryStore,
        testing::{
            eventually, remote_record, track_with, FakeFetcher, FakeSink, FakeTransport,
            FakeVoice, GUILD, OWNER,
        },
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Harness {
        queue: Arc<GuildQueue>,
        sink: Arc<FakeSink>,
        voice: Arc<FakeVoice>,
        transport: Arc<FakeTransport>,
        store: MusicStore,
    }

    fn harness() -> Harness {
        harness_with(FakeTransport::new())
    }

    fn harness_with(transport: Arc<FakeTransport>) -> Harness {
        let mut resolver = MockMediaResolver::new();
        resolver.expect_resolve().returning(|locator| {
            Ok(Resolution::Track(track_with(locator, &["https://cdn/a"])))
        });

        let sink = FakeSink::new();
        let voice = FakeVoice::new(sink.clone());
        let store = MusicStore::new(Arc::new(MemoryStore::new()), "cardinal");

        let queue = GuildQueue::new(
            GUILD,
            QueueDeps {
                store: store.clone(),
                playback: PlaybackContext {
                    resolver: Arc::new(resolver),
                    fetcher: FakeFetcher::always(ProbeOutcome::Ready),
                    redirect_retry_delay: Duration::from_millis(1),
                },
                voice: voice.clone(),
                transport: transport.clone(),
            },
        );

        Harness {
            queue,
            sink,
            voice,
            transport,
            store,
        }
    }

    fn in_voice() -> Requester {
        Requester {
            user_id: OWNER,
            channel_id: ChannelId::new(100),
            voice_channel: Some(ChannelId::new(200)),
        }
    }

    fn current_title(queue: &GuildQueue) -> Option<String> {
        queue.current().map(|item| item.title().to_string())
    }

    #[tokio::test]
    async fn plays_in_fifo_order() {
        let h = harness();

        h.queue.enqueue(remote_record("A"), Some(in_voice())).await.unwrap();
        h.queue.enqueue(remote_record("B"), Some(in_voice())).await.unwrap();

        assert_eq!(current_title(&h.queue).as_deref(), Some("A"));
        assert_eq!(h.sink.bind_count(), 1);

        h.sink.end_current();
        assert!(eventually(|| current_title(&h.queue).as_deref() == Some("B")).await);
        assert_eq!(h.sink.bind_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_enqueues_start_a_single_item() {
        let h = harness();

        let enqueues = (0..8).map(|i| {
            let queue = h.queue.clone();
            async move {
                queue
                    .enqueue(remote_record(&format!("t{}", i)), Some(in_voice()))
                    .await
            }
        });
        for result in futures::future::join_all(enqueues).await {
            result.unwrap();
        }

        assert_eq!(h.sink.bind_count(), 1);
        assert!(h.queue.current().is_some());
        assert_eq!(h.store.queue_len(GUILD).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn concurrent_enqueues_across_tasks_start_a_single_item() {
        let h = harness();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = h.queue.clone();
                tokio::spawn(async move {
                    queue
                        .enqueue(remote_record(&format!("t{}", i)), Some(in_voice()))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(eventually(|| h.sink.bind_count() >= 1).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.sink.bind_count(), 1);
        assert_eq!(h.store.queue_len(GUILD).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn join_failure_moves_on_to_the_next_item() {
        let h = harness();
        h.store.push_record(&remote_record("A")).await.unwrap();
        h.store.push_record(&remote_record("B")).await.unwrap();
        h.voice.fail_next_joins(1);

        h.queue.drain(Some(in_voice())).await;

        assert_eq!(current_title(&h.queue).as_deref(), Some("B"));
        assert_eq!(h.voice.joins().len(), 2);
        assert_eq!(
            h.transport.messages(),
            vec!["<@7>, I was not able to join your voice channel.".to_string()]
        );
    }

    #[tokio::test]
    async fn requester_outside_voice_is_told_to_join() {
        let h = harness();
        let requester = Requester {
            voice_channel: None,
            ..in_voice()
        };

        h.queue.enqueue(remote_record("A"), Some(requester)).await.unwrap();

        assert!(h.queue.current().is_none());
        assert_eq!(h.sink.bind_count(), 0);
        assert_eq!(
            h.transport.sent(),
            vec![(
                ChannelId::new(100),
                "<@7>, Can you please join a voice channel I can play to?".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn item_queued_while_another_user_is_told_to_join_still_plays() {
        let h = harness_with(FakeTransport::slow(Duration::from_millis(50)));
        let outsider = Requester {
            user_id: UserId::new(8),
            channel_id: ChannelId::new(101),
            voice_channel: None,
        };

        let first = {
            let queue = h.queue.clone();
            tokio::spawn(async move { queue.enqueue(remote_record("A"), Some(outsider)).await })
        };
        assert!(eventually(|| current_title(&h.queue).as_deref() == Some("A")).await);

        // A está ocupando el slot mientras se envía la respuesta lenta
        h.queue.enqueue(remote_record("B"), Some(in_voice())).await.unwrap();
        first.await.unwrap().unwrap();

        assert!(eventually(|| current_title(&h.queue).as_deref() == Some("B")).await);
        assert_eq!(h.sink.bind_count(), 1);
        assert_eq!(h.voice.joins(), vec![ChannelId::new(200)]);
        assert_eq!(h.store.queue_len(GUILD).await.unwrap(), 0);
        assert_eq!(
            h.transport.sent(),
            vec![(
                ChannelId::new(101),
                "<@8>, Can you please join a voice channel I can play to?".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn rerun_requested_during_a_drain_uses_the_later_requester() {
        let h = harness();
        let outsider = Requester {
            voice_channel: None,
            ..in_voice()
        };
        h.store.push_record(&remote_record("A")).await.unwrap();

        // Un drenado sin destino tiene el slot cuando llega otro en voz
        assert!(h.queue.claim(Some(&outsider)));
        assert!(!h.queue.claim(Some(&in_voice())));
        let mut requester = Some(outsider);
        while let DrainStep::Again = h.queue.drain_step(&mut requester).await {}

        assert_eq!(current_title(&h.queue).as_deref(), Some("A"));
        assert_eq!(h.voice.joins(), vec![ChannelId::new(200)]);
        assert!(h.transport.messages().is_empty());
    }

    #[tokio::test]
    async fn concurrent_skips_and_enqueues_keep_a_single_live_item() {
        let h = harness();
        h.queue.enqueue(remote_record("A"), Some(in_voice())).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..6 {
            let queue = h.queue.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(remote_record(&format!("t{}", i)), Some(in_voice()))
                    .await
                    .map(|_| ())
            }));
            let queue = h.queue.clone();
            handles.push(tokio::spawn(async move {
                queue.skip(in_voice()).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let remaining = h.store.queue_len(GUILD).await.unwrap();
        let playing = h.queue.current().is_some();

        assert_eq!(h.sink.max_live_streams(), 1);
        assert_eq!(h.sink.bind_count() + remaining, 7);
        assert_eq!(h.sink.live_streams(), usize::from(playing));
        assert!(playing || remaining == 0);
    }

    #[tokio::test]
    async fn disconnects_once_when_the_queue_runs_dry() {
        let h = harness();

        h.queue.enqueue(remote_record("A"), Some(in_voice())).await.unwrap();
        h.sink.end_current();

        assert!(eventually(|| h.sink.disconnect_count() == 1).await);
        assert!(h.queue.current().is_none());

        h.queue.drain(None).await;
        h.queue.drain(Some(in_voice())).await;
        assert_eq!(h.sink.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn skip_with_nothing_queued_changes_nothing() {
        let h = harness();

        let outcome = h.queue.skip(in_voice()).await.unwrap();

        assert_eq!(outcome, SkipOutcome::NothingToSkip);
        assert!(h.queue.current().is_none());
        assert_eq!(h.voice.joins().len(), 0);
    }

    #[tokio::test]
    async fn skip_advances_and_ignores_the_stale_completion() {
        let h = harness();
        h.queue.enqueue(remote_record("A"), Some(in_voice())).await.unwrap();
        h.queue.enqueue(remote_record("B"), Some(in_voice())).await.unwrap();
        let first = h.queue.current().unwrap();

        let outcome = h.queue.skip(in_voice()).await.unwrap();

        assert_eq!(outcome, SkipOutcome::Skipped);
        assert_eq!(current_title(&h.queue).as_deref(), Some("B"));

        // La finalización de A llega después del skip
        assert!(eventually(|| first.phase() == crate::audio::queued_media::MediaPhase::Done).await);
        h.queue.on_done(first).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(current_title(&h.queue).as_deref(), Some("B"));
        assert_eq!(h.sink.bind_count(), 2);
    }

    #[tokio::test]
    async fn items_wait_for_a_destination_without_being_popped() {
        let h = harness();

        h.queue.enqueue(remote_record("A"), None).await.unwrap();

        assert!(h.queue.current().is_none());
        assert_eq!(h.store.queue_len(GUILD).await.unwrap(), 1);

        h.queue.drain(Some(in_voice())).await;
        assert_eq!(current_title(&h.queue).as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn pause_and_resume_reach_the_encoder() {
        let h = harness();
        assert!(!h.queue.pause());

        h.queue.enqueue(remote_record("A"), Some(in_voice())).await.unwrap();

        assert!(h.queue.pause());
        assert!(h.sink.is_paused());
        assert!(h.queue.resume());
        assert!(!h.sink.is_paused());
    }
}
