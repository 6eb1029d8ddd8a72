use anyhow::Result;
use dashmap::DashMap;
use serenity::model::{id::GuildId, mention::Mentionable};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::commands::{handler, CommandRegistry, IncomingMessage};
use crate::{
    audio::{
        guild_queue::{GuildQueue, QueueDeps, Requester, SkipOutcome},
        record::QueueRecord,
    },
    config::{Config, SkipPolicy},
    error::MusicError,
    sources::{MediaSearch, Resolution},
    ui::format::{chunk_lines, record_line},
};

#[derive(Debug, Clone, Copy)]
enum MusicCommand {
    NowPlaying,
    List,
    Queue,
    Skip,
    Pause,
    Resume,
    Search,
    Select,
}

const COMMANDS: [(&str, MusicCommand); 10] = [
    ("np", MusicCommand::NowPlaying),
    ("li", MusicCommand::List),
    ("queue", MusicCommand::Queue),
    ("q", MusicCommand::Queue),
    ("next", MusicCommand::Skip),
    ("pause", MusicCommand::Pause),
    ("resume", MusicCommand::Resume),
    ("search", MusicCommand::Search),
    ("yt", MusicCommand::Search),
    ("sel", MusicCommand::Select),
];

/// Fachada de la cola de música: enruta cada comando a la cola de su guild.
pub struct MusicQueueService {
    queues: DashMap<GuildId, Arc<GuildQueue>>,
    deps: QueueDeps,
    searcher: Arc<dyn MediaSearch>,
    config: Arc<Config>,
}

impl MusicQueueService {
    pub fn new(deps: QueueDeps, searcher: Arc<dyn MediaSearch>, config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self {
            queues: DashMap::new(),
            deps,
            searcher,
            config,
        })
    }

    /// Cola del guild, creada en el primer uso
    pub fn guild(&self, guild_id: GuildId) -> Arc<GuildQueue> {
        self.queues
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("Creando cola para guild {}", guild_id);
                GuildQueue::new(guild_id, self.deps.clone())
            })
            .clone()
    }

    pub fn register(self: &Arc<Self>, registry: &mut CommandRegistry) {
        for (name, command) in COMMANDS {
            let service = self.clone();
            registry.register(
                name,
                handler(move |message, args| {
                    let service = service.clone();
                    async move { service.handle(command, message, args).await }
                }),
            );
        }
    }

    async fn handle(
        &self,
        command: MusicCommand,
        message: Arc<IncomingMessage>,
        args: Vec<String>,
    ) -> Result<()> {
        let Some(guild_id) = message.guild_id else {
            debug!("Comando de música fuera de un guild ignorado");
            return Ok(());
        };

        match command {
            MusicCommand::NowPlaying => self.now_playing(guild_id, &message).await,
            MusicCommand::List => self.list(guild_id, &message).await,
            MusicCommand::Queue => self.queue_locator(guild_id, &message, &args.join(" ")).await,
            MusicCommand::Skip => self.skip(guild_id, &message).await,
            MusicCommand::Pause => self.pause(guild_id, &message, true).await,
            MusicCommand::Resume => self.pause(guild_id, &message, false).await,
            MusicCommand::Search => self.search(guild_id, &message, &args.join(" ")).await,
            MusicCommand::Select => self.select(guild_id, &message, &args).await,
        }
    }

    async fn now_playing(&self, guild_id: GuildId, message: &IncomingMessage) -> Result<()> {
        let reply = match self.guild(guild_id).current() {
            Some(item) => item.describe(),
            None => "No currently playing song".to_string(),
        };
        self.say(message, &reply).await
    }

    async fn list(&self, guild_id: GuildId, message: &IncomingMessage) -> Result<()> {
        let queue = self.guild(guild_id);
        let mut lines = Vec::new();

        if let Some(item) = queue.current() {
            lines.push("Currently Playing:".to_string());
            lines.push(record_line(item.record(), item.elapsed_seconds()));
            lines.push(String::new());
        }

        let len = queue.store().queue_len(guild_id).await?;
        lines.push(format!("Playlist ({}):", len));

        if len == 0 {
            lines.push("- Nothing!".to_string());
        } else {
            let preview = queue
                .store()
                .peek_records(guild_id, self.config.list_preview)
                .await?;
            lines.extend(preview.iter().map(|record| record_line(record, None)));

            if len > preview.len() {
                lines.push(format!("...and {} more", len - preview.len()));
            }
        }

        for chunk in chunk_lines(&lines, self.config.message_limit) {
            self.say(message, &chunk).await?;
        }
        Ok(())
    }

    /// Resuelve el locator y agrega uno o varios registros a la cola
    async fn queue_locator(
        &self,
        guild_id: GuildId,
        message: &IncomingMessage,
        locator: &str,
    ) -> Result<()> {
        let mention = message.author_id.mention();
        let locator = locator.trim();

        if locator.is_empty() {
            return self
                .say(message, &format!("{} Please give me a URL to play", mention))
                .await;
        }

        let queue = self.guild(guild_id);
        let len = queue.store().queue_len(guild_id).await?;
        let room = self.config.max_queue_size.saturating_sub(len);
        if room == 0 {
            return self
                .say(
                    message,
                    &format!(
                        "{} The queue is full ({} songs).",
                        mention, self.config.max_queue_size
                    ),
                )
                .await;
        }

        let records = match self.records_for(guild_id, message, locator).await {
            Ok(records) if !records.is_empty() => records,
            Ok(_) => {
                warn!("⚠️ Playlist vacía: {}", locator);
                return self
                    .say(message, &format!("{} Sorry, I was not able to queue that song.", mention))
                    .await;
            }
            Err(e) => {
                warn!("⚠️ No se pudo encolar {}: {}", locator, e);
                return self
                    .say(message, &format!("{} Sorry, I was not able to queue that song.", mention))
                    .await;
            }
        };

        let records: Vec<QueueRecord> = records.into_iter().take(room).collect();
        let first = records[0].clone();
        let count = records.len();

        let reply = if count == 1 {
            format!("Added {}", record_line(&first, None))
        } else {
            format!("Added {} songs to the queue", count)
        };

        queue.enqueue_many(records, Some(requester(message))).await?;
        self.say(message, &reply).await
    }

    async fn records_for(
        &self,
        guild_id: GuildId,
        message: &IncomingMessage,
        locator: &str,
    ) -> Result<Vec<QueueRecord>, MusicError> {
        let owner = message.author_id;

        if !is_remote(locator) {
            let record = QueueRecord::local(owner, guild_id, locator);
            tokio::fs::metadata(&record.locator)
                .await
                .map_err(|e| MusicError::Resolve {
                    locator: locator.to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(vec![record]);
        }

        let resolution = self
            .deps
            .playback
            .resolver
            .resolve(locator)
            .await
            .map_err(|e| MusicError::Resolve {
                locator: locator.to_string(),
                reason: format!("{:#}", e),
            })?;

        Ok(match resolution {
            Resolution::Track(track) => vec![QueueRecord::resolved(owner, guild_id, &track)],
            Resolution::Playlist(entries) => {
                info!("📋 Playlist con {} entradas para {}", entries.len(), guild_id);
                entries
                    .iter()
                    .take(self.config.max_playlist_size)
                    .map(|track| QueueRecord::resolved(owner, guild_id, track))
                    .collect()
            }
        })
    }

    async fn skip(&self, guild_id: GuildId, message: &IncomingMessage) -> Result<()> {
        if let Err(e) = self.authorize_skip(message) {
            info!("🚫 {} intentó saltar en {}: {}", message.author_id, guild_id, e);
            return self
                .say(
                    message,
                    &format!(
                        "{} You are not authorized to perform this action.",
                        message.author_id.mention()
                    ),
                )
                .await;
        }

        match self.guild(guild_id).skip(requester(message)).await? {
            SkipOutcome::Skipped => Ok(()),
            SkipOutcome::NothingToSkip => self.say(message, "No currently playing song").await,
        }
    }

    fn authorize_skip(&self, message: &IncomingMessage) -> Result<(), MusicError> {
        let allowed = match self.config.skip_policy {
            SkipPolicy::Anyone => true,
            SkipPolicy::InVoiceChannel => message.voice_channel.is_some(),
            SkipPolicy::Privileged => self.config.privileged_users.contains(&message.author_id),
        };

        if allowed {
            Ok(())
        } else {
            Err(MusicError::Unauthorized)
        }
    }

    async fn pause(&self, guild_id: GuildId, message: &IncomingMessage, pause: bool) -> Result<()> {
        let queue = self.guild(guild_id);
        let applied = if pause { queue.pause() } else { queue.resume() };

        if !applied {
            return self.say(message, "No currently playing song").await;
        }
        Ok(())
    }

    async fn search(&self, guild_id: GuildId, message: &IncomingMessage, query: &str) -> Result<()> {
        let query = query.trim();
        if query.is_empty() {
            return self
                .say(
                    message,
                    &format!("{} Please give me something to search for", message.author_id.mention()),
                )
                .await;
        }

        let hits = self.searcher.search(query, self.config.search_results).await?;
        if hits.is_empty() {
            return self.say(message, "No results found.").await;
        }

        let store = self.guild(guild_id).store().clone();
        store.save_search(guild_id, message.channel_id, &hits).await?;

        let mut lines: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("`{}.` {}", i + 1, hit.title))
            .collect();
        lines.push(format!(
            "Use `{}sel <number>` to queue one of them.",
            self.config.command_prefix
        ));

        for chunk in chunk_lines(&lines, self.config.message_limit) {
            self.say(message, &chunk).await?;
        }
        Ok(())
    }

    async fn select(&self, guild_id: GuildId, message: &IncomingMessage, args: &[String]) -> Result<()> {
        let store = self.guild(guild_id).store().clone();

        let Some(hits) = store.load_search(guild_id, message.channel_id).await? else {
            return self.say(message, "There is no previous search query").await;
        };

        let hit = args
            .first()
            .and_then(|arg| arg.parse::<usize>().ok())
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| hits.get(index));

        match hit {
            Some(hit) => self.queue_locator(guild_id, message, &hit.locator).await,
            None => self.say(message, "Please supply a valid index").await,
        }
    }

    async fn say(&self, message: &IncomingMessage, content: &str) -> Result<()> {
        self.deps.transport.send(message.channel_id, content).await
    }
}

fn requester(message: &IncomingMessage) -> Requester {
    Requester {
        user_id: message.author_id,
        channel_id: message.channel_id,
        voice_channel: message.voice_channel,
    }
}

/// `http(s)://` se resuelve; cualquier otra cosa se trata como archivo local
fn is_remote(locator: &str) -> bool {
    Url::parse(locator)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}
