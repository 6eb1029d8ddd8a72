//! # Audio Module
//!
//! Guild-scoped music queue and the playback lifecycle of queued media.
//!
//! ## Architecture
//!
//! ### [`guild_queue`] - Guild Queue
//! - One state machine per guild, created lazily and kept for the process lifetime
//! - Owns the "currently playing" slot and the held voice sink
//! - Sequences pop/join/play and drains the next item on completion
//!
//! ### [`queued_media`] - Playback Lifecycle
//! - Re-resolves renditions when a record is popped
//! - Redirect fallback across renditions with a single bounded retry
//! - Elapsed-time tracking and completion signaling
//!
//! ### [`sink`] / [`fetch`] - External Capabilities
//! - [`sink::StreamingSink`]: an established voice channel accepting one stream at a time
//! - [`fetch::RenditionFetcher`]: opens a remote rendition without following redirects
//! - [`songbird_sink`]: the Songbird-backed implementation used in production
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cardinal::audio::guild_queue::{GuildQueue, QueueDeps, Requester};
//! use cardinal::audio::record::QueueRecord;
//! use serenity::model::id::{ChannelId, GuildId, UserId};
//!
//! # async fn example(deps: QueueDeps) -> anyhow::Result<()> {
//! let guild_id = GuildId::new(123456789);
//! let queue = GuildQueue::new(guild_id, deps);
//!
//! let requester = Requester {
//!     user_id: UserId::new(1),
//!     channel_id: ChannelId::new(2),
//!     voice_channel: Some(ChannelId::new(3)),
//! };
//! let record = QueueRecord::local(requester.user_id, guild_id, "/music/song.opus");
//! queue.enqueue(record, Some(requester)).await?;
//! # Ok(())
//! # }
//! ```

pub mod fetch;
pub mod guild_queue;
pub mod queued_media;
pub mod record;
pub mod sink;
pub mod songbird_sink;
