//! # Bot Module
//!
//! Chat-side surface of Cardinal: the command registry, the music command
//! façade and the Serenity event handler that feeds them.
//!
//! ## Architecture
//!
//! The bot is built around the [`CardinalBot`] struct which implements
//! Serenity's [`EventHandler`] trait. Every inbound message is converted to an
//! [`IncomingMessage`] and handed to the [`CommandRegistry`]:
//!
//! - [`commands`]: prefix commands and passive listeners
//! - [`general`]: `ping`/`pong` listeners and `help`
//! - [`music`]: queue commands routed to the guild's queue
//! - [`transport`]: replies back to the originating channel
//!
//! ## Example
//!
//! ```rust,no_run
//! use cardinal::bot::{commands::CommandRegistry, CardinalBot};
//! use std::sync::Arc;
//!
//! # fn example(registry: CommandRegistry) {
//! let bot = CardinalBot::new(Arc::new(registry));
//! # }
//! ```

use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Message, Ready, UserId},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, info};

pub mod commands;
pub mod general;
pub mod music;
pub mod transport;

use self::commands::{CommandRegistry, IncomingMessage};

/// Main Discord event handler for Cardinal.
///
/// Holds the read-only [`CommandRegistry`] built at startup; all state lives
/// behind the handlers it dispatches to.
pub struct CardinalBot {
    registry: Arc<CommandRegistry>,
}

impl CardinalBot {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl EventHandler for CardinalBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está conectado!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        self.registry.set_bot_user(ready.user.id);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let voice_channel = msg
            .guild_id
            .and_then(|guild_id| user_voice_channel(&ctx, guild_id, msg.author.id));

        let incoming = IncomingMessage {
            author_id: msg.author.id,
            guild_id: msg.guild_id,
            channel_id: msg.channel_id,
            content: msg.content,
            voice_channel,
        };

        let dispatched = self.registry.dispatch(incoming).await;
        if let Some(command) = dispatched.command {
            debug!("Comando '{}' atendido", command);
        }
    }
}

/// Canal de voz actual del usuario según la caché del gateway
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
