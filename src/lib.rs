//! # Cardinal
//!
//! A general purpose chat robot with a guild-scoped music queue.
//!
//! Inbound messages go through the [`bot::commands::CommandRegistry`]; music
//! commands are routed to one [`audio::guild_queue::GuildQueue`] per guild,
//! which persists requests in a durable [`storage`] queue and plays them one
//! at a time through a voice [`audio::sink::StreamingSink`].

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod storage;
pub mod ui;

#[cfg(test)]
mod testing;
