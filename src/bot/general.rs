use regex::Regex;
use std::sync::Arc;

use super::{
    commands::{handler, CommandRegistry},
    transport::ChatTransport,
};
use crate::ui::format::chunk_lines;

fn help_text(command: &str) -> &'static str {
    match command {
        "help" => "Lists the available commands.",
        "np" => "Displays information about the currently playing song.",
        "li" => "Displays the upcoming entries of the playlist.",
        "queue" | "q" => "Queues a URL, playlist or local file.",
        "next" => "Play the next song in the playlist.",
        "pause" => "Pause the music until resumed.",
        "resume" => "Resume the paused song.",
        "search" | "yt" => "Searches for a song and lists the results.",
        "sel" => "Queues a result from the last search in this channel.",
        _ => "no text available",
    }
}

/// Listeners `ping`/`pong` y el comando `help`.
///
/// `help` lista los comandos registrados hasta este momento, así que debe
/// registrarse al final.
pub fn register(
    registry: &mut CommandRegistry,
    transport: Arc<dyn ChatTransport>,
    message_limit: usize,
) -> anyhow::Result<()> {
    for (pattern, answer) in [("(?i)ping", "pong"), ("(?i)pong", "ping")] {
        let transport = transport.clone();
        registry.register_listener(
            Regex::new(pattern)?,
            handler(move |message, _| {
                let transport = transport.clone();
                async move { transport.send(message.channel_id, answer).await }
            }),
        );
    }

    let prefix = registry.prefix().to_string();
    let mut names = registry.command_names();
    names.push("help".to_string());
    names.sort();

    let lines: Vec<String> = names
        .iter()
        .map(|name| format!("- {}{}\n  {}", prefix, name, help_text(name)))
        .collect();
    // El bloque de código ocupa 6 caracteres extra por mensaje
    let pages = Arc::new(chunk_lines(&lines, message_limit.saturating_sub(6)));

    registry.register(
        "help",
        handler(move |message, _| {
            let transport = transport.clone();
            let pages = pages.clone();
            async move {
                for page in pages.iter() {
                    transport
                        .send(message.channel_id, &format!("```{}```", page))
                        .await?;
                }
                Ok(())
            }
        }),
    );

    Ok(())
}
