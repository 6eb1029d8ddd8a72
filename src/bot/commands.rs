use anyhow::Result;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use regex::Regex;
use serenity::model::{
    id::{ChannelId, GuildId, UserId},
    mention::Mentionable,
};
use std::{collections::HashMap, future::Future, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::transport::ChatTransport;

/// Mensaje entrante ya desacoplado del gateway
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub author_id: UserId,
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub content: String,
    /// Canal de voz del autor al momento de recibir el mensaje
    pub voice_channel: Option<ChannelId>,
}

/// Un handler es cualquier función `(mensaje, args) -> resultado`
pub type Handler =
    Arc<dyn Fn(Arc<IncomingMessage>, Vec<String>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Envuelve un closure async como [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<IncomingMessage>, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |message, args| Box::pin(f(message, args)))
}

/// Resultado observable de un dispatch
#[derive(Debug, Default)]
pub struct Dispatched {
    pub listener_tasks: Vec<JoinHandle<()>>,
    /// Nombre del comando invocado, si hubo uno
    pub command: Option<String>,
}

/// Registro de comandos con prefijo y listeners pasivos.
///
/// Se construye una vez al arrancar; después solo se lee.
pub struct CommandRegistry {
    prefix: String,
    commands: HashMap<String, Handler>,
    listeners: Vec<(Regex, Handler)>,
    bot_user: RwLock<Option<UserId>>,
    transport: Arc<dyn ChatTransport>,
}

impl CommandRegistry {
    pub fn new(prefix: impl Into<String>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            prefix: prefix.into(),
            commands: HashMap::new(),
            listeners: Vec::new(),
            bot_user: RwLock::new(None),
            transport,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn register(&mut self, name: &str, handler: Handler) {
        let name = name.to_lowercase();
        if self.commands.insert(name.clone(), handler).is_some() {
            warn!("⚠️ Comando '{}' registrado dos veces", name);
        }
    }

    pub fn register_listener(&mut self, pattern: Regex, handler: Handler) {
        self.listeners.push((pattern, handler));
    }

    /// Identidad del propio bot, conocida tras el evento `ready`
    pub fn set_bot_user(&self, user_id: UserId) {
        *self.bot_user.write() = Some(user_id);
    }

    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Punto de entrada de todos los mensajes.
    ///
    /// Los listeners se lanzan antes de la fase de comandos y no se esperan.
    pub async fn dispatch(&self, message: IncomingMessage) -> Dispatched {
        let mut dispatched = Dispatched::default();
        let content = message.content.trim();

        if content.is_empty() || Some(message.author_id) == *self.bot_user.read() {
            return dispatched;
        }

        let message = Arc::new(message);
        let content = message.content.trim();

        for (pattern, listener) in &self.listeners {
            if !pattern.is_match(content) {
                continue;
            }

            let future = listener(message.clone(), Vec::new());
            let pattern = pattern.as_str().to_string();
            dispatched.listener_tasks.push(tokio::spawn(async move {
                if let Err(e) = future.await {
                    error!("❌ Listener '{}' falló: {:?}", pattern, e);
                }
            }));
        }

        let Some(rest) = content.strip_prefix(self.prefix.as_str()) else {
            return dispatched;
        };

        let mut tokens = rest.split_whitespace();
        let Some(name) = tokens.next().map(str::to_lowercase) else {
            return dispatched;
        };
        let args: Vec<String> = tokens.map(str::to_string).collect();

        let Some(command) = self.commands.get(&name) else {
            debug!("Comando desconocido ignorado: {}", name);
            return dispatched;
        };

        debug!("🎯 Ejecutando '{}' con args {:?}", name, args);
        if let Err(e) = command(message.clone(), args).await {
            error!("❌ Error en comando '{}': {:?}", name, e);
            let reply = format!(
                "{} Oops. An error occurred handling that command.",
                message.author_id.mention()
            );
            if let Err(e) = self.transport.send(message.channel_id, &reply).await {
                warn!("⚠️ No se pudo reportar el error: {:?}", e);
            }
        }

        dispatched.command = Some(name);
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(content: &str) -> IncomingMessage {
        IncomingMessage {
            author_id: UserId::new(5),
            guild_id: Some(GuildId::new(1)),
            channel_id: ChannelId::new(10),
            content: content.to_string(),
            voice_channel: None,
        }
    }

    fn counting(counter: Arc<AtomicUsize>) -> Handler {
        handler(move |_, _| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn commands_receive_whitespace_split_args() {
        let transport = FakeTransport::new();
        let mut registry = CommandRegistry::new("`", transport);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let sink = seen.clone();
        registry.register(
            "queue",
            handler(move |_, args| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(args);
                    Ok(())
                }
            }),
        );

        let dispatched = registry.dispatch(message("  `QUEUE  a   b ")).await;

        assert_eq!(dispatched.command.as_deref(), Some("queue"));
        assert_eq!(*seen.lock(), vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[tokio::test]
    async fn unknown_commands_are_ignored() {
        let transport = FakeTransport::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CommandRegistry::new("`", transport.clone());
        registry.register("np", counting(calls.clone()));

        let dispatched = registry.dispatch(message("`bogus")).await;

        assert!(dispatched.command.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(transport.messages().is_empty());
    }

    #[tokio::test]
    async fn listeners_fire_without_prefix() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CommandRegistry::new("`", FakeTransport::new());
        registry.register_listener(Regex::new("(?i)ping").unwrap(), counting(calls.clone()));

        let dispatched = registry.dispatch(message("anyone there? ping")).await;
        for task in dispatched.listener_tasks {
            task.await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn own_messages_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CommandRegistry::new("`", FakeTransport::new());
        registry.register_listener(Regex::new("ping").unwrap(), counting(calls.clone()));
        registry.register("ping", counting(calls.clone()));
        registry.set_bot_user(UserId::new(5));

        let dispatched = registry.dispatch(message("`ping")).await;

        assert!(dispatched.listener_tasks.is_empty());
        assert!(dispatched.command.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_commands() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CommandRegistry::new("`", FakeTransport::new());
        registry.register_listener(
            Regex::new("np").unwrap(),
            handler(|_, _| async { anyhow::bail!("boom") }),
        );
        registry.register("np", counting(calls.clone()));

        let dispatched = registry.dispatch(message("`np")).await;
        for task in dispatched.listener_tasks {
            task.await.unwrap();
        }

        assert_eq!(dispatched.command.as_deref(), Some("np"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_errors_are_reported_to_the_author() {
        let transport = FakeTransport::new();
        let mut registry = CommandRegistry::new("`", transport.clone());
        registry.register("li", handler(|_, _| async { anyhow::bail!("redis caído") }));

        registry.dispatch(message("`li")).await;

        assert_eq!(
            transport.sent(),
            vec![(
                ChannelId::new(10),
                "<@5> Oops. An error occurred handling that command.".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn empty_and_prefix_only_messages_do_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CommandRegistry::new("`", FakeTransport::new());
        registry.register("np", counting(calls.clone()));

        assert!(registry.dispatch(message("   ")).await.command.is_none());
        assert!(registry.dispatch(message("`")).await.command.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
