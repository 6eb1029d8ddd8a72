use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{collections::HashSet, path::PathBuf, str::FromStr, time::Duration};
use tracing::warn;

/// Política de autorización para saltar canciones.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum SkipPolicy {
    /// Cualquier usuario puede saltar
    Anyone,
    /// Solo usuarios conectados a un canal de voz
    InVoiceChannel,
    /// Solo los usuarios listados en `PRIVILEGED_USERS`
    Privileged,
}

impl FromStr for SkipPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "anyone" => Ok(Self::Anyone),
            "voice" => Ok(Self::InVoiceChannel),
            "privileged" => Ok(Self::Privileged),
            other => anyhow::bail!("SKIP_POLICY desconocida: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Almacenamiento
    pub data_dir: PathBuf,
    pub key_namespace: String,

    // Autorización
    pub skip_policy: SkipPolicy,
    pub privileged_users: HashSet<UserId>,

    // Límites
    pub max_queue_size: usize,
    pub max_playlist_size: usize,
    pub search_results: usize,
    pub list_preview: usize,
    pub message_limit: usize,

    // Red
    pub redirect_retry_delay_ms: u64,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("No se pudo crear {}", config.data_dir.display()))?;

        Ok(config)
    }

    /// Construye la configuración a partir de una función de búsqueda de claves.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str, default: String| lookup(key).unwrap_or(default);

        let privileged_users = lookup("PRIVILEGED_USERS")
            .map(|raw| parse_user_list(&raw))
            .transpose()?
            .unwrap_or_default();

        let config = Self {
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            command_prefix: var("COMMAND_PREFIX", defaults.command_prefix),

            data_dir: var("DATA_DIR", defaults.data_dir.display().to_string()).into(),
            key_namespace: var("KEY_NAMESPACE", defaults.key_namespace),

            skip_policy: var("SKIP_POLICY", "privileged".to_string()).parse()?,
            privileged_users,

            max_queue_size: var("MAX_QUEUE_SIZE", defaults.max_queue_size.to_string())
                .parse()
                .context("MAX_QUEUE_SIZE inválido")?,
            max_playlist_size: var("MAX_PLAYLIST_SIZE", defaults.max_playlist_size.to_string())
                .parse()
                .context("MAX_PLAYLIST_SIZE inválido")?,
            search_results: var("SEARCH_RESULTS", defaults.search_results.to_string())
                .parse()
                .context("SEARCH_RESULTS inválido")?,
            list_preview: var("LIST_PREVIEW", defaults.list_preview.to_string())
                .parse()
                .context("LIST_PREVIEW inválido")?,
            message_limit: var("MESSAGE_LIMIT", defaults.message_limit.to_string())
                .parse()
                .context("MESSAGE_LIMIT inválido")?,

            redirect_retry_delay_ms: var(
                "REDIRECT_RETRY_DELAY_MS",
                defaults.redirect_retry_delay_ms.to_string(),
            )
            .parse()
            .context("REDIRECT_RETRY_DELAY_MS inválido")?,
            http_timeout_secs: var("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs.to_string())
                .parse()
                .context("HTTP_TIMEOUT_SECS inválido")?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The command prefix must not be empty
    /// - Queue, playlist, search and preview limits must be greater than 0
    /// - The message limit must leave room for at least one formatted line
    pub fn validate(&self) -> Result<()> {
        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("El prefijo de comandos no puede estar vacío");
        }

        if self.key_namespace.trim().is_empty() {
            anyhow::bail!("KEY_NAMESPACE no puede estar vacío");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.search_results == 0 || self.list_preview == 0 {
            anyhow::bail!("SEARCH_RESULTS y LIST_PREVIEW deben ser mayores que 0");
        }

        if self.message_limit < 100 {
            anyhow::bail!("Message limit too low, minimum 100, got: {}", self.message_limit);
        }

        if self.skip_policy == SkipPolicy::Privileged && self.privileged_users.is_empty() {
            warn!("⚠️ SKIP_POLICY=privileged sin PRIVILEGED_USERS: nadie podrá saltar canciones");
        }

        Ok(())
    }

    pub fn redirect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_retry_delay_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix `{}`\n  \
            Storage: {} (namespace {})\n  \
            Skip: {:?} ({} privileged users)\n  \
            Limits: {} queue, {} playlist, {} search results, {} preview, {} chars/message\n  \
            Network: {}ms redirect retry, {}s timeout",
            self.command_prefix,
            self.data_dir.display(),
            self.key_namespace,
            self.skip_policy,
            self.privileged_users.len(),
            self.max_queue_size,
            self.max_playlist_size,
            self.search_results,
            self.list_preview,
            self.message_limit,
            self.redirect_retry_delay_ms,
            self.http_timeout_secs
        )
    }
}

fn parse_user_list(raw: &str) -> Result<HashSet<UserId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .ok()
                .filter(|id| *id != 0)
                .map(UserId::new)
                .with_context(|| format!("ID de usuario inválido en PRIVILEGED_USERS: {}", s))
        })
        .collect()
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "`".to_string(),

            data_dir: "./data".into(),
            key_namespace: "cardinal".to_string(),

            skip_policy: SkipPolicy::Privileged,
            privileged_users: HashSet::new(),

            max_queue_size: 1000,
            max_playlist_size: 100,
            search_results: 10,
            list_preview: 10,
            message_limit: 2000,

            redirect_retry_delay_ms: 1000,
            http_timeout_secs: 30,
        }
    }
}
