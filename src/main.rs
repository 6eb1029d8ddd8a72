use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

use cardinal::{
    audio::{
        fetch::HttpFetcher, guild_queue::QueueDeps, queued_media::PlaybackContext,
        songbird_sink::SongbirdVoice,
    },
    bot::{
        commands::CommandRegistry,
        general,
        music::MusicQueueService,
        transport::{ChatTransport, SerenityTransport},
        CardinalBot,
    },
    config::Config,
    sources::YtDlpClient,
    storage::{JsonStore, MusicStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cardinal=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Cardinal v{}", env!("CARGO_PKG_VERSION"));

    // El health check no necesita token
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Cola durable en disco
    let store = MusicStore::new(
        Arc::new(JsonStore::new(config.data_dir.clone()).await?),
        config.key_namespace.clone(),
    );

    let ytdlp = Arc::new(YtDlpClient::new());
    let fetcher = Arc::new(HttpFetcher::new(config.http_timeout())?);

    // El stream de audio dura lo que la canción: solo se limita la conexión
    let stream_client = reqwest::Client::builder()
        .connect_timeout(config.http_timeout())
        .build()?;

    let songbird = Songbird::serenity();
    let transport: Arc<dyn ChatTransport> =
        Arc::new(SerenityTransport::new(Arc::new(Http::new(&config.discord_token))));

    let deps = QueueDeps {
        store,
        playback: PlaybackContext {
            resolver: ytdlp.clone(),
            fetcher,
            redirect_retry_delay: config.redirect_retry_delay(),
        },
        voice: Arc::new(SongbirdVoice::new(songbird.clone(), stream_client)),
        transport: transport.clone(),
    };

    // Registrar comandos; `help` va al final para listar todos
    let service = MusicQueueService::new(deps, ytdlp, config.clone());
    let mut registry = CommandRegistry::new(config.command_prefix.clone(), transport.clone());
    service.register(&mut registry);
    general::register(&mut registry, transport, config.message_limit)?;
    info!("📝 {} comandos registrados", registry.command_names().len());

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(CardinalBot::new(Arc::new(registry)))
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
