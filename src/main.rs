use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tgvc_music::{
    audio::{
        call::{CallDriver, CallManager, RetryPolicy, StreamEndSender},
        drivers::{BridgeCommand, BridgeDriver, DryRunDriver},
        idle::{run_idle_sweep, SweepConfig},
        player::{PlaybackController, PlaybackDeps, PlayerOptions},
        queue::QueueStore,
        stream::{StreamOptions, StreamTracker},
    },
    bot::ConsoleBot,
    config::{CallBackend, Config},
    lease::{InstanceLease, LeaseDecision},
    permissions::StaticPrivileges,
    settings::SettingsCache,
    sources::YtDlpResolver,
    storage::JsonStorage,
    types::ChatId,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tgvc_music=debug".parse()?),
        )
        .init();

    info!("🎵 Iniciando tgvc-music v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Una sola instancia por directorio de datos
    let lease = Arc::new(InstanceLease::new(
        config.instance_id.clone(),
        config.data_dir.clone(),
        config.lease_ttl,
    ));
    match lease.try_acquire()? {
        LeaseDecision::Acquired { takeover } => {
            info!("🔒 Lease adquirido por '{}' (takeover: {})", lease.instance_id(), takeover)
        }
        LeaseDecision::HeldBy {
            instance_id,
            expires_at,
        } => {
            anyhow::bail!("Otra instancia ('{instance_id}') está activa hasta {expires_at}");
        }
    }

    let shutdown = CancellationToken::new();
    let renewal = lease.clone().spawn_renewal(shutdown.clone());

    // Inicializar almacenamiento JSON
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone(), config.chat_defaults()).await?);
    let settings = Arc::new(SettingsCache::with_defaults(
        storage.clone(),
        config.settings_ttl,
        config.chat_defaults(),
    ));

    let cookies = YtDlpResolver::find_cookies_file(&config.data_dir).await;
    let resolver =
        Arc::new(YtDlpResolver::new(config.ytdlp_path.clone(), config.resolve_cache_ttl).with_cookies(cookies));
    let janitor = resolver
        .clone()
        .spawn_cache_janitor(config.resolve_cache_ttl, shutdown.clone());

    let privileges = Arc::new(StaticPrivileges::new(config.sudo_users.iter().copied()));

    let mut stream_options = StreamOptions::new(config.cache_dir.clone());
    stream_options.program = config.ffmpeg_path.clone();
    stream_options.warmup = config.stream_warmup;
    let streams = Arc::new(StreamTracker::new(stream_options));

    let (stream_end_tx, stream_end_rx) = tokio::sync::mpsc::unbounded_channel();
    let calls = Arc::new(build_call_manager(&config, stream_end_tx)?);

    let controller = PlaybackController::new(
        PlaybackDeps {
            queue: Arc::new(QueueStore::new()),
            calls,
            streams,
            settings,
            history: storage.clone(),
            resolver,
            privileges: privileges.clone(),
        },
        PlayerOptions {
            idle_timeout: config.idle_timeout,
            local_decode: config.local_decode,
        },
    );

    // Barrido global de inactividad
    let sweep = tokio::spawn(run_idle_sweep(
        Arc::new(controller.clone()),
        SweepConfig {
            interval: config.sweep_interval,
            jitter: config.sweep_jitter,
            backoff: config.sweep_backoff,
        },
        shutdown.clone(),
    ));

    // Avances por fin natural de la canción
    let stream_end = controller.spawn_stream_end_listener(stream_end_rx, shutdown.clone());

    // Manejar shutdown graceful
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("⚠️ Señal de shutdown recibida, cerrando..."),
            Err(e) => error!("Error al registrar Ctrl+C: {:?}", e),
        }
        signal_token.cancel();
    });

    info!("🚀 Bot iniciado exitosamente");
    let bot = ConsoleBot::new(controller.clone(), privileges);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    if let Err(e) = bot.run(stdin, tokio::io::stdout(), shutdown.clone()).await {
        error!("Error en la consola: {:?}", e);
    }
    if !shutdown.is_cancelled() {
        info!("⌨️ Consola cerrada, esperando Ctrl+C");
        shutdown.cancelled().await;
    }

    controller.shutdown().await;
    if let Err(e) = sweep.await {
        warn!("⚠️ El barrido terminó con error: {:?}", e);
    }
    if let Err(e) = stream_end.await {
        warn!("⚠️ La escucha de fin de stream terminó con error: {:?}", e);
    }
    if let Err(e) = janitor.await {
        warn!("⚠️ La limpieza del caché terminó con error: {:?}", e);
    }
    if let Err(e) = renewal.await {
        warn!("⚠️ La renovación del lease terminó con error: {:?}", e);
    }
    if let Err(e) = lease.release() {
        warn!("⚠️ No se pudo liberar el lease: {:?}", e);
    }

    if let Ok(stats) = storage.get_storage_stats().await {
        info!("{}", stats);
    }
    info!("👋 tgvc-music detenido");
    Ok(())
}

fn build_call_manager(config: &Config, stream_end: StreamEndSender) -> Result<CallManager> {
    let policy = RetryPolicy {
        attempts: config.start_retries,
        backoff: config.retry_backoff,
        settle: config.join_settle,
    };

    let manager = match config.call_backend {
        CallBackend::DryRun => {
            warn!("🧪 Backend dry-run: las llamadas solo se simulan");
            CallManager::new(
                |_chat: ChatId| -> Arc<dyn CallDriver> { Arc::new(DryRunDriver::new()) },
                policy,
            )
        }
        CallBackend::Bridge => {
            let command = config
                .bridge_command
                .as_deref()
                .and_then(BridgeCommand::parse)
                .ok_or_else(|| anyhow::anyhow!("BRIDGE_COMMAND vacío"))?;
            let timeout = config.bridge_timeout;
            info!("🌉 Backend bridge: {}", command.program);
            CallManager::new(
                move |chat: ChatId| -> Arc<dyn CallDriver> {
                    Arc::new(BridgeDriver::new(chat, command.clone(), timeout).with_stream_end(stream_end.clone()))
                },
                policy,
            )
        }
    };

    Ok(manager)
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new(&config.ffmpeg_path)
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
