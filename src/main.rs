mod bot;
mod collections;
mod config;
mod player;
mod playlist;
mod sources;
mod voice;

use anyhow::{Context as AnyhowContext, Result};
use dashmap::DashMap;
use serenity::all::GatewayIntents;
use serenity::Client;
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bot::RadiolaBot;
use config::Config;
use sources::youtube::YouTubeSearch;
use sources::ytdlp::YtdlpFetcher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("radiola=debug,serenity=info,songbird=info")
            }),
        )
        .init();

    info!("🎵 Iniciando radiola v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("configuración inválida")?;

    if let Err(err) = YtdlpFetcher::verify_dependencies().await {
        warn!(%err, "yt-dlp no está disponible, las descargas van a fallar");
    }

    let players = Arc::new(DashMap::new());
    let search = Arc::new(YouTubeSearch::new(config.youtube_api_key.clone()));
    let handler = RadiolaBot::new(Arc::new(config.clone()), search, Arc::clone(&players));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await
        .context("no se pudo crear el cliente de Discord")?;

    // Ctrl+C: apagar todos los players antes de salir.
    let shutdown_players = Arc::clone(&players);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("no se pudo registrar el handler de Ctrl+C");
            return;
        }
        info!("⏹ señal de apagado recibida, frenando players");
        for entry in shutdown_players.iter() {
            if let Err(err) = entry.value().shutdown().await {
                error!(channel = %entry.key(), %err, "error al apagar el player");
            }
        }
        std::process::exit(0);
    });

    client
        .start()
        .await
        .context("el cliente de Discord terminó con error")?;
    Ok(())
}
