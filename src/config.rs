use anyhow::Result;
use std::path::PathBuf;

/// Configuración del bot, cargada del entorno con defaults razonables.
#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,
    pub guild_id: u64,
    pub voice_channels: Vec<u64>,
    /// Canales de texto habilitados para comandos; vacío = todos.
    pub text_channels: Vec<u64>,

    // Playlist persistente
    pub use_playlist: bool,
    pub playlist_path: PathBuf,
    pub cache_dir: PathBuf,

    // Política de skip
    pub skip_ratio: f64,
    pub skips_required: usize,

    // Features
    pub now_playing_mentions: bool,

    // APIs
    pub youtube_api_key: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN")?,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or_else(|_| "!".to_string()),
            guild_id: std::env::var("GUILD_ID")?.parse()?,
            voice_channels: parse_id_list(
                &std::env::var("VOICE_CHANNELS").unwrap_or_default(),
            )?,
            text_channels: parse_id_list(&std::env::var("TEXT_CHANNELS").unwrap_or_default())?,

            use_playlist: std::env::var("USE_PLAYLIST")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            playlist_path: std::env::var("PLAYLIST_PATH")
                .unwrap_or_else(|_| "data/playlist.json".to_string())
                .into(),
            cache_dir: std::env::var("CACHE_DIR")
                .unwrap_or_else(|_| "data/cache".to_string())
                .into(),

            skip_ratio: std::env::var("SKIP_RATIO")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
            skips_required: std::env::var("SKIPS_REQUIRED")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,

            now_playing_mentions: std::env::var("NOW_PLAYING_MENTIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,

            youtube_api_key: std::env::var("YOUTUBE_API_KEY")?,
        };

        std::fs::create_dir_all(&config.cache_dir)?;
        if let Some(parent) = config.playlist_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.discord_token.is_empty() {
            anyhow::bail!("DISCORD_TOKEN no puede estar vacío");
        }
        if self.voice_channels.is_empty() {
            anyhow::bail!("hace falta al menos un canal de voz en VOICE_CHANNELS");
        }
        if !(self.skip_ratio > 0.0 && self.skip_ratio <= 1.0) {
            anyhow::bail!(
                "SKIP_RATIO debe estar en (0, 1], vino: {}",
                self.skip_ratio
            );
        }
        if self.skips_required == 0 {
            anyhow::bail!("SKIPS_REQUIRED debe ser mayor que 0");
        }
        if self.command_prefix.is_empty() {
            anyhow::bail!("COMMAND_PREFIX no puede estar vacío");
        }
        Ok(())
    }
}

fn parse_id_list(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| anyhow::anyhow!("id de canal inválido: {part}"))
        })
        .collect()
}
