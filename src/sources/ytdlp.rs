use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::player::collaborators::{AudioFetcher, FetchedAudio};

/// Descarga y codificación vía yt-dlp, con caché local por id de pista.
///
/// El archivo queda en `<cache_dir>/<id>.opus`; repetir el fetch para un id
/// ya descargado es seguro (yt-dlp no reescribe el archivo existente).
pub struct YtdlpFetcher {
    cache_dir: PathBuf,
}

impl YtdlpFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Chequeo de arranque: yt-dlp tiene que estar en el PATH.
    pub async fn verify_dependencies() -> Result<()> {
        let output = tokio::process::Command::new("yt-dlp")
            .arg("--version")
            .output()
            .await
            .context("yt-dlp no encontrado en el PATH")?;
        if !output.status.success() {
            bail!("yt-dlp --version terminó con error");
        }
        info!(
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "yt-dlp disponible"
        );
        Ok(())
    }
}

fn parse_duration_secs(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

#[async_trait]
impl AudioFetcher for YtdlpFetcher {
    fn cached_path(&self, track_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{track_id}.opus"))
    }

    async fn fetch_and_encode(&self, track_id: &str) -> Result<FetchedAudio> {
        let url = format!("https://www.youtube.com/watch?v={track_id}");
        let template = self.cache_dir.join("%(id)s.%(ext)s");
        debug!(%track_id, "invocando yt-dlp");

        let output = tokio::process::Command::new("yt-dlp")
            .args([
                "-f",
                "bestaudio",
                "-x",
                "--audio-format",
                "opus",
                "--no-playlist",
                "--socket-timeout",
                "30",
                "--retries",
                "3",
                "--print",
                "after_move:duration",
                "--no-simulate",
                "-o",
            ])
            .arg(&template)
            .arg(&url)
            .output()
            .await
            .context("no se pudo ejecutar yt-dlp")?;

        if !output.status.success() {
            bail!(
                "yt-dlp falló para {track_id}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration = stdout
            .lines()
            .rev()
            .find_map(parse_duration_secs)
            .unwrap_or(Duration::ZERO);

        let path = self.cached_path(track_id);
        if !path.exists() {
            bail!(
                "yt-dlp terminó bien pero no dejó el archivo esperado: {}",
                path.display()
            );
        }

        Ok(FetchedAudio { path, duration })
    }
}
