pub mod youtube;
pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

/// Primer resultado de una búsqueda: lo justo para encolar la pista.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub track_id: String,
    pub title: String,
}

/// Proveedor de búsqueda externo con contrato angosto: un término, el
/// mejor resultado.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search_first(&self, query: &str) -> Result<SearchHit>;
}

static WATCH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtube\.com/watch\?(?:[^\s]*&)?v=|youtu\.be/)([A-Za-z0-9_-]{11})")
        .expect("regex de URL de video inválida")
});

/// Extrae el id de pista de una URL de video (formatos watch y corto).
/// Una consulta de texto plano devuelve `None` y va al buscador.
pub fn extract_track_id(input: &str) -> Option<String> {
    WATCH_URL.captures(input).map(|caps| caps[1].to_string())
}
