use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{SearchHit, SearchProvider};

const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";

/// Cliente de búsqueda contra la API de datos de YouTube (v3).
pub struct YouTubeSearch {
    http: reqwest::Client,
    api_key: String,
}

impl YouTubeSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: SearchSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchSnippet {
    title: String,
}

#[async_trait]
impl SearchProvider for YouTubeSearch {
    async fn search_first(&self, query: &str) -> Result<SearchHit> {
        let url = format!(
            "{SEARCH_ENDPOINT}?part=snippet&maxResults=1&type=video&q={}&key={}",
            urlencoding::encode(query),
            self.api_key,
        );
        debug!(%query, "buscando primer resultado");

        let response: SearchResponse = self
            .http
            .get(url)
            .send()
            .await
            .context("no se pudo consultar la API de búsqueda")?
            .error_for_status()
            .context("la API de búsqueda respondió con error")?
            .json()
            .await
            .context("respuesta de búsqueda inválida")?;

        let item = response
            .items
            .into_iter()
            .next()
            .with_context(|| format!("sin resultados para: {query}"))?;

        Ok(SearchHit {
            track_id: item.id.video_id,
            title: item.snippet.title,
        })
    }
}
