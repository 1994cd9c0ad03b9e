use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Valor terminal de una sesión de streaming, entregado por el canal de
/// finalización. El colaborador de voz empuja exactamente uno por sesión;
/// `Skipped` y `Shutdown` los empuja el propio player como centinelas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Fin natural de la pista (EOF).
    Ended,
    /// Centinela de skip: la pista se corta pero el loop sigue.
    Skipped,
    /// Centinela de apagado: termina el loop de reproducción.
    Shutdown,
    /// Error de decodificación o transporte; el loop avanza, nunca muere.
    Failed(String),
}

/// Audio ya descargado y codificado en el caché local.
#[derive(Debug, Clone)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub duration: Duration,
}

/// Colaborador externo de descarga y codificación.
///
/// `fetch_and_encode` debe ser idempotente por `track_id`; el llamador
/// verifica la existencia del archivo en caché antes de invocarlo.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Ruta donde quedaría (o ya está) la pista en el caché local.
    fn cached_path(&self, track_id: &str) -> PathBuf;

    async fn fetch_and_encode(&self, track_id: &str) -> Result<FetchedAudio>;
}

/// Sesión de streaming activa contra la conexión de voz.
#[async_trait]
pub trait StreamHandle: Send + Sync {
    async fn set_paused(&self, paused: bool) -> Result<()>;
    async fn is_paused(&self) -> bool;
    /// Posición de reproducción transcurrida.
    async fn position(&self) -> Duration;
    /// Corta la sesión en forma definitiva. No debe producir un segundo
    /// valor terminal en el canal de finalización.
    async fn stop(&self) -> Result<()>;
}

/// Colaborador de voz: conexión al canal y apertura de sesiones que
/// transmiten un archivo local al sink remoto.
#[async_trait]
pub trait VoiceSink: Send + Sync + 'static {
    type Conn: Send + Sync;

    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<Self::Conn>;

    /// Abre una sesión sobre `conn` para el archivo dado. El colaborador
    /// empuja exactamente un valor terminal en `done` cuando la sesión
    /// acaba por sí sola.
    async fn open_session(
        &self,
        conn: &Self::Conn,
        path: &Path,
        done: mpsc::Sender<StreamEvent>,
    ) -> Result<Arc<dyn StreamHandle>>;

    /// Si la conexión está lista para transmitir.
    async fn ready(&self, conn: &Self::Conn) -> bool;

    async fn disconnect(&self, conn: Self::Conn) -> Result<()>;
}

/// Presencia del bot (texto de estado). Fuego y olvido: los fallos se
/// loggean dentro de la implementación.
pub trait Presence: Send + Sync {
    fn set_status(&self, text: &str);
}

/// Mensajes al canal de texto del pedido. Fuego y olvido.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: ChannelId, text: &str);
}
