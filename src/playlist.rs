use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, UserId};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::collections::{Node, OrderedList, Queue};

/// Entrada del carril persistente (la lista en bucle).
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTrack {
    pub title: String,
    pub track_id: String,
    pub duration: Option<Duration>,
}

/// Entrada del carril de pedidos: lleva a quién avisar cuando suene.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestedTrack {
    pub requester: UserId,
    pub request_channel: ChannelId,
    pub title: String,
    pub track_id: String,
    pub duration: Option<Duration>,
}

/// Lo que decide el scheduler: un pedido de usuario o una pista del bucle.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEntry {
    Requested(RequestedTrack),
    Scheduled(ScheduledTrack),
}

impl TrackEntry {
    pub fn track_id(&self) -> &str {
        match self {
            TrackEntry::Requested(t) => &t.track_id,
            TrackEntry::Scheduled(t) => &t.track_id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            TrackEntry::Requested(t) => &t.title,
            TrackEntry::Scheduled(t) => &t.title,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            TrackEntry::Requested(t) => t.duration,
            TrackEntry::Scheduled(t) => t.duration,
        }
    }

    /// Requester y canal de aviso, solo para pedidos.
    pub fn request(&self) -> Option<(UserId, ChannelId)> {
        match self {
            TrackEntry::Requested(t) => Some((t.requester, t.request_channel)),
            TrackEntry::Scheduled(_) => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error("el playlist persistente está deshabilitado en la configuración")]
    Disabled,
    #[error("no se encontró la entrada {0} en el playlist")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Documento en disco: solo el carril en bucle, los pedidos son efímeros.
#[derive(Debug, Serialize, Deserialize)]
struct PlaylistFile {
    entries: Vec<PersistedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    title: String,
    #[serde(rename = "trackID")]
    track_id: String,
    #[serde(
        rename = "durationMillis",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    duration_millis: Option<u64>,
}

impl From<&ScheduledTrack> for PersistedEntry {
    fn from(track: &ScheduledTrack) -> Self {
        Self {
            title: track.title.clone(),
            track_id: track.track_id.clone(),
            duration_millis: track.duration.map(|d| d.as_millis() as u64),
        }
    }
}

impl From<PersistedEntry> for ScheduledTrack {
    fn from(entry: PersistedEntry) -> Self {
        Self {
            title: entry.title,
            track_id: entry.track_id,
            duration: entry.duration_millis.map(Duration::from_millis),
        }
    }
}

/// Dos carriles detrás de una sola decisión de "qué suena ahora": los
/// pedidos de usuarios tienen prioridad; si no hay, el playlist persistente
/// se recorre en forma circular con el cursor de la lista.
#[derive(Debug)]
pub struct Playlist {
    requests: Queue<RequestedTrack>,
    loop_lane: OrderedList<ScheduledTrack>,
    use_playlist: bool,
    path: PathBuf,
    persist_lock: Mutex<()>,
}

impl Playlist {
    /// Construye el playlist y carga el carril persistente desde disco. Un
    /// fallo de carga deja el carril vacío y no es fatal.
    pub fn new(use_playlist: bool, path: impl Into<PathBuf>) -> Self {
        let playlist = Self {
            requests: Queue::new(),
            loop_lane: OrderedList::new(),
            use_playlist,
            path: path.into(),
            persist_lock: Mutex::new(()),
        };
        match playlist.load() {
            Ok(()) => {}
            Err(PlaylistError::Disabled) => {
                debug!("playlist persistente deshabilitado, arrancando solo con pedidos")
            }
            Err(err) => error!(path = %playlist.path.display(), %err, "no se pudo cargar el playlist"),
        }
        playlist
    }

    /// Encola un pedido de usuario. Nunca toca el carril en bucle.
    pub fn add_request(&self, track: RequestedTrack) {
        info!(title = %track.title, track_id = %track.track_id, "pedido encolado");
        self.requests.push(track);
    }

    /// Agrega una pista al final del carril en bucle.
    pub fn add_scheduled(&self, track: ScheduledTrack) {
        let key = track.track_id.clone();
        self.loop_lane.insert_last(Node::new(key, track));
    }

    /// Saca una pista del carril en bucle por id.
    pub fn remove_scheduled(&self, track_id: &str) -> bool {
        self.loop_lane.delete(track_id)
    }

    /// Próxima pista, consumiendo: primero el carril de pedidos; si está
    /// vacío, avanza el cursor del bucle (envolviendo al head pasado el
    /// tail). `None` solo cuando ambos carriles están vacíos.
    pub fn next_song(&self) -> Option<TrackEntry> {
        if let Some(request) = self.requests.pop() {
            return Some(TrackEntry::Requested(request));
        }
        self.loop_lane
            .cursor_advance()
            .map(|node| TrackEntry::Scheduled(node.payload()))
    }

    /// Misma precedencia que [`next_song`](Self::next_song) pero sin
    /// consumir el pedido ni mover el cursor. Es la base del prefetch.
    pub fn peek_next_song(&self) -> Option<TrackEntry> {
        if let Some(request) = self.requests.peek() {
            return Some(TrackEntry::Requested(request));
        }
        self.loop_lane
            .cursor_peek()
            .map(|node| TrackEntry::Scheduled(node.payload()))
    }

    /// Registra la duración aprendida en la primera descarga, sin mover la
    /// pista de lugar en el ciclo.
    pub fn record_download_metadata(
        &self,
        track_id: &str,
        duration: Duration,
    ) -> Result<(), PlaylistError> {
        let node = self
            .loop_lane
            .find(track_id)
            .ok_or_else(|| PlaylistError::NotFound(track_id.to_string()))?;
        node.update_payload(|track| track.duration = Some(duration));
        Ok(())
    }

    /// Vuelca el carril en bucle completo a disco, pisando el archivo.
    pub fn save(&self) -> Result<(), PlaylistError> {
        if !self.use_playlist {
            debug!("intento de guardar con el playlist deshabilitado");
            return Err(PlaylistError::Disabled);
        }
        let _guard = self.persist_lock.lock();
        let document = PlaylistFile {
            entries: self
                .loop_lane
                .nodes()
                .iter()
                .map(|node| node.with_payload(|track| PersistedEntry::from(track)))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), entries = document.entries.len(), "playlist guardado");
        Ok(())
    }

    fn load(&self) -> Result<(), PlaylistError> {
        if !self.use_playlist {
            return Err(PlaylistError::Disabled);
        }
        let _guard = self.persist_lock.lock();
        let contents = std::fs::read_to_string(&self.path)?;
        let document: PlaylistFile = serde_json::from_str(&contents)?;
        for entry in document.entries {
            self.add_scheduled(entry.into());
        }
        self.loop_lane.cursor_reset();
        info!(path = %self.path.display(), entries = self.loop_lane.len(), "playlist cargado");
        Ok(())
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn loop_lane_count(&self) -> usize {
        self.loop_lane.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Listado legible de ambos carriles, con una flecha sobre la pista en
    /// reproducción si pertenece al bucle.
    pub fn render(&self, current_track_id: Option<&str>) -> String {
        let mut queue_section = String::new();
        let requests = self.requests.snapshot();
        if requests.is_empty() {
            queue_section.push_str("    Empty");
        } else {
            for (i, request) in requests.iter().enumerate() {
                queue_section.push_str(&format!(
                    "    {}. {} - Requester: <@{}>\n",
                    i + 1,
                    request.title,
                    request.requester
                ));
            }
        }

        let mut loop_section = String::new();
        if self.use_playlist {
            for (i, node) in self.loop_lane.nodes().iter().enumerate() {
                let (title, id) = node.with_payload(|t| (t.title.clone(), t.track_id.clone()));
                let marker = if current_track_id == Some(id.as_str()) {
                    "→  "
                } else {
                    "   "
                };
                loop_section.push_str(&format!("{} {}. {}\n", marker, i + 1, title));
            }
            if loop_section.is_empty() {
                loop_section.push_str("    Empty");
            }
        } else {
            loop_section.push_str("    Disabled");
        }

        format!("**Request Queue:**\n```{queue_section}```\n**Playlist:**\n```{loop_section}```")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scheduled(id: &str) -> ScheduledTrack {
        ScheduledTrack {
            title: format!("title-{id}"),
            track_id: id.to_string(),
            duration: None,
        }
    }

    fn requested(id: &str, user: u64) -> RequestedTrack {
        RequestedTrack {
            requester: UserId::new(user),
            request_channel: ChannelId::new(99),
            title: format!("title-{id}"),
            track_id: id.to_string(),
            duration: None,
        }
    }

    fn memory_playlist() -> Playlist {
        // Ruta inexistente: la carga falla y queda vacío, que es lo buscado.
        Playlist::new(true, "/nonexistent/playlist.json")
    }

    #[test]
    fn request_lane_has_precedence() {
        let playlist = memory_playlist();
        playlist.add_scheduled(scheduled("loop1"));
        playlist.add_scheduled(scheduled("loop2"));
        playlist.add_request(requested("req1", 1));
        playlist.add_request(requested("req2", 2));

        assert_eq!(playlist.peek_next_song().unwrap().track_id(), "req1");
        assert_eq!(playlist.next_song().unwrap().track_id(), "req1");
        assert_eq!(playlist.next_song().unwrap().track_id(), "req2");
        // Agotados los pedidos, cae al bucle.
        assert_eq!(playlist.next_song().unwrap().track_id(), "loop1");
    }

    #[test]
    fn peek_consumes_nothing() {
        let playlist = memory_playlist();
        playlist.add_scheduled(scheduled("a"));
        playlist.add_request(requested("r", 1));

        assert_eq!(playlist.peek_next_song().unwrap().track_id(), "r");
        assert_eq!(playlist.peek_next_song().unwrap().track_id(), "r");
        assert_eq!(playlist.request_count(), 1);

        playlist.next_song();
        // Sin pedidos, peek mira el bucle sin mover el cursor.
        assert_eq!(playlist.peek_next_song().unwrap().track_id(), "a");
        assert_eq!(playlist.next_song().unwrap().track_id(), "a");
    }

    #[test]
    fn loop_lane_is_cyclic() {
        let playlist = memory_playlist();
        for id in ["a", "b", "c"] {
            playlist.add_scheduled(scheduled(id));
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(playlist.next_song().unwrap().track_id().to_string());
        }
        assert_eq!(seen, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn removing_a_scheduled_track_skips_it_in_the_cycle() {
        let playlist = memory_playlist();
        for id in ["a", "b", "c"] {
            playlist.add_scheduled(scheduled(id));
        }
        assert_eq!(playlist.next_song().unwrap().track_id(), "a");
        // El cursor descansa sobre "b"; al sacarla, el ciclo sigue en "c".
        assert!(playlist.remove_scheduled("b"));
        assert!(!playlist.remove_scheduled("b"));
        assert_eq!(playlist.loop_lane_count(), 2);
        assert_eq!(playlist.next_song().unwrap().track_id(), "c");
        assert_eq!(playlist.next_song().unwrap().track_id(), "a");
    }

    #[test]
    fn empty_lanes_yield_none() {
        let playlist = memory_playlist();
        assert!(playlist.next_song().is_none());
        assert!(playlist.peek_next_song().is_none());
    }

    #[test]
    fn metadata_update_preserves_cycle_position() {
        let playlist = memory_playlist();
        for id in ["a", "b", "c"] {
            playlist.add_scheduled(scheduled(id));
        }
        playlist.next_song(); // cursor queda sobre "b"

        playlist
            .record_download_metadata("b", Duration::from_secs(120))
            .unwrap();

        let next = playlist.next_song().unwrap();
        assert_eq!(next.track_id(), "b");
        assert_eq!(next.duration(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn metadata_update_unknown_key_is_not_found() {
        let playlist = memory_playlist();
        let err = playlist
            .record_download_metadata("nope", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, PlaylistError::NotFound(_)));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlist.json");

        let original = Playlist::new(true, &path);
        original.add_scheduled(ScheduledTrack {
            title: "uno".into(),
            track_id: "id1".into(),
            duration: Some(Duration::from_millis(90_500)),
        });
        original.add_scheduled(scheduled("id2"));
        original.add_scheduled(scheduled("id3"));
        original.save().unwrap();

        let reloaded = Playlist::new(true, &path);
        assert_eq!(reloaded.loop_lane_count(), 3);

        let order: Vec<String> = (0..3)
            .map(|_| reloaded.next_song().unwrap().track_id().to_string())
            .collect();
        assert_eq!(order, vec!["id1", "id2", "id3"]);

        let first = reloaded.peek_next_song().unwrap();
        assert_eq!(first.track_id(), "id1");
        assert_eq!(first.duration(), Some(Duration::from_millis(90_500)));
    }

    #[test]
    fn load_tolerates_missing_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlist.json");
        std::fs::write(
            &path,
            r#"{ "entries": [ { "title": "sin duracion", "trackID": "x1" } ] }"#,
        )
        .unwrap();

        let playlist = Playlist::new(true, &path);
        assert_eq!(playlist.loop_lane_count(), 1);
        let entry = playlist.next_song().unwrap();
        assert_eq!(entry.track_id(), "x1");
        assert_eq!(entry.duration(), None);
    }

    #[test]
    fn disabled_playlist_rejects_persistence() {
        let playlist = Playlist::new(false, "/tmp/ignored.json");
        assert!(matches!(playlist.save(), Err(PlaylistError::Disabled)));
        assert!(matches!(playlist.load(), Err(PlaylistError::Disabled)));
        // Los pedidos siguen funcionando con la persistencia apagada.
        playlist.add_request(requested("r", 7));
        assert_eq!(playlist.next_song().unwrap().track_id(), "r");
    }

    #[test]
    fn requests_are_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlist.json");

        let playlist = Playlist::new(true, &path);
        playlist.add_scheduled(scheduled("keep"));
        playlist.add_request(requested("ephemeral", 1));
        playlist.save().unwrap();

        let reloaded = Playlist::new(true, &path);
        assert_eq!(reloaded.loop_lane_count(), 1);
        assert_eq!(reloaded.request_count(), 0);
    }

    #[test]
    fn render_marks_current_loop_track() {
        let playlist = memory_playlist();
        playlist.add_scheduled(scheduled("a"));
        playlist.add_scheduled(scheduled("b"));

        let listing = playlist.render(Some("b"));
        assert!(listing.contains("→   2. title-b"));
        assert!(listing.contains("    1. title-a"));
        assert!(listing.contains("Empty"));
    }
}
