pub mod collaborators;

pub use collaborators::{
    AudioFetcher, FetchedAudio, Notifier, Presence, StreamEvent, StreamHandle, VoiceSink,
};

use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::playlist::{Playlist, PlaylistError, RequestedTrack, TrackEntry};

/// Espera entre reintentos cuando ambos carriles están vacíos.
const EMPTY_WAIT: Duration = Duration::from_secs(2);
/// Sondeo acotado de la conexión tras un error de streaming.
const READY_POLL: Duration = Duration::from_secs(2);
const READY_RETRIES: usize = 15;
/// Ancho de la barra de progreso del reporte de reproducción.
const PROGRESS_SLOTS: usize = 50;

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    /// Fracción de oyentes que deben votar skip para cortarla.
    pub skip_ratio: f64,
    /// Alternativa absoluta: con esta cantidad de votos alcanza.
    pub skips_required: usize,
    /// Mencionar al requester cuando arranca su pedido.
    pub now_playing_mentions: bool,
}

/// Resultado de un voto de skip, para que la capa de comandos arme la
/// respuesta al usuario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipOutcome {
    /// No hay pista sonando.
    NothingPlaying,
    /// Oyente único: skip inmediato.
    Solo,
    /// Ya votó por esta pista.
    AlreadyVoted,
    /// Se alcanzó la fracción configurada.
    RatioMet,
    /// Se alcanzó el mínimo absoluto de votos.
    CountMet,
    /// Voto anotado, todavía no alcanza.
    Recorded { votes: usize },
}

/// Pista en reproducción, con los votos de skip acumulados. Los votos viven
/// solo en esta instancia: la pista siguiente arranca con un set nuevo.
#[derive(Debug)]
struct NowPlaying {
    entry: TrackEntry,
    path: PathBuf,
    skip_votes: HashSet<UserId>,
}

/// Un player por canal de voz: máquina de estados de reproducción, lock de
/// serialización de descargas y el loop que consume el [`Playlist`].
///
/// Estados implícitos: sin conexión = inactivo; loop corriendo = streaming
/// o pausado; `shutting_down` = apagado terminal. Solo el centinela
/// `Shutdown` termina el loop; todo otro fallo se cura avanzando de pista.
pub struct Player<S: VoiceSink> {
    guild: GuildId,
    channel: ChannelId,
    settings: PlayerSettings,
    playlist: Arc<Playlist>,
    fetcher: Arc<dyn AudioFetcher>,
    sink: Arc<S>,
    presence: Arc<dyn Presence>,
    notifier: Arc<dyn Notifier>,
    /// Compartido entre los players del guild: una sola invocación externa
    /// de descarga/codificación a la vez.
    download_lock: Arc<tokio::sync::Mutex<()>>,
    conn: tokio::sync::Mutex<Option<S::Conn>>,
    stream: tokio::sync::Mutex<Option<Arc<dyn StreamHandle>>>,
    current: Mutex<Option<NowPlaying>>,
    done_tx: mpsc::Sender<StreamEvent>,
    done_rx: tokio::sync::Mutex<mpsc::Receiver<StreamEvent>>,
    shutting_down: AtomicBool,
}

impl<S: VoiceSink> Player<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guild: GuildId,
        channel: ChannelId,
        settings: PlayerSettings,
        playlist: Arc<Playlist>,
        fetcher: Arc<dyn AudioFetcher>,
        sink: Arc<S>,
        presence: Arc<dyn Presence>,
        notifier: Arc<dyn Notifier>,
        download_lock: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::channel(4);
        Self {
            guild,
            channel,
            settings,
            playlist,
            fetcher,
            sink,
            presence,
            notifier,
            download_lock,
            conn: tokio::sync::Mutex::new(None),
            stream: tokio::sync::Mutex::new(None),
            current: Mutex::new(None),
            done_tx,
            done_rx: tokio::sync::Mutex::new(done_rx),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn playlist(&self) -> &Arc<Playlist> {
        &self.playlist
    }

    pub fn current_track_id(&self) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .map(|now| now.entry.track_id().to_string())
    }

    /// Conecta al canal de voz, hace un prefetch síncrono de la primera
    /// pista y lanza el loop de reproducción. Si la conexión falla el
    /// player queda inactivo y el error sube al llamador.
    pub async fn join_voice_channel(self: &Arc<Self>) -> anyhow::Result<()> {
        let conn = self.sink.connect(self.guild, self.channel).await?;
        *self.conn.lock().await = Some(conn);
        info!(channel = %self.channel, "conectado al canal de voz");

        self.download_next_song(None).await;

        let player = Arc::clone(self);
        tokio::spawn(async move { player.play_loop().await });
        Ok(())
    }

    /// Loop de reproducción: una sesión de streaming a la vez, prefetch de
    /// la siguiente pista en paralelo, exactamente una señal de
    /// finalización consumida por iteración.
    async fn play_loop(self: Arc<Self>) {
        info!(channel = %self.channel, "loop de reproducción iniciado");
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            let next = self.next_cached_song();

            // La descarga de la pista siguiente se solapa con la actual.
            let prefetcher = Arc::clone(&self);
            tokio::spawn(async move { prefetcher.download_next_song(None).await });

            if let Some(now) = next {
                match self.begin_session(&now.path).await {
                    Ok(stream) => {
                        *self.stream.lock().await = Some(stream);
                        let request = now.entry.request();
                        let title = now.entry.title().to_string();
                        *self.current.lock() = Some(now);
                        self.update_status().await;
                        if let Some((requester, channel)) = request {
                            let text = if self.settings.now_playing_mentions {
                                format!("<@{requester}> - Your song is now playing: **{title}**")
                            } else {
                                format!("Now playing: **{title}**")
                            };
                            self.notifier.notify(channel, &text).await;
                        }

                        let event = self.done_rx.lock().await.recv().await;
                        if let Some(stream) = self.stream.lock().await.take() {
                            let _ = stream.stop().await;
                        }
                        match event {
                            None | Some(StreamEvent::Shutdown) => break,
                            Some(StreamEvent::Ended) | Some(StreamEvent::Skipped) => {}
                            Some(StreamEvent::Failed(err)) => {
                                error!(%err, "error de streaming, avanzando a la próxima pista");
                                self.await_connection_ready().await;
                            }
                        }
                    }
                    Err(err) => {
                        error!(%err, "no se pudo abrir la sesión de streaming");
                        self.await_connection_ready().await;
                    }
                }
            } else {
                tokio::time::sleep(EMPTY_WAIT).await;
            }

            // Bloquea hasta que la próxima esté en caché; atrapa pedidos
            // que llegaron mientras sonaba la anterior.
            self.download_next_song(None).await;
        }
        info!(channel = %self.channel, "loop de reproducción terminado");
    }

    fn next_cached_song(&self) -> Option<NowPlaying> {
        let entry = match self.playlist.next_song() {
            Some(entry) => entry,
            None => {
                warn!("no hay próxima pista, ambos carriles vacíos");
                return None;
            }
        };
        let path = self.fetcher.cached_path(entry.track_id());
        if !path.exists() {
            error!(path = %path.display(), "la pista no está en el caché local");
            return None;
        }
        Some(NowPlaying {
            entry,
            path,
            skip_votes: HashSet::new(),
        })
    }

    async fn begin_session(&self, path: &std::path::Path) -> anyhow::Result<Arc<dyn StreamHandle>> {
        let conn = self.conn.lock().await;
        let conn = conn
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no hay conexión de voz activa"))?;
        self.sink.open_session(conn, path, self.done_tx.clone()).await
    }

    /// Pausa la sesión activa; sin sesión es un no-op.
    pub async fn pause(&self) {
        // El guard del slot se suelta antes de update_status, que vuelve a
        // tomar el mismo lock.
        let stream = self.stream.lock().await.clone();
        if let Some(stream) = stream {
            if let Err(err) = stream.set_paused(true).await {
                warn!(%err, "no se pudo pausar la sesión");
            }
            self.update_status().await;
        }
    }

    /// Reanuda la sesión activa; sin sesión es un no-op.
    pub async fn resume(&self) {
        let stream = self.stream.lock().await.clone();
        if let Some(stream) = stream {
            if let Err(err) = stream.set_paused(false).await {
                warn!(%err, "no se pudo reanudar la sesión");
            }
            self.update_status().await;
        }
    }

    /// Política de votos de skip, en el orden exacto: oyente único, voto
    /// duplicado, fracción, mínimo absoluto. El orden fracción-antes-que-
    /// mínimo es observable en los valores de borde y se preserva.
    pub async fn skip(&self, num_listeners: usize, requester: UserId) -> SkipOutcome {
        if self.current.lock().is_none() {
            return SkipOutcome::NothingPlaying;
        }
        if num_listeners <= 1 {
            self.skip_song().await;
            return SkipOutcome::Solo;
        }

        let outcome = {
            let mut current = self.current.lock();
            let Some(now) = current.as_mut() else {
                return SkipOutcome::NothingPlaying;
            };
            if !now.skip_votes.insert(requester) {
                return SkipOutcome::AlreadyVoted;
            }
            let votes = now.skip_votes.len();
            let ratio = votes as f64 / num_listeners as f64;
            if ratio >= self.settings.skip_ratio {
                SkipOutcome::RatioMet
            } else if votes >= self.settings.skips_required {
                SkipOutcome::CountMet
            } else {
                SkipOutcome::Recorded { votes }
            }
        };

        if matches!(outcome, SkipOutcome::RatioMet | SkipOutcome::CountMet) {
            self.skip_song().await;
        }
        outcome
    }

    async fn skip_song(&self) {
        self.pause().await;
        let _ = self.done_tx.send(StreamEvent::Skipped).await;
    }

    /// Apagado idempotente y de mejor esfuerzo: pausa, empuja el centinela
    /// de shutdown, limpia el estado en memoria y desconecta. Un error de
    /// desconexión sube al llamador pero el estado ya quedó limpio.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(stream) = self.stream.lock().await.take() {
            let _ = stream.set_paused(true).await;
            let _ = stream.stop().await;
        }
        let _ = self.done_tx.send(StreamEvent::Shutdown).await;
        *self.current.lock() = None;
        self.presence.set_status("Bot Stopped");

        if let Some(conn) = self.conn.lock().await.take() {
            self.sink.disconnect(conn).await?;
        }
        Ok(())
    }

    /// Descarga serializada de la próxima pista. El lock compartido acota
    /// las invocaciones externas a una por vez y evita que dos prefetch
    /// (el del loop y uno disparado por comando) corran por la misma
    /// pista. Con el archivo ya en caché es un no-op rápido.
    pub async fn download_next_song(&self, explicit: Option<TrackEntry>) {
        let _guard = self.download_lock.lock().await;

        let was_explicit = explicit.is_some();
        let entry = match explicit.or_else(|| self.playlist.peek_next_song()) {
            Some(entry) => entry,
            None => {
                warn!("no hay próxima pista para descargar");
                return;
            }
        };
        let track_id = entry.track_id().to_string();
        if self.current_track_id().as_deref() == Some(track_id.as_str()) {
            debug!(%track_id, "la próxima pista es la que está sonando");
        }

        let path = self.fetcher.cached_path(&track_id);
        let missing = !path.exists();
        let request_needs_duration =
            matches!(&entry, TrackEntry::Requested(r) if r.duration.is_none());
        if !missing && !request_needs_duration {
            debug!(path = %path.display(), "pista ya descargada");
            return;
        }

        debug!(%track_id, "descargando pista");
        match self.fetcher.fetch_and_encode(&track_id).await {
            Ok(fetched) => {
                debug!(path = %fetched.path.display(), duration = ?fetched.duration, "pista descargada");
                match entry {
                    TrackEntry::Scheduled(_) => {
                        match self.playlist.record_download_metadata(&track_id, fetched.duration)
                        {
                            Ok(()) => match self.playlist.save() {
                                Ok(()) | Err(PlaylistError::Disabled) => {}
                                Err(err) => error!(%err, "no se pudo guardar el playlist"),
                            },
                            Err(err) => error!(%err, "no se pudo registrar la duración"),
                        }
                    }
                    TrackEntry::Requested(mut request) if was_explicit => {
                        // El pedido recién se encola cuando el audio ya
                        // está en caché y con duración conocida.
                        request.duration = Some(fetched.duration);
                        self.playlist.add_request(request);
                    }
                    TrackEntry::Requested(_) => {}
                }
            }
            Err(err) => error!(%track_id, %err, "falló la descarga de la pista"),
        }
    }

    /// Camino de comando para un pedido: descarga en una tarea aparte y
    /// encola al terminar, sin bloquear al llamador.
    pub fn enqueue_request(self: &Arc<Self>, track: RequestedTrack) {
        let player = Arc::clone(self);
        tokio::spawn(async move {
            player
                .download_next_song(Some(TrackEntry::Requested(track)))
                .await;
        });
    }

    /// Reporte de reproducción con barra de progreso cuando se conoce la
    /// duración total.
    pub async fn now_playing_report(&self) -> Option<String> {
        let (title, total) = {
            let current = self.current.lock();
            let now = current.as_ref()?;
            (now.entry.title().to_string(), now.entry.duration())
        };
        let stream = self.stream.lock().await.clone()?;
        let position = Duration::from_secs(stream.position().await.as_secs());

        Some(match total {
            Some(total) if total > Duration::ZERO => {
                let percent =
                    (position.as_secs_f64() / total.as_secs_f64() * 100.0).clamp(0.0, 100.0);
                let hashes =
                    ((percent / 100.0) * PROGRESS_SLOTS as f64) as usize;
                let bar = format!(
                    "|{}{}|",
                    "#".repeat(hashes),
                    "-".repeat(PROGRESS_SLOTS - hashes)
                );
                format!(
                    "**Playing:** {title}\n**Time:** {} of {}\n```{bar} [{percent:.2}%]```",
                    humantime::format_duration(position),
                    humantime::format_duration(Duration::from_secs(total.as_secs())),
                )
            }
            _ => format!(
                "**Playing:** {title}\n**Time:** {} of UNKNOWN",
                humantime::format_duration(position)
            ),
        })
    }

    async fn update_status(&self) {
        let stream = self.stream.lock().await.clone();
        let title = self
            .current
            .lock()
            .as_ref()
            .map(|now| now.entry.title().to_string());
        match (stream, title) {
            (Some(stream), Some(title)) => {
                if stream.is_paused().await {
                    self.presence.set_status(&format!("❚❚ {title}"));
                } else {
                    self.presence.set_status(&title);
                }
            }
            _ => self.presence.set_status("Bot Stopped"),
        }
    }

    async fn await_connection_ready(&self) {
        for _ in 0..READY_RETRIES {
            {
                let conn = self.conn.lock().await;
                match conn.as_ref() {
                    Some(conn) if self.sink.ready(conn).await => return,
                    Some(_) => {}
                    None => return,
                }
            }
            tokio::time::sleep(READY_POLL).await;
        }
        warn!("la conexión no volvió a reportarse lista a tiempo");
    }

    #[cfg(test)]
    fn set_now_playing_for_test(&self, entry: TrackEntry, path: PathBuf) {
        *self.current.lock() = Some(NowPlaying {
            entry,
            path,
            skip_votes: HashSet::new(),
        });
    }

    #[cfg(test)]
    async fn try_take_event(&self) -> Option<StreamEvent> {
        self.done_rx.lock().await.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::collaborators::MockAudioFetcher;
    use super::*;
    use crate::playlist::{RequestedTrack, ScheduledTrack};
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    struct FakeStream {
        paused: AtomicBool,
    }

    #[async_trait]
    impl StreamHandle for FakeStream {
        async fn set_paused(&self, paused: bool) -> anyhow::Result<()> {
            self.paused.store(paused, Ordering::SeqCst);
            Ok(())
        }
        async fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }
        async fn position(&self) -> Duration {
            Duration::from_secs(30)
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Sink de prueba: registra las rutas abiertas y responde según un
    /// guion de eventos, uno por sesión.
    struct FakeSink {
        opened: PlMutex<Vec<PathBuf>>,
        script: Vec<StreamEvent>,
        sessions: AtomicUsize,
    }

    impl FakeSink {
        fn new(script: Vec<StreamEvent>) -> Self {
            Self {
                opened: PlMutex::new(Vec::new()),
                script,
                sessions: AtomicUsize::new(0),
            }
        }

        fn opened(&self) -> Vec<PathBuf> {
            self.opened.lock().clone()
        }
    }

    #[async_trait]
    impl VoiceSink for FakeSink {
        type Conn = ();

        async fn connect(&self, _: GuildId, _: ChannelId) -> anyhow::Result<()> {
            Ok(())
        }

        async fn open_session(
            &self,
            _conn: &(),
            path: &Path,
            done: mpsc::Sender<StreamEvent>,
        ) -> anyhow::Result<Arc<dyn StreamHandle>> {
            self.opened.lock().push(path.to_path_buf());
            let index = self.sessions.fetch_add(1, Ordering::SeqCst);
            if let Some(event) = self.script.get(index).cloned() {
                tokio::spawn(async move {
                    let _ = done.send(event).await;
                });
            }
            Ok(Arc::new(FakeStream {
                paused: AtomicBool::new(false),
            }))
        }

        async fn ready(&self, _: &()) -> bool {
            true
        }

        async fn disconnect(&self, _: ()) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NullPresence {
        statuses: PlMutex<Vec<String>>,
    }

    impl Presence for NullPresence {
        fn set_status(&self, text: &str) {
            self.statuses.lock().push(text.to_string());
        }
    }

    struct NullNotifier {
        sent: PlMutex<Vec<(ChannelId, String)>>,
    }

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, channel: ChannelId, text: &str) {
            self.sent.lock().push((channel, text.to_string()));
        }
    }

    struct DirFetcher {
        dir: PathBuf,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AudioFetcher for DirFetcher {
        fn cached_path(&self, track_id: &str) -> PathBuf {
            self.dir.join(format!("{track_id}.opus"))
        }
        async fn fetch_and_encode(&self, track_id: &str) -> anyhow::Result<FetchedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = self.cached_path(track_id);
            std::fs::write(&path, b"opus")?;
            Ok(FetchedAudio {
                path,
                duration: Duration::from_secs(100),
            })
        }
    }

    fn settings(ratio: f64, required: usize) -> PlayerSettings {
        PlayerSettings {
            skip_ratio: ratio,
            skips_required: required,
            now_playing_mentions: true,
        }
    }

    fn scheduled_entry(id: &str) -> TrackEntry {
        TrackEntry::Scheduled(ScheduledTrack {
            title: format!("title-{id}"),
            track_id: id.to_string(),
            duration: Some(Duration::from_secs(180)),
        })
    }

    fn build_player(
        settings: PlayerSettings,
        playlist: Arc<Playlist>,
        fetcher: Arc<dyn AudioFetcher>,
        sink: Arc<FakeSink>,
    ) -> Arc<Player<FakeSink>> {
        Arc::new(Player::new(
            GuildId::new(1),
            ChannelId::new(2),
            settings,
            playlist,
            fetcher,
            sink,
            Arc::new(NullPresence {
                statuses: PlMutex::new(Vec::new()),
            }),
            Arc::new(NullNotifier {
                sent: PlMutex::new(Vec::new()),
            }),
            Arc::new(tokio::sync::Mutex::new(())),
        ))
    }

    fn empty_playlist() -> Arc<Playlist> {
        Arc::new(Playlist::new(true, "/nonexistent/playlist.json"))
    }

    #[tokio::test]
    async fn skip_votes_ratio_path() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(FakeSink::new(vec![]));
        // 4 oyentes, ratio 0.5, mínimo absoluto 4.
        let player = build_player(
            settings(0.5, 4),
            empty_playlist(),
            Arc::new(DirFetcher {
                dir: dir.path().to_path_buf(),
                calls: AtomicUsize::new(0),
            }),
            sink,
        );
        player.set_now_playing_for_test(scheduled_entry("x"), dir.path().join("x.opus"));

        // 1 de 4 votos: anotado, sin skip.
        assert_eq!(
            player.skip(4, UserId::new(10)).await,
            SkipOutcome::Recorded { votes: 1 }
        );
        assert_eq!(player.try_take_event().await, None);

        // Voto repetido: rechazado.
        assert_eq!(
            player.skip(4, UserId::new(10)).await,
            SkipOutcome::AlreadyVoted
        );

        // 2 de 4 = 0.5: alcanza la fracción y corta.
        assert_eq!(player.skip(4, UserId::new(11)).await, SkipOutcome::RatioMet);
        assert_eq!(player.try_take_event().await, Some(StreamEvent::Skipped));
    }

    #[tokio::test]
    async fn skip_votes_absolute_count_path() {
        let dir = tempfile::tempdir().unwrap();
        let player = build_player(
            settings(0.9, 2),
            empty_playlist(),
            Arc::new(DirFetcher {
                dir: dir.path().to_path_buf(),
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FakeSink::new(vec![])),
        );
        player.set_now_playing_for_test(scheduled_entry("x"), dir.path().join("x.opus"));

        assert_eq!(
            player.skip(4, UserId::new(1)).await,
            SkipOutcome::Recorded { votes: 1 }
        );
        // 2 de 4 = 0.5 < 0.9, pero 2 votos alcanzan el mínimo absoluto.
        assert_eq!(player.skip(4, UserId::new(2)).await, SkipOutcome::CountMet);
        assert_eq!(player.try_take_event().await, Some(StreamEvent::Skipped));
    }

    #[tokio::test]
    async fn solo_listener_always_skips() {
        let dir = tempfile::tempdir().unwrap();
        let player = build_player(
            settings(0.5, 4),
            empty_playlist(),
            Arc::new(DirFetcher {
                dir: dir.path().to_path_buf(),
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FakeSink::new(vec![])),
        );
        player.set_now_playing_for_test(scheduled_entry("x"), dir.path().join("x.opus"));

        assert_eq!(player.skip(1, UserId::new(7)).await, SkipOutcome::Solo);
        assert_eq!(player.try_take_event().await, Some(StreamEvent::Skipped));
        // Incluso habiendo votado antes, un oyente solo siempre corta.
        assert_eq!(player.skip(1, UserId::new(7)).await, SkipOutcome::Solo);
    }

    #[tokio::test]
    async fn skip_without_current_track() {
        let dir = tempfile::tempdir().unwrap();
        let player = build_player(
            settings(0.5, 4),
            empty_playlist(),
            Arc::new(DirFetcher {
                dir: dir.path().to_path_buf(),
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FakeSink::new(vec![])),
        );
        assert_eq!(
            player.skip(3, UserId::new(1)).await,
            SkipOutcome::NothingPlaying
        );
    }

    #[tokio::test]
    async fn concurrent_downloads_invoke_fetcher_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().to_path_buf();

        let playlist = Arc::new(Playlist::new(true, dir.path().join("playlist.json")));
        playlist.add_scheduled(ScheduledTrack {
            title: "pendiente".into(),
            track_id: "vid1".into(),
            duration: None,
        });

        let mut mock = MockAudioFetcher::new();
        let cache_for_path = cache.clone();
        mock.expect_cached_path()
            .returning(move |id| cache_for_path.join(format!("{id}.opus")));
        let cache_for_fetch = cache.clone();
        mock.expect_fetch_and_encode()
            .times(1)
            .returning(move |id| {
                // Materializa el archivo: la segunda llamada debe cortarse
                // en el chequeo de existencia, no en el fetch.
                let path = cache_for_fetch.join(format!("{id}.opus"));
                std::fs::write(&path, b"opus").unwrap();
                Ok(FetchedAudio {
                    path,
                    duration: Duration::from_secs(200),
                })
            });

        let player = build_player(
            settings(0.5, 4),
            Arc::clone(&playlist),
            Arc::new(mock),
            Arc::new(FakeSink::new(vec![])),
        );

        let a = Arc::clone(&player);
        let b = Arc::clone(&player);
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.download_next_song(None).await }),
            tokio::spawn(async move { b.download_next_song(None).await }),
        );
        ra.unwrap();
        rb.unwrap();

        // La duración quedó registrada en el carril en bucle y persistida.
        let entry = playlist.peek_next_song().unwrap();
        assert_eq!(entry.duration(), Some(Duration::from_secs(200)));
        assert!(dir.path().join("playlist.json").exists());
    }

    #[tokio::test]
    async fn explicit_request_is_enqueued_after_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = empty_playlist();
        let fetcher = Arc::new(DirFetcher {
            dir: dir.path().to_path_buf(),
            calls: AtomicUsize::new(0),
        });
        let player = build_player(
            settings(0.5, 4),
            Arc::clone(&playlist),
            fetcher.clone(),
            Arc::new(FakeSink::new(vec![])),
        );

        let request = RequestedTrack {
            requester: UserId::new(5),
            request_channel: ChannelId::new(6),
            title: "pedido".into(),
            track_id: "req1".into(),
            duration: None,
        };
        player
            .download_next_song(Some(TrackEntry::Requested(request)))
            .await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let entry = playlist.next_song().unwrap();
        assert_eq!(entry.track_id(), "req1");
        // El pedido entra a la cola recién con la duración aprendida.
        assert_eq!(entry.duration(), Some(Duration::from_secs(100)));
    }

    #[tokio::test]
    async fn cached_download_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = empty_playlist();
        playlist.add_scheduled(ScheduledTrack {
            title: "cacheada".into(),
            track_id: "vid2".into(),
            duration: Some(Duration::from_secs(60)),
        });
        std::fs::write(dir.path().join("vid2.opus"), b"opus").unwrap();

        let fetcher = Arc::new(DirFetcher {
            dir: dir.path().to_path_buf(),
            calls: AtomicUsize::new(0),
        });
        let player = build_player(
            settings(0.5, 4),
            playlist,
            fetcher.clone(),
            Arc::new(FakeSink::new(vec![])),
        );

        player.download_next_song(None).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn play_loop_cycles_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = Arc::new(Playlist::new(true, dir.path().join("playlist.json")));
        for id in ["a", "b"] {
            playlist.add_scheduled(ScheduledTrack {
                title: format!("title-{id}"),
                track_id: id.to_string(),
                duration: Some(Duration::from_secs(10)),
            });
            std::fs::write(dir.path().join(format!("{id}.opus")), b"opus").unwrap();
        }

        // Dos fines naturales y un shutdown: el loop debe envolver al head.
        let sink = Arc::new(FakeSink::new(vec![
            StreamEvent::Ended,
            StreamEvent::Ended,
            StreamEvent::Shutdown,
        ]));
        let player = build_player(
            settings(0.5, 4),
            playlist,
            Arc::new(DirFetcher {
                dir: dir.path().to_path_buf(),
                calls: AtomicUsize::new(0),
            }),
            Arc::clone(&sink),
        );

        player.join_voice_channel().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.opened().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("el loop no abrió las tres sesiones");

        let opened: Vec<String> = sink
            .opened()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(opened, vec!["a.opus", "b.opus", "a.opus"]);
    }

    #[tokio::test]
    async fn pause_resume_and_skip_work_mid_stream() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = Arc::new(Playlist::new(true, dir.path().join("playlist.json")));
        playlist.add_scheduled(ScheduledTrack {
            title: "title-a".into(),
            track_id: "a".into(),
            duration: Some(Duration::from_secs(10)),
        });
        std::fs::write(dir.path().join("a.opus"), b"opus").unwrap();

        // Sin eventos en el guion: la sesión queda abierta, sonando.
        let sink = Arc::new(FakeSink::new(vec![]));
        let presence = Arc::new(NullPresence {
            statuses: PlMutex::new(Vec::new()),
        });
        let player = Arc::new(Player::new(
            GuildId::new(1),
            ChannelId::new(2),
            settings(0.5, 4),
            playlist,
            Arc::new(DirFetcher {
                dir: dir.path().to_path_buf(),
                calls: AtomicUsize::new(0),
            }),
            Arc::clone(&sink),
            Arc::clone(&presence) as Arc<dyn Presence>,
            Arc::new(NullNotifier {
                sent: PlMutex::new(Vec::new()),
            }),
            Arc::new(tokio::sync::Mutex::new(())),
        ));
        player.join_voice_channel().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while player.current_track_id().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("la sesión no llegó a abrirse");

        // Con la sesión activa, pause/resume deben terminar y republicar
        // la presencia con y sin el prefijo de pausa.
        tokio::time::timeout(Duration::from_secs(2), player.pause())
            .await
            .expect("pause() no terminó con una sesión activa");
        tokio::time::timeout(Duration::from_secs(2), player.resume())
            .await
            .expect("resume() no terminó con una sesión activa");

        let statuses = presence.statuses.lock().clone();
        assert!(statuses.contains(&"❚❚ title-a".to_string()));
        assert_eq!(statuses.last().unwrap(), "title-a");

        // El skip de oyente único también pausa por dentro; no debe colgarse.
        let outcome = tokio::time::timeout(Duration::from_secs(2), player.skip(1, UserId::new(7)))
            .await
            .expect("skip() no terminó con una sesión activa");
        assert_eq!(outcome, SkipOutcome::Solo);

        player.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let player = build_player(
            settings(0.5, 4),
            empty_playlist(),
            Arc::new(DirFetcher {
                dir: dir.path().to_path_buf(),
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FakeSink::new(vec![])),
        );
        player.join_voice_channel().await.unwrap();

        player.shutdown().await.unwrap();
        player.shutdown().await.unwrap();
        assert!(player.current_track_id().is_none());
    }
}
