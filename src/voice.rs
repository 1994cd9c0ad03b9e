use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use serenity::gateway::ActivityData;
use serenity::http::Http;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::player::collaborators::{Notifier, Presence, StreamEvent, StreamHandle, VoiceSink};

/// Colaborador de voz productivo sobre songbird.
pub struct SongbirdSink {
    manager: Arc<Songbird>,
    guild: GuildId,
}

impl SongbirdSink {
    pub fn new(manager: Arc<Songbird>, guild: GuildId) -> Self {
        Self { manager, guild }
    }
}

#[async_trait]
impl VoiceSink for SongbirdSink {
    type Conn = Arc<Mutex<Call>>;

    async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<Self::Conn> {
        self.manager
            .join(guild, channel)
            .await
            .context("no se pudo entrar al canal de voz")
    }

    async fn open_session(
        &self,
        conn: &Self::Conn,
        path: &Path,
        done: mpsc::Sender<StreamEvent>,
    ) -> Result<Arc<dyn StreamHandle>> {
        let input = songbird::input::File::new(path.to_path_buf());
        let handle = conn.lock().await.play_input(input.into());

        // Un solo valor terminal por sesión: el flag lo comparten los
        // notificadores y el stop() manual.
        let reported = Arc::new(AtomicBool::new(false));
        handle
            .add_event(
                Event::Track(TrackEvent::End),
                SessionNotifier {
                    done: done.clone(),
                    reported: Arc::clone(&reported),
                    event: StreamEvent::Ended,
                },
            )
            .context("no se pudo registrar el notificador de fin")?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                SessionNotifier {
                    done,
                    reported: Arc::clone(&reported),
                    event: StreamEvent::Failed("error de pista en el driver de voz".into()),
                },
            )
            .context("no se pudo registrar el notificador de error")?;

        debug!(path = %path.display(), "sesión de streaming abierta");
        Ok(Arc::new(SongbirdStream {
            handle,
            paused: AtomicBool::new(false),
            reported,
        }))
    }

    async fn ready(&self, conn: &Self::Conn) -> bool {
        conn.lock().await.current_connection().is_some()
    }

    async fn disconnect(&self, conn: Self::Conn) -> Result<()> {
        drop(conn);
        self.manager
            .remove(self.guild)
            .await
            .context("no se pudo salir del canal de voz")?;
        Ok(())
    }
}

/// Empuja exactamente un valor terminal en el canal de finalización.
struct SessionNotifier {
    done: mpsc::Sender<StreamEvent>,
    reported: Arc<AtomicBool>,
    event: StreamEvent,
}

#[async_trait]
impl VoiceEventHandler for SessionNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if self.reported.swap(true, Ordering::SeqCst) {
            return None;
        }
        if self.done.send(self.event.clone()).await.is_err() {
            warn!("el canal de finalización ya estaba cerrado");
        }
        None
    }
}

struct SongbirdStream {
    handle: songbird::tracks::TrackHandle,
    paused: AtomicBool,
    reported: Arc<AtomicBool>,
}

#[async_trait]
impl StreamHandle for SongbirdStream {
    async fn set_paused(&self, paused: bool) -> Result<()> {
        if paused {
            self.handle.pause().context("no se pudo pausar la pista")?;
        } else {
            self.handle.play().context("no se pudo reanudar la pista")?;
        }
        self.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }

    async fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn position(&self) -> Duration {
        match self.handle.get_info().await {
            Ok(state) => state.position,
            Err(_) => Duration::ZERO,
        }
    }

    async fn stop(&self) -> Result<()> {
        // Marca la sesión como reportada para que el End disparado por el
        // stop manual no produzca un segundo valor terminal.
        self.reported.store(true, Ordering::SeqCst);
        self.handle.stop().context("no se pudo frenar la pista")?;
        Ok(())
    }
}

/// Presencia vía el shard de la gateway. Fuego y olvido.
pub struct ShardPresence {
    shard: serenity::gateway::ShardMessenger,
}

impl ShardPresence {
    pub fn new(shard: serenity::gateway::ShardMessenger) -> Self {
        Self { shard }
    }
}

impl Presence for ShardPresence {
    fn set_status(&self, text: &str) {
        self.shard
            .set_activity(Some(ActivityData::custom(text.to_string())));
    }
}

/// Mensajes por HTTP al canal del pedido. Fuego y olvido.
pub struct HttpNotifier {
    http: Arc<Http>,
}

impl HttpNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, channel: ChannelId, text: &str) {
        if let Err(err) = channel.say(&self.http, text).await {
            warn!(%channel, %err, "no se pudo enviar el mensaje de aviso");
        }
    }
}
