pub mod commands;

use dashmap::DashMap;
use serenity::async_trait;
use serenity::client::{Context, EventHandler};
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::player::{Player, PlayerSettings, SkipOutcome};
use crate::playlist::{Playlist, PlaylistError, RequestedTrack};
use crate::sources::{extract_track_id, SearchHit, SearchProvider};
use crate::voice::{HttpNotifier, ShardPresence, SongbirdSink};

use commands::{find_command, help_text, split_invocation, CommandKind};

/// Handler de la gateway: arma un player por canal de voz configurado y
/// rutea los comandos de texto al player que corresponda.
pub struct RadiolaBot {
    config: Arc<Config>,
    search: Arc<dyn SearchProvider>,
    players: Arc<DashMap<ChannelId, Arc<Player<SongbirdSink>>>>,
    /// Una sola descarga externa a la vez, compartido entre players.
    download_lock: Arc<tokio::sync::Mutex<()>>,
    started: AtomicBool,
}

impl RadiolaBot {
    pub fn new(
        config: Arc<Config>,
        search: Arc<dyn SearchProvider>,
        players: Arc<DashMap<ChannelId, Arc<Player<SongbirdSink>>>>,
    ) -> Self {
        Self {
            config,
            search,
            players,
            download_lock: Arc::new(tokio::sync::Mutex::new(())),
            started: AtomicBool::new(false),
        }
    }

    async fn reply(&self, ctx: &Context, msg: &Message, text: impl Into<String>) {
        if let Err(err) = msg.channel_id.say(&ctx.http, text.into()).await {
            warn!(%err, "no se pudo responder el comando");
        }
    }

    /// Player del canal de voz donde está el autor; si no está en ninguno
    /// de los canales atendidos, el primero registrado.
    fn player_for(&self, ctx: &Context, msg: &Message) -> Option<Arc<Player<SongbirdSink>>> {
        let voice_channel = msg.guild(&ctx.cache).and_then(|guild| {
            guild
                .voice_states
                .get(&msg.author.id)
                .and_then(|state| state.channel_id)
        });
        if let Some(channel) = voice_channel {
            if let Some(player) = self.players.get(&channel) {
                return Some(Arc::clone(player.value()));
            }
        }
        self.players
            .iter()
            .next()
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Oyentes humanos en el canal de voz del player.
    fn count_listeners(&self, ctx: &Context, msg: &Message, channel: ChannelId) -> usize {
        let bot_id = ctx.cache.current_user().id;
        msg.guild(&ctx.cache)
            .map(|guild| {
                guild
                    .voice_states
                    .values()
                    .filter(|state| state.channel_id == Some(channel) && state.user_id != bot_id)
                    .count()
            })
            .unwrap_or(1)
    }

    async fn handle_play(&self, ctx: &Context, msg: &Message, args: &str) {
        if args.is_empty() {
            self.reply(ctx, msg, format!("Uso: {}play <url o búsqueda>", self.config.command_prefix))
                .await;
            return;
        }
        let Some(player) = self.player_for(ctx, msg) else {
            self.reply(ctx, msg, "No hay ningún player activo.").await;
            return;
        };

        // Una URL fija el id exacto; la búsqueda solo aporta el título.
        let hit = match extract_track_id(args) {
            Some(track_id) => {
                let title = match self.search.search_first(&track_id).await {
                    Ok(hit) => hit.title,
                    Err(err) => {
                        debug!(%err, "sin título para la URL, usando el id");
                        track_id.clone()
                    }
                };
                SearchHit { track_id, title }
            }
            None => match self.search.search_first(args).await {
                Ok(hit) => hit,
                Err(err) => {
                    warn!(%err, "la búsqueda no devolvió resultados");
                    self.reply(
                        ctx,
                        msg,
                        format!("<@{}> - No encontré resultados para eso.", msg.author.id),
                    )
                    .await;
                    return;
                }
            },
        };

        let title = hit.title.clone();
        player.enqueue_request(RequestedTrack {
            requester: msg.author.id,
            request_channel: msg.channel_id,
            title: hit.title,
            track_id: hit.track_id,
            duration: None,
        });
        self.reply(
            ctx,
            msg,
            format!("<@{}> - Enqueued **{title}** to be played.", msg.author.id),
        )
        .await;
    }

    async fn handle_skip(&self, ctx: &Context, msg: &Message) {
        let Some(player) = self.player_for(ctx, msg) else {
            self.reply(ctx, msg, "No hay ningún player activo.").await;
            return;
        };
        let listeners = self.count_listeners(ctx, msg, player.channel());
        let outcome = player.skip(listeners, msg.author.id).await;
        let author = msg.author.id;
        let text = match outcome {
            SkipOutcome::NothingPlaying => "Nothing is playing right now.".to_string(),
            SkipOutcome::Solo => {
                format!("<@{author}> - Since you are all alone, skipping!")
            }
            SkipOutcome::AlreadyVoted => format!(
                "<@{author}> - You already requested to skip this song, you can't again!"
            ),
            SkipOutcome::RatioMet => {
                format!("<@{author}> - Required skip ratio met, skipping song!")
            }
            SkipOutcome::CountMet => {
                format!("<@{author}> - Met total required skips, skipping song!")
            }
            SkipOutcome::Recorded { votes } => format!(
                "<@{author}> - Your request to skip has been recorded ({votes} so far), \
                 but not enough people have requested yet."
            ),
        };
        self.reply(ctx, msg, text).await;
    }

    async fn dispatch(&self, ctx: &Context, msg: &Message, kind: CommandKind, args: &str) {
        match kind {
            CommandKind::Help => {
                self.reply(ctx, msg, help_text(&self.config.command_prefix))
                    .await;
            }
            CommandKind::Play => self.handle_play(ctx, msg, args).await,
            CommandKind::Pause => {
                if let Some(player) = self.player_for(ctx, msg) {
                    player.pause().await;
                    self.reply(ctx, msg, "Paused.").await;
                }
            }
            CommandKind::Resume => {
                if let Some(player) = self.player_for(ctx, msg) {
                    player.resume().await;
                    self.reply(ctx, msg, "Resumed.").await;
                }
            }
            CommandKind::Skip => self.handle_skip(ctx, msg).await,
            CommandKind::NowPlaying => {
                let report = match self.player_for(ctx, msg) {
                    Some(player) => player.now_playing_report().await,
                    None => None,
                };
                self.reply(
                    ctx,
                    msg,
                    report.unwrap_or_else(|| "Nothing is playing right now.".to_string()),
                )
                .await;
            }
            CommandKind::Queue => {
                if let Some(player) = self.player_for(ctx, msg) {
                    let listing = player
                        .playlist()
                        .render(player.current_track_id().as_deref());
                    self.reply(ctx, msg, listing).await;
                }
            }
            CommandKind::Save => {
                let Some(player) = self.player_for(ctx, msg) else {
                    return;
                };
                let text = match player.playlist().save() {
                    Ok(()) => "Playlist saved.".to_string(),
                    Err(PlaylistError::Disabled) => {
                        "Using a playlist is currently disabled via the config.".to_string()
                    }
                    Err(err) => {
                        error!(%err, "no se pudo guardar el playlist");
                        "Couldn't save the playlist, check the logs.".to_string()
                    }
                };
                self.reply(ctx, msg, text).await;
            }
        }
    }
}

#[async_trait]
impl EventHandler for RadiolaBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🎵 {} conectado a la gateway", ready.user.name);
        // ready se repite en cada reconexión; los players se arman una vez.
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(manager) = songbird::get(&ctx).await else {
            error!("songbird no está registrado en el cliente");
            return;
        };
        let guild = GuildId::new(self.config.guild_id);
        let settings = PlayerSettings {
            skip_ratio: self.config.skip_ratio,
            skips_required: self.config.skips_required,
            now_playing_mentions: self.config.now_playing_mentions,
        };

        for &channel_id in &self.config.voice_channels {
            let channel = ChannelId::new(channel_id);
            let playlist = Arc::new(Playlist::new(
                self.config.use_playlist,
                self.config.playlist_path.clone(),
            ));
            let player = Arc::new(Player::new(
                guild,
                channel,
                settings.clone(),
                playlist,
                Arc::new(crate::sources::ytdlp::YtdlpFetcher::new(
                    self.config.cache_dir.clone(),
                )),
                Arc::new(SongbirdSink::new(Arc::clone(&manager), guild)),
                Arc::new(ShardPresence::new(ctx.shard.clone())),
                Arc::new(HttpNotifier::new(Arc::clone(&ctx.http))),
                Arc::clone(&self.download_lock),
            ));
            match player.join_voice_channel().await {
                Ok(()) => {
                    self.players.insert(channel, player);
                }
                Err(err) => error!(%channel, %err, "no se pudo conectar al canal de voz"),
            }
        }
        info!(players = self.players.len(), "players activos");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        if msg.guild_id != Some(GuildId::new(self.config.guild_id)) {
            return;
        }
        if !self.config.text_channels.is_empty()
            && !self.config.text_channels.contains(&msg.channel_id.get())
        {
            return;
        }
        let Some(rest) = msg.content.strip_prefix(&self.config.command_prefix) else {
            return;
        };
        let (name, args) = split_invocation(rest);
        let Some(spec) = find_command(&name) else {
            return;
        };
        debug!(command = spec.name, author = %msg.author.id, "comando recibido");
        self.dispatch(&ctx, &msg, spec.kind, args).await;
    }
}
