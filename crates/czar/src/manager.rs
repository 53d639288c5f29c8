//! Connection manager: who is connected to which game, and fan-out.
//!
//! # Concurrency
//!
//! The registry lock guards only the topology (`game → player →
//! connection`). It is never held across `.await`: every operation takes a
//! snapshot of its targets, drops the lock, then sends. Heartbeat state
//! lives behind each connection's own lock.
//!
//! # Lifecycle
//!
//! [`ConnectionManager::register`] spawns one task per connection. It races
//! the read loop, the heartbeat loop and the connection's cancellation
//! token; whichever finishes first ends the other two, then the connection
//! is closed and unregistered.
//!
//! # Ordering
//!
//! Each game has a turn lock (`tokio::sync::Mutex`). Every entry point that
//! changes a game takes it before the change and holds it until the
//! resulting notifications are delivered, so all connections of a game see
//! events in the order they happened. The delivery helpers never take it.
//!
//! Unregistering broadcasts a disconnect notice, and a failed send inside
//! that broadcast unregisters another player. Those cascades run off a
//! work queue rather than recursion.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use czar_game::{GameId, PlayerId, PlayerRemoval};
use czar_protocol::{
    NewOwner, OnCzarJudgingPhase, OnJoin, OnPlayerCreate, OnPlayerDisconnect, OnPlayerJoin,
    OnPlayerLeave, OnWhiteCardPlayPhase, ProtocolError, RoundInformation, RpcMessage,
    decode_command, encode,
};
use czar_repo::GameRepository;
use czar_transport::Connection;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::connection::{CloseReason, LiveConnection, Liveness};
use crate::metrics::{MetricEvent, MetricsSink};
use crate::{CzarError, HeartbeatConfig};

type Registry<C> = HashMap<GameId, HashMap<PlayerId, Arc<LiveConnection<C>>>>;

/// One pending send: recipient, its connection, pre-encoded bytes.
type Delivery<C> = (PlayerId, Arc<LiveConnection<C>>, Arc<[u8]>);

/// A connection to drop: player, the serial it must still match (if any),
/// and why.
type Doomed = (PlayerId, Option<u64>, CloseReason);

/// Tracks live connections per game and delivers messages to them.
pub struct ConnectionManager<C: Connection> {
    repo: Arc<GameRepository>,
    metrics: Arc<dyn MetricsSink>,
    heartbeat: HeartbeatConfig,
    pub(crate) winner_display: Duration,
    registry: RwLock<Registry<C>>,
    turns: Mutex<HashMap<GameId, Arc<tokio::sync::Mutex<()>>>>,
    next_serial: AtomicU64,
}

impl<C: Connection> ConnectionManager<C> {
    pub fn new(
        repo: Arc<GameRepository>,
        metrics: Arc<dyn MetricsSink>,
        heartbeat: HeartbeatConfig,
        winner_display: Duration,
    ) -> Self {
        Self {
            repo,
            metrics,
            heartbeat,
            winner_display,
            registry: RwLock::new(HashMap::new()),
            turns: Mutex::new(HashMap::new()),
            next_serial: AtomicU64::new(1),
        }
    }

    pub fn repository(&self) -> &Arc<GameRepository> {
        &self.repo
    }

    /// Whether `player` has a live connection to `game`.
    pub fn is_registered(&self, game: GameId, player: PlayerId) -> bool {
        self.registry
            .read()
            .get(&game)
            .is_some_and(|players| players.contains_key(&player))
    }

    /// Players with a live connection to `game`.
    pub fn registered_players(&self, game: GameId) -> Vec<PlayerId> {
        self.registry
            .read()
            .get(&game)
            .map(|players| players.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Live connections across every game.
    pub fn connection_count(&self) -> usize {
        self.registry.read().values().map(HashMap::len).sum()
    }

    /// Waits for `game`'s turn. Games the repository no longer holds get a
    /// throwaway lock so no entry outlives them.
    pub(crate) async fn turn(&self, game: GameId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut turns = self.turns.lock();
            match turns.get(&game) {
                Some(lock) => Arc::clone(lock),
                None if self.repo.contains(game) => Arc::clone(turns.entry(game).or_default()),
                None => Arc::default(),
            }
        };
        lock.lock_owned().await
    }

    // -----------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------

    /// Registers `conn` as `player`'s connection to `game` and starts its
    /// supervised task.
    ///
    /// An existing connection for the same player is closed and replaced.
    /// Peers get `OnPlayerJoin`; the new connection then gets `OnJoin` and,
    /// mid-round, `RoundInformation`.
    pub async fn register(
        self: &Arc<Self>,
        game: GameId,
        player: PlayerId,
        conn: C,
    ) -> Result<JoinHandle<()>, CzarError> {
        let _turn = self.turn(game).await;
        let name = self.repo.player_name(game, player)?;
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let live = Arc::new(LiveConnection::new(serial, conn));

        let previous = self
            .registry
            .write()
            .entry(game)
            .or_default()
            .insert(player, Arc::clone(&live));
        if let Some(previous) = previous {
            tracing::info!(game_id = %game, player_id = %player, "replacing existing connection");
            previous.cancel();
            if let Err(e) = previous.conn().close().await {
                tracing::debug!(error = %e, "closing replaced connection failed");
            }
            self.metrics.record(MetricEvent::ConnectionClosed);
        }

        if let Err(e) = self.repo.connect(game, player) {
            self.take(game, player, Some(serial));
            return Err(e.into());
        }
        self.metrics.record(MetricEvent::ConnectionOpened);
        tracing::info!(
            game_id = %game,
            player_id = %player,
            conn_id = %live.conn().id(),
            "connection registered",
        );

        let joined = RpcMessage::OnPlayerJoin(OnPlayerJoin { id: player, name });
        if let Err(e) = self.broadcast_except(game, player, &joined).await {
            tracing::error!(game_id = %game, error = %e, "join announcement failed");
        }
        let greeted = self.greet(game, player, &live).await;

        let manager = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let reason = match greeted {
                Err(reason) => reason,
                Ok(()) => tokio::select! {
                    reason = manager.read_loop(game, player, &live) => reason,
                    reason = manager.heartbeat_loop(game, player, &live) => reason,
                    () = live.cancel_token().cancelled() => CloseReason::Closed,
                },
            };
            if let Err(e) = live.conn().close().await {
                tracing::debug!(error = %e, "close after session end failed");
            }
            let _turn = manager.turn(game).await;
            manager
                .unregister_all(game, vec![(player, Some(live.serial()), reason)])
                .await;
        }))
    }

    /// Drops `player`'s connection to `game`, if any. The player stays in
    /// the game, marked disconnected.
    pub async fn unregister(&self, game: GameId, player: PlayerId) {
        let _turn = self.turn(game).await;
        self.unregister_all(game, vec![(player, None, CloseReason::Closed)])
            .await;
    }

    /// Closes every connection of `game` without notifying anyone.
    pub async fn remove_game(&self, game: GameId) -> usize {
        self.turns.lock().remove(&game);
        let Some(players) = self.registry.write().remove(&game) else {
            return 0;
        };
        let count = players.len();
        for live in players.into_values() {
            self.close_silently(&live).await;
        }
        tracing::debug!(game_id = %game, connections = count, "game connections closed");
        count
    }

    /// Closes every connection of every game.
    pub async fn shutdown(&self) {
        let registry = std::mem::take(&mut *self.registry.write());
        for live in registry.into_values().flat_map(HashMap::into_values) {
            self.close_silently(&live).await;
        }
    }

    // -----------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------

    /// Sends `msg` to every connection of `game`. A failed send drops that
    /// player's connection only.
    ///
    /// Does not take the game's turn; callers sequencing a state change
    /// hold it.
    pub async fn broadcast(&self, game: GameId, msg: &RpcMessage) -> Result<(), CzarError> {
        self.broadcast_filtered(game, None, msg).await
    }

    /// Like [`broadcast`](Self::broadcast), skipping `except`.
    pub async fn broadcast_except(
        &self,
        game: GameId,
        except: PlayerId,
        msg: &RpcMessage,
    ) -> Result<(), CzarError> {
        self.broadcast_filtered(game, Some(except), msg).await
    }

    /// Sends `msg` to one player. Returns whether it was delivered.
    pub async fn send_to_player(
        &self,
        game: GameId,
        player: PlayerId,
        msg: &RpcMessage,
    ) -> Result<bool, CzarError> {
        let bytes: Arc<[u8]> = encode(msg)?.into();
        let Some(live) = self.connection(game, player) else {
            return Ok(false);
        };
        let failed = self.deliver(game, vec![(player, live, bytes)]).await;
        let delivered = failed.is_empty();
        self.drop_failed(game, failed).await;
        Ok(delivered)
    }

    /// Sends each connected player of `game` its own message.
    pub async fn send_each(
        &self,
        game: GameId,
        message_for: impl Fn(PlayerId) -> RpcMessage,
    ) -> Result<(), CzarError> {
        let mut sends = Vec::new();
        for (player, live) in self.targets(game, None) {
            let bytes: Arc<[u8]> = encode(&message_for(player))?.into();
            sends.push((player, live, bytes));
        }
        let failed = self.deliver(game, sends).await;
        self.drop_failed(game, failed).await;
        Ok(())
    }

    async fn broadcast_filtered(
        &self,
        game: GameId,
        except: Option<PlayerId>,
        msg: &RpcMessage,
    ) -> Result<(), CzarError> {
        let bytes: Arc<[u8]> = encode(msg)?.into();
        let sends = self
            .targets(game, except)
            .into_iter()
            .map(|(player, live)| (player, live, Arc::clone(&bytes)))
            .collect();
        let failed = self.deliver(game, sends).await;
        self.drop_failed(game, failed).await;
        Ok(())
    }

    /// Sends concurrently and waits for every send. Returns the
    /// `(player, serial)` of each failure.
    async fn deliver(&self, game: GameId, sends: Vec<Delivery<C>>) -> Vec<(PlayerId, u64)> {
        let results = join_all(sends.into_iter().map(|(player, live, bytes)| async move {
            let result = live.conn().send(&bytes).await;
            (player, live, result)
        }))
        .await;

        let mut failed = Vec::new();
        for (player, live, result) in results {
            match result {
                Ok(()) => self.metrics.record(MetricEvent::MessageSent),
                Err(e) => {
                    self.metrics.record(MetricEvent::SendFailed);
                    tracing::debug!(game_id = %game, player_id = %player, error = %e, "send failed");
                    failed.push((player, live.serial()));
                }
            }
        }
        failed
    }

    async fn drop_failed(&self, game: GameId, failed: Vec<(PlayerId, u64)>) {
        if failed.is_empty() {
            return;
        }
        let doomed = failed
            .into_iter()
            .map(|(player, serial)| (player, Some(serial), CloseReason::SendFailed))
            .collect();
        self.unregister_all(game, doomed).await;
    }

    /// Sends straight to `live`, bypassing the registry.
    async fn send_direct(&self, live: &LiveConnection<C>, msg: &RpcMessage) -> bool {
        let bytes = match encode(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "encode failed");
                return false;
            }
        };
        match live.conn().send(&bytes).await {
            Ok(()) => {
                self.metrics.record(MetricEvent::MessageSent);
                true
            }
            Err(e) => {
                self.metrics.record(MetricEvent::SendFailed);
                tracing::debug!(conn_id = %live.conn().id(), error = %e, "send failed");
                false
            }
        }
    }

    // -----------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------

    fn connection(&self, game: GameId, player: PlayerId) -> Option<Arc<LiveConnection<C>>> {
        self.registry.read().get(&game)?.get(&player).cloned()
    }

    fn targets(
        &self,
        game: GameId,
        except: Option<PlayerId>,
    ) -> Vec<(PlayerId, Arc<LiveConnection<C>>)> {
        self.registry
            .read()
            .get(&game)
            .map(|players| {
                players
                    .iter()
                    .filter(|(id, _)| Some(**id) != except)
                    .map(|(id, live)| (*id, Arc::clone(live)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes the player's entry if it still belongs to `serial`.
    fn take(
        &self,
        game: GameId,
        player: PlayerId,
        serial: Option<u64>,
    ) -> Option<Arc<LiveConnection<C>>> {
        let mut registry = self.registry.write();
        let players = registry.get_mut(&game)?;
        let current = players.get(&player)?;
        if serial.is_some_and(|s| s != current.serial()) {
            return None;
        }
        let live = players.remove(&player);
        if players.is_empty() {
            registry.remove(&game);
        }
        live
    }

    async fn close_silently(&self, live: &LiveConnection<C>) {
        live.cancel();
        if let Err(e) = live.conn().close().await {
            tracing::debug!(conn_id = %live.conn().id(), error = %e, "close failed");
        }
        self.metrics.record(MetricEvent::ConnectionClosed);
    }

    async fn unregister_all(&self, game: GameId, doomed: Vec<Doomed>) {
        let mut pending = VecDeque::from(doomed);
        while let Some((player, serial, reason)) = pending.pop_front() {
            let Some(live) = self.take(game, player, serial) else {
                continue;
            };
            self.close_silently(&live).await;
            if let Err(e) = self.repo.disconnect(game, player) {
                tracing::debug!(game_id = %game, player_id = %player, error = %e, "disconnect skipped");
            }
            tracing::info!(
                game_id = %game,
                player_id = %player,
                %reason,
                session_secs = live.joined_at().elapsed().as_secs(),
                "connection unregistered",
            );

            let notice = RpcMessage::OnPlayerDisconnect(OnPlayerDisconnect {
                id: player,
                reason: reason.to_string(),
            });
            let bytes: Arc<[u8]> = match encode(&notice) {
                Ok(bytes) => bytes.into(),
                Err(e) => {
                    tracing::error!(error = %e, "encode failed");
                    continue;
                }
            };
            let sends = self
                .targets(game, Some(player))
                .into_iter()
                .map(|(p, l)| (p, l, Arc::clone(&bytes)))
                .collect();
            let failed = self.deliver(game, sends).await;
            pending.extend(
                failed
                    .into_iter()
                    .map(|(p, s)| (p, Some(s), CloseReason::SendFailed)),
            );
        }
    }

    // -----------------------------------------------------------------
    // Per-connection loops
    // -----------------------------------------------------------------

    /// Dispatches inbound frames until the connection ends.
    async fn read_loop(
        self: &Arc<Self>,
        game: GameId,
        player: PlayerId,
        live: &LiveConnection<C>,
    ) -> CloseReason {
        loop {
            if live.is_cancelled() {
                return CloseReason::Closed;
            }
            let frame = match live.conn().recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return CloseReason::ClientClosed,
                Err(e) => return CloseReason::ReadFailed(e.to_string()),
            };
            self.metrics.record(MetricEvent::MessageReceived);

            let command = match decode_command(&frame) {
                Ok(command) => command,
                Err(ProtocolError::UnknownType(kind)) => {
                    self.metrics.record(MetricEvent::UnknownCommand);
                    tracing::debug!(game_id = %game, player_id = %player, kind, "ignoring unknown message type");
                    continue;
                }
                Err(e @ ProtocolError::Payload { .. }) => {
                    if !self.reply_error(live, e.to_string()).await {
                        return CloseReason::SendFailed;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::debug!(game_id = %game, player_id = %player, error = %e, "dropping connection");
                    return CloseReason::Undecodable;
                }
            };

            if let Err(e) = self.handle_command(game, player, live, command).await {
                self.metrics.record(MetricEvent::CommandRejected);
                tracing::debug!(
                    game_id = %game,
                    player_id = %player,
                    kind = %e.kind(),
                    error = %e,
                    "command rejected",
                );
                if !self.reply_error(live, e.to_string()).await {
                    return CloseReason::SendFailed;
                }
            }
        }
    }

    async fn greet(
        &self,
        game: GameId,
        player: PlayerId,
        live: &LiveConnection<C>,
    ) -> Result<(), CloseReason> {
        let state = self
            .repo
            .state_info(game, player)
            .map_err(|_| CloseReason::Closed)?;
        let round = RoundInformation::from_state(&state);
        if !self.send_direct(live, &RpcMessage::OnJoin(OnJoin { state })).await {
            return Err(CloseReason::SendFailed);
        }
        if let Some(round) = round {
            if !self.send_direct(live, &RpcMessage::RoundInformation(round)).await {
                return Err(CloseReason::SendFailed);
            }
        }
        Ok(())
    }

    async fn reply_error(&self, live: &LiveConnection<C>, reason: String) -> bool {
        self.send_direct(live, &RpcMessage::command_error(reason))
            .await
    }

    /// Pings a silent client and gives up after the timeout.
    async fn heartbeat_loop(
        &self,
        game: GameId,
        player: PlayerId,
        live: &LiveConnection<C>,
    ) -> CloseReason {
        let mut ticker = tokio::time::interval(self.heartbeat.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match live.check(Instant::now(), &self.heartbeat) {
                Liveness::Alive => {}
                Liveness::SendPing => {
                    if !self.send_direct(live, &RpcMessage::ping()).await {
                        return CloseReason::SendFailed;
                    }
                }
                Liveness::TimedOut => {
                    self.metrics.record(MetricEvent::HeartbeatTimeout);
                    tracing::warn!(game_id = %game, player_id = %player, "heartbeat timed out");
                    return CloseReason::HeartbeatTimeout;
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------

    /// Adds a player through the HTTP surface and announces it.
    pub async fn create_player(
        &self,
        game: GameId,
        name: &str,
        password: &str,
    ) -> Result<PlayerId, CzarError> {
        let _turn = self.turn(game).await;
        let player = self.repo.create_player(game, name, password)?;
        let msg = RpcMessage::OnPlayerCreate(OnPlayerCreate {
            id: player,
            name: name.to_string(),
        });
        self.broadcast_except(game, player, &msg).await?;
        Ok(player)
    }

    /// Removes `player` from `game` and tells everyone what changed.
    ///
    /// The player's connection is closed without a disconnect notice. The
    /// game's connections are dropped once nobody is left.
    pub async fn remove_player(
        &self,
        game: GameId,
        player: PlayerId,
        reason: &str,
    ) -> Result<PlayerRemoval, CzarError> {
        let _turn = self.turn(game).await;
        let removal = self.repo.leave(game, player)?;
        if let Some(live) = self.take(game, player, None) {
            self.close_silently(&live).await;
        }

        let left = RpcMessage::OnPlayerLeave(OnPlayerLeave {
            id: player,
            reason: reason.to_string(),
        });
        self.broadcast(game, &left).await?;
        if let Some(owner) = removal.new_owner {
            self.broadcast(game, &RpcMessage::NewOwner(NewOwner { id: owner }))
                .await?;
        }
        if let Some(start) = &removal.restarted_round {
            self.send_each(game, |p| {
                RpcMessage::OnWhiteCardPlayPhase(OnWhiteCardPlayPhase::for_player(start, p))
            })
            .await?;
        } else if let Some(judging) = &removal.judging {
            self.send_each(game, |p| {
                RpcMessage::OnCzarJudgingPhase(OnCzarJudgingPhase::for_player(judging, p))
            })
            .await?;
        }

        if removal.players_left == 0 {
            self.remove_game(game).await;
        }
        Ok(removal)
    }
}
