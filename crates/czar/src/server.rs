//! `CzarServer` builder, shared context and the accept loop.
//!
//! This is the entry point for running a czar server. It ties the layers
//! together: transport → protocol → connection manager → repository.

use std::borrow::Cow;
use std::sync::Arc;

use czar_game::{CardCatalog, GameId, GameInfo, GameSettings, PlayerId, PlayerRemoval};
use czar_repo::{Authenticator, GameRepository};
use czar_transport::{Connection, Transport, WebSocketConnection, WebSocketTransport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::{MetricEvent, Metrics, MetricsSink};
use crate::{ConnectionManager, CzarError, ServerConfig};

/// What a client needs to open its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTicket {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub token: String,
}

/// Identity carried in the upgrade request's query string:
/// `?gameId=...&playerId=...&token=...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub token: String,
}

impl ConnectParams {
    /// Parses a request target such as `/ws?gameId=..&playerId=..&token=..`.
    /// Values may be percent-encoded.
    pub fn parse(target: &str) -> Result<Self, CzarError> {
        let query = target
            .split_once('?')
            .map(|(_, q)| q)
            .ok_or_else(|| CzarError::BadRequest("missing query string".into()))?;

        let (mut game_id, mut player_id, mut token) = (None, None, None);
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "gameId" => game_id = Some(value),
                "playerId" => player_id = Some(value),
                "token" => token = Some(value),
                _ => {}
            }
        }

        let game = required(game_id, "gameId")?;
        let player = required(player_id, "playerId")?;
        Ok(Self {
            game_id: game
                .parse()
                .map_err(|_| CzarError::BadRequest(format!("bad gameId {game:?}")))?,
            player_id: player
                .parse()
                .map_err(|_| CzarError::BadRequest(format!("bad playerId {player:?}")))?,
            token: required(token, "token")?,
        })
    }
}

fn required(value: Option<Cow<'_, str>>, name: &str) -> Result<String, CzarError> {
    value
        .filter(|v| !v.is_empty())
        .map(Cow::into_owned)
        .ok_or_else(|| CzarError::BadRequest(format!("missing {name}")))
}

/// Everything the server shares between tasks, built once at startup.
pub struct ServerContext<C: Connection, A: Authenticator> {
    repo: Arc<GameRepository>,
    connections: Arc<ConnectionManager<C>>,
    auth: A,
    metrics: Arc<Metrics>,
    config: ServerConfig,
}

impl<C: Connection, A: Authenticator> ServerContext<C, A> {
    pub fn new(catalog: Arc<CardCatalog>, auth: A, config: ServerConfig) -> Self {
        let repo = Arc::new(GameRepository::new(catalog, config.eviction));
        let metrics = Arc::new(Metrics::new());
        let sink: Arc<dyn MetricsSink> = metrics.clone();
        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&repo),
            sink,
            config.heartbeat,
            config.winner_display,
        ));
        Self {
            repo,
            connections,
            auth,
            metrics,
            config,
        }
    }

    pub fn repository(&self) -> &Arc<GameRepository> {
        &self.repo
    }

    pub fn connections(&self) -> &Arc<ConnectionManager<C>> {
        &self.connections
    }

    pub fn auth(&self) -> &A {
        &self.auth
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Creates a game and issues its owner's token.
    pub fn create_game(
        &self,
        settings: GameSettings,
        owner_name: &str,
    ) -> Result<JoinTicket, CzarError> {
        let (game_id, player_id) = self.repo.create(settings, owner_name)?;
        let token = self.auth.issue_token(game_id, player_id);
        Ok(JoinTicket {
            game_id,
            player_id,
            token,
        })
    }

    /// Adds a player to a game, announces it and issues the player's token.
    pub async fn create_player(
        &self,
        game_id: GameId,
        name: &str,
        password: &str,
    ) -> Result<JoinTicket, CzarError> {
        let player_id = self
            .connections
            .create_player(game_id, name, password)
            .await?;
        let token = self.auth.issue_token(game_id, player_id);
        Ok(JoinTicket {
            game_id,
            player_id,
            token,
        })
    }

    /// Removes a player, notifies the game and revokes the player's token.
    pub async fn leave_game(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        reason: &str,
    ) -> Result<PlayerRemoval, CzarError> {
        let removal = self
            .connections
            .remove_player(game_id, player_id, reason)
            .await?;
        self.auth.revoke(game_id, player_id);
        if removal.players_left == 0 {
            self.auth.revoke_game(game_id);
        }
        Ok(removal)
    }

    /// Verifies the identity and registers the connection. A refused
    /// connection is closed.
    pub async fn admit(
        &self,
        params: ConnectParams,
        conn: C,
    ) -> Result<JoinHandle<()>, CzarError> {
        let ConnectParams {
            game_id,
            player_id,
            token,
        } = params;
        if let Err(e) = self.auth.verify_token(game_id, player_id, &token).await {
            self.reject(&conn, &e).await;
            return Err(e.into());
        }
        // The password was checked when the player was created.
        if let Err(e) = self.repo.player_name(game_id, player_id) {
            self.reject(&conn, &e).await;
            return Err(e.into());
        }
        self.connections.register(game_id, player_id, conn).await
    }

    async fn reject(&self, conn: &C, error: &(dyn std::error::Error + Send + Sync)) {
        self.metrics.record(MetricEvent::ConnectionRejected);
        tracing::warn!(conn_id = %conn.id(), error = %error, "connection rejected");
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "close after rejection failed");
        }
    }

    /// Evicts every game idle past its threshold at `now`, closing its
    /// connections and revoking its tokens.
    pub async fn sweep(&self, now: std::time::Instant) -> Vec<GameId> {
        let expired = self.repo.end_old_games_at(now);
        for &game_id in &expired {
            self.metrics.record(MetricEvent::GameEvicted);
            let closed = self.connections.remove_game(game_id).await;
            self.auth.revoke_game(game_id);
            tracing::debug!(%game_id, connections = closed, "evicted game torn down");
        }
        expired
    }

    /// Every live game, for the lobby listing.
    pub fn games(&self) -> Vec<GameInfo> {
        self.repo.games()
    }

    /// The counters plus repository aggregates, one `name value` per line.
    pub fn render_metrics(&self) -> String {
        self.metrics.render(&self.repo.metrics())
    }

    /// Runs [`sweep`](Self::sweep) every `sweep_interval` until `shutdown`.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let context = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(context.config.sweep_interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        context.sweep(std::time::Instant::now()).await;
                    }
                }
            }
            tracing::debug!("sweeper stopped");
        })
    }
}

/// Builder for configuring and starting a czar server.
///
/// # Example
///
/// ```rust,ignore
/// use czar::prelude::*;
///
/// let server = CzarServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(TokenRegistry::new())
///     .await?;
/// server.run().await
/// ```
pub struct CzarServerBuilder {
    config: ServerConfig,
    catalog: Option<Arc<CardCatalog>>,
}

impl CzarServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            catalog: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the card catalog. Defaults to the built-in packs.
    pub fn catalog(mut self, catalog: Arc<CardCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Binds the WebSocket transport and builds the shared context.
    pub async fn build<A: Authenticator>(self, auth: A) -> Result<CzarServer<A>, CzarError> {
        self.config.validate()?;
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => Arc::new(CardCatalog::builtin().map_err(czar_game::GameError::from)?),
        };
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        let context = Arc::new(ServerContext::new(catalog, auth, self.config));
        Ok(CzarServer {
            transport,
            context,
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for CzarServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound czar server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct CzarServer<A: Authenticator> {
    transport: WebSocketTransport,
    context: Arc<ServerContext<WebSocketConnection, A>>,
    shutdown: CancellationToken,
}

impl<A: Authenticator> CzarServer<A> {
    /// Creates a new builder.
    pub fn builder() -> CzarServerBuilder {
        CzarServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, CzarError> {
        Ok(self.transport.local_addr()?)
    }

    /// The shared context, for the HTTP surface and tests.
    pub fn context(&self) -> &Arc<ServerContext<WebSocketConnection, A>> {
        &self.context
    }

    /// Cancelling this token stops [`run`](Self::run).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the accept loop and the eviction sweep until shutdown.
    ///
    /// Each accepted connection is admitted on its own task.
    pub async fn run(mut self) -> Result<(), CzarError> {
        tracing::info!(addr = %self.context.config().bind_addr, "czar server running");
        let sweeper = self.context.spawn_sweeper(self.shutdown.clone());

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let context = Arc::clone(&self.context);
                        tokio::spawn(admit_upgrade(context, conn));
                    }
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
            }
        }

        tracing::info!("czar server shutting down");
        if let Err(e) = sweeper.await {
            tracing::debug!(error = %e, "sweeper task failed");
        }
        self.context.connections().shutdown().await;
        self.transport.shutdown().await?;
        Ok(())
    }
}

async fn admit_upgrade<A: Authenticator>(
    context: Arc<ServerContext<WebSocketConnection, A>>,
    conn: WebSocketConnection,
) {
    let params = match ConnectParams::parse(conn.request_target()) {
        Ok(params) => params,
        Err(e) => {
            context.reject(&conn, &e).await;
            return;
        }
    };
    let (game_id, player_id) = (params.game_id, params.player_id);
    if let Err(e) = context.admit(params, conn).await {
        tracing::debug!(%game_id, %player_id, error = %e, "admission failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_query_ok() {
        let (game, player) = (GameId::new(), PlayerId::new());
        let target = format!("/ws?gameId={game}&playerId={player}&token=abc123");
        let params = ConnectParams::parse(&target).unwrap();
        assert_eq!(params.game_id, game);
        assert_eq!(params.player_id, player);
        assert_eq!(params.token, "abc123");
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let (game, player) = (GameId::new(), PlayerId::new());
        let target = format!("/?v=2&token=t&playerId={player}&gameId={game}&x");
        assert!(ConnectParams::parse(&target).is_ok());
    }

    #[test]
    fn test_parse_percent_encoded_values_decoded() {
        let (game, player) = (GameId::new(), PlayerId::new());
        let encoded = game.to_string().replace('-', "%2D");
        let target = format!("/ws?gameId={encoded}&playerId={player}&token=a%2Bb%20c");
        let params = ConnectParams::parse(&target).unwrap();
        assert_eq!(params.game_id, game);
        assert_eq!(params.token, "a+b c");
    }

    #[test]
    fn test_parse_missing_query_fails() {
        assert!(matches!(
            ConnectParams::parse("/ws"),
            Err(CzarError::BadRequest(_))
        ));
    }

    #[test]
    fn test_parse_missing_token_fails() {
        let target = format!("/ws?gameId={}&playerId={}", GameId::new(), PlayerId::new());
        let err = ConnectParams::parse(&target).unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn test_parse_bad_uuid_fails() {
        let target = format!("/ws?gameId=nope&playerId={}&token=t", PlayerId::new());
        let err = ConnectParams::parse(&target).unwrap_err();
        assert!(err.to_string().contains("gameId"));
    }
}
