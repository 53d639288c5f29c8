//! End-to-end tests over a real WebSocket.

use std::sync::Arc;
use std::time::Duration;

use czar::prelude::*;
use czar_protocol::StartGame;
use czar_transport::WebSocketConnection;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

type Ctx = Arc<ServerContext<WebSocketConnection, TokenRegistry>>;

struct Running {
    addr: String,
    context: Ctx,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<Result<(), CzarError>>,
}

/// Starts a server on a random port.
async fn start_server() -> Running {
    let server = CzarServer::<TokenRegistry>::builder()
        .bind("127.0.0.1:0")
        .build(TokenRegistry::new())
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let context = Arc::clone(server.context());
    let shutdown = server.shutdown_token();
    let server = tokio::spawn(server.run());

    Running {
        addr,
        context,
        shutdown,
        server,
    }
}

async fn connect(addr: &str, ticket: &JoinTicket) -> ClientWs {
    let url = format!(
        "ws://{addr}/ws?gameId={}&playerId={}&token={}",
        ticket.game_id, ticket.player_id, ticket.token
    );
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("should connect");
    ws
}

/// Next server message, skipping pings and control frames.
async fn next_message(ws: &mut ClientWs) -> RpcMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("read failed");
        let bytes = match frame {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(bytes) => bytes.to_vec(),
            _ => continue,
        };
        let msg = decode(&bytes).expect("valid envelope");
        if !matches!(msg, RpcMessage::Ping(_)) {
            return msg;
        }
    }
}

async fn send(ws: &mut ClientWs, msg: &RpcMessage) {
    let text = String::from_utf8(encode(msg).unwrap()).unwrap();
    ws.send(Message::Text(text.into())).await.expect("send");
}

/// True once the server closes the socket.
async fn closed_by_server(ws: &mut ClientWs) -> bool {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
            Err(_) => return false,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_connect_with_valid_token_receives_state() {
    let running = start_server().await;
    let dave = running
        .context
        .create_game(GameSettings::default(), "Dave")
        .unwrap();
    let mut ws = connect(&running.addr, &dave).await;

    match next_message(&mut ws).await {
        RpcMessage::OnJoin(join) => {
            assert_eq!(join.state.id, dave.game_id);
            assert_eq!(join.state.game_owner_id, dave.player_id);
            assert_eq!(join.state.game_state, GameState::Lobby);
        }
        other => panic!("expected OnJoin, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_player_announced_to_first() {
    let running = start_server().await;
    let ctx = &running.context;
    let dave = ctx.create_game(GameSettings::default(), "Dave").unwrap();
    let mut first = connect(&running.addr, &dave).await;
    next_message(&mut first).await;

    let bob = ctx.create_player(dave.game_id, "Bob", "").await.unwrap();
    match next_message(&mut first).await {
        RpcMessage::OnPlayerCreate(created) => assert_eq!(created.name, "Bob"),
        other => panic!("expected OnPlayerCreate, got {other:?}"),
    }

    let mut second = connect(&running.addr, &bob).await;
    assert!(matches!(next_message(&mut second).await, RpcMessage::OnJoin(_)));
    match next_message(&mut first).await {
        RpcMessage::OnPlayerJoin(join) => assert_eq!(join.id, bob.player_id),
        other => panic!("expected OnPlayerJoin, got {other:?}"),
    }
}

#[tokio::test]
async fn test_start_with_two_players_returns_command_error() {
    let running = start_server().await;
    let ctx = &running.context;
    let dave = ctx.create_game(GameSettings::default(), "Dave").unwrap();
    ctx.create_player(dave.game_id, "Bob", "").await.unwrap();
    let mut ws = connect(&running.addr, &dave).await;
    next_message(&mut ws).await;

    send(&mut ws, &RpcMessage::StartGame(StartGame {})).await;
    match next_message(&mut ws).await {
        RpcMessage::CommandError(e) => assert!(e.reason.contains("not enough players")),
        other => panic!("expected CommandError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bad_token_closes_connection() {
    let running = start_server().await;
    let mut dave = running
        .context
        .create_game(GameSettings::default(), "Dave")
        .unwrap();
    dave.token = "forged".into();

    let mut ws = connect(&running.addr, &dave).await;
    assert!(closed_by_server(&mut ws).await);
    assert_eq!(
        running.context.metrics().get(MetricEvent::ConnectionRejected),
        1
    );
}

#[tokio::test]
async fn test_missing_query_closes_connection() {
    let running = start_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", running.addr))
        .await
        .expect("should connect");
    assert!(closed_by_server(&mut ws).await);
}

#[tokio::test]
async fn test_shutdown_stops_run_and_closes_clients() {
    let running = start_server().await;
    let dave = running
        .context
        .create_game(GameSettings::default(), "Dave")
        .unwrap();
    let mut ws = connect(&running.addr, &dave).await;
    next_message(&mut ws).await;

    running.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), running.server)
        .await
        .expect("run should return")
        .expect("task should not panic");
    assert!(result.is_ok());
    assert!(closed_by_server(&mut ws).await);
}
