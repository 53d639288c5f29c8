//! Connection manager and command flow over the in-memory transport.
//!
//! Every test runs with paused time, so heartbeat and display delays
//! elapse instantly once the runtime is idle.

use std::sync::Arc;
use std::time::Duration;

use czar::prelude::*;
use czar_game::{DEFAULT_PACK_ID, WhiteCard};
use czar_protocol::{CzarSelectCard, PlayCards, StartGame};
use tokio::task::JoinHandle;

type Ctx = ServerContext<MemoryConnection, TokenRegistry>;

struct Client {
    id: PlayerId,
    peer: MemoryPeer,
    _task: JoinHandle<()>,
}

impl Client {
    /// Next non-ping message.
    async fn recv(&mut self) -> RpcMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(1), self.peer.recv())
                .await
                .expect("timed out waiting for a message")
                .expect("connection dropped");
            let msg = decode(&frame).expect("server sent a valid envelope");
            if !matches!(msg, RpcMessage::Ping(_)) {
                return msg;
            }
        }
    }

    /// Every queued non-ping message.
    fn drain(&mut self) -> Vec<RpcMessage> {
        self.peer
            .drain()
            .iter()
            .map(|f| decode(f).unwrap())
            .filter(|m| !matches!(m, RpcMessage::Ping(_)))
            .collect()
    }

    fn send(&self, msg: &RpcMessage) {
        self.peer.send(encode(msg).unwrap()).unwrap();
    }

    fn send_raw(&self, raw: &str) {
        self.peer.send(raw.as_bytes()).unwrap();
    }
}

fn context() -> Arc<Ctx> {
    let catalog = Arc::new(CardCatalog::builtin().unwrap());
    let config = ServerConfig::default().winner_display(Duration::from_secs(1));
    Arc::new(ServerContext::new(catalog, TokenRegistry::new(), config))
}

fn params(ticket: &JoinTicket) -> ConnectParams {
    ConnectParams {
        game_id: ticket.game_id,
        player_id: ticket.player_id,
        token: ticket.token.clone(),
    }
}

async fn connect(ctx: &Ctx, ticket: &JoinTicket) -> Client {
    let (conn, peer) = MemoryConnection::pair();
    let task = ctx.admit(params(ticket), conn).await.unwrap();
    let mut client = Client {
        id: ticket.player_id,
        peer,
        _task: task,
    };
    match client.recv().await {
        RpcMessage::OnJoin(join) => assert_eq!(join.state.id, ticket.game_id),
        other => panic!("expected OnJoin, got {other:?}"),
    }
    client
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// A lobby with Dave (owner), Bob and Eve all connected, queues drained.
async fn lobby(ctx: &Ctx) -> (GameId, Vec<Client>) {
    let dave = ctx.create_game(GameSettings::default(), "Dave").unwrap();
    let game = dave.game_id;
    let bob = ctx.create_player(game, "Bob", "").await.unwrap();
    let eve = ctx.create_player(game, "Eve", "").await.unwrap();

    let mut clients = Vec::new();
    for ticket in [&dave, &bob, &eve] {
        clients.push(connect(ctx, ticket).await);
    }
    settle().await;
    for client in &mut clients {
        client.drain();
    }
    (game, clients)
}

fn hand_ids(hand: &[WhiteCard], n: usize) -> Vec<CardId> {
    hand.iter().take(n).map(|c| c.id).collect()
}

#[tokio::test(start_paused = true)]
async fn test_register_announces_to_peers_and_sends_state() {
    let ctx = context();
    let dave = ctx.create_game(GameSettings::default(), "Dave").unwrap();
    let bob = ctx.create_player(dave.game_id, "Bob", "").await.unwrap();

    let mut first = connect(&ctx, &dave).await;
    let second = connect(&ctx, &bob).await;

    match first.recv().await {
        RpcMessage::OnPlayerJoin(join) => {
            assert_eq!(join.id, second.id);
            assert_eq!(join.name, "Bob");
        }
        other => panic!("expected OnPlayerJoin, got {other:?}"),
    }
    assert!(ctx.connections().is_registered(dave.game_id, dave.player_id));
    assert_eq!(ctx.connections().registered_players(dave.game_id).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_register_lobby_sends_no_round_information() {
    let ctx = context();
    let dave = ctx.create_game(GameSettings::default(), "Dave").unwrap();
    let mut client = connect(&ctx, &dave).await;
    settle().await;
    assert!(client.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_register_replaces_existing_connection() {
    let ctx = context();
    let dave = ctx.create_game(GameSettings::default(), "Dave").unwrap();
    let bob = ctx.create_player(dave.game_id, "Bob", "").await.unwrap();
    let mut watcher = connect(&ctx, &bob).await;

    let old = connect(&ctx, &dave).await;
    let _new = connect(&ctx, &dave).await;
    settle().await;

    assert!(old.peer.is_closed());
    assert!(ctx.connections().is_registered(dave.game_id, dave.player_id));
    assert_eq!(ctx.connections().connection_count(), 2);

    // The replacement is announced as a join, never as a disconnect.
    let seen = watcher.drain();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|m| matches!(m, RpcMessage::OnPlayerJoin(_))));
}

#[tokio::test(start_paused = true)]
async fn test_admit_wrong_token_rejected_and_closed() {
    let ctx = context();
    let dave = ctx.create_game(GameSettings::default(), "Dave").unwrap();
    let (conn, peer) = MemoryConnection::pair();
    let mut forged = params(&dave);
    forged.token = "0".repeat(32);

    let err = ctx.admit(forged, conn).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert!(peer.is_closed());
    assert!(!ctx.connections().is_registered(dave.game_id, dave.player_id));
    assert_eq!(ctx.metrics().get(MetricEvent::ConnectionRejected), 1);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_silent_connection_closed_and_skipped() {
    let ctx = context();
    let dave = ctx.create_game(GameSettings::default(), "Dave").unwrap();
    let game = dave.game_id;
    let mut client = connect(&ctx, &dave).await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    let frames = client.peer.drain();
    assert!(
        frames
            .iter()
            .any(|f| matches!(decode(f), Ok(RpcMessage::Ping(_))))
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(client.peer.is_closed());
    assert!(!ctx.connections().is_registered(game, dave.player_id));
    assert_eq!(ctx.metrics().get(MetricEvent::HeartbeatTimeout), 1);
    // The player is disconnected, not removed.
    assert_eq!(ctx.repository().info(game).unwrap().player_count, 1);

    let sent = ctx.metrics().get(MetricEvent::MessageSent);
    ctx.connections()
        .broadcast(game, &RpcMessage::ping())
        .await
        .unwrap();
    assert_eq!(ctx.metrics().get(MetricEvent::MessageSent), sent);
    assert_eq!(ctx.metrics().get(MetricEvent::SendFailed), 0);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_answered_pings_keep_connection() {
    let ctx = context();
    let dave = ctx.create_game(GameSettings::default(), "Dave").unwrap();
    let client = connect(&ctx, &dave).await;

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(3)).await;
        client.send(&RpcMessage::ping());
    }
    settle().await;
    assert!(!client.peer.is_closed());
    assert!(ctx.connections().is_registered(dave.game_id, dave.player_id));
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_failed_send_drops_only_that_player() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;
    let broken = clients[1].id;
    clients[1].peer.fail_sends(true);

    ctx.connections()
        .broadcast(game, &RpcMessage::command_error("hello"))
        .await
        .unwrap();
    settle().await;

    assert!(!ctx.connections().is_registered(game, broken));
    assert_eq!(ctx.connections().registered_players(game).len(), 2);
    for i in [0, 2] {
        let seen = clients[i].drain();
        assert!(matches!(&seen[0], RpcMessage::CommandError(e) if e.reason == "hello"));
        assert!(matches!(&seen[1], RpcMessage::OnPlayerDisconnect(d) if d.id == broken));
    }
    assert_eq!(ctx.metrics().get(MetricEvent::SendFailed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_client_hang_up_marks_player_disconnected() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;
    let gone = clients[2].id;
    clients[2].peer.hang_up();
    settle().await;

    assert!(!ctx.connections().is_registered(game, gone));
    let state = ctx.repository().state_info(game, gone).unwrap();
    let player = state.players.iter().find(|p| p.id == gone).unwrap();
    assert!(!player.connected);
    assert!(matches!(clients[0].recv().await, RpcMessage::OnPlayerDisconnect(d) if d.id == gone));
}

#[tokio::test(start_paused = true)]
async fn test_start_game_by_non_owner_rejected_for_sender_only() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;

    clients[1].send(&RpcMessage::StartGame(StartGame {}));
    match clients[1].recv().await {
        RpcMessage::CommandError(e) => assert!(!e.reason.is_empty()),
        other => panic!("expected CommandError, got {other:?}"),
    }
    settle().await;
    assert!(clients[0].drain().is_empty());
    assert!(clients[2].drain().is_empty());
    assert_eq!(ctx.repository().info(game).unwrap().game_state, GameState::Lobby);
    assert_eq!(ctx.metrics().get(MetricEvent::CommandRejected), 1);
}

#[tokio::test(start_paused = true)]
async fn test_change_settings_broadcast_to_everyone() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;
    let settings = GameSettings {
        max_rounds: 5,
        playing_to_points: 3,
        card_packs: vec![DEFAULT_PACK_ID],
        ..GameSettings::default()
    };

    clients[0].send(&RpcMessage::ChangeSettings(czar_protocol::ChangeSettings {
        settings: settings.clone(),
    }));
    for client in &mut clients {
        match client.recv().await {
            RpcMessage::ChangeSettings(change) => assert_eq!(change.settings, settings),
            other => panic!("expected ChangeSettings, got {other:?}"),
        }
    }
    assert_eq!(ctx.repository().get(game).unwrap().lock().settings(), &settings);
}

#[tokio::test(start_paused = true)]
async fn test_full_round_over_the_wire() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;

    clients[0].send(&RpcMessage::StartGame(StartGame {}));
    let mut phases = Vec::new();
    for client in &mut clients {
        match client.recv().await {
            RpcMessage::OnWhiteCardPlayPhase(phase) => {
                assert_eq!(phase.your_hand.len(), 7);
                assert_eq!(phase.round_number, 1);
                phases.push(phase);
            }
            other => panic!("expected OnWhiteCardPlayPhase, got {other:?}"),
        }
    }
    let czar = phases[0].card_czar_id;
    let pick = phases[0].black_card.cards_to_play as usize;

    let players: Vec<usize> = (0..3).filter(|&i| clients[i].id != czar).collect();
    for &i in &players {
        let player = clients[i].id;
        let cards = hand_ids(&phases[i].your_hand, pick);
        clients[i].send(&RpcMessage::PlayCards(PlayCards { card_ids: cards }));
        for client in &mut clients {
            match client.recv().await {
                RpcMessage::OnCardPlayed(played) => assert_eq!(played.player_id, player),
                other => panic!("expected OnCardPlayed, got {other:?}"),
            }
        }
    }

    let mut all_plays = None;
    for client in &mut clients {
        match client.recv().await {
            RpcMessage::OnCzarJudgingPhase(judging) => {
                assert_eq!(judging.all_plays.len(), 2);
                assert_eq!(judging.new_hand.len(), 7);
                all_plays = Some(judging.all_plays);
            }
            other => panic!("expected OnCzarJudgingPhase, got {other:?}"),
        }
    }
    assert_eq!(
        ctx.repository().info(game).unwrap().game_state,
        GameState::CzarJudgingCards
    );

    let winning: Vec<CardId> = all_plays.unwrap()[0].iter().map(|c| c.id).collect();
    let czar_index = (0..3).find(|&i| clients[i].id == czar).unwrap();
    clients[czar_index].send(&RpcMessage::CzarSelectCard(CzarSelectCard { cards: winning }));
    for client in &mut clients {
        match client.recv().await {
            RpcMessage::OnRoundWinner(winner) => assert_eq!(winner.points, 1),
            other => panic!("expected OnRoundWinner, got {other:?}"),
        }
    }

    tokio::time::sleep(Duration::from_millis(1100)).await;
    for client in &mut clients {
        match client.recv().await {
            RpcMessage::OnWhiteCardPlayPhase(phase) => {
                assert_eq!(phase.round_number, 2);
                assert_ne!(phase.card_czar_id, czar);
            }
            other => panic!("expected OnWhiteCardPlayPhase, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_play_cards_waits_for_earlier_delivery_and_stays_in_order() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;
    let mallory = ctx.create_player(game, "Mallory", "").await.unwrap();
    clients.push(connect(&ctx, &mallory).await);
    settle().await;
    for client in &mut clients {
        client.drain();
    }

    clients[0].send(&RpcMessage::StartGame(StartGame {}));
    let mut phases = Vec::new();
    for client in &mut clients {
        match client.recv().await {
            RpcMessage::OnWhiteCardPlayPhase(phase) => phases.push(phase),
            other => panic!("expected OnWhiteCardPlayPhase, got {other:?}"),
        }
    }
    assert_eq!(phases[0].card_czar_id, clients[0].id);
    let pick = phases[0].black_card.cards_to_play as usize;
    let play = |i: usize| {
        RpcMessage::PlayCards(PlayCards {
            card_ids: hand_ids(&phases[i].your_hand, pick),
        })
    };
    let (bob, eve) = (clients[1].id, clients[2].id);

    clients[2].send(&play(2));
    for client in &mut clients {
        assert!(matches!(client.recv().await, RpcMessage::OnCardPlayed(p) if p.player_id == eve));
    }

    // Eve stops reading: Bob's announcement cannot finish reaching her.
    clients[2].peer.stall_sends(true);
    clients[1].send(&play(1));
    settle().await;
    clients[3].send(&play(3));
    settle().await;

    let mallory_played = ctx
        .repository()
        .read_game(game, |g| g.player(mallory.player_id).unwrap().has_played())
        .unwrap();
    assert!(!mallory_played, "a later play must wait for the earlier delivery");
    let seen = clients[0].drain();
    assert_eq!(seen.len(), 1);
    assert!(matches!(&seen[0], RpcMessage::OnCardPlayed(p) if p.player_id == bob));

    clients[2].peer.stall_sends(false);
    settle().await;
    let seen = clients[2].drain();
    assert_eq!(seen.len(), 3, "got {seen:?}");
    assert!(matches!(&seen[0], RpcMessage::OnCardPlayed(p) if p.player_id == bob));
    assert!(matches!(&seen[1], RpcMessage::OnCardPlayed(p) if p.player_id == mallory.player_id));
    assert!(matches!(&seen[2], RpcMessage::OnCzarJudgingPhase(j) if j.all_plays.len() == 3));
    let seen = clients[0].drain();
    assert!(matches!(&seen[0], RpcMessage::OnCardPlayed(p) if p.player_id == mallory.player_id));
    assert!(matches!(&seen[1], RpcMessage::OnCzarJudgingPhase(_)));
}

#[tokio::test(start_paused = true)]
async fn test_czar_play_rejected_with_command_error() {
    let ctx = context();
    let (_game, mut clients) = lobby(&ctx).await;
    clients[0].send(&RpcMessage::StartGame(StartGame {}));
    let mut czar = None;
    let mut hands = Vec::new();
    for client in &mut clients {
        if let RpcMessage::OnWhiteCardPlayPhase(phase) = client.recv().await {
            czar = Some(phase.card_czar_id);
            hands.push(phase.your_hand);
        }
    }
    let czar = czar.unwrap();
    let i = (0..3).find(|&i| clients[i].id == czar).unwrap();

    clients[i].send(&RpcMessage::PlayCards(PlayCards {
        card_ids: hand_ids(&hands[i], 1),
    }));
    assert!(matches!(clients[i].recv().await, RpcMessage::CommandError(_)));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_type_ignored_and_counted() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;

    clients[0].send_raw(r#"{"type":99,"data":{}}"#);
    clients[0].send_raw(r#"{"type":1,"data":{}}"#);
    settle().await;

    assert_eq!(ctx.metrics().get(MetricEvent::UnknownCommand), 2);
    assert!(clients[0].drain().is_empty());
    assert!(ctx.connections().is_registered(game, clients[0].id));
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_type_ignored_and_connection_kept() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;

    clients[1].send_raw(r#"{"type":300,"data":{}}"#);
    clients[1].send_raw(r#"{"type":-1}"#);
    settle().await;

    assert_eq!(ctx.metrics().get(MetricEvent::UnknownCommand), 2);
    assert!(!clients[1].peer.is_closed());
    assert!(ctx.connections().is_registered(game, clients[1].id));
    assert!(clients[0].drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payload_answered_with_command_error() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;

    clients[0].send_raw(r#"{"type":12,"data":{"cardIds":"seven"}}"#);
    assert!(matches!(clients[0].recv().await, RpcMessage::CommandError(_)));
    assert!(ctx.connections().is_registered(game, clients[0].id));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_frame_ends_connection() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;
    let gone = clients[1].id;

    clients[1].send_raw("definitely not json");
    settle().await;

    assert!(clients[1].peer.is_closed());
    assert!(!ctx.connections().is_registered(game, gone));
    assert!(matches!(clients[0].recv().await, RpcMessage::OnPlayerDisconnect(d) if d.id == gone));
    // Other connections and the game itself are untouched.
    assert_eq!(ctx.repository().info(game).unwrap().player_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_leave_owner_announces_leave_and_new_owner() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;
    let owner = clients[0].id;

    let removal = ctx.leave_game(game, owner, "quit").await.unwrap();
    let new_owner = removal.new_owner.unwrap();
    settle().await;

    assert!(clients[0].peer.is_closed());
    for client in &mut clients[1..] {
        let seen = client.drain();
        assert!(matches!(&seen[0], RpcMessage::OnPlayerLeave(l) if l.id == owner && l.reason == "quit"));
        assert!(matches!(&seen[1], RpcMessage::NewOwner(o) if o.id == new_owner));
    }
    assert!(ctx.auth().verify_token(game, owner, "anything").await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_leave_last_player_removes_game() {
    let ctx = context();
    let dave = ctx.create_game(GameSettings::default(), "Dave").unwrap();
    let client = connect(&ctx, &dave).await;

    ctx.leave_game(dave.game_id, dave.player_id, "done").await.unwrap();
    assert!(client.peer.is_closed());
    assert!(!ctx.repository().contains(dave.game_id));
    assert!(ctx.auth().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_join_mid_round_gets_round_information() {
    let ctx = context();
    let (game, mut clients) = lobby(&ctx).await;
    clients[0].send(&RpcMessage::StartGame(StartGame {}));
    for client in &mut clients {
        client.recv().await;
    }

    let late = ctx.create_player(game, "Zed", "").await.unwrap();
    let mut zed = connect(&ctx, &late).await;
    match zed.recv().await {
        RpcMessage::RoundInformation(round) => {
            assert_eq!(round.round_number, 1);
            assert_eq!(round.your_hand.len(), 7);
            assert!(round.your_plays.is_empty());
        }
        other => panic!("expected RoundInformation, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_sweep_evicts_abandoned_game_and_closes_connections() {
    let ctx = context();
    let (game, clients) = lobby(&ctx).await;
    let keep = ctx.create_game(GameSettings::default(), "Solo").unwrap();

    for client in &clients {
        ctx.connections().unregister(game, client.id).await;
    }
    let later = std::time::Instant::now() + Duration::from_secs(3);
    let evicted = ctx.sweep(later).await;

    assert_eq!(evicted, vec![game]);
    assert!(!ctx.repository().contains(game));
    assert!(ctx.repository().contains(keep.game_id));
    let listed: Vec<GameId> = ctx.games().iter().map(|g| g.id).collect();
    assert_eq!(listed, vec![keep.game_id]);
    assert_eq!(ctx.metrics().get(MetricEvent::GameEvicted), 1);
    assert!(ctx.render_metrics().contains("czar_games 1\n"));
}
