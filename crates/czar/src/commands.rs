//! Client commands and the notifications they trigger.

use std::sync::Arc;

use czar_game::{CardId, GameId, GameSettings, PlayerId, RoundAdvance};
use czar_protocol::{
    ChangeSettings, Command, OnCardPlayed, OnCzarJudgingPhase, OnGameEnd, OnWhiteCardPlayPhase,
    RpcMessage,
};
use czar_transport::Connection;
use tokio::time::Instant;

use crate::connection::LiveConnection;
use crate::{ConnectionManager, CzarError};

impl<C: Connection> ConnectionManager<C> {
    pub(crate) async fn handle_command(
        self: &Arc<Self>,
        game: GameId,
        player: PlayerId,
        live: &LiveConnection<C>,
        command: Command,
    ) -> Result<(), CzarError> {
        tracing::trace!(game_id = %game, player_id = %player, kind = ?command.kind(), "command");
        match command {
            Command::Ping => {
                live.beat(Instant::now());
                Ok(())
            }
            Command::ChangeSettings(settings) => self.change_settings(game, player, settings).await,
            Command::StartGame => self.start_game(game, player).await,
            Command::PlayCards(cards) => self.play_cards(game, player, &cards).await,
            Command::CzarSelectCard(cards) => self.czar_select(game, player, &cards).await,
        }
    }

    /// Owner only. Everyone gets the new settings.
    pub async fn change_settings(
        &self,
        game: GameId,
        player: PlayerId,
        settings: GameSettings,
    ) -> Result<(), CzarError> {
        let _turn = self.turn(game).await;
        let applied = settings.clone();
        self.repository().with_game(game, |g| {
            g.ensure_owner(player)?;
            g.change_settings(applied)
        })?;
        tracing::info!(game_id = %game, "settings changed");
        self.broadcast(game, &RpcMessage::ChangeSettings(ChangeSettings { settings }))
            .await
    }

    /// Owner only. Each player gets the opening round with their hand.
    pub async fn start_game(&self, game: GameId, player: PlayerId) -> Result<(), CzarError> {
        let _turn = self.turn(game).await;
        let start = self.repository().with_game(game, |g| {
            g.ensure_owner(player)?;
            g.start_game()
        })?;
        tracing::info!(
            game_id = %game,
            czar_id = %start.card_czar_id,
            black_card = %start.black_card.id,
            "game started",
        );
        self.send_each(game, |p| {
            RpcMessage::OnWhiteCardPlayPhase(OnWhiteCardPlayPhase::for_player(&start, p))
        })
        .await
    }

    /// Announces the play; the last one in opens judging for everyone.
    pub async fn play_cards(
        &self,
        game: GameId,
        player: PlayerId,
        cards: &[CardId],
    ) -> Result<(), CzarError> {
        let _turn = self.turn(game).await;
        let result = self.repository().play_cards(game, player, cards)?;
        let played = RpcMessage::OnCardPlayed(OnCardPlayed { player_id: player });
        self.broadcast(game, &played).await?;

        if let Some(judging) = result.judging {
            tracing::debug!(game_id = %game, plays = judging.plays.len(), "judging started");
            self.send_each(game, |p| {
                RpcMessage::OnCzarJudgingPhase(OnCzarJudgingPhase::for_player(&judging, p))
            })
            .await?;
        }
        Ok(())
    }

    /// Announces the winner and schedules the next round after the
    /// display delay.
    pub async fn czar_select(
        self: &Arc<Self>,
        game: GameId,
        czar: PlayerId,
        cards: &[CardId],
    ) -> Result<(), CzarError> {
        let _turn = self.turn(game).await;
        let winner = self.repository().czar_select(game, czar, cards)?;
        tracing::info!(
            game_id = %game,
            winner_id = %winner.winner_id,
            points = winner.points,
            "round won",
        );
        self.broadcast(game, &RpcMessage::OnRoundWinner(winner)).await?;

        let manager = Arc::clone(self);
        let delay = self.winner_display;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = manager.advance_round(game).await {
                tracing::debug!(game_id = %game, error = %e, "round advance skipped");
            }
        });
        Ok(())
    }

    /// Moves past the winner display: a fresh round or the final standings.
    pub async fn advance_round(&self, game: GameId) -> Result<(), CzarError> {
        let _turn = self.turn(game).await;
        match self.repository().advance_round(game)? {
            RoundAdvance::NextRound(start) => {
                tracing::debug!(game_id = %game, round = start.round_number, "next round");
                self.send_each(game, |p| {
                    RpcMessage::OnWhiteCardPlayPhase(OnWhiteCardPlayPhase::for_player(&start, p))
                })
                .await
            }
            RoundAdvance::GameOver(standings) => {
                tracing::info!(game_id = %game, "game over");
                self.broadcast(game, &RpcMessage::OnGameEnd(OnGameEnd { standings }))
                    .await
            }
        }
    }
}
