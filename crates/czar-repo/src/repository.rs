//! The registry of live games and its eviction sweep.
//!
//! # Locking
//!
//! Each game sits behind its own `Mutex`; the repository's `RwLock` only
//! guards the topology (the id → game map and the age index).
//!
//! - A game's lock may be held while taking the repository lock, which is
//!   how the age index is kept current after a mutation.
//! - The repository lock is never held while taking a game lock.
//! - No two game locks are ever held at once.
//!
//! # Age index
//!
//! One ordered set per [`AgeClass`], keyed by `(last_action, game_id)`.
//! The sweep walks each set from the oldest entry and stops at the first
//! one still inside its threshold, so a pass only touches games that are
//! actually expiring.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use czar_game::{
    AgeClass, CardCatalog, CardId, Game, GameError, GameId, GameInfo, GameSettings,
    GameStateInfo, PlayResult, PlayerId, PlayerRemoval, RoundAdvance, RoundStart, RoundWinner,
};
use parking_lot::{Mutex, RwLock};

use crate::{EvictionConfig, RepoError};

/// A game shared between the repository and its callers.
pub type SharedGame = Arc<Mutex<Game>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AgeKey {
    class: AgeClass,
    at: Instant,
}

impl AgeKey {
    fn of(game: &Game) -> Self {
        Self {
            class: game.age_class(),
            at: game.last_action(),
        }
    }
}

struct Entry {
    game: SharedGame,
    key: AgeKey,
}

#[derive(Default)]
struct Inner {
    games: HashMap<GameId, Entry>,
    ages: [BTreeSet<(Instant, GameId)>; 3],
}

impl Inner {
    fn insert(&mut self, id: GameId, game: SharedGame, key: AgeKey) {
        self.ages[key.class.index()].insert((key.at, id));
        self.games.insert(id, Entry { game, key });
    }

    fn remove(&mut self, id: GameId) -> Option<Entry> {
        let entry = self.games.remove(&id)?;
        self.ages[entry.key.class.index()].remove(&(entry.key.at, id));
        Some(entry)
    }

    fn reindex(&mut self, id: GameId, key: AgeKey) {
        let Some(entry) = self.games.get_mut(&id) else {
            return;
        };
        if entry.key == key {
            return;
        }
        self.ages[entry.key.class.index()].remove(&(entry.key.at, id));
        self.ages[key.class.index()].insert((key.at, id));
        entry.key = key;
    }
}

/// Aggregates across every registered game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepoMetrics {
    pub games: usize,
    pub players: usize,
    pub connected_players: usize,
}

/// Concurrent map of active games.
pub struct GameRepository {
    catalog: Arc<CardCatalog>,
    config: EvictionConfig,
    inner: RwLock<Inner>,
}

impl GameRepository {
    pub fn new(catalog: Arc<CardCatalog>, config: EvictionConfig) -> Self {
        Self {
            catalog,
            config,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn catalog(&self) -> &Arc<CardCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.inner.read().games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().games.is_empty()
    }

    /// Validates the settings and registers a new game with its owner.
    pub fn create(
        &self,
        settings: GameSettings,
        owner_name: impl Into<String>,
    ) -> Result<(GameId, PlayerId), RepoError> {
        let game = Game::new(Arc::clone(&self.catalog), settings, owner_name)?;
        let (id, owner) = (game.id(), game.owner_id());
        let key = AgeKey::of(&game);
        self.inner
            .write()
            .insert(id, Arc::new(Mutex::new(game)), key);
        tracing::info!(game_id = %id, owner_id = %owner, "game created");
        Ok((id, owner))
    }

    pub fn get(&self, id: GameId) -> Result<SharedGame, RepoError> {
        self.inner
            .read()
            .games
            .get(&id)
            .map(|e| Arc::clone(&e.game))
            .ok_or(RepoError::GameNotFound(id))
    }

    pub fn contains(&self, id: GameId) -> bool {
        self.inner.read().games.contains_key(&id)
    }

    /// Drops a game from the registry.
    pub fn remove(&self, id: GameId) -> Result<(), RepoError> {
        self.inner
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or(RepoError::GameNotFound(id))?;
        tracing::info!(game_id = %id, "game removed");
        Ok(())
    }

    /// Runs `f` under the game's lock, then re-indexes the game's age.
    pub fn with_game<R>(
        &self,
        id: GameId,
        f: impl FnOnce(&mut Game) -> Result<R, GameError>,
    ) -> Result<R, RepoError> {
        let game = self.get(id)?;
        let mut guard = game.lock();
        let result = f(&mut guard);
        let key = AgeKey::of(&guard);
        self.inner.write().reindex(id, key);
        drop(guard);
        Ok(result?)
    }

    /// Runs `f` under the game's lock without touching the age index.
    pub fn read_game<R>(&self, id: GameId, f: impl FnOnce(&Game) -> R) -> Result<R, RepoError> {
        let game = self.get(id)?;
        let guard = game.lock();
        Ok(f(&guard))
    }

    /// Checks that the player exists and the password matches. Creating
    /// the player is a separate, earlier step.
    pub fn join(&self, id: GameId, player: PlayerId, password: &str) -> Result<(), RepoError> {
        self.read_game(id, |game| {
            game.check_password(password)?;
            if !game.contains_player(player) {
                return Err(GameError::PlayerNotFound(player));
            }
            Ok(())
        })?
        .map_err(RepoError::from)
    }

    pub fn connect(&self, id: GameId, player: PlayerId) -> Result<(), RepoError> {
        self.with_game(id, |game| game.set_connected(player, true))
    }

    pub fn disconnect(&self, id: GameId, player: PlayerId) -> Result<(), RepoError> {
        self.with_game(id, |game| game.set_connected(player, false))
    }

    pub fn change_settings(&self, id: GameId, settings: GameSettings) -> Result<(), RepoError> {
        self.with_game(id, |game| game.change_settings(settings))
    }

    /// Password-gated `add_player`.
    pub fn create_player(
        &self,
        id: GameId,
        name: impl Into<String>,
        password: &str,
    ) -> Result<PlayerId, RepoError> {
        let name = name.into();
        let player = self.with_game(id, |game| {
            game.check_password(password)?;
            game.add_player(name)
        })?;
        tracing::debug!(game_id = %id, player_id = %player, "player created");
        Ok(player)
    }

    /// Removes the player and deletes the game once it is empty.
    pub fn leave(&self, id: GameId, player: PlayerId) -> Result<PlayerRemoval, RepoError> {
        let removal = self.with_game(id, |game| game.remove_player(player))?;
        tracing::debug!(
            game_id = %id,
            player_id = %player,
            players_left = removal.players_left,
            "player left",
        );
        if removal.players_left == 0 {
            // Someone else may have removed it in the meantime.
            let _ = self.remove(id);
        }
        Ok(removal)
    }

    pub fn start_game(&self, id: GameId) -> Result<RoundStart, RepoError> {
        self.with_game(id, Game::start_game)
    }

    pub fn play_cards(
        &self,
        id: GameId,
        player: PlayerId,
        cards: &[CardId],
    ) -> Result<PlayResult, RepoError> {
        self.with_game(id, |game| game.play_cards(player, cards))
    }

    pub fn czar_select(
        &self,
        id: GameId,
        czar: PlayerId,
        cards: &[CardId],
    ) -> Result<RoundWinner, RepoError> {
        self.with_game(id, |game| game.czar_select(czar, cards))
    }

    pub fn advance_round(&self, id: GameId) -> Result<RoundAdvance, RepoError> {
        self.with_game(id, Game::advance_round)
    }

    pub fn player_name(&self, id: GameId, player: PlayerId) -> Result<String, RepoError> {
        self.read_game(id, |game| {
            game.player(player)
                .map(|p| p.name().to_owned())
                .ok_or(GameError::PlayerNotFound(player))
        })?
        .map_err(RepoError::from)
    }

    pub fn state_info(&self, id: GameId, player: PlayerId) -> Result<GameStateInfo, RepoError> {
        self.read_game(id, |game| game.state_info(player))?
            .map_err(RepoError::from)
    }

    pub fn info(&self, id: GameId) -> Result<GameInfo, RepoError> {
        self.read_game(id, Game::info)
    }

    fn snapshot(&self) -> Vec<SharedGame> {
        self.inner
            .read()
            .games
            .values()
            .map(|e| Arc::clone(&e.game))
            .collect()
    }

    /// Lobby listing of every game.
    pub fn games(&self) -> Vec<GameInfo> {
        self.snapshot().iter().map(|g| g.lock().info()).collect()
    }

    pub fn metrics(&self) -> RepoMetrics {
        let games = self.snapshot();
        let mut metrics = RepoMetrics {
            games: games.len(),
            ..RepoMetrics::default()
        };
        for game in &games {
            let m = game.lock().metrics();
            metrics.players += m.player_count;
            metrics.connected_players += m.connected_count;
        }
        metrics
    }

    /// Removes every game idle for longer than its class allows at `now`
    /// and returns their ids.
    pub fn end_old_games_at(&self, now: Instant) -> Vec<GameId> {
        let mut inner = self.inner.write();
        let mut expired = Vec::new();
        for class in AgeClass::ALL {
            let max_age = self.config.max_age(class);
            while let Some(&(at, id)) = inner.ages[class.index()].first() {
                if now.saturating_duration_since(at) <= max_age {
                    break;
                }
                inner.remove(id);
                expired.push(id);
            }
        }
        drop(inner);

        for id in &expired {
            tracing::info!(game_id = %id, "evicted idle game");
        }
        expired
    }

    pub fn end_old_games(&self) -> Vec<GameId> {
        self.end_old_games_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use czar_game::{DEFAULT_PACK_ID, ErrorKind, GameState};

    use super::*;

    fn repo() -> GameRepository {
        let catalog = Arc::new(CardCatalog::builtin().unwrap());
        GameRepository::new(catalog, EvictionConfig::default())
    }

    fn settings_with_password(password: &str) -> GameSettings {
        GameSettings {
            game_password: password.into(),
            card_packs: vec![DEFAULT_PACK_ID],
            ..GameSettings::default()
        }
    }

    /// A game with three connected players.
    fn three_player_game(repo: &GameRepository) -> (GameId, [PlayerId; 3]) {
        let (id, owner) = repo.create(GameSettings::default(), "Dave").unwrap();
        let bob = repo.create_player(id, "Bob", "").unwrap();
        let eve = repo.create_player(id, "Eve", "").unwrap();
        (id, [owner, bob, eve])
    }

    fn index_len(repo: &GameRepository) -> usize {
        repo.inner.read().ages.iter().map(BTreeSet::len).sum()
    }

    #[test]
    fn test_create_registers_lobby_game_with_owner() {
        let repo = repo();
        let (id, owner) = repo.create(GameSettings::default(), "Dave").unwrap();
        let game = repo.get(id).unwrap();
        let game = game.lock();
        assert_eq!(game.state(), GameState::Lobby);
        assert_eq!(game.player_count(), 1);
        assert_eq!(game.owner_id(), owner);
        assert_eq!(index_len(&repo), 1);
    }

    #[test]
    fn test_create_invalid_settings_fails() {
        let repo = repo();
        let settings = GameSettings {
            max_rounds: 0,
            ..GameSettings::default()
        };
        let err = repo.create(settings, "Dave").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(repo.is_empty());
    }

    #[test]
    fn test_get_unknown_fails() {
        let repo = repo();
        assert!(matches!(
            repo.get(GameId::new()),
            Err(RepoError::GameNotFound(_))
        ));
    }

    #[test]
    fn test_remove_twice_fails_second_time() {
        let repo = repo();
        let (id, _) = repo.create(GameSettings::default(), "Dave").unwrap();
        repo.remove(id).unwrap();
        assert!(matches!(repo.remove(id), Err(RepoError::GameNotFound(_))));
        assert_eq!(index_len(&repo), 0);
    }

    #[test]
    fn test_join_checks_password_and_membership() {
        let repo = repo();
        let (id, owner) = repo.create(settings_with_password("pw"), "Dave").unwrap();
        repo.join(id, owner, "pw").unwrap();
        let err = repo.join(id, owner, "wrong").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        let err = repo.join(id, PlayerId::new(), "pw").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_create_player_wrong_password_fails() {
        let repo = repo();
        let (id, _) = repo.create(settings_with_password("pw"), "Dave").unwrap();
        assert!(repo.create_player(id, "Bob", "nope").is_err());
        assert!(repo.create_player(id, "Bob", "pw").is_ok());
        assert_eq!(repo.info(id).unwrap().player_count, 2);
    }

    #[test]
    fn test_leave_last_player_deletes_game() {
        let repo = repo();
        let (id, owner) = repo.create(GameSettings::default(), "Dave").unwrap();
        let removal = repo.leave(id, owner).unwrap();
        assert_eq!(removal.players_left, 0);
        assert!(!repo.contains(id));
        assert_eq!(index_len(&repo), 0);
    }

    #[test]
    fn test_leave_owner_picks_new_owner() {
        let repo = repo();
        let (id, [owner, bob, eve]) = three_player_game(&repo);
        let removal = repo.leave(id, owner).unwrap();
        let new_owner = removal.new_owner.unwrap();
        assert!(new_owner == bob || new_owner == eve);
        assert!(repo.contains(id));
    }

    #[test]
    fn test_connect_disconnect_moves_age_class() {
        let repo = repo();
        let (id, [a, b, c]) = three_player_game(&repo);
        for p in [a, b, c] {
            repo.disconnect(id, p).unwrap();
        }
        let key = repo.inner.read().games[&id].key;
        assert_eq!(key.class, AgeClass::NoPlayers);

        repo.connect(id, a).unwrap();
        let key = repo.inner.read().games[&id].key;
        assert_eq!(key.class, AgeClass::Lobby);
        assert_eq!(index_len(&repo), 1);
    }

    #[test]
    fn test_state_info_does_not_touch_age() {
        let repo = repo();
        let (id, owner) = repo.create(GameSettings::default(), "Dave").unwrap();
        let before = repo.inner.read().games[&id].key;
        repo.state_info(id, owner).unwrap();
        repo.info(id).unwrap();
        repo.metrics();
        assert_eq!(repo.inner.read().games[&id].key, before);
    }

    #[test]
    fn test_end_old_games_at_evicts_per_class() {
        let repo = repo();
        let (lobby, _) = repo.create(GameSettings::default(), "Dave").unwrap();
        let (running, _) = three_player_game(&repo);
        repo.start_game(running).unwrap();
        let (empty, [a, b, c]) = three_player_game(&repo);
        for p in [a, b, c] {
            repo.disconnect(empty, p).unwrap();
        }

        let now = Instant::now();
        assert!(repo.end_old_games_at(now).is_empty());

        let expired = repo.end_old_games_at(now + Duration::from_secs(3));
        assert_eq!(expired, vec![empty]);

        let expired = repo.end_old_games_at(now + Duration::from_secs(16 * 60));
        assert_eq!(expired, vec![lobby]);

        let expired = repo.end_old_games_at(now + Duration::from_secs(3 * 60 * 60 + 1));
        assert_eq!(expired, vec![running]);
        assert!(repo.is_empty());
        assert_eq!(index_len(&repo), 0);
    }

    #[test]
    fn test_end_old_games_at_activity_refreshes_age() {
        let repo = repo();
        let (id, _) = repo.create(GameSettings::default(), "Dave").unwrap();
        let created = repo.inner.read().games[&id].key.at;
        std::thread::sleep(Duration::from_millis(20));
        repo.create_player(id, "Bob", "").unwrap();

        // Expired if measured from creation, fresh from the later action.
        let now = created + EvictionConfig::default().lobby_max_age + Duration::from_millis(5);
        assert!(repo.end_old_games_at(now).is_empty());
        assert!(repo.contains(id));
    }

    #[test]
    fn test_end_old_games_at_keeps_younger_games() {
        let repo = repo();
        let (old, _) = repo.create(GameSettings::default(), "Dave").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let (young, _) = repo.create(GameSettings::default(), "Bob").unwrap();
        let oldest = repo.inner.read().games[&old].key.at;
        let max = EvictionConfig::default().lobby_max_age;

        let expired = repo.end_old_games_at(oldest + max + Duration::from_millis(1));
        assert_eq!(expired, vec![old]);
        assert!(repo.contains(young));
    }

    #[test]
    fn test_metrics_aggregates_players() {
        let repo = repo();
        let (id, [a, _, _]) = three_player_game(&repo);
        repo.create(GameSettings::default(), "Solo").unwrap();
        repo.disconnect(id, a).unwrap();
        let metrics = repo.metrics();
        assert_eq!(metrics.games, 2);
        assert_eq!(metrics.players, 4);
        assert_eq!(metrics.connected_players, 3);
    }

    #[test]
    fn test_play_cards_through_repo_reaches_judging() {
        let repo = repo();
        let (id, _) = three_player_game(&repo);
        let start = repo.start_game(id).unwrap();
        let pick = start.black_card.cards_to_play as usize;
        let mut last = None;
        for (player, hand) in &start.hands {
            if *player == start.card_czar_id {
                continue;
            }
            let cards: Vec<_> = hand.iter().take(pick).map(|c| c.id).collect();
            last = Some(repo.play_cards(id, *player, &cards).unwrap());
        }
        assert!(last.unwrap().moved_to_next_card_czar_phase);
        assert_eq!(repo.info(id).unwrap().game_state, GameState::CzarJudgingCards);
    }

    #[test]
    fn test_concurrent_games_are_independent() {
        let repo = Arc::new(repo());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || {
                    let (id, _) = repo.create(GameSettings::default(), format!("Owner{i}")).unwrap();
                    for n in 0..5 {
                        repo.create_player(id, format!("Player{n}"), "").unwrap();
                    }
                    id
                })
            })
            .collect();
        for handle in handles {
            let id = handle.join().unwrap();
            assert_eq!(repo.info(id).unwrap().player_count, 6);
        }
        assert_eq!(repo.len(), 8);
        assert_eq!(index_len(&repo), 8);
    }
}
