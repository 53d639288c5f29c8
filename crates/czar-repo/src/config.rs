//! Eviction thresholds.

use std::time::Duration;

use czar_game::AgeClass;

/// How long a game may sit idle before the sweep removes it, per class.
///
/// Idle time is measured from the game's last mutating action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionConfig {
    /// A round is running and someone is connected.
    pub in_progress_max_age: Duration,
    /// Lobby or finished game with someone connected.
    pub lobby_max_age: Duration,
    /// Nobody connected.
    pub no_players_max_age: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            in_progress_max_age: Duration::from_secs(3 * 60 * 60),
            lobby_max_age: Duration::from_secs(15 * 60),
            no_players_max_age: Duration::from_secs(2),
        }
    }
}

impl EvictionConfig {
    pub fn max_age(&self, class: AgeClass) -> Duration {
        match class {
            AgeClass::InProgress => self.in_progress_max_age,
            AgeClass::Lobby => self.lobby_max_age,
            AgeClass::NoPlayers => self.no_players_max_age,
        }
    }

    pub fn in_progress_max_age(mut self, age: Duration) -> Self {
        self.in_progress_max_age = age;
        self
    }

    pub fn lobby_max_age(mut self, age: Duration) -> Self {
        self.lobby_max_age = age;
        self
    }

    pub fn no_players_max_age(mut self, age: Duration) -> Self {
        self.no_players_max_age = age;
        self
    }
}
