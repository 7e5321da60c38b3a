//! Player records.
//!
//! The same record is used in the lobby and in a running game. Stats are
//! reset whenever a room goes back to the lobby.

use serde::{Deserialize, Serialize};

use crate::config::GameRules;

/// A seated player, human or AI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Connection-scoped identity
    pub id: String,

    /// Display name
    pub name: String,

    /// Never negative; losses are clamped
    pub doubloons: u32,

    /// May dip below zero while effects apply
    pub lives: i32,

    /// Each shield absorbs one cutlass hit
    pub shields: u32,

    #[serde(rename = "isAI")]
    pub is_ai: bool,

    pub is_ready: bool,

    pub is_connected: bool,

    /// Latched for the rest of the game once set
    pub is_eliminated: bool,
}

/// Forced stat values, used to set up scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStats {
    pub doubloons: u32,
    pub lives: i32,
    pub shields: u32,
}

impl Player {
    /// A human player, not yet ready.
    pub fn human(id: impl Into<String>, name: impl Into<String>, rules: &GameRules) -> Self {
        Self::new(id.into(), name.into(), false, rules)
    }

    /// An AI player. AI seats are always ready.
    pub fn ai(id: impl Into<String>, name: impl Into<String>, rules: &GameRules) -> Self {
        Self::new(id.into(), name.into(), true, rules)
    }

    fn new(id: String, name: String, is_ai: bool, rules: &GameRules) -> Self {
        Self {
            id,
            name,
            doubloons: rules.starting_doubloons,
            lives: rules.starting_lives,
            shields: 0,
            is_ai,
            is_ready: is_ai,
            is_connected: true,
            is_eliminated: false,
        }
    }

    pub fn stats(&self) -> PlayerStats {
        PlayerStats {
            doubloons: self.doubloons,
            lives: self.lives,
            shields: self.shields,
        }
    }

    /// Restore starting stats for a new game. Humans must ready up again.
    pub fn reset_for_lobby(&mut self, rules: &GameRules) {
        self.doubloons = rules.starting_doubloons;
        self.lives = rules.starting_lives;
        self.shields = 0;
        self.is_eliminated = false;
        self.is_ready = self.is_ai;
    }

    /// Remove doubloons, clamping at zero. Returns the amount actually removed.
    pub fn lose_doubloons(&mut self, amount: u32) -> u32 {
        let lost = amount.min(self.doubloons);
        self.doubloons -= lost;
        lost
    }

    /// Latch elimination if out of lives. Returns true only on the transition.
    pub fn check_elimination(&mut self) -> bool {
        if self.lives <= 0 && !self.is_eliminated {
            self.is_eliminated = true;
            true
        } else {
            false
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.is_eliminated
    }
}
