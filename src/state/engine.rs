//! Turn engine.
//!
//! Owns the authoritative state of one game and drives the turn state machine:
//!
//! ```text
//!            roll / finish_rolling            select_target (all resolved)
//! ┌─────────┐ ─────────────────▶ ┌───────────────────┐ ─────────────▶ ┌───────────┐
//! │ Rolling │                    │ SelectingTargets  │                │ Resolving │
//! └─────────┘ ◀───────┐          └───────────────────┘                └─────┬─────┘
//!      │              │ end_turn (next seat)                                │
//!      │              └─────────────────────────────────────────────────────┤
//!      └── finish_rolling with nothing to target ──────────────────────────▶│
//!                                                          resolve_turn     │
//!                                                     (winner? phase=Ended) ▼
//! ```
//!
//! The engine is synchronous and knows nothing about callers; turn ownership
//! is checked by the orchestrator.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use super::dice::{self, Combo, DiceFace, Die, DICE_COUNT};
use super::effects::{self, Effect, EffectCause, EffectKind, PendingAction};
use super::player::{Player, PlayerStats};
use crate::config::GameRules;

/// Overall game status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Playing,
    Ended,
}

/// Sub-state of the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Rolling,
    SelectingTargets,
    Resolving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinReason {
    Riches,
    LastStanding,
}

impl WinReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Riches => "riches",
            Self::LastStanding => "last standing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Roll,
    Action,
    Combo,
    Elimination,
    Win,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub player_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

/// Snapshot of one game, as broadcast to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub room_code: String,
    pub phase: GamePhase,
    /// Seating order, fixed at game start
    pub players: Vec<Player>,
    pub current_player_index: usize,
    pub turn_number: u32,
    pub rolls_remaining: u8,
    pub dice: [Die; DICE_COUNT],
    pub turn_phase: TurnPhase,
    pub pending_actions: Vec<PendingAction>,
    pub game_log: Vec<LogEntry>,
    pub winner_id: Option<String>,
    pub win_reason: Option<WinReason>,
}

impl GameState {
    pub fn current_player(&self) -> &Player {
        &self.players[self.current_player_index]
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }
}

/// Result of a single roll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollOutcome {
    pub dice: [Die; DICE_COUNT],
    pub combo: Option<Combo>,
    pub bonus_count: u32,
    pub can_roll_again: bool,
}

/// Result of resolving a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnResolution {
    /// Effects that were actually applied, in order
    pub effects: Vec<Effect>,
    /// Players eliminated this turn, in order
    pub eliminations: Vec<String>,
    pub winner: Option<String>,
    pub win_reason: Option<WinReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("No rolls remaining")]
    NoRollsRemaining,
    #[error("Invalid action: no pending action for die {die_index}")]
    NoPendingAction { die_index: usize },
    #[error("A game needs at least two players")]
    NotEnoughPlayers,
    #[error("Unknown player {0}")]
    UnknownPlayer(String),
}

/// Per-turn aggregates for the summary log line.
#[derive(Debug, Default)]
struct TurnTally {
    from_center: u32,
    stolen: Vec<(String, u32)>,
    hits: Vec<(String, u32)>,
    to_treasure: u32,
    planks: u32,
    shields: u32,
}

impl TurnTally {
    fn bump(entries: &mut Vec<(String, u32)>, name: &str, amount: u32) {
        match entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, total)) => *total += amount,
            None => entries.push((name.to_string(), amount)),
        }
    }

    fn describe(&self, name: &str) -> String {
        let mut parts = Vec::new();
        if self.from_center > 0 {
            parts.push(format!("took {} from the center", self.from_center));
        }
        for (victim, amount) in &self.stolen {
            parts.push(format!("stole {} from {}", amount, victim));
        }
        for (victim, amount) in &self.hits {
            parts.push(format!("hit {} for {}", victim, amount));
        }
        if self.to_treasure > 0 {
            parts.push(format!("lost {} to the treasure", self.to_treasure));
        }
        if self.planks > 0 {
            parts.push(format!("walked the plank {}x", self.planks));
        }
        if self.shields > 0 {
            parts.push(format!("raised {} shield(s)", self.shields));
        }

        if parts.is_empty() {
            format!("{}'s turn passes without effect", name)
        } else {
            format!("{}: {}", name, parts.join(", "))
        }
    }
}

/// The turn state machine for one room.
#[derive(Debug, Clone)]
pub struct TurnEngine {
    state: GameState,
    rules: GameRules,
    rng: StdRng,
}

impl TurnEngine {
    /// Seat the players in random order and begin the first turn.
    pub fn new(players: Vec<Player>, room_code: impl Into<String>) -> Result<Self, EngineError> {
        Self::with_rng(players, room_code, GameRules::default(), StdRng::from_entropy())
    }

    /// Deterministic seating and rolls.
    pub fn with_seed(
        players: Vec<Player>,
        room_code: impl Into<String>,
        seed: u64,
    ) -> Result<Self, EngineError> {
        Self::with_rng(players, room_code, GameRules::default(), StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(
        mut players: Vec<Player>,
        room_code: impl Into<String>,
        rules: GameRules,
        mut rng: StdRng,
    ) -> Result<Self, EngineError> {
        if players.len() < 2 {
            return Err(EngineError::NotEnoughPlayers);
        }

        players.shuffle(&mut rng);

        let mut engine = Self {
            state: GameState {
                room_code: room_code.into(),
                phase: GamePhase::Playing,
                players,
                current_player_index: 0,
                turn_number: 1,
                rolls_remaining: rules.rolls_per_turn,
                dice: dice::fresh_dice(),
                turn_phase: TurnPhase::Rolling,
                pending_actions: Vec::new(),
                game_log: Vec::new(),
                winner_id: None,
                win_reason: None,
            },
            rules,
            rng,
        };

        info!(
            room_code = %engine.state.room_code,
            players = engine.state.players.len(),
            "Game started"
        );
        engine.log_turn_begins();
        Ok(engine)
    }

    /// A snapshot for broadcasting.
    pub fn get_state(&self) -> GameState {
        self.state.clone()
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn current_player(&self) -> &Player {
        self.state.current_player()
    }

    pub fn is_current_player(&self, player_id: &str) -> bool {
        self.current_player().id == player_id
    }

    pub fn is_over(&self) -> bool {
        self.state.phase == GamePhase::Ended
    }

    /// Whether the current player has rolled at least once this turn.
    pub fn has_rolled(&self) -> bool {
        self.state.rolls_remaining < self.rules.rolls_per_turn
    }

    /// Lock exactly the given slots; every other die is unlocked.
    pub fn lock_dice(&mut self, indices: &[usize]) {
        for die in self.state.dice.iter_mut() {
            die.locked = indices.contains(&die.id);
        }
    }

    /// Roll every unlocked die.
    pub fn roll(&mut self) -> Result<RollOutcome, EngineError> {
        self.ensure_rolls_left()?;
        let drawn = dice::draw_faces(&mut self.rng);
        Ok(self.apply_roll(drawn))
    }

    /// Roll with predetermined faces for the unlocked dice.
    pub fn roll_with_faces(
        &mut self,
        faces: [DiceFace; DICE_COUNT],
    ) -> Result<RollOutcome, EngineError> {
        self.ensure_rolls_left()?;
        Ok(self.apply_roll(faces))
    }

    fn ensure_rolls_left(&self) -> Result<(), EngineError> {
        if self.state.rolls_remaining == 0 {
            return Err(EngineError::NoRollsRemaining);
        }
        Ok(())
    }

    fn apply_roll(&mut self, drawn: [DiceFace; DICE_COUNT]) -> RollOutcome {
        let result = dice::settle(&self.state.dice, drawn);
        self.state.dice = result.dice;
        self.state.rolls_remaining -= 1;
        self.state.pending_actions = effects::pending_actions_for(&result.dice);

        let can_roll_again = self.state.rolls_remaining > 0;
        if !self.state.pending_actions.is_empty() && !can_roll_again {
            self.state.turn_phase = TurnPhase::SelectingTargets;
        }

        let current = self.current_player();
        let mut message = format!("{} rolled: {}", current.name, dice::describe(&result.dice));
        let kind = match result.combo {
            Some(combo) => {
                message.push_str(&format!(" ({}!)", combo.banner()));
                LogKind::Combo
            }
            None => LogKind::Roll,
        };
        let player_id = current.id.clone();

        debug!(
            room_code = %self.state.room_code,
            player_id = %player_id,
            combo = ?result.combo,
            rolls_remaining = self.state.rolls_remaining,
            "Dice rolled"
        );
        self.add_log(player_id, message, kind);

        RollOutcome {
            dice: result.dice,
            combo: result.combo,
            bonus_count: result.bonus_count,
            can_roll_again,
        }
    }

    /// Stop rolling early. Only meaningful while rolling.
    pub fn finish_rolling(&mut self) {
        if self.state.turn_phase != TurnPhase::Rolling {
            return;
        }
        self.state.turn_phase = if self.state.pending_actions.is_empty() {
            TurnPhase::Resolving
        } else {
            TurnPhase::SelectingTargets
        };
    }

    /// Choose the target for the pending action on a die slot.
    pub fn select_target(
        &mut self,
        die_index: usize,
        target_player_id: &str,
    ) -> Result<(), EngineError> {
        let action = self
            .state
            .pending_actions
            .iter_mut()
            .find(|a| a.die_index == die_index)
            .ok_or(EngineError::NoPendingAction { die_index })?;

        action.target_player_id = Some(target_player_id.to_string());
        action.resolved = true;

        if !self.has_unresolved_targets() {
            self.state.turn_phase = TurnPhase::Resolving;
        }
        Ok(())
    }

    pub fn has_unresolved_targets(&self) -> bool {
        self.state.pending_actions.iter().any(|a| !a.resolved)
    }

    /// Apply the current player's dice to the table.
    ///
    /// Effects apply strictly in the order they were planned, each with its
    /// planned amount. Once a player is eliminated, later effects they would
    /// cause are skipped; effects aimed at them still land.
    pub fn resolve_turn(&mut self) -> TurnResolution {
        let current = self.current_player().clone();
        let planned = effects::resolve(
            &self.state.dice,
            &self.state.pending_actions,
            &current,
            &self.state.players,
        );

        let mut resolution = TurnResolution::default();
        let mut tally = TurnTally::default();

        for effect in planned {
            if self.apply_effect(&effect, &mut tally, &mut resolution.eliminations) {
                resolution.effects.push(effect);
            } else {
                debug!(
                    room_code = %self.state.room_code,
                    source_id = ?effect.source_id,
                    effect = ?effect.kind,
                    "Skipping effect from an eliminated player"
                );
            }
        }

        self.add_log(current.id.clone(), tally.describe(&current.name), LogKind::Summary);

        if let Some((winner_id, reason)) = self.check_winner() {
            self.state.phase = GamePhase::Ended;
            self.state.winner_id = Some(winner_id.clone());
            self.state.win_reason = Some(reason);

            let name = self
                .state
                .player(&winner_id)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            info!(
                room_code = %self.state.room_code,
                winner_id = %winner_id,
                reason = reason.as_str(),
                "Game won"
            );
            self.add_log(
                winner_id.clone(),
                format!("{} wins by {}!", name, reason.as_str()),
                LogKind::Win,
            );

            resolution.winner = Some(winner_id);
            resolution.win_reason = Some(reason);
        }

        resolution
    }

    /// Apply one effect. Returns `false` if its source is out of the game.
    fn apply_effect(
        &mut self,
        effect: &Effect,
        tally: &mut TurnTally,
        eliminations: &mut Vec<String>,
    ) -> bool {
        let source_index = match &effect.source_id {
            Some(source_id) => match self.index_of(source_id) {
                Some(index) if !self.state.players[index].is_eliminated => Some(index),
                _ => return false,
            },
            None => None,
        };
        let Some(target_index) = self.index_of(&effect.target_id) else {
            return false;
        };
        let mut notes = Vec::new();

        let target = &mut self.state.players[target_index];
        match effect.kind {
            EffectKind::Damage => {
                if target.shields > 0 {
                    target.shields -= 1;
                    notes.push((
                        format!("{}'s shield absorbs the attack!", target.name),
                        LogKind::Action,
                    ));
                } else {
                    target.lives -= effect.amount as i32;
                    TurnTally::bump(&mut tally.hits, &target.name, effect.amount);
                }
            }
            EffectKind::CoinsLost => {
                let lost = target.lose_doubloons(effect.amount);
                match effect.cause {
                    EffectCause::Treasure => tally.to_treasure += lost,
                    EffectCause::Plunder => TurnTally::bump(&mut tally.stolen, &target.name, lost),
                    _ => {}
                }
            }
            EffectKind::CoinsGained => {
                target.doubloons += effect.amount;
                if effect.cause == EffectCause::Doubloon {
                    tally.from_center += effect.amount;
                }
            }
            EffectKind::ShieldGained => {
                target.shields += effect.amount;
                tally.shields += effect.amount;
            }
            EffectKind::LifeLost => {
                target.lives -= effect.amount as i32;
                if effect.cause == EffectCause::Plank {
                    tally.planks += 1;
                }
            }
        }

        let target_id = target.id.clone();
        for (message, kind) in notes {
            self.add_log(target_id.clone(), message, kind);
        }

        if self.state.players[target_index].check_elimination() {
            eliminations.push(target_id.clone());
            if let Some(source_index) = source_index.filter(|i| *i != target_index) {
                self.plunder(source_index, target_index);
            }
            let name = self.state.players[target_index].name.clone();
            info!(
                room_code = %self.state.room_code,
                player_id = %target_id,
                "Player eliminated"
            );
            self.add_log(
                target_id,
                format!("{} has been eliminated!", name),
                LogKind::Elimination,
            );
        }

        true
    }

    /// Captain's Plunder: the killer takes everything the victim had left.
    fn plunder(&mut self, killer_index: usize, victim_index: usize) {
        let loot = std::mem::take(&mut self.state.players[victim_index].doubloons);
        self.state.players[killer_index].doubloons += loot;

        let killer = &self.state.players[killer_index];
        let victim = &self.state.players[victim_index];
        let message = format!(
            "Captain's Plunder! {} takes {} doubloons from {}!",
            killer.name, loot, victim.name
        );
        let killer_id = killer.id.clone();
        self.add_log(killer_id, message, LogKind::Elimination);
    }

    fn check_winner(&self) -> Option<(String, WinReason)> {
        let alive: Vec<&Player> = self.state.players.iter().filter(|p| p.is_alive()).collect();

        if let Some(rich) = alive
            .iter()
            .find(|p| p.doubloons >= self.rules.riches_target)
        {
            return Some((rich.id.clone(), WinReason::Riches));
        }

        match alive.as_slice() {
            [last] => Some((last.id.clone(), WinReason::LastStanding)),
            _ => None,
        }
    }

    /// Pass the dice to the next seated player still in the game.
    pub fn end_turn(&mut self) {
        if self.is_over() {
            return;
        }

        let seats = self.state.players.len();
        let from = self.state.current_player_index;
        let next = (1..=seats)
            .map(|step| (from + step) % seats)
            .find(|i| self.state.players[*i].is_alive());

        let Some(next) = next else {
            error!(
                room_code = %self.state.room_code,
                turn_number = self.state.turn_number,
                "No remaining player to pass the turn to"
            );
            return;
        };

        self.state.current_player_index = next;
        self.state.turn_number += 1;
        self.state.rolls_remaining = self.rules.rolls_per_turn;
        self.state.dice = dice::fresh_dice();
        self.state.turn_phase = TurnPhase::Rolling;
        self.state.pending_actions.clear();
        self.log_turn_begins();
    }

    /// Mirror a connection change into the live roster.
    pub fn set_player_connected(&mut self, player_id: &str, connected: bool) -> Result<(), EngineError> {
        let player = self.player_mut(player_id)?;
        player.is_connected = connected;
        Ok(())
    }

    /// Re-key a player after a reconnect, including any targets aimed at them.
    pub fn reassign_player_id(&mut self, old_id: &str, new_id: &str) -> Result<(), EngineError> {
        self.player_mut(old_id)?.id = new_id.to_string();

        for action in self.state.pending_actions.iter_mut() {
            if action.target_player_id.as_deref() == Some(old_id) {
                action.target_player_id = Some(new_id.to_string());
            }
        }
        if self.state.winner_id.as_deref() == Some(old_id) {
            self.state.winner_id = Some(new_id.to_string());
        }
        Ok(())
    }

    /// Force a player's stats. Elimination latches if lives drop to zero.
    pub fn set_player_stats(&mut self, player_id: &str, stats: PlayerStats) -> Result<(), EngineError> {
        let player = self.player_mut(player_id)?;
        player.doubloons = stats.doubloons;
        player.lives = stats.lives;
        player.shields = stats.shields;
        player.check_elimination();
        Ok(())
    }

    fn index_of(&self, player_id: &str) -> Option<usize> {
        self.state.players.iter().position(|p| p.id == player_id)
    }

    fn player_mut(&mut self, player_id: &str) -> Result<&mut Player, EngineError> {
        self.state
            .players
            .iter_mut()
            .find(|p| p.id == player_id)
            .ok_or_else(|| EngineError::UnknownPlayer(player_id.to_string()))
    }

    fn log_turn_begins(&mut self) {
        let current = self.current_player();
        let (id, message) = (current.id.clone(), format!("{}'s turn begins", current.name));
        self.add_log(id, message, LogKind::Roll);
    }

    fn add_log(&mut self, player_id: String, message: String, kind: LogKind) {
        self.state.game_log.push(LogEntry {
            timestamp: Utc::now(),
            player_id,
            message,
            kind,
        });
    }
}
