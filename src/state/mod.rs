//! State management module for Booty Dice.
//!
//! This module provides the core state types and managers:
//!
//! - `dice` - Dice faces, rolling and combo detection
//! - `effects` - Turning a finished roll into ordered effects
//! - `player` - Player records and stats
//! - `engine` - The per-game turn state machine
//! - `room` - Rooms, lobbies and the registry that owns them
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            AppState                              │
//! │                                                                  │
//! │  ┌────────────────────────────┐   ┌──────────────────────────┐   │
//! │  │        RoomRegistry        │   │       ServerConfig       │   │
//! │  │                            │   │                          │   │
//! │  │ room_code →  Room          │   │  GameRules, AiPacing     │   │
//! │  │ conn_id   →  room_code     │   │                          │   │
//! │  └─────────────┬──────────────┘   └──────────────────────────┘   │
//! │                │                                                 │
//! │  ┌─────────────▼──────────────────────────────────────────────┐  │
//! │  │ Room: lobby roster + Option<TurnEngine>                    │  │
//! │  │                                                            │  │
//! │  │  TurnEngine: Rolling ──▶ SelectingTargets ──▶ Resolving    │  │
//! │  │                 ▲                                  │       │  │
//! │  │                 └──────────── end_turn ────────────┘       │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use booty_dice_state::state::{RoomRegistry, GameRules};
//!
//! let mut rooms = RoomRegistry::new(GameRules::default());
//! let code = rooms.create_room("sock-1", "Anne")?;
//! rooms.add_ai_player(&code);
//! rooms.set_player_ready("sock-1", true)?;
//! let state = rooms.start_game(&code);
//! ```

pub mod dice;
pub mod effects;
pub mod engine;
pub mod player;
pub mod room;

// Re-export commonly used types
pub use crate::config::{AiPacing, GameRules, ServerConfig};
pub use dice::{Combo, DiceFace, DiceRoll, Die, DICE_COUNT};
pub use effects::{Effect, EffectCause, EffectKind, PendingAction, TargetedFace};
pub use engine::{
    EngineError, GamePhase, GameState, LogEntry, LogKind, RollOutcome, TurnEngine, TurnPhase,
    TurnResolution, WinReason,
};
pub use player::{Player, PlayerStats};
pub use room::{DisconnectOutcome, LobbyInfo, LobbySeat, Room, RoomError, RoomRegistry};

/// Combined application state.
///
/// Bundles the registry with the configuration it was built from. The
/// registry can also be used on its own.
#[derive(Debug)]
pub struct AppState {
    pub rooms: RoomRegistry,
    pub config: ServerConfig,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            rooms: RoomRegistry::new(config.rules.clone()),
            config,
        }
    }

    /// Deterministic room codes and games.
    pub fn with_seed(config: ServerConfig, seed: u64) -> Self {
        Self {
            rooms: RoomRegistry::with_seed(config.rules.clone(), seed),
            config,
        }
    }

    /// Rooms in the lobby and rooms with a game running.
    pub fn room_counts(&self) -> (usize, usize) {
        let open = self.rooms.active_lobbies().len();
        (open, self.rooms.room_count() - open)
    }
}
