//! Booty Dice State Library
//!
//! Authoritative server-side state for Booty Dice, a pirate dice game for
//! two to six players.
//!
//! # Overview
//!
//! - **Dice and effects** - Six dice, up to three rolls a turn, combos, and
//!   the ordered effects a finished roll produces.
//!
//! - **Turn engine** - One per game. Drives rolling, targeting and
//!   resolution, tracks eliminations and decides the winner.
//!
//! - **Room registry** - Lobbies, AI seats, readiness, disconnects and
//!   reconnects.
//!
//! - **Orchestrator** - Validates client messages, enforces turn ownership,
//!   broadcasts state and plays AI seats.
//!
//! # Design Principles
//!
//! 1. **The engine is synchronous** - No delays, no I/O. Pacing belongs to the
//!    orchestrator.
//!
//! 2. **Invalid requests change nothing** - Every rejected operation leaves the
//!    state exactly as it was.
//!
//! 3. **No networking** - The transport is a trait the server implements.
//!
//! 4. **Serialization-ready** - Snapshots serialize to the JSON the web client
//!    expects.
//!
//! # Example
//!
//! ```rust
//! use booty_dice_state::state::{DiceFace, GamePhase, GameRules, RoomRegistry};
//!
//! let mut rooms = RoomRegistry::with_seed(GameRules::default(), 7);
//! let code = rooms.create_room("sock-1", "Anne").unwrap();
//! rooms.add_ai_player(&code).unwrap();
//! rooms.set_player_ready("sock-1", true).unwrap();
//!
//! let state = rooms.start_game(&code).unwrap();
//! assert_eq!(state.phase, GamePhase::Playing);
//!
//! let engine = rooms.engine_mut(&code).unwrap();
//! engine.roll_with_faces([DiceFace::Doubloon; 6]).unwrap();
//! engine.finish_rolling();
//! let resolution = engine.resolve_turn();
//! assert_eq!(resolution.effects.len(), 6);
//! ```

pub mod ai;
pub mod config;
pub mod orchestrator;
pub mod protocol;
pub mod state;
pub mod validation;

// Re-export everything from state module at crate root
pub use state::*;
