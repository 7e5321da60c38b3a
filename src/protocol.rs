//! Messages between clients and the server.
//!
//! Both directions are tagged by `type`, using the event names the web
//! client already speaks (`lobby:create`, `game:roll`, ...).

use serde::{Deserialize, Serialize};

use crate::state::dice::{Combo, Die};
use crate::state::engine::{GameState, WinReason};
use crate::state::player::Player;
use crate::state::room::LobbyInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "lobby:create", rename_all = "camelCase")]
    CreateRoom { player_name: String },

    #[serde(rename = "lobby:join", rename_all = "camelCase")]
    JoinRoom {
        room_code: String,
        player_name: String,
    },

    #[serde(rename = "lobby:ready", rename_all = "camelCase")]
    SetReady { is_ready: bool },

    #[serde(rename = "lobby:addAI")]
    AddAi,

    #[serde(rename = "lobby:removeAI", rename_all = "camelCase")]
    RemoveAi { ai_id: String },

    #[serde(rename = "lobby:startGame")]
    StartGame,

    #[serde(rename = "lobby:resetGame")]
    ResetGame,

    #[serde(rename = "browse:list")]
    ListLobbies,

    /// Indices stay untyped until validated
    #[serde(rename = "game:lockDice", rename_all = "camelCase")]
    LockDice { dice_indices: serde_json::Value },

    #[serde(rename = "game:roll")]
    Roll,

    #[serde(rename = "game:finishRolling")]
    FinishRolling,

    #[serde(rename = "game:selectTarget", rename_all = "camelCase")]
    SelectTarget {
        die_index: usize,
        target_player_id: String,
    },

    #[serde(rename = "game:endTurn")]
    EndTurn,

    #[serde(rename = "player:reconnect", rename_all = "camelCase")]
    Reconnect {
        room_code: String,
        player_id: String,
    },
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Reply to `lobby:create`
    #[serde(rename = "lobby:created", rename_all = "camelCase")]
    RoomCreated { room_code: String },

    /// Reply to `lobby:join`
    #[serde(rename = "lobby:joinResult", rename_all = "camelCase")]
    JoinResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "lobby:state", rename_all = "camelCase")]
    LobbyState { players: Vec<Player>, can_start: bool },

    #[serde(rename = "lobby:playerJoined")]
    PlayerJoined { player: Player },

    #[serde(rename = "lobby:playerLeft", rename_all = "camelCase")]
    PlayerLeft { player_id: String },

    #[serde(rename = "lobby:gameStarting")]
    GameStarting,

    #[serde(rename = "browse:lobbies")]
    Lobbies { lobbies: Vec<LobbyInfo> },

    #[serde(rename = "game:state")]
    GameState { state: GameState },

    #[serde(rename = "game:diceRolled")]
    DiceRolled { dice: Vec<Die>, combo: Option<Combo> },

    #[serde(rename = "game:turnChanged", rename_all = "camelCase")]
    TurnChanged { current_player_index: usize },

    #[serde(rename = "game:playerEliminated", rename_all = "camelCase")]
    PlayerEliminated {
        player_id: String,
        eliminator_id: String,
    },

    #[serde(rename = "game:ended", rename_all = "camelCase")]
    GameEnded { winner_id: String, reason: WinReason },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The `type` tag, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RoomCreated { .. } => "lobby:created",
            Self::JoinResult { .. } => "lobby:joinResult",
            Self::LobbyState { .. } => "lobby:state",
            Self::PlayerJoined { .. } => "lobby:playerJoined",
            Self::PlayerLeft { .. } => "lobby:playerLeft",
            Self::GameStarting => "lobby:gameStarting",
            Self::Lobbies { .. } => "browse:lobbies",
            Self::GameState { .. } => "game:state",
            Self::DiceRolled { .. } => "game:diceRolled",
            Self::TurnChanged { .. } => "game:turnChanged",
            Self::PlayerEliminated { .. } => "game:playerEliminated",
            Self::GameEnded { .. } => "game:ended",
            Self::Error { .. } => "error",
        }
    }
}
