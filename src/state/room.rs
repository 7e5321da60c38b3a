//! Room registry.
//!
//! A room is a lobby that can host one game at a time. The registry owns
//! every room and maps each connection to the room it sits in.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::engine::{GameState, TurnEngine};
use super::player::Player;
use crate::config::GameRules;

/// Room code alphabet. No I, O, 0 or 1.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const ROOM_CODE_LENGTH: usize = 5;

/// Names handed to AI seats, first unused wins.
pub const AI_NAMES: [&str; 6] = [
    "Captain Blackbyte",
    "Rusty Hook",
    "One-Eyed Otto",
    "Sea Dog Sally",
    "Barnacle Bill",
    "Pegleg Pete",
];

const AI_ID_SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a random room code.
pub fn generate_room_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ROOM_CODE_LENGTH)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// A lobby and, once started, its game.
#[derive(Debug, Clone)]
pub struct Room {
    pub code: String,

    /// Connection id of the host
    pub host_id: String,

    /// Lobby roster, in join order
    pub players: Vec<Player>,

    /// Present from game start until the room is reset
    pub engine: Option<TurnEngine>,

    pub created_at: DateTime<Utc>,
}

impl Room {
    fn new(code: String, host: Player) -> Self {
        Self {
            code,
            host_id: host.id.clone(),
            players: vec![host],
            engine: None,
            created_at: Utc::now(),
        }
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == player_id)
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.player(player_id).is_some()
    }

    pub fn is_host(&self, player_id: &str) -> bool {
        self.host_id == player_id
    }

    pub fn has_active_game(&self) -> bool {
        self.engine.is_some()
    }

    /// Whether every seat is ready. AI seats always are.
    pub fn all_ready(&self) -> bool {
        self.players.iter().all(|p| p.is_ready || p.is_ai)
    }

    /// Nobody left but AI seats, or nobody at all.
    fn is_abandoned(&self) -> bool {
        self.players.iter().all(|p| p.is_ai)
    }

    fn host_name(&self) -> String {
        self.player(&self.host_id)
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }

    /// Summary for the lobby browser.
    pub fn lobby_info(&self, max_players: usize) -> LobbyInfo {
        LobbyInfo {
            code: self.code.clone(),
            host_name: self.host_name(),
            player_count: self.players.len(),
            max_players,
            players: self
                .players
                .iter()
                .map(|p| LobbySeat {
                    name: p.name.clone(),
                    is_ai: p.is_ai,
                })
                .collect(),
            created_at: self.created_at,
        }
    }

    /// Convert to JSON for sending to clients.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code,
            "hostId": self.host_id,
            "players": self.players,
            "inGame": self.engine.is_some(),
            "createdAt": self.created_at.timestamp_millis()
        })
    }
}

/// One seat in a [`LobbyInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySeat {
    pub name: String,
    #[serde(rename = "isAI")]
    pub is_ai: bool,
}

/// A joinable room, as listed in the lobby browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyInfo {
    pub code: String,
    pub host_name: String,
    pub player_count: usize,
    pub max_players: usize,
    pub players: Vec<LobbySeat>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// What a disconnect did to its room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectOutcome {
    pub room_code: String,
    pub was_host: bool,
    /// The player left the lobby roster (no game was running)
    pub removed: bool,
    /// The room was deleted
    pub room_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room not found")]
    NotFound,
    #[error("Room is full")]
    Full,
    #[error("Game already in progress")]
    GameInProgress,
    #[error("Already in a room")]
    AlreadyInRoom,
    #[error("Not in this room")]
    NotMember,
    #[error("Player is not an AI")]
    NotAi,
    #[error("Player is still connected")]
    StillConnected,
    #[error("Not enough ready players")]
    NotEnoughPlayers,
}

/// Every room on the server.
#[derive(Debug)]
pub struct RoomRegistry {
    /// Rooms by code
    rooms: HashMap<String, Room>,

    /// Connection id to room code
    player_index: HashMap<String, String>,

    rules: GameRules,

    /// Room codes, AI ids and per-game seeds
    rng: StdRng,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(GameRules::default())
    }
}

impl RoomRegistry {
    pub fn new(rules: GameRules) -> Self {
        Self::with_rng(rules, StdRng::from_entropy())
    }

    /// Deterministic codes, AI ids and games.
    pub fn with_seed(rules: GameRules, seed: u64) -> Self {
        Self::with_rng(rules, StdRng::seed_from_u64(seed))
    }

    fn with_rng(rules: GameRules, rng: StdRng) -> Self {
        Self {
            rooms: HashMap::new(),
            player_index: HashMap::new(),
            rules,
            rng,
        }
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    /// Open a new room with the caller as host. Returns the room code.
    pub fn create_room(&mut self, host_id: &str, host_name: &str) -> Result<String, RoomError> {
        if self.player_index.contains_key(host_id) {
            return Err(RoomError::AlreadyInRoom);
        }

        let mut code = generate_room_code(&mut self.rng);
        while self.rooms.contains_key(&code) {
            code = generate_room_code(&mut self.rng);
        }

        let host = Player::human(host_id, host_name, &self.rules);
        self.rooms.insert(code.clone(), Room::new(code.clone(), host));
        self.player_index.insert(host_id.to_string(), code.clone());

        info!(room_code = %code, player_id = host_id, "Room created");
        Ok(code)
    }

    /// Join an existing room. Returns the normalized room code.
    pub fn join_room(&mut self, code: &str, player_id: &str, name: &str) -> Result<String, RoomError> {
        if self.player_index.contains_key(player_id) {
            return Err(RoomError::AlreadyInRoom);
        }

        let code = code.to_uppercase();
        let max_players = self.rules.max_players;
        let room = self.rooms.get_mut(&code).ok_or(RoomError::NotFound)?;
        if room.players.len() >= max_players {
            return Err(RoomError::Full);
        }
        if room.has_active_game() {
            return Err(RoomError::GameInProgress);
        }

        room.players.push(Player::human(player_id, name, &self.rules));
        self.player_index.insert(player_id.to_string(), code.clone());

        info!(room_code = %code, player_id, "Player joined room");
        Ok(code)
    }

    /// Seat an AI player. Returns `None` if the room is missing, full or in a game.
    pub fn add_ai_player(&mut self, code: &str) -> Option<Player> {
        let code = code.to_uppercase();
        let max_players = self.rules.max_players;
        let room = self.rooms.get_mut(&code)?;
        if room.players.len() >= max_players || room.has_active_game() {
            return None;
        }

        let name = AI_NAMES
            .iter()
            .find(|name| !room.players.iter().any(|p| p.name == **name))
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("AI Pirate {}", room.players.len()));

        let mut id = Self::ai_id(&mut self.rng);
        while room.has_player(&id) {
            id = Self::ai_id(&mut self.rng);
        }

        let ai = Player::ai(id, name, &self.rules);
        room.players.push(ai.clone());

        debug!(room_code = %code, player_id = %ai.id, name = %ai.name, "AI player added");
        Some(ai)
    }

    fn ai_id(rng: &mut StdRng) -> String {
        let suffix: String = (0..4)
            .map(|_| AI_ID_SUFFIX_ALPHABET[rng.gen_range(0..AI_ID_SUFFIX_ALPHABET.len())] as char)
            .collect();
        format!("ai_{}_{}", Utc::now().timestamp_millis(), suffix)
    }

    pub fn remove_ai_player(&mut self, code: &str, ai_id: &str) -> Result<(), RoomError> {
        let room = self
            .rooms
            .get_mut(&code.to_uppercase())
            .ok_or(RoomError::NotFound)?;
        if room.has_active_game() {
            return Err(RoomError::GameInProgress);
        }

        let index = room
            .players
            .iter()
            .position(|p| p.id == ai_id)
            .ok_or(RoomError::NotMember)?;
        if !room.players[index].is_ai {
            return Err(RoomError::NotAi);
        }

        room.players.remove(index);
        debug!(room_code = %room.code, player_id = ai_id, "AI player removed");
        Ok(())
    }

    pub fn set_player_ready(&mut self, player_id: &str, ready: bool) -> Result<(), RoomError> {
        let player = self
            .room_by_player_mut(player_id)
            .and_then(|room| room.player_mut(player_id))
            .ok_or(RoomError::NotMember)?;
        player.is_ready = ready;
        Ok(())
    }

    /// At least the minimum seats, all of them ready.
    pub fn can_start_game(&self, code: &str) -> bool {
        self.room(code).map_or(false, |room| {
            room.players.len() >= self.rules.min_players && room.all_ready()
        })
    }

    /// Start a game from the current lobby roster.
    pub fn start_game(&mut self, code: &str) -> Option<GameState> {
        let code = code.to_uppercase();
        if !self.can_start_game(&code) {
            return None;
        }

        let seed: u64 = self.rng.gen();
        let rules = self.rules.clone();
        let room = self.rooms.get_mut(&code)?;
        let engine = match TurnEngine::with_rng(
            room.players.clone(),
            code.clone(),
            rules,
            StdRng::seed_from_u64(seed),
        ) {
            Ok(engine) => engine,
            Err(err) => {
                warn!(room_code = %code, error = %err, "Could not start game");
                return None;
            }
        };

        let state = engine.get_state();
        room.engine = Some(engine);
        Some(state)
    }

    /// Drop the game and send everyone back to the lobby with fresh stats.
    pub fn reset_game_room(&mut self, code: &str) -> Result<(), RoomError> {
        let rules = self.rules.clone();
        let room = self.room_mut(code).ok_or(RoomError::NotFound)?;

        room.engine = None;
        for player in room.players.iter_mut() {
            player.reset_for_lobby(&rules);
        }

        info!(room_code = %room.code, "Room reset to lobby");
        Ok(())
    }

    pub fn is_host(&self, code: &str, player_id: &str) -> bool {
        self.room(code).map_or(false, |room| room.is_host(player_id))
    }

    /// The lobby roster, in join order.
    pub fn players_in_room(&self, code: &str) -> Vec<Player> {
        self.room(code)
            .map(|room| room.players.clone())
            .unwrap_or_default()
    }

    /// Handle a dropped connection.
    ///
    /// In the lobby the player is removed; in a game they keep their seat and
    /// are marked disconnected. A host who drops mid-game stays host until
    /// they reconnect. Rooms with no humans left are deleted.
    pub fn handle_disconnect(&mut self, player_id: &str) -> Option<DisconnectOutcome> {
        let code = self.player_index.get(player_id)?.clone();
        let room = self.rooms.get_mut(&code)?;
        let was_host = room.is_host(player_id);
        let mut removed = false;

        if let Some(engine) = room.engine.as_mut() {
            if let Some(player) = room.players.iter_mut().find(|p| p.id == player_id) {
                player.is_connected = false;
            }
            if let Err(err) = engine.set_player_connected(player_id, false) {
                warn!(room_code = %code, player_id, error = %err, "Disconnected player not seated in game");
            }
        } else {
            room.players.retain(|p| p.id != player_id);
            self.player_index.remove(player_id);
            removed = true;

            if was_host {
                if let Some(next_host) = room.players.iter().find(|p| !p.is_ai) {
                    room.host_id = next_host.id.clone();
                    debug!(room_code = %code, player_id = %room.host_id, "Host reassigned");
                }
            }
        }

        let room_closed = room.is_abandoned();
        if room_closed {
            self.remove_room(&code);
        }

        info!(room_code = %code, player_id, removed, room_closed, "Player disconnected");
        Some(DisconnectOutcome {
            room_code: code,
            was_host,
            removed,
            room_closed,
        })
    }

    /// Re-key a disconnected player under a new connection id.
    pub fn handle_reconnect(&mut self, code: &str, old_id: &str, new_id: &str) -> Result<(), RoomError> {
        let code = code.to_uppercase();
        if old_id != new_id && self.player_index.contains_key(new_id) {
            return Err(RoomError::AlreadyInRoom);
        }

        let room = self.rooms.get_mut(&code).ok_or(RoomError::NotFound)?;
        let player = room.player_mut(old_id).ok_or(RoomError::NotMember)?;
        if player.is_connected {
            return Err(RoomError::StillConnected);
        }

        player.id = new_id.to_string();
        player.is_connected = true;

        if let Some(engine) = room.engine.as_mut() {
            let synced = engine
                .reassign_player_id(old_id, new_id)
                .and_then(|_| engine.set_player_connected(new_id, true));
            if let Err(err) = synced {
                warn!(room_code = %code, player_id = new_id, error = %err, "Reconnected player not seated in game");
            }
        }
        if room.host_id == old_id {
            room.host_id = new_id.to_string();
        }

        self.player_index.remove(old_id);
        self.player_index.insert(new_id.to_string(), code.clone());

        info!(room_code = %code, old_id, new_id, "Player reconnected");
        Ok(())
    }

    /// Rooms still in the lobby, for the browser.
    pub fn active_lobbies(&self) -> Vec<LobbyInfo> {
        let mut lobbies: Vec<LobbyInfo> = self
            .rooms
            .values()
            .filter(|room| !room.has_active_game())
            .map(|room| room.lobby_info(self.rules.max_players))
            .collect();
        lobbies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.code.cmp(&b.code)));
        lobbies
    }

    pub fn room(&self, code: &str) -> Option<&Room> {
        self.rooms.get(&code.to_uppercase())
    }

    pub fn room_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(&code.to_uppercase())
    }

    pub fn room_code_for(&self, player_id: &str) -> Option<&str> {
        self.player_index.get(player_id).map(String::as_str)
    }

    pub fn room_by_player_mut(&mut self, player_id: &str) -> Option<&mut Room> {
        let code = self.player_index.get(player_id)?.clone();
        self.rooms.get_mut(&code)
    }

    pub fn engine(&self, code: &str) -> Option<&TurnEngine> {
        self.room(code).and_then(|room| room.engine.as_ref())
    }

    pub fn engine_mut(&mut self, code: &str) -> Option<&mut TurnEngine> {
        self.room_mut(code).and_then(|room| room.engine.as_mut())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn remove_room(&mut self, code: &str) -> Option<Room> {
        let room = self.rooms.remove(code)?;
        self.player_index.retain(|_, room_code| room_code != code);
        info!(room_code = code, "Room closed");
        Some(room)
    }
}
