//! Turn orchestration.
//!
//! Sits between the transport and the registry: checks who is asking,
//! applies the request, and broadcasts the result to the room.
//!
//! The registry sits behind a single async mutex. A client message holds it
//! for one request. AI seats are played by a background task per room that
//! locks for each step of the turn and releases the lock before every pause,
//! so an AI thinking in one room never holds up another. At most one such
//! task runs per room, so a room never has two turns in flight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use crate::ai::{AiStrategy, HeuristicStrategy};
use crate::config::AiPacing;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::engine::{EngineError, TurnEngine, TurnPhase};
use crate::state::room::{Room, RoomError, RoomRegistry};
use crate::state::AppState;
use crate::validation::{self, ValidationError};

/// Outbound side of the client connections.
///
/// Sends must not block; a server typically pushes onto a per-connection
/// channel here.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, conn_id: &str, message: ServerMessage);

    fn broadcast(&self, conn_ids: &[String], message: &ServerMessage) {
        for conn_id in conn_ids {
            self.send(conn_id, message.clone());
        }
    }
}

/// Delays between AI actions. Called with the registry unlocked.
#[async_trait]
pub trait Pacer: Send + Sync + 'static {
    async fn pause(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// No delays at all, for simulations and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacer;

#[async_trait]
impl Pacer for NoPacer {
    async fn pause(&self, _duration: Duration) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Not in a room")]
    NotInRoom,
    #[error("Only the host can do that")]
    NotHost,
    #[error("No game in progress")]
    NoGame,
    #[error("The game is over")]
    GameOver,
    #[error("It is not your turn")]
    NotYourTurn,
    #[error("Rolling is over for this turn")]
    NotRolling,
    #[error("Roll the dice first")]
    NotRolled,
    #[error("Select targets for all attacks and steals first")]
    UnresolvedTargets,
    #[error("Invalid target selection")]
    InvalidTarget,
    #[error("Cannot add an AI player")]
    CannotAddAi,
}

/// The current player's game, borrowed out of the registry.
struct Seat<'r> {
    code: String,
    recipients: Vec<String>,
    engine: &'r mut TurnEngine,
}

/// Connected humans in a room.
fn recipients(room: &Room) -> Vec<String> {
    room.players
        .iter()
        .filter(|p| !p.is_ai && p.is_connected)
        .map(|p| p.id.clone())
        .collect()
}

/// The AI seat holding the turn in a running game, if any.
fn ai_turn(rooms: &RoomRegistry, code: &str) -> Option<String> {
    let engine = rooms.engine(code)?;
    let current = engine.current_player();
    (!engine.is_over() && current.is_ai && !current.is_eliminated).then(|| current.id.clone())
}

struct Tables {
    rooms: RoomRegistry,
    /// Rooms with an AI task running
    ai_rooms: HashSet<String>,
}

struct Shared<T, P, S> {
    tables: Mutex<Tables>,
    transport: T,
    pacer: P,
    strategy: S,
    pacing: AiPacing,
}

/// Clones share one registry.
pub struct Orchestrator<T, P = TokioPacer, S = HeuristicStrategy> {
    shared: Arc<Shared<T, P, S>>,
}

impl<T, P, S> Clone for Orchestrator<T, P, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport, P: Pacer> Orchestrator<T, P, HeuristicStrategy> {
    pub fn new(rooms: RoomRegistry, transport: T, pacer: P, pacing: AiPacing) -> Self {
        Self::with_strategy(rooms, transport, pacer, pacing, HeuristicStrategy)
    }

    /// Take over an [`AppState`], pacing AI seats as its config says.
    pub fn from_app_state(state: AppState, transport: T, pacer: P) -> Self {
        Self::new(state.rooms, transport, pacer, state.config.ai)
    }
}

impl<T: Transport, P: Pacer, S: AiStrategy + 'static> Orchestrator<T, P, S> {
    pub fn with_strategy(
        rooms: RoomRegistry,
        transport: T,
        pacer: P,
        pacing: AiPacing,
        strategy: S,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables {
                    rooms,
                    ai_rooms: HashSet::new(),
                }),
                transport,
                pacer,
                strategy,
                pacing,
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Lock the registry. Every request waits on this guard, so drop it soon.
    pub async fn rooms(&self) -> MappedMutexGuard<'_, RoomRegistry> {
        MutexGuard::map(self.shared.tables.lock().await, |tables| &mut tables.rooms)
    }

    /// Whether a task is currently playing the room's AI seats.
    pub async fn ai_turns_running(&self, code: &str) -> bool {
        self.shared.tables.lock().await.ai_rooms.contains(code)
    }

    /// Handle one client message. Failures go back to the sender only.
    ///
    /// If the message leaves an AI seat holding the turn, a task is spawned
    /// to play it, so this must run inside a tokio runtime.
    pub async fn handle(&self, conn_id: &str, message: ClientMessage) {
        let ai_room = {
            let mut tables = self.shared.tables.lock().await;
            if let Err(err) = self.shared.dispatch(&mut tables.rooms, conn_id, message) {
                debug!(player_id = conn_id, error = %err, "Rejected client message");
                self.shared.send(conn_id, ServerMessage::error(err.to_string()));
            }
            Self::claim_ai_room(&mut tables, conn_id)
        };

        if let Some(code) = ai_room {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.run_ai_turns(&code).await });
        }
    }

    /// A connection dropped. Tell whoever is left.
    pub async fn handle_disconnect(&self, conn_id: &str) {
        let mut tables = self.shared.tables.lock().await;
        self.shared.disconnect(&mut tables.rooms, conn_id);
    }

    fn claim_ai_room(tables: &mut Tables, conn_id: &str) -> Option<String> {
        let code = tables.rooms.room_code_for(conn_id)?.to_string();
        ai_turn(&tables.rooms, &code)?;
        tables.ai_rooms.insert(code.clone()).then_some(code)
    }
}

impl<T: Transport, P: Pacer, S: AiStrategy> Shared<T, P, S> {
    fn send(&self, conn_id: &str, message: ServerMessage) {
        trace!(player_id = conn_id, event = message.event_name(), "Sending");
        self.transport.send(conn_id, message);
    }

    fn broadcast(&self, recipients: &[String], message: &ServerMessage) {
        trace!(
            recipients = recipients.len(),
            event = message.event_name(),
            "Broadcasting"
        );
        self.transport.broadcast(recipients, message);
    }

    fn dispatch(
        &self,
        rooms: &mut RoomRegistry,
        conn_id: &str,
        message: ClientMessage,
    ) -> Result<(), OrchestratorError> {
        match message {
            ClientMessage::CreateRoom { player_name } => self.create_room(rooms, conn_id, &player_name),
            ClientMessage::JoinRoom {
                room_code,
                player_name,
            } => {
                if let Err(err) = self.join_room(rooms, conn_id, &room_code, &player_name) {
                    self.send(
                        conn_id,
                        ServerMessage::JoinResult {
                            success: false,
                            error: Some(err.to_string()),
                        },
                    );
                }
                Ok(())
            }
            ClientMessage::SetReady { is_ready } => {
                let code = Self::room_code(rooms, conn_id)?;
                rooms.set_player_ready(conn_id, is_ready)?;
                self.broadcast_lobby(rooms, &code);
                Ok(())
            }
            ClientMessage::AddAi => {
                let code = Self::hosted_room(rooms, conn_id)?;
                let ai = rooms
                    .add_ai_player(&code)
                    .ok_or(OrchestratorError::CannotAddAi)?;
                self.broadcast_room(rooms, &code, ServerMessage::PlayerJoined { player: ai });
                self.broadcast_lobby(rooms, &code);
                Ok(())
            }
            ClientMessage::RemoveAi { ai_id } => {
                let code = Self::hosted_room(rooms, conn_id)?;
                rooms.remove_ai_player(&code, &ai_id)?;
                self.broadcast_room(rooms, &code, ServerMessage::PlayerLeft { player_id: ai_id });
                self.broadcast_lobby(rooms, &code);
                Ok(())
            }
            ClientMessage::StartGame => self.start_game(rooms, conn_id),
            ClientMessage::ResetGame => {
                let code = Self::hosted_room(rooms, conn_id)?;
                if rooms.engine(&code).map_or(false, |engine| !engine.is_over()) {
                    return Err(RoomError::GameInProgress.into());
                }
                rooms.reset_game_room(&code)?;
                self.broadcast_lobby(rooms, &code);
                Ok(())
            }
            ClientMessage::ListLobbies => {
                let lobbies = rooms.active_lobbies();
                self.send(conn_id, ServerMessage::Lobbies { lobbies });
                Ok(())
            }
            ClientMessage::LockDice { dice_indices } => {
                let indices = validation::validate_dice_indices(&dice_indices)?;
                let seat = Self::seat(rooms, conn_id)?;
                seat.engine.lock_dice(&indices);
                self.broadcast_state(&seat);
                Ok(())
            }
            ClientMessage::Roll => {
                let seat = Self::seat(rooms, conn_id)?;
                if seat.engine.state().turn_phase != TurnPhase::Rolling {
                    return Err(OrchestratorError::NotRolling);
                }
                self.roll(&seat.recipients, seat.engine)?;
                Ok(())
            }
            ClientMessage::FinishRolling => {
                let seat = Self::seat(rooms, conn_id)?;
                if !seat.engine.has_rolled() {
                    return Err(OrchestratorError::NotRolled);
                }
                seat.engine.finish_rolling();
                self.broadcast_state(&seat);
                Ok(())
            }
            ClientMessage::SelectTarget {
                die_index,
                target_player_id,
            } => {
                let seat = Self::seat(rooms, conn_id)?;
                let valid_target = target_player_id != conn_id
                    && seat
                        .engine
                        .state()
                        .player(&target_player_id)
                        .map_or(false, |p| p.is_alive());
                if !valid_target {
                    return Err(OrchestratorError::InvalidTarget);
                }
                seat.engine
                    .select_target(die_index, &target_player_id)
                    .map_err(|_| OrchestratorError::InvalidTarget)?;
                self.broadcast_state(&seat);
                Ok(())
            }
            ClientMessage::EndTurn => {
                let seat = Self::seat(rooms, conn_id)?;
                if !seat.engine.has_rolled() {
                    return Err(OrchestratorError::NotRolled);
                }
                if seat.engine.has_unresolved_targets() {
                    return Err(OrchestratorError::UnresolvedTargets);
                }
                self.finish_turn(&seat.code, seat.engine, &seat.recipients);
                Ok(())
            }
            ClientMessage::Reconnect {
                room_code,
                player_id,
            } => {
                let code = validation::normalize_room_code(&room_code)?;
                rooms.handle_reconnect(&code, &player_id, conn_id)?;

                let message = match rooms.engine(&code) {
                    Some(engine) => ServerMessage::GameState {
                        state: engine.get_state(),
                    },
                    None => ServerMessage::LobbyState {
                        players: rooms.players_in_room(&code),
                        can_start: rooms.can_start_game(&code),
                    },
                };
                self.send(conn_id, message);
                Ok(())
            }
        }
    }

    fn disconnect(&self, rooms: &mut RoomRegistry, conn_id: &str) {
        let Some(outcome) = rooms.handle_disconnect(conn_id) else {
            return;
        };
        if outcome.room_closed {
            return;
        }

        self.broadcast_room(
            rooms,
            &outcome.room_code,
            ServerMessage::PlayerLeft {
                player_id: conn_id.to_string(),
            },
        );
        if outcome.removed {
            self.broadcast_lobby(rooms, &outcome.room_code);
        }
    }

    fn create_room(
        &self,
        rooms: &mut RoomRegistry,
        conn_id: &str,
        raw_name: &str,
    ) -> Result<(), OrchestratorError> {
        let name = validation::sanitize_player_name(raw_name)?;
        let code = rooms.create_room(conn_id, &name)?;

        self.send(
            conn_id,
            ServerMessage::RoomCreated {
                room_code: code.clone(),
            },
        );
        self.broadcast_lobby(rooms, &code);
        Ok(())
    }

    fn join_room(
        &self,
        rooms: &mut RoomRegistry,
        conn_id: &str,
        raw_code: &str,
        raw_name: &str,
    ) -> Result<(), OrchestratorError> {
        let name = validation::sanitize_player_name(raw_name)?;
        let code = validation::normalize_room_code(raw_code).map_err(|_| RoomError::NotFound)?;
        let code = rooms.join_room(&code, conn_id, &name)?;

        self.send(
            conn_id,
            ServerMessage::JoinResult {
                success: true,
                error: None,
            },
        );
        if let Some(player) = rooms.room(&code).and_then(|room| room.player(conn_id)).cloned() {
            self.broadcast_room(rooms, &code, ServerMessage::PlayerJoined { player });
        }
        self.broadcast_lobby(rooms, &code);
        Ok(())
    }

    fn start_game(&self, rooms: &mut RoomRegistry, conn_id: &str) -> Result<(), OrchestratorError> {
        let code = Self::hosted_room(rooms, conn_id)?;
        if rooms.engine(&code).is_some() {
            return Err(RoomError::GameInProgress.into());
        }
        if !rooms.can_start_game(&code) {
            return Err(RoomError::NotEnoughPlayers.into());
        }

        self.broadcast_room(rooms, &code, ServerMessage::GameStarting);
        let state = rooms.start_game(&code).ok_or(RoomError::NotEnoughPlayers)?;
        info!(room_code = %code, players = state.players.len(), "Game starting");
        self.broadcast_room(rooms, &code, ServerMessage::GameState { state });
        Ok(())
    }

    fn room_code(rooms: &RoomRegistry, conn_id: &str) -> Result<String, OrchestratorError> {
        rooms
            .room_code_for(conn_id)
            .map(str::to_string)
            .ok_or(OrchestratorError::NotInRoom)
    }

    fn hosted_room(rooms: &RoomRegistry, conn_id: &str) -> Result<String, OrchestratorError> {
        let code = Self::room_code(rooms, conn_id)?;
        if !rooms.is_host(&code, conn_id) {
            return Err(OrchestratorError::NotHost);
        }
        Ok(code)
    }

    /// The caller's game, if it is their turn.
    fn seat<'r>(rooms: &'r mut RoomRegistry, conn_id: &str) -> Result<Seat<'r>, OrchestratorError> {
        let room = rooms
            .room_by_player_mut(conn_id)
            .ok_or(OrchestratorError::NotInRoom)?;
        let code = room.code.clone();
        let recipients = recipients(room);
        let engine = room.engine.as_mut().ok_or(OrchestratorError::NoGame)?;

        if engine.is_over() {
            return Err(OrchestratorError::GameOver);
        }
        if !engine.is_current_player(conn_id) {
            return Err(OrchestratorError::NotYourTurn);
        }
        Ok(Seat {
            code,
            recipients,
            engine,
        })
    }

    fn roll(&self, recipients: &[String], engine: &mut TurnEngine) -> Result<(), EngineError> {
        let outcome = engine.roll()?;
        self.broadcast(
            recipients,
            &ServerMessage::DiceRolled {
                dice: outcome.dice.to_vec(),
                combo: outcome.combo,
            },
        );
        self.send_state(recipients, engine);
        Ok(())
    }

    /// Resolve the current turn and pass the dice on.
    fn finish_turn(&self, code: &str, engine: &mut TurnEngine, recipients: &[String]) {
        let current_id = engine.current_player().id.clone();
        let resolution = engine.resolve_turn();

        for player_id in resolution.eliminations {
            self.broadcast(
                recipients,
                &ServerMessage::PlayerEliminated {
                    player_id,
                    eliminator_id: current_id.clone(),
                },
            );
        }

        if let (Some(winner_id), Some(reason)) = (resolution.winner, resolution.win_reason) {
            info!(room_code = code, winner_id = %winner_id, "Game ended");
            self.broadcast(recipients, &ServerMessage::GameEnded { winner_id, reason });
            self.send_state(recipients, engine);
            return;
        }

        engine.end_turn();
        self.send_state(recipients, engine);
        if engine.is_over() {
            return;
        }

        self.broadcast(
            recipients,
            &ServerMessage::TurnChanged {
                current_player_index: engine.state().current_player_index,
            },
        );
    }

    /// Play AI seats until a human is up or the game ends.
    async fn run_ai_turns(&self, code: &str) {
        loop {
            let ai_id = {
                let mut tables = self.tables.lock().await;
                match ai_turn(&tables.rooms, code) {
                    Some(ai_id) => ai_id,
                    None => {
                        tables.ai_rooms.remove(code);
                        return;
                    }
                }
            };
            self.play_ai_turn(code, &ai_id).await;
        }
    }

    /// Run one step of an AI turn under the lock. `None` if the seat has lost
    /// the turn meanwhile, or the game is gone.
    async fn with_ai_turn<R, F>(&self, code: &str, ai_id: &str, step: F) -> Option<R>
    where
        F: FnOnce(&mut TurnEngine, &[String]) -> R + Send,
    {
        let mut tables = self.tables.lock().await;
        let room = tables.rooms.room_mut(code)?;
        let recipients = recipients(room);
        let engine = room.engine.as_mut()?;
        if engine.is_over() || !engine.is_current_player(ai_id) {
            return None;
        }
        Some(step(engine, &recipients))
    }

    async fn play_ai_turn(&self, code: &str, ai_id: &str) {
        info!(room_code = code, player_id = ai_id, "AI turn");

        self.pacer.pause(self.pacing.think()).await;
        // Fresh dice are all doubloons, so the first roll is never optional.
        let first = self
            .with_ai_turn(code, ai_id, |engine, recipients| self.ai_roll(engine, recipients))
            .await;
        let Some(mut rolls_left) = first else {
            return;
        };

        while rolls_left > 0 {
            self.pacer.pause(self.pacing.think()).await;
            let again = self
                .with_ai_turn(code, ai_id, |engine, recipients| {
                    let state = engine.get_state();
                    let keep = self
                        .strategy
                        .decide_keep_indices(&state.dice, state.current_player(), &state);
                    engine.lock_dice(&keep);
                    self.send_state(recipients, engine);

                    let state = engine.get_state();
                    self.strategy.should_roll_again(
                        &state.dice,
                        state.rolls_remaining,
                        state.current_player(),
                        &state,
                    )
                })
                .await;
            match again {
                None => return,
                Some(false) => break,
                Some(true) => {}
            }

            self.pacer.pause(self.pacing.roll()).await;
            let rolled = self
                .with_ai_turn(code, ai_id, |engine, recipients| self.ai_roll(engine, recipients))
                .await;
            match rolled {
                Some(left) => rolls_left = left,
                None => return,
            }
        }

        let pending = self
            .with_ai_turn(code, ai_id, |engine, recipients| {
                engine.finish_rolling();
                self.send_state(recipients, engine);
                engine
                    .state()
                    .pending_actions
                    .iter()
                    .map(|a| a.die_index)
                    .collect::<Vec<_>>()
            })
            .await;
        let Some(pending) = pending else {
            return;
        };

        self.pacer.pause(self.pacing.think()).await;
        for die_index in pending {
            let picked = self
                .with_ai_turn(code, ai_id, |engine, recipients| {
                    let state = engine.get_state();
                    let action = state.pending_actions.iter().find(|a| a.die_index == die_index)?;
                    let target = self
                        .strategy
                        .select_target(action.face, state.current_player(), &state)?;
                    if let Err(err) = engine.select_target(die_index, &target) {
                        warn!(room_code = code, die_index, error = %err, "AI target rejected");
                        return None;
                    }
                    debug!(room_code = code, die_index, target_id = %target, "AI selected target");
                    self.send_state(recipients, engine);
                    Some(())
                })
                .await;
            match picked {
                None => return,
                Some(None) => {}
                Some(Some(())) => self.pacer.pause(self.pacing.target()).await,
            }
        }

        self.pacer.pause(self.pacing.end_turn()).await;
        self.with_ai_turn(code, ai_id, |engine, recipients| {
            self.finish_turn(code, engine, recipients)
        })
        .await;
    }

    /// Roll for an AI seat. Returns the rolls left, zero if the roll failed.
    fn ai_roll(&self, engine: &mut TurnEngine, recipients: &[String]) -> u8 {
        match self.roll(recipients, engine) {
            Ok(()) => engine.state().rolls_remaining,
            Err(err) => {
                warn!(room_code = %engine.state().room_code, error = %err, "AI could not roll");
                0
            }
        }
    }

    fn send_state(&self, recipients: &[String], engine: &TurnEngine) {
        self.broadcast(
            recipients,
            &ServerMessage::GameState {
                state: engine.get_state(),
            },
        );
    }

    fn broadcast_state(&self, seat: &Seat<'_>) {
        self.send_state(&seat.recipients, &*seat.engine);
    }

    fn broadcast_room(&self, rooms: &RoomRegistry, code: &str, message: ServerMessage) {
        if let Some(room) = rooms.room(code) {
            self.broadcast(&recipients(room), &message);
        }
    }

    fn broadcast_lobby(&self, rooms: &RoomRegistry, code: &str) {
        let message = ServerMessage::LobbyState {
            players: rooms.players_in_room(code),
            can_start: rooms.can_start_game(code),
        };
        self.broadcast_room(rooms, code, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameRules, ServerConfig};
    use crate::state::dice::DiceFace;
    use crate::state::engine::{GamePhase, WinReason};
    use crate::state::player::PlayerStats;
    use crate::test_support;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Semaphore;

    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: StdMutex<Vec<(String, ServerMessage)>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, conn_id: &str, message: ServerMessage) {
            self.sent.lock().unwrap().push((conn_id.to_string(), message));
        }
    }

    impl RecordingTransport {
        fn to(&self, conn_id: &str) -> Vec<ServerMessage> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(to, _)| to == conn_id)
                .map(|(_, msg)| msg.clone())
                .collect()
        }

        fn last_to(&self, conn_id: &str) -> Option<ServerMessage> {
            self.to(conn_id).pop()
        }

        fn count(&self, conn_id: &str, event: &str) -> usize {
            self.to(conn_id)
                .iter()
                .filter(|msg| msg.event_name() == event)
                .count()
        }
    }

    /// Holds every pause until the test hands out permits.
    struct GatePacer {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Pacer for GatePacer {
        async fn pause(&self, _duration: Duration) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
    }

    type TestOrchestrator<P = NoPacer> = Orchestrator<RecordingTransport, P>;

    fn setup() -> TestOrchestrator {
        test_support::init_logging();
        let state = AppState::with_seed(ServerConfig::default(), 21);
        Orchestrator::from_app_state(state, RecordingTransport::default(), NoPacer)
    }

    async fn create<P: Pacer>(orch: &TestOrchestrator<P>, conn: &str) -> String {
        orch.handle(
            conn,
            ClientMessage::CreateRoom {
                player_name: "Anne".to_string(),
            },
        )
        .await;
        orch.rooms().await.room_code_for(conn).unwrap().to_string()
    }

    async fn join(orch: &TestOrchestrator, conn: &str, code: &str) {
        orch.handle(
            conn,
            ClientMessage::JoinRoom {
                room_code: code.to_lowercase(),
                player_name: "Mary".to_string(),
            },
        )
        .await;
    }

    /// Wait for the room's AI task to hand the turn back.
    async fn settle<P: Pacer>(orch: &TestOrchestrator<P>, code: &str) {
        while orch.ai_turns_running(code).await {
            tokio::task::yield_now().await;
        }
    }

    async fn current_id<P: Pacer>(orch: &TestOrchestrator<P>, code: &str) -> String {
        orch.rooms().await.engine(code).unwrap().current_player().id.clone()
    }

    /// Two humans, both ready, game started. Returns (code, current, other).
    async fn two_human_game(orch: &TestOrchestrator) -> (String, String, String) {
        let code = create(orch, "sock-1").await;
        join(orch, "sock-2", &code).await;
        orch.handle("sock-1", ClientMessage::SetReady { is_ready: true }).await;
        orch.handle("sock-2", ClientMessage::SetReady { is_ready: true }).await;
        orch.handle("sock-1", ClientMessage::StartGame).await;

        let current = current_id(orch, &code).await;
        let other = if current == "sock-1" { "sock-2" } else { "sock-1" };
        (code, current, other.to_string())
    }

    /// Host plus one AI, game started. Returns the room code.
    async fn solo_game<P: Pacer>(orch: &TestOrchestrator<P>) -> String {
        let code = create(orch, "sock-1").await;
        orch.handle("sock-1", ClientMessage::AddAi).await;
        orch.handle("sock-1", ClientMessage::SetReady { is_ready: true }).await;
        orch.handle("sock-1", ClientMessage::StartGame).await;
        code
    }

    fn error_message(msg: Option<ServerMessage>) -> String {
        match msg {
            Some(ServerMessage::Error { message }) => message,
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_room() {
        let orch = setup();
        let code = create(&orch, "sock-1").await;

        let sent = orch.transport().to("sock-1");
        assert_eq!(sent[0], ServerMessage::RoomCreated { room_code: code.clone() });
        assert!(matches!(
            &sent[1],
            ServerMessage::LobbyState { players, can_start: false } if players.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let orch = setup();
        orch.handle(
            "sock-1",
            ClientMessage::CreateRoom {
                player_name: " \u{7} ".to_string(),
            },
        )
        .await;

        assert_eq!(
            error_message(orch.transport().last_to("sock-1")),
            "Player name cannot be empty"
        );
        assert_eq!(orch.rooms().await.room_count(), 0);
    }

    #[tokio::test]
    async fn test_join_room() {
        let orch = setup();
        let code = create(&orch, "sock-1").await;
        join(&orch, "sock-2", &code).await;

        assert!(orch
            .transport()
            .to("sock-2")
            .contains(&ServerMessage::JoinResult { success: true, error: None }));
        assert_eq!(orch.transport().count("sock-1", "lobby:playerJoined"), 1);
        assert_eq!(orch.rooms().await.players_in_room(&code).len(), 2);
    }

    #[tokio::test]
    async fn test_join_failure_reported_in_result() {
        let orch = setup();
        join(&orch, "sock-2", "ZZZZZ").await;

        assert_eq!(
            orch.transport().last_to("sock-2"),
            Some(ServerMessage::JoinResult {
                success: false,
                error: Some("Room not found".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_host_only_actions() {
        let orch = setup();
        let code = create(&orch, "sock-1").await;
        join(&orch, "sock-2", &code).await;

        orch.handle("sock-2", ClientMessage::AddAi).await;
        assert_eq!(
            error_message(orch.transport().last_to("sock-2")),
            "Only the host can do that"
        );
        orch.handle("sock-2", ClientMessage::StartGame).await;
        assert_eq!(
            error_message(orch.transport().last_to("sock-2")),
            "Only the host can do that"
        );
        assert_eq!(orch.rooms().await.players_in_room(&code).len(), 2);
    }

    #[tokio::test]
    async fn test_start_requires_ready() {
        let orch = setup();
        let code = create(&orch, "sock-1").await;
        orch.handle("sock-1", ClientMessage::AddAi).await;

        orch.handle("sock-1", ClientMessage::StartGame).await;
        assert_eq!(
            error_message(orch.transport().last_to("sock-1")),
            "Not enough ready players"
        );
        assert!(orch.rooms().await.engine(&code).is_none());
    }

    #[tokio::test]
    async fn test_start_with_ai_hands_turn_to_human() {
        let orch = setup();
        let code = solo_game(&orch).await;
        settle(&orch, &code).await;

        {
            let rooms = orch.rooms().await;
            let engine = rooms.engine(&code).unwrap();
            assert_eq!(engine.state().phase, GamePhase::Playing);
            assert!(engine.is_current_player("sock-1"));
        }
        assert_eq!(orch.transport().count("sock-1", "lobby:gameStarting"), 1);
        assert!(orch.transport().count("sock-1", "game:state") >= 1);
        assert!(!orch.ai_turns_running(&code).await);
    }

    #[tokio::test]
    async fn test_not_your_turn() {
        let orch = setup();
        let (code, _, other) = two_human_game(&orch).await;

        orch.handle(&other, ClientMessage::Roll).await;
        assert_eq!(
            error_message(orch.transport().last_to(&other)),
            "It is not your turn"
        );
        assert_eq!(orch.rooms().await.engine(&code).unwrap().state().rolls_remaining, 3);
    }

    #[tokio::test]
    async fn test_roll_broadcasts() {
        let orch = setup();
        let (code, current, other) = two_human_game(&orch).await;

        orch.handle(&current, ClientMessage::Roll).await;

        assert_eq!(orch.transport().count(&other, "game:diceRolled"), 1);
        assert_eq!(orch.rooms().await.engine(&code).unwrap().state().rolls_remaining, 2);

        for _ in 0..3 {
            orch.handle(&current, ClientMessage::Roll).await;
        }
        let last = error_message(orch.transport().last_to(&current));
        assert!(last == "No rolls remaining" || last == "Rolling is over for this turn");
    }

    #[tokio::test]
    async fn test_end_turn_needs_a_roll() {
        let orch = setup();
        let (code, current, _) = two_human_game(&orch).await;

        orch.handle(&current, ClientMessage::EndTurn).await;
        assert_eq!(
            error_message(orch.transport().last_to(&current)),
            "Roll the dice first"
        );
        orch.handle(&current, ClientMessage::FinishRolling).await;
        assert_eq!(
            error_message(orch.transport().last_to(&current)),
            "Roll the dice first"
        );
        assert_eq!(orch.rooms().await.engine(&code).unwrap().state().turn_number, 1);
    }

    #[tokio::test]
    async fn test_lock_dice_validation() {
        let orch = setup();
        let (code, current, _) = two_human_game(&orch).await;

        orch.handle(
            &current,
            ClientMessage::LockDice {
                dice_indices: json!([0, 9]),
            },
        )
        .await;
        assert_eq!(
            error_message(orch.transport().last_to(&current)),
            "Dice indices must be integers between 0 and 5"
        );

        orch.handle(
            &current,
            ClientMessage::LockDice {
                dice_indices: json!([1, 4]),
            },
        )
        .await;
        let locked: Vec<usize> = orch
            .rooms()
            .await
            .engine(&code)
            .unwrap()
            .state()
            .dice
            .iter()
            .filter(|d| d.locked)
            .map(|d| d.id)
            .collect();
        assert_eq!(locked, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_targets_then_end_turn() {
        let orch = setup();
        let (code, current, other) = two_human_game(&orch).await;
        use DiceFace::*;
        orch.rooms()
            .await
            .engine_mut(&code)
            .unwrap()
            .roll_with_faces([Cutlass, Shield, Shield, Shield, Shield, Shield])
            .unwrap();
        orch.handle(&current, ClientMessage::FinishRolling).await;

        orch.handle(&current, ClientMessage::EndTurn).await;
        assert_eq!(
            error_message(orch.transport().last_to(&current)),
            "Select targets for all attacks and steals first"
        );

        let select = |target: &str| ClientMessage::SelectTarget {
            die_index: 0,
            target_player_id: target.to_string(),
        };
        orch.handle(&current, select(&current)).await;
        assert_eq!(
            error_message(orch.transport().last_to(&current)),
            "Invalid target selection"
        );
        orch.handle(&current, select("ghost")).await;
        assert_eq!(
            error_message(orch.transport().last_to(&current)),
            "Invalid target selection"
        );

        orch.handle(&current, select(&other)).await;
        orch.handle(&current, ClientMessage::EndTurn).await;

        {
            let rooms = orch.rooms().await;
            let engine = rooms.engine(&code).unwrap();
            assert_eq!(engine.state().player(&other).unwrap().lives, 9);
            assert!(engine.is_current_player(&other));
        }
        assert_eq!(
            orch.transport().last_to(&other),
            Some(ServerMessage::TurnChanged {
                current_player_index: 1
            })
        );
    }

    #[tokio::test]
    async fn test_win_then_reset() {
        let orch = setup();
        let (code, current, other) = two_human_game(&orch).await;
        let host = "sock-1";

        {
            let mut rooms = orch.rooms().await;
            let engine = rooms.engine_mut(&code).unwrap();
            engine
                .set_player_stats(&current, PlayerStats { doubloons: 20, lives: 10, shields: 0 })
                .unwrap();
            engine.roll_with_faces([DiceFace::Doubloon; 6]).unwrap();
        }

        orch.handle(host, ClientMessage::ResetGame).await;
        assert_eq!(
            error_message(orch.transport().last_to(host)),
            "Game already in progress"
        );

        orch.handle(&current, ClientMessage::EndTurn).await;
        assert!(orch.transport().to(&other).contains(&ServerMessage::GameEnded {
            winner_id: current.clone(),
            reason: WinReason::Riches,
        }));

        orch.handle(&current, ClientMessage::Roll).await;
        assert_eq!(error_message(orch.transport().last_to(&current)), "The game is over");

        orch.handle(host, ClientMessage::ResetGame).await;
        {
            let rooms = orch.rooms().await;
            let room = rooms.room(&code).unwrap();
            assert!(!room.has_active_game());
            assert!(room.players.iter().all(|p| p.doubloons == 5 && !p.is_ready));
        }
        assert!(matches!(
            orch.transport().last_to(host),
            Some(ServerMessage::LobbyState { can_start: false, .. })
        ));
    }

    #[tokio::test]
    async fn test_ai_plays_after_human() {
        let orch = setup();
        let code = solo_game(&orch).await;
        settle(&orch, &code).await;

        orch.rooms()
            .await
            .engine_mut(&code)
            .unwrap()
            .roll_with_faces([DiceFace::Shield; 6])
            .unwrap();
        orch.handle("sock-1", ClientMessage::EndTurn).await;
        settle(&orch, &code).await;

        {
            let rooms = orch.rooms().await;
            let engine = rooms.engine(&code).unwrap();
            assert!(engine.is_current_player("sock-1"));
            assert!(engine.state().turn_number >= 3);
        }
        assert!(orch.transport().count("sock-1", "game:diceRolled") >= 1);
        assert!(orch.transport().count("sock-1", "game:turnChanged") >= 2);
    }

    #[tokio::test]
    async fn test_paused_ai_does_not_hold_other_rooms() {
        test_support::init_logging();
        let gate = Arc::new(Semaphore::new(0));
        let orch = Orchestrator::new(
            RoomRegistry::with_seed(GameRules::default(), 21),
            RecordingTransport::default(),
            GatePacer {
                gate: Arc::clone(&gate),
            },
            AiPacing::default(),
        );

        let code = solo_game(&orch).await;
        if current_id(&orch, &code).await == "sock-1" {
            orch.rooms()
                .await
                .engine_mut(&code)
                .unwrap()
                .roll_with_faces([DiceFace::Shield; 6])
                .unwrap();
            orch.handle("sock-1", ClientMessage::EndTurn).await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // The AI is parked in its first pause.
        assert!(orch.ai_turns_running(&code).await);
        let turn = {
            let rooms = orch.rooms().await;
            let engine = rooms.engine(&code).unwrap();
            assert!(!engine.is_current_player("sock-1"));
            assert_eq!(engine.state().rolls_remaining, 3);
            engine.state().turn_number
        };

        let other = create(&orch, "sock-9").await;
        orch.handle("sock-9", ClientMessage::SetReady { is_ready: true }).await;
        assert_eq!(orch.transport().count("sock-9", "lobby:state"), 2);
        assert!(orch.rooms().await.room(&other).unwrap().all_ready());

        // A second request cannot start another AI task for the room.
        orch.handle("sock-1", ClientMessage::ListLobbies).await;
        gate.add_permits(1_000);
        settle(&orch, &code).await;

        let rooms = orch.rooms().await;
        let engine = rooms.engine(&code).unwrap();
        assert!(engine.is_current_player("sock-1"));
        assert_eq!(engine.state().turn_number, turn + 1);
    }

    #[tokio::test]
    async fn test_list_lobbies() {
        let orch = setup();
        let code = create(&orch, "sock-1").await;
        orch.handle("browser", ClientMessage::ListLobbies).await;

        match orch.transport().last_to("browser") {
            Some(ServerMessage::Lobbies { lobbies }) => {
                assert_eq!(lobbies.len(), 1);
                assert_eq!(lobbies[0].code, code);
            }
            other => panic!("expected lobbies, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_and_reconnect() {
        let orch = setup();
        let (code, current, other) = two_human_game(&orch).await;

        orch.handle_disconnect(&other).await;
        assert_eq!(
            orch.transport().last_to(&current),
            Some(ServerMessage::PlayerLeft {
                player_id: other.clone()
            })
        );

        orch.handle(
            "sock-new",
            ClientMessage::Reconnect {
                room_code: code.to_lowercase(),
                player_id: other.clone(),
            },
        )
        .await;
        assert!(matches!(
            orch.transport().last_to("sock-new"),
            Some(ServerMessage::GameState { .. })
        ));
        assert!(orch
            .rooms()
            .await
            .engine(&code)
            .unwrap()
            .state()
            .player("sock-new")
            .unwrap()
            .is_connected);
    }

    #[tokio::test]
    async fn test_lobby_disconnect_updates_room() {
        let orch = setup();
        let code = create(&orch, "sock-1").await;
        join(&orch, "sock-2", &code).await;

        orch.handle_disconnect("sock-1").await;
        assert!(orch.rooms().await.is_host(&code, "sock-2"));
        assert!(matches!(
            orch.transport().last_to("sock-2"),
            Some(ServerMessage::LobbyState { players, .. }) if players.len() == 1
        ));
    }
}
