use super::bonus::BonusKind;
use super::constants::{
    DEFAULT_MAX_PLAYERS, EMPTY_ROOM_TTL_MS, MIN_PLAYERS_TO_START, SPEED_MAX, SPEED_MIN,
    TICK_INTERVAL_US,
};
use super::game::Game;
use crate::lobby::Lobby;
use crate::protocol::error_code;
use crate::shared::colors::color_or_random;
use crate::shared::names::sanitize_player_name;
use crate::shared::time::now_millis;
use crate::transport::session::Session;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;


/// A named lobby that wraps at most one running game. All state lives
/// behind one mutex, so every mutation for this room is serialized: the
/// tick task and the inbound command handlers never interleave mid-change.
#[derive(Debug)]
pub struct Room {
    pub name: String,
    state: Mutex<RoomState>,
    running: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub color: String,
    pub ready: bool,
}

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub open: bool,
    pub max_players: usize,
    pub max_score: Option<i64>,
    pub speed: f64,
    pub bonuses: Vec<(BonusKind, bool)>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            open: true,
            max_players: DEFAULT_MAX_PLAYERS,
            max_score: None,
            speed: 1.0,
            bonuses: BonusKind::ALL.iter().map(|kind| (*kind, true)).collect(),
        }
    }
}

impl RoomConfig {
    pub fn from_value(value: &Value) -> Self {
        let mut config = Self::default();
        if let Some(open) = value.get("open").and_then(Value::as_bool) {
            config.open = open;
        }
        if let Some(max_players) = value.get("maxPlayers").and_then(Value::as_u64) {
            config.max_players = (max_players as usize).clamp(1, 32);
        }
        if let Some(max_score) = value.get("maxScore").and_then(Value::as_i64) {
            if max_score > 0 {
                config.max_score = Some(max_score);
            }
        }
        if let Some(speed) = value.get("speed").and_then(Value::as_f64) {
            config.speed = speed.clamp(SPEED_MIN, SPEED_MAX);
        }
        if let Some(bonuses) = value.get("bonuses").and_then(Value::as_object) {
            for (code, enabled) in bonuses {
                if let (Some(kind), Some(enabled)) =
                    (BonusKind::from_code(code), enabled.as_bool())
                {
                    config.set_bonus(kind, enabled);
                }
            }
        }
        config
    }

    pub fn apply(&mut self, key: &str, value: &Value) -> Result<(), &'static str> {
        match key {
            "open" => {
                self.open = value.as_bool().ok_or(error_code::BAD_INPUT)?;
            }
            "maxPlayers" => {
                let count = value.as_u64().ok_or(error_code::BAD_INPUT)?;
                if count == 0 || count > 32 {
                    return Err(error_code::BAD_INPUT);
                }
                self.max_players = count as usize;
            }
            "maxScore" => {
                let score = value.as_i64().ok_or(error_code::BAD_INPUT)?;
                self.max_score = if score > 0 { Some(score) } else { None };
            }
            "speed" => {
                let speed = value.as_f64().ok_or(error_code::BAD_INPUT)?;
                if !speed.is_finite() {
                    return Err(error_code::BAD_INPUT);
                }
                self.speed = speed.clamp(SPEED_MIN, SPEED_MAX);
            }
            _ => {
                let kind = key
                    .strip_prefix("bonus:")
                    .and_then(BonusKind::from_code)
                    .ok_or(error_code::BAD_INPUT)?;
                let enabled = value.as_bool().ok_or(error_code::BAD_INPUT)?;
                self.set_bonus(kind, enabled);
            }
        }
        Ok(())
    }

    fn set_bonus(&mut self, kind: BonusKind, enabled: bool) {
        for entry in &mut self.bonuses {
            if entry.0 == kind {
                entry.1 = enabled;
            }
        }
    }

    pub fn enabled_bonuses(&self) -> Vec<BonusKind> {
        self.bonuses
            .iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn serialize(&self) -> Value {
        let bonuses: serde_json::Map<String, Value> = self
            .bonuses
            .iter()
            .map(|(kind, enabled)| (kind.code().to_string(), json!(enabled)))
            .collect();
        json!({
            "open": self.open,
            "maxPlayers": self.max_players,
            "maxScore": self.max_score,
            "speed": self.speed,
            "bonuses": bonuses,
        })
    }
}

#[derive(Debug)]
pub struct RoomState {
    pub name: String,
    pub config: RoomConfig,
    pub players: Vec<Player>,
    pub sessions: HashMap<String, Arc<Session>>,
    pub leader: Option<String>,
    pub game: Option<Game>,
    pub empty_since: Option<i64>,
    pub closed: bool,
    pub tick_panics: u32,
}

impl Room {
    pub fn new(name: String, config: RoomConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RoomState {
                name: name.clone(),
                config,
                players: Vec::new(),
                sessions: HashMap::new(),
                leader: None,
                game: None,
                empty_since: Some(now_millis()),
                closed: false,
                tick_panics: 0,
            }),
            name,
            running: AtomicBool::new(false),
        })
    }

    /// Spawn the room's tick task once. Late ticks fire back-to-back, but
    /// each advances the simulation by exactly one fixed step.
    pub fn start_loop(self: &Arc<Self>, lobby: Arc<Lobby>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let room = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_micros(TICK_INTERVAL_US));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
            loop {
                interval.tick().await;
                let closed = {
                    let mut state = room.state.lock().await;
                    state.tick(&lobby);
                    state.closed
                };
                if closed {
                    lobby.retire_room(&room);
                    break;
                }
            }
        });
    }

    pub async fn summary(&self) -> Value {
        let state = self.state.lock().await;
        state.summary()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn join(
        &self,
        lobby: &Lobby,
        session: Arc<Session>,
        player_name: &str,
        color: Option<&str>,
    ) -> Result<Value, &'static str> {
        let mut state = self.state.lock().await;
        state.join(lobby, session, player_name, color)
    }

    pub async fn leave(&self, lobby: &Lobby, session_id: &str) {
        let mut state = self.state.lock().await;
        state.remove_session(lobby, session_id);
    }

    pub async fn set_ready(&self, session_id: &str, ready: bool) -> Result<Value, &'static str> {
        let mut state = self.state.lock().await;
        state.set_ready(session_id, ready)
    }

    pub async fn set_config(
        &self,
        lobby: &Lobby,
        session_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<Value, &'static str> {
        let mut state = self.state.lock().await;
        state.set_config(lobby, session_id, key, value)
    }

    pub async fn start_game(&self, lobby: &Lobby, session_id: &str) -> Result<Value, &'static str> {
        let mut state = self.state.lock().await;
        state.start_game(lobby, session_id)
    }

    pub async fn set_move(
        &self,
        session_id: &str,
        avatar: Option<&str>,
        turn: i8,
    ) -> Result<Value, &'static str> {
        let mut state = self.state.lock().await;
        state.set_move(session_id, avatar, turn)
    }
}

impl RoomState {
    pub fn summary(&self) -> Value {
        json!({
            "name": self.name,
            "players": self.players.len(),
            "game": self.game.is_some(),
            "open": self.config.open,
        })
    }

    fn full_state(&self) -> Value {
        json!({
            "name": self.name,
            "open": self.config.open,
            "players": self
                .players
                .iter()
                .map(Self::serialize_player)
                .collect::<Vec<_>>(),
            "config": self.config.serialize(),
            "game": self.game.is_some(),
            "leader": self.leader,
        })
    }

    fn serialize_player(player: &Player) -> Value {
        json!({
            "id": player.id,
            "name": player.name,
            "color": player.color,
            "ready": player.ready,
        })
    }

    fn broadcast(&self, name: &str, data: Value) {
        for session in self.sessions.values() {
            if session.is_identified() {
                session.push(name, data.clone());
            }
        }
    }

    fn player_by_session(&self, session_id: &str) -> Option<&Player> {
        self.players
            .iter()
            .find(|player| player.session_id == session_id)
    }

    fn spectator_count(&self) -> usize {
        self.sessions
            .keys()
            .filter(|session_id| self.player_by_session(session_id.as_str()).is_none())
            .count()
    }

    fn join(
        &mut self,
        lobby: &Lobby,
        session: Arc<Session>,
        player_name: &str,
        color: Option<&str>,
    ) -> Result<Value, &'static str> {
        if self.closed || !self.config.open {
            return Err(error_code::ROOM_CLOSED);
        }
        if self.players.len() >= self.config.max_players {
            return Err(error_code::ROOM_FULL);
        }
        if self.player_by_session(&session.id).is_some() {
            return Err(error_code::BAD_INPUT);
        }
        let name = sanitize_player_name(player_name, "");
        if name.is_empty() {
            return Err(error_code::BAD_INPUT);
        }
        if self
            .players
            .iter()
            .any(|player| player.name.eq_ignore_ascii_case(&name))
        {
            return Err(error_code::NAME_TAKEN);
        }

        let player = Player {
            id: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            name,
            color: color_or_random(color),
            ready: false,
        };
        self.broadcast("room:join", Self::serialize_player(&player));
        self.players.push(player);
        self.sessions.insert(session.id.clone(), Arc::clone(&session));
        self.empty_since = None;

        if self.leader.is_none() {
            self.leader = Some(session.id.clone());
            self.broadcast("room:master", json!(session.id));
        }

        // Mid-game joiners watch the current match and play the next one.
        if let Some(game) = &self.game {
            for event in game.spectate_events() {
                session.push(event.name, event.data);
            }
            let spectators = self.spectator_count();
            self.broadcast("game:spectators", json!(spectators));
        }

        lobby.broadcast("room:players", self.roster_delta());
        Ok(self.full_state())
    }

    fn roster_delta(&self) -> Value {
        json!({ "name": self.name, "players": self.players.len() })
    }

    /// Both explicit `room:leave` and socket close end up here.
    pub fn remove_session(&mut self, lobby: &Lobby, session_id: &str) {
        let player = {
            let Some(index) = self
                .players
                .iter()
                .position(|player| player.session_id == session_id)
            else {
                if self.sessions.remove(session_id).is_some() {
                    self.after_session_left(lobby);
                }
                return;
            };
            self.players.remove(index)
        };
        self.sessions.remove(session_id);

        if let Some(game) = &mut self.game {
            game.remove_player(&player.id);
            let events = game.drain_events();
            for event in events {
                self.broadcast(event.name, event.data);
            }
        }
        self.broadcast("room:leave", json!(player.id));

        if self.leader.as_deref() == Some(session_id) {
            self.leader = self
                .players
                .first()
                .map(|player| player.session_id.clone());
            if let Some(leader) = &self.leader {
                self.broadcast("room:master", json!(leader));
            }
        }

        lobby.broadcast("room:players", self.roster_delta());
        self.after_session_left(lobby);
    }

    fn after_session_left(&mut self, _lobby: &Lobby) {
        if let Some(game) = &self.game {
            if !game.is_over() {
                let spectators = self.spectator_count();
                self.broadcast("game:spectators", json!(spectators));
            }
        }
        // A room dies with its last player; the idle countdown only covers
        // rooms nobody ever joined.
        if self.players.is_empty() && self.sessions.is_empty() {
            self.closed = true;
        }
        if self.sessions.is_empty() && self.empty_since.is_none() {
            self.empty_since = Some(now_millis());
        }
    }

    fn set_ready(&mut self, session_id: &str, ready: bool) -> Result<Value, &'static str> {
        let player_id = {
            let player = self
                .players
                .iter_mut()
                .find(|player| player.session_id == session_id)
                .ok_or(error_code::NOT_IN_ROOM)?;
            player.ready = ready;
            player.id.clone()
        };
        self.broadcast("player:ready", json!([player_id, ready]));
        Ok(Value::Null)
    }

    fn set_config(
        &mut self,
        lobby: &Lobby,
        session_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<Value, &'static str> {
        if self.player_by_session(session_id).is_none() {
            return Err(error_code::NOT_IN_ROOM);
        }
        if self.leader.as_deref() != Some(session_id) {
            return Err(error_code::NOT_LEADER);
        }
        self.config.apply(key, value)?;
        self.broadcast("room:config", json!([key, value]));
        if key == "open" {
            lobby.broadcast(
                "room:config:open",
                json!({ "name": self.name, "open": self.config.open }),
            );
        }
        Ok(Value::Null)
    }

    fn start_game(&mut self, lobby: &Lobby, session_id: &str) -> Result<Value, &'static str> {
        if self.player_by_session(session_id).is_none() {
            return Err(error_code::NOT_IN_ROOM);
        }
        if self.game.is_some() {
            return Err(error_code::BAD_INPUT);
        }
        if self.players.len() < MIN_PLAYERS_TO_START {
            return Err(error_code::NOT_ENOUGH_PLAYERS);
        }
        if self.players.iter().any(|player| !player.ready) {
            return Err(error_code::BAD_INPUT);
        }

        let roster: Vec<(String, String, String)> = self
            .players
            .iter()
            .map(|player| (player.id.clone(), player.name.clone(), player.color.clone()))
            .collect();
        let mut game = Game::new(
            roster,
            self.config.max_score,
            self.config.enabled_bonuses(),
            self.config.speed,
            rand::random(),
        );
        let events = game.drain_events();
        self.game = Some(game);
        for event in events {
            self.broadcast(event.name, event.data);
        }
        tracing::info!(room = %self.name, players = self.players.len(), "game started");
        lobby.broadcast("room:game", json!({ "name": self.name, "game": true }));
        Ok(Value::Null)
    }

    fn set_move(
        &mut self,
        session_id: &str,
        avatar: Option<&str>,
        turn: i8,
    ) -> Result<Value, &'static str> {
        let player_id = self
            .player_by_session(session_id)
            .map(|player| player.id.clone())
            .ok_or(error_code::NOT_IN_ROOM)?;
        if let Some(avatar) = avatar {
            if avatar != player_id {
                return Err(error_code::BAD_INPUT);
            }
        }
        let game = self.game.as_mut().ok_or(error_code::BAD_INPUT)?;
        game.set_turn(&player_id, turn);
        Ok(Value::Null)
    }

    /// One reactor turn: advance the game if one is running, then handle
    /// the empty-room countdown.
    pub fn tick(&mut self, lobby: &Lobby) {
        if let Some(game) = &mut self.game {
            let result = catch_unwind(AssertUnwindSafe(|| {
                game.tick();
                game.drain_events()
            }));
            match result {
                Ok(events) => {
                    for event in events {
                        self.broadcast(event.name, event.data);
                    }
                    if self.game.as_ref().is_some_and(Game::is_over) {
                        self.finish_game(lobby);
                    }
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|text| text.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(room = %self.name, %message, "game tick panicked");
                    self.broadcast(
                        "end",
                        json!({ "winner": null, "reason": error_code::INTERNAL }),
                    );
                    self.game = None;
                    self.reset_players();
                    lobby.broadcast("room:game", json!({ "name": self.name, "game": false }));
                    self.tick_panics += 1;
                    if self.tick_panics > 1 {
                        // Ending the game once is recovery; twice means the
                        // room itself is corrupt.
                        self.broadcast("room:kicked", json!({ "name": self.name }));
                        self.closed = true;
                    }
                }
            }
        }

        if self.sessions.is_empty() {
            let since = *self.empty_since.get_or_insert_with(now_millis);
            if now_millis() - since >= EMPTY_ROOM_TTL_MS {
                self.closed = true;
            }
        } else {
            self.empty_since = None;
        }
    }

    fn finish_game(&mut self, lobby: &Lobby) {
        if let Some(game) = self.game.take() {
            tracing::info!(room = %self.name, winner = ?game.winner, "game over");
        }
        self.reset_players();
        lobby.broadcast("room:game", json!({ "name": self.name, "game": false }));
    }

    fn reset_players(&mut self) {
        for player in &mut self.players {
            player.ready = false;
        }
    }
}
