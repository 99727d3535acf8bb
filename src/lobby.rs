use crate::game::room::{Room, RoomConfig};
use crate::protocol::{decode_frame, error_code, Event};
use crate::shared::names::{normalize_room_name, random_room_name, sanitize_room_name};
use crate::shared::time::now_millis;
use crate::transport::session::Session;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The one structure shared across rooms: the room registry, the session
/// registry and the session-to-room membership map. Each entry touch is a
/// short lock-free or shard-locked operation; room state itself is never
/// reachable from here without going through the room's own mutex.
#[derive(Debug)]
pub struct Lobby {
    rooms: DashMap<String, Arc<Room>>,
    sessions: DashMap<String, Arc<Session>>,
    memberships: DashMap<String, Arc<Room>>,
    next_session_id: AtomicU64,
}

impl Lobby {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            sessions: DashMap::new(),
            memberships: DashMap::new(),
            next_session_id: AtomicU64::new(1),
        })
    }

    pub fn open_session(&self) -> (Arc<Session>, mpsc::Receiver<Event>) {
        let id = format!("S{}", self.next_session_id.fetch_add(1, Ordering::SeqCst));
        let (session, rx) = Session::new(id);
        self.sessions
            .insert(session.id.clone(), Arc::clone(&session));
        (session, rx)
    }

    pub async fn close_session(&self, session: &Arc<Session>) {
        session.mark_closed();
        self.sessions.remove(&session.id);
        if let Some((_, room)) = self.memberships.remove(&session.id) {
            room.leave(self, &session.id).await;
            if room.is_closed().await {
                self.retire_room(&room);
            }
        }
        tracing::info!(session = %session.id, "session closed");
    }

    pub fn broadcast(&self, name: &str, data: Value) {
        for entry in self.sessions.iter() {
            let session = entry.value();
            if session.is_identified() {
                session.push(name, data.clone());
            }
        }
    }

    /// Drop a closed room from the registry. Removal is by identity, not
    /// name, so a freshly recreated room with the same name survives the
    /// old room's retirement.
    pub fn retire_room(&self, room: &Arc<Room>) {
        let removed = match self.rooms.entry(normalize_room_name(&room.name)) {
            dashmap::mapref::entry::Entry::Occupied(entry) if Arc::ptr_eq(entry.get(), room) => {
                entry.remove();
                true
            }
            _ => false,
        };
        if removed {
            self.broadcast("room:close", json!({ "name": room.name }));
            tracing::info!(room = %room.name, "room closed");
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Decode one inbound frame and dispatch its events in order. Returns
    /// false once the session should be dropped.
    pub async fn handle_frame(self: &Arc<Self>, session: &Arc<Session>, text: &str) -> bool {
        let Some(events) = decode_frame(text) else {
            return true;
        };
        for event in events {
            self.dispatch(session, event).await;
        }
        session.is_connected()
    }

    async fn dispatch(self: &Arc<Self>, session: &Arc<Session>, event: Event) {
        match event {
            Event::Ack { ack_id, .. } => {
                // No server feature awaits a client ack today; the slot in
                // the framing exists for symmetry with the client.
                tracing::debug!(session = %session.id, ack_id, "unsolicited ack reply");
            }
            Event::Named { name, data, ack_id } => {
                let result = self.handle_command(session, &name, &data).await;
                match (ack_id, result) {
                    (Some(ack_id), Ok(value)) => session.push_ack(ack_id, None, value),
                    (Some(ack_id), Err(code)) => {
                        session.push_ack(ack_id, Some(code), Value::Null)
                    }
                    (None, Err(code)) => {
                        tracing::debug!(session = %session.id, event = %name, code, "rejected");
                    }
                    (None, Ok(_)) => {}
                }
            }
        }
    }

    async fn handle_command(
        self: &Arc<Self>,
        session: &Arc<Session>,
        name: &str,
        data: &Value,
    ) -> Result<Value, &'static str> {
        match name {
            "whoami" => {
                session.identify();
                tracing::info!(session = %session.id, "session identified");
                Ok(json!(session.id))
            }
            "pong" => {
                let echoed = data.as_i64().ok_or(error_code::BAD_INPUT)?;
                let latency = (now_millis() - echoed).max(0) / 2;
                session.set_latency(latency);
                session.push("latency", json!(latency));
                Ok(Value::Null)
            }
            "room:fetch" => Ok(Value::Array(self.room_summaries().await)),
            "room:create" => self.create_room(data).await,
            "room:join" => self.join_room(session, data).await,
            "room:leave" => {
                let (_, room) = self
                    .memberships
                    .remove(&session.id)
                    .ok_or(error_code::NOT_IN_ROOM)?;
                room.leave(self, &session.id).await;
                if room.is_closed().await {
                    self.retire_room(&room);
                }
                Ok(Value::Null)
            }
            "player:ready" => {
                let ready = data
                    .as_bool()
                    .or_else(|| data.get("ready").and_then(Value::as_bool))
                    .ok_or(error_code::BAD_INPUT)?;
                self.member_room(session)?.set_ready(&session.id, ready).await
            }
            "room:config" => {
                let key = data
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or(error_code::BAD_INPUT)?;
                let value = data.get("value").unwrap_or(&Value::Null);
                self.member_room(session)?
                    .set_config(self, &session.id, key, value)
                    .await
            }
            "room:start" => {
                self.member_room(session)?
                    .start_game(self, &session.id)
                    .await
            }
            "player:move" => {
                let turn = data
                    .get("move")
                    .and_then(Value::as_i64)
                    .ok_or(error_code::BAD_INPUT)?;
                if !(-1..=1).contains(&turn) {
                    return Err(error_code::BAD_INPUT);
                }
                let avatar = data.get("avatar").and_then(Value::as_str);
                self.member_room(session)?
                    .set_move(&session.id, avatar, turn as i8)
                    .await
            }
            _ => Err(error_code::BAD_INPUT),
        }
    }

    fn member_room(&self, session: &Arc<Session>) -> Result<Arc<Room>, &'static str> {
        self.memberships
            .get(&session.id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(error_code::NOT_IN_ROOM)
    }

    async fn create_room(self: &Arc<Self>, data: &Value) -> Result<Value, &'static str> {
        let config = data
            .get("config")
            .map(RoomConfig::from_value)
            .unwrap_or_default();
        let requested = sanitize_room_name(data.get("name").and_then(Value::as_str).unwrap_or(""));
        let name = if requested.is_empty() {
            let mut candidate = sanitize_room_name(&random_room_name());
            while self.rooms.contains_key(&normalize_room_name(&candidate)) {
                candidate = sanitize_room_name(&random_room_name());
            }
            candidate
        } else {
            requested
        };

        let key = normalize_room_name(&name);
        let room = match self.rooms.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(error_code::NAME_TAKEN);
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let room = Room::new(name.clone(), config);
                entry.insert(Arc::clone(&room));
                room
            }
        };
        room.start_loop(Arc::clone(self));
        let summary = room.summary().await;
        tracing::info!(room = %name, "room created");
        self.broadcast("room:open", summary.clone());
        Ok(summary)
    }

    pub async fn room_summaries(&self) -> Vec<Value> {
        let rooms: Vec<Arc<Room>> = self
            .rooms
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            summaries.push(room.summary().await);
        }
        summaries
    }

    async fn join_room(
        self: &Arc<Self>,
        session: &Arc<Session>,
        data: &Value,
    ) -> Result<Value, &'static str> {
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .ok_or(error_code::BAD_INPUT)?;
        let player_name = data
            .get("playerName")
            .and_then(Value::as_str)
            .ok_or(error_code::BAD_INPUT)?;
        let color = data.get("color").and_then(Value::as_str);

        let room = self
            .rooms
            .get(&normalize_room_name(name))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(error_code::ROOM_NOT_FOUND)?;

        // A player is owned by exactly one room at a time.
        if let Some(current) = self.memberships.get(&session.id) {
            if Arc::ptr_eq(current.value(), &room) {
                return Err(error_code::BAD_INPUT);
            }
        }
        if let Some((_, previous)) = self.memberships.remove(&session.id) {
            previous.leave(self, &session.id).await;
            if previous.is_closed().await {
                self.retire_room(&previous);
            }
        }

        let state = room
            .join(self, Arc::clone(session), player_name, color)
            .await?;
        self.memberships.insert(session.id.clone(), room);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Event;

    fn drain(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn ack_of(events: &[Event], id: u64) -> Option<(Option<String>, Value)> {
        events.iter().find_map(|event| match event {
            Event::Ack {
                ack_id,
                error,
                result,
            } if *ack_id == id => Some((error.clone(), result.clone())),
            _ => None,
        })
    }

    #[tokio::test]
    async fn whoami_hands_out_monotonic_session_ids() {
        let lobby = Lobby::new();
        let (s1, mut rx1) = lobby.open_session();
        let (s2, mut rx2) = lobby.open_session();
        lobby.handle_frame(&s1, r#"[["whoami",null,1]]"#).await;
        lobby.handle_frame(&s2, r#"[["whoami",null,1]]"#).await;

        let (error, result) = ack_of(&drain(&mut rx1), 1).expect("ack");
        assert!(error.is_none());
        assert_eq!(result, json!("S1"));
        let (error, result) = ack_of(&drain(&mut rx2), 1).expect("ack");
        assert!(error.is_none());
        assert_eq!(result, json!("S2"));
    }

    #[tokio::test]
    async fn create_join_leave_frees_the_room_name() {
        let lobby = Lobby::new();
        let (session, mut rx) = lobby.open_session();
        lobby.handle_frame(&session, r#"[["whoami",null,1]]"#).await;

        lobby
            .handle_frame(
                &session,
                r#"[["room:create",{"name":"lobby","config":{"maxPlayers":4}},2]]"#,
            )
            .await;
        let events = drain(&mut rx);
        let (error, summary) = ack_of(&events, 2).expect("create ack");
        assert!(error.is_none());
        assert_eq!(summary["name"], json!("lobby"));
        assert_eq!(summary["players"], json!(0));
        assert_eq!(lobby.room_count(), 1);

        lobby
            .handle_frame(&session, r#"[["room:create",{"name":"LOBBY"},3]]"#)
            .await;
        let (error, _) = ack_of(&drain(&mut rx), 3).expect("duplicate ack");
        assert_eq!(error.as_deref(), Some(error_code::NAME_TAKEN));

        lobby
            .handle_frame(
                &session,
                r##"[["room:join",{"name":"lobby","playerName":"Alice","color":"#ff6b6b"},4]]"##,
            )
            .await;
        let (error, state) = ack_of(&drain(&mut rx), 4).expect("join ack");
        assert!(error.is_none());
        assert_eq!(state["players"].as_array().unwrap().len(), 1);
        assert_eq!(state["leader"], json!(session.id));

        lobby
            .handle_frame(&session, r#"[["room:leave",null,5]]"#)
            .await;
        let (error, _) = ack_of(&drain(&mut rx), 5).expect("leave ack");
        assert!(error.is_none());
        assert_eq!(lobby.room_count(), 0, "last player leaving closes the room");

        lobby
            .handle_frame(&session, r#"[["room:create",{"name":"lobby"},6]]"#)
            .await;
        let (error, _) = ack_of(&drain(&mut rx), 6).expect("recreate ack");
        assert!(error.is_none(), "the name is free again");
    }

    #[tokio::test]
    async fn unnamed_rooms_get_a_generated_name() {
        let lobby = Lobby::new();
        let (session, mut rx) = lobby.open_session();
        lobby.handle_frame(&session, r#"[["whoami",null,1]]"#).await;
        lobby
            .handle_frame(&session, r#"[["room:create",{},2]]"#)
            .await;
        let (error, summary) = ack_of(&drain(&mut rx), 2).expect("create ack");
        assert!(error.is_none());
        let name = summary["name"].as_str().unwrap();
        assert!(name.starts_with("The "), "generated name, got {name}");
    }

    #[tokio::test]
    async fn commands_outside_a_room_are_rejected() {
        let lobby = Lobby::new();
        let (session, mut rx) = lobby.open_session();
        lobby.handle_frame(&session, r#"[["whoami",null,1]]"#).await;

        lobby
            .handle_frame(&session, r#"[["player:ready",true,2]]"#)
            .await;
        let (error, _) = ack_of(&drain(&mut rx), 2).expect("ready ack");
        assert_eq!(error.as_deref(), Some(error_code::NOT_IN_ROOM));

        lobby
            .handle_frame(
                &session,
                r#"[["room:join",{"name":"nowhere","playerName":"Alice"},3]]"#,
            )
            .await;
        let (error, _) = ack_of(&drain(&mut rx), 3).expect("join ack");
        assert_eq!(error.as_deref(), Some(error_code::ROOM_NOT_FOUND));

        lobby
            .handle_frame(&session, r#"[["no:such:event",null,4]]"#)
            .await;
        let (error, _) = ack_of(&drain(&mut rx), 4).expect("unknown ack");
        assert_eq!(error.as_deref(), Some(error_code::BAD_INPUT));
    }

    #[tokio::test(start_paused = true)]
    async fn a_full_match_flows_from_lobby_to_live_round() {
        let lobby = Lobby::new();
        let (alice, mut rx_a) = lobby.open_session();
        let (bob, mut rx_b) = lobby.open_session();
        lobby.handle_frame(&alice, r#"[["whoami",null,1]]"#).await;
        lobby.handle_frame(&bob, r#"[["whoami",null,1]]"#).await;
        lobby
            .handle_frame(&alice, r#"[["room:create",{"name":"arena"},2]]"#)
            .await;
        lobby
            .handle_frame(
                &alice,
                r##"[["room:join",{"name":"arena","playerName":"Alice","color":"#ff6b6b"},3]]"##,
            )
            .await;
        lobby
            .handle_frame(&bob, r#"[["room:join",{"name":"arena","playerName":"Bob"},4]]"#)
            .await;
        lobby.handle_frame(&alice, r#"[["player:ready",true]]"#).await;
        lobby.handle_frame(&bob, r#"[["player:ready",true]]"#).await;
        lobby
            .handle_frame(&alice, r#"[["room:start",null,5]]"#)
            .await;

        let events = drain(&mut rx_a);
        let (error, _) = ack_of(&events, 5).expect("start ack");
        assert!(error.is_none());
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Named { name, .. } if name == "game:start"
        )));
        drain(&mut rx_b);

        // Warmup is three seconds; afterwards the round announces itself.
        tokio::time::sleep(std::time::Duration::from_millis(3200)).await;
        let events = drain(&mut rx_a);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Named { name, .. } if name == "round:new"
        )));

        // Steering inputs flow in; the position stream flows out to both.
        lobby
            .handle_frame(&alice, r#"[["player:move",{"move":1}]]"#)
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        for rx in [&mut rx_a, &mut rx_b] {
            let events = drain(rx);
            assert!(events.iter().any(|event| matches!(
                event,
                Event::Named { name, .. } if name == "position"
            )));
        }

        // A mid-game leaver is announced to the remaining player.
        lobby.close_session(&alice).await;
        let events = drain(&mut rx_b);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Named { name, .. } if name == "game:leave"
        )));
    }

    #[tokio::test]
    async fn pong_measures_half_the_round_trip() {
        let lobby = Lobby::new();
        let (session, mut rx) = lobby.open_session();
        lobby.handle_frame(&session, r#"[["whoami",null,1]]"#).await;
        let echoed = now_millis() - 100;
        lobby
            .handle_frame(&session, &format!(r#"[["pong",{echoed}]]"#))
            .await;
        let latency = session.latency();
        assert!((45..=80).contains(&latency), "latency {latency}");
        let events = drain(&mut rx);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Named { name, .. } if name == "latency"
        )));
    }
}
