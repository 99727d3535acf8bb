use serde_json::{json, Value};

/// Frames are JSON arrays of events, even for a single event. A named event
/// is `[name, data]` or `[name, data, ackId]`; an ack reply is
/// `[ackId, [errorOrNull, resultOrNull]]`. Ack ids are positive integers,
/// monotonic per sender.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Named {
        name: String,
        data: Value,
        ack_id: Option<u64>,
    },
    Ack {
        ack_id: u64,
        error: Option<String>,
        result: Value,
    },
}

impl Event {
    pub fn named(name: &str, data: Value) -> Self {
        Event::Named {
            name: name.to_string(),
            data,
            ack_id: None,
        }
    }

    pub fn ack(ack_id: u64, error: Option<&str>, result: Value) -> Self {
        Event::Ack {
            ack_id,
            error: error.map(|code| code.to_string()),
            result,
        }
    }
}

pub fn encode_frame(events: &[Event]) -> String {
    let encoded: Vec<Value> = events
        .iter()
        .map(|event| match event {
            Event::Named {
                name,
                data,
                ack_id: Some(id),
            } => json!([name, data, id]),
            Event::Named {
                name,
                data,
                ack_id: None,
            } => json!([name, data]),
            Event::Ack {
                ack_id,
                error,
                result,
            } => json!([ack_id, [error, result]]),
        })
        .collect();
    Value::Array(encoded).to_string()
}

pub fn decode_frame(text: &str) -> Option<Vec<Event>> {
    let value: Value = serde_json::from_str(text).ok()?;
    let entries = value.as_array()?;
    let mut events = Vec::with_capacity(entries.len());
    for entry in entries {
        events.push(decode_event(entry)?);
    }
    Some(events)
}

fn decode_event(entry: &Value) -> Option<Event> {
    let parts = entry.as_array()?;
    let head = parts.first()?;
    if let Some(name) = head.as_str() {
        let data = parts.get(1).cloned().unwrap_or(Value::Null);
        let ack_id = match parts.get(2) {
            Some(value) => Some(value.as_u64().filter(|id| *id > 0)?),
            None => None,
        };
        return Some(Event::Named {
            name: name.to_string(),
            data,
            ack_id,
        });
    }
    let ack_id = head.as_u64().filter(|id| *id > 0)?;
    let payload = parts.get(1).and_then(Value::as_array);
    let error = payload
        .and_then(|pair| pair.first())
        .and_then(Value::as_str)
        .map(str::to_string);
    let result = payload
        .and_then(|pair| pair.get(1))
        .cloned()
        .unwrap_or(Value::Null);
    Some(Event::Ack {
        ack_id,
        error,
        result,
    })
}

/// Positions and angles travel as centiunit integers.
pub const COMPRESS_PRECISION: f64 = 100.0;

pub fn compress(value: f64) -> i64 {
    (value * COMPRESS_PRECISION + 0.5).floor() as i64
}

pub fn decompress(value: i64) -> f64 {
    value as f64 / COMPRESS_PRECISION
}

/// Short string codes surfaced as the error element of an ack tuple.
pub mod error_code {
    pub const NAME_TAKEN: &str = "name_taken";
    pub const ROOM_NOT_FOUND: &str = "room_not_found";
    pub const ROOM_FULL: &str = "room_full";
    pub const ROOM_CLOSED: &str = "room_closed";
    pub const NOT_IN_ROOM: &str = "not_in_room";
    pub const NOT_LEADER: &str = "not_leader";
    pub const BAD_INPUT: &str = "bad_input";
    pub const NOT_ENOUGH_PLAYERS: &str = "not_enough_players";
    pub const DISCONNECTED: &str = "disconnected";
    pub const INTERNAL: &str = "internal";
}
