use rand::seq::SliceRandom;

pub const MAX_PLAYER_NAME_LENGTH: usize = 25;
pub const MAX_ROOM_NAME_LENGTH: usize = 25;

const ROOM_ADJECTIVES: [&str; 19] = [
    "awesome",
    "amazing",
    "great",
    "fantastic",
    "super",
    "admirable",
    "famous",
    "fine",
    "gigantic",
    "grand",
    "marvelous",
    "mighty",
    "outstanding",
    "splendid",
    "wonderful",
    "big",
    "smashing",
    "sensational",
    "electric",
];

const ROOM_NOUNS: [&str; 18] = [
    "game",
    "adventure",
    "fun zone",
    "arena",
    "party",
    "tournament",
    "league",
    "gala",
    "gathering",
    "bunch",
    "fight",
    "battle",
    "conflict",
    "encounter",
    "clash",
    "combat",
    "confrontation",
    "challenge",
];

pub fn sanitize_player_name(name: &str, fallback: &str) -> String {
    let cleaned = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return fallback.to_string();
    }
    cleaned.chars().take(MAX_PLAYER_NAME_LENGTH).collect()
}

pub fn sanitize_room_name(name: &str) -> String {
    let cleaned = name.split_whitespace().collect::<Vec<_>>().join(" ");
    cleaned.chars().take(MAX_ROOM_NAME_LENGTH).collect()
}

/// Room names collide case-insensitively.
pub fn normalize_room_name(name: &str) -> String {
    sanitize_room_name(name).to_lowercase()
}

pub fn random_room_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ROOM_ADJECTIVES.choose(&mut rng).unwrap_or(&"great");
    let noun = ROOM_NOUNS.choose(&mut rng).unwrap_or(&"arena");
    format!("The {adjective} {noun}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_name_collapses_whitespace_and_truncates() {
        assert_eq!(sanitize_player_name("  Alice   B  ", "Player"), "Alice B");
        assert_eq!(sanitize_player_name("   ", "Player"), "Player");
        let long = "x".repeat(60);
        assert_eq!(
            sanitize_player_name(&long, "Player").len(),
            MAX_PLAYER_NAME_LENGTH
        );
    }

    #[test]
    fn room_names_normalize_case_insensitively() {
        assert_eq!(normalize_room_name("  The  Lobby "), "the lobby");
        assert_eq!(normalize_room_name("LOBBY"), normalize_room_name("lobby"));
    }

    #[test]
    fn random_room_name_fits_the_length_cap() {
        for _ in 0..32 {
            let name = sanitize_room_name(&random_room_name());
            assert!(!name.is_empty());
            assert!(name.len() <= MAX_ROOM_NAME_LENGTH);
        }
    }
}
