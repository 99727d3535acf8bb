use rand::Rng;

/// Minimum YIQ-ish brightness so trails stay visible on the dark board.
const BRIGHTNESS_FLOOR: f64 = 0.3;

fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let rest = color.strip_prefix('#')?;
    if rest.len() != 6 || !rest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let r = u8::from_str_radix(&rest[0..2], 16).ok()?;
    let g = u8::from_str_radix(&rest[2..4], 16).ok()?;
    let b = u8::from_str_radix(&rest[4..6], 16).ok()?;
    Some((r, g, b))
}

pub fn validate_color(color: &str) -> bool {
    let Some((r, g, b)) = parse_hex_color(color) else {
        return false;
    };
    let ratio = (r as f64 * 0.4 + g as f64 * 0.5 + b as f64 * 0.3) / 255.0;
    ratio > BRIGHTNESS_FLOOR
}

pub fn random_color() -> String {
    let mut rng = rand::thread_rng();
    loop {
        let color = format!(
            "#{:02x}{:02x}{:02x}",
            rng.gen_range(1..=255u8),
            rng.gen_range(1..=255u8),
            rng.gen_range(1..=255u8)
        );
        if validate_color(&color) {
            return color;
        }
    }
}

/// The supplied color when valid, otherwise a random bright one.
pub fn color_or_random(color: Option<&str>) -> String {
    match color {
        Some(value) if validate_color(value) => value.to_string(),
        _ => random_color(),
    }
}
