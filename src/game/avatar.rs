use super::bonus::ActiveEffect;
use super::constants::{
    DEFAULT_ANGULAR_VELOCITY, DEFAULT_RADIUS, DEFAULT_VELOCITY, GAP_INTERVAL_TICKS, MIN_RADIUS,
    MIN_VELOCITY, PRINT_INTERVAL_TICKS,
};
use rand::Rng;

/// Server-authoritative state for one player's in-game entity. The `Game`
/// drives integration and collisions; this struct owns the per-avatar data
/// and the pure state transitions.
#[derive(Debug, Clone)]
pub struct Avatar {
    pub id: String,
    pub name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    /// Latest steering input, -1, 0 or +1. Older inputs are never replayed.
    pub turn: i8,
    /// World units per second, after bonus modifiers.
    pub velocity: f64,
    /// Radians per second, after bonus modifiers.
    pub angular_velocity: f64,
    pub radius: f64,
    pub invincible: bool,
    pub inverse: bool,
    pub alive: bool,
    /// Cleared when the player leaves; a leaving avatar keeps simulating
    /// until it dies so trails and collisions stay consistent.
    pub present: bool,
    pub score: i64,
    pub round_score: i64,
    pub printing: bool,
    /// Ticks until the next printing flip. Meaningless while inactive.
    pub printing_timeout: u64,
    pub printing_active: bool,
    pub body_id: Option<u64>,
    /// Monotonic numbering for deposited trail bodies, used for the
    /// own-neck grace window.
    pub body_count: u64,
    pub trail_ids: Vec<u64>,
    pub last_print: Option<(f64, f64)>,
    /// A single avatar deposits at most one trail body per tick.
    pub last_deposit_tick: Option<u64>,
    pub effects: Vec<ActiveEffect>,
    pub last_sent_angle: Option<i64>,
}

impl Avatar {
    pub fn new(id: String, name: String, color: String) -> Self {
        Self {
            id,
            name,
            color,
            x: 0.0,
            y: 0.0,
            angle: 0.0,
            turn: 0,
            velocity: DEFAULT_VELOCITY,
            angular_velocity: DEFAULT_ANGULAR_VELOCITY,
            radius: DEFAULT_RADIUS,
            invincible: false,
            inverse: false,
            alive: false,
            present: true,
            score: 0,
            round_score: 0,
            printing: false,
            printing_timeout: 0,
            printing_active: false,
            body_id: None,
            body_count: 0,
            trail_ids: Vec::new(),
            last_print: None,
            last_deposit_tick: None,
            effects: Vec::new(),
            last_sent_angle: None,
        }
    }

    /// Recompute every modifier from defaults and the active effect stack.
    /// Scalars stack multiplicatively, booleans OR-combine, and the turn
    /// rate follows the current speed so fast avatars stay steerable.
    pub fn resolve_effects(&mut self) {
        let mut velocity = DEFAULT_VELOCITY;
        let mut radius_level = 0i32;
        let mut inverse_count = 0u32;
        let mut invincible_count = 0u32;
        for effect in &self.effects {
            velocity *= effect.kind.velocity_factor();
            radius_level += effect.kind.radius_level();
            if effect.kind.inverts_controls() {
                inverse_count += 1;
            }
            if effect.kind.grants_invincibility() {
                invincible_count += 1;
            }
        }
        self.velocity = velocity.max(MIN_VELOCITY);
        self.radius = (DEFAULT_RADIUS * 2f64.powi(radius_level)).max(MIN_RADIUS);
        self.inverse = inverse_count > 0;
        self.invincible = invincible_count > 0;
        let ratio = self.velocity / DEFAULT_VELOCITY;
        self.angular_velocity = ratio * DEFAULT_ANGULAR_VELOCITY + (1.0 / ratio).ln();
    }

    /// One fixed step of steering and integration.
    pub fn integrate(&mut self, dt: f64) {
        let turn = self.turn as f64 * if self.inverse { -1.0 } else { 1.0 };
        self.angle += self.angular_velocity * turn * dt;
        self.x += self.angle.cos() * self.velocity * dt;
        self.y += self.angle.sin() * self.velocity * dt;
    }

    /// The next trail deposit, if the avatar moved far enough: the body goes
    /// at the midpoint between the last printed point and the current
    /// position.
    pub fn due_print_point(&self) -> Option<(f64, f64)> {
        if !self.printing {
            return None;
        }
        match self.last_print {
            None => Some((self.x, self.y)),
            Some((px, py)) => {
                let dx = self.x - px;
                let dy = self.y - py;
                if (dx * dx + dy * dy).sqrt() >= self.radius {
                    Some((px + dx / 2.0, py + dy / 2.0))
                } else {
                    None
                }
            }
        }
    }

    pub fn next_print_timeout(rng: &mut impl Rng, printing: bool) -> u64 {
        let ticks = if printing {
            PRINT_INTERVAL_TICKS * rng.gen_range(0.25..=0.75)
        } else {
            GAP_INTERVAL_TICKS * rng.gen_range(0.5..=1.5)
        };
        ticks.round().max(1.0) as u64
    }

    pub fn start_printing(&mut self, rng: &mut impl Rng) {
        self.printing_active = true;
        self.printing = true;
        self.printing_timeout = Self::next_print_timeout(rng, true);
    }

    pub fn stop_printing(&mut self) {
        self.printing_active = false;
        self.printing = false;
    }

    /// Count the flip timer down; true when printing flipped this tick.
    pub fn step_print_toggle(&mut self, rng: &mut impl Rng) -> bool {
        if !self.printing_active {
            return false;
        }
        self.printing_timeout = self.printing_timeout.saturating_sub(1);
        if self.printing_timeout > 0 {
            return false;
        }
        self.printing = !self.printing;
        self.printing_timeout = Self::next_print_timeout(rng, self.printing);
        true
    }

    pub fn die(&mut self) {
        self.alive = false;
        self.effects.clear();
        self.stop_printing();
        self.resolve_effects();
    }

    pub fn resolve_score(&mut self) {
        self.score += self.round_score;
        self.round_score = 0;
    }

    pub fn reset_for_round(&mut self) {
        self.effects.clear();
        self.alive = self.present;
        self.turn = 0;
        self.round_score = 0;
        self.printing = false;
        self.printing_active = false;
        self.printing_timeout = 0;
        self.body_id = None;
        self.body_count = 0;
        self.trail_ids.clear();
        self.last_print = None;
        self.last_deposit_tick = None;
        self.last_sent_angle = None;
        self.resolve_effects();
    }
}
