pub const TICKS_PER_SECOND: u64 = 60;
pub const TICK_INTERVAL_US: u64 = 1_000_000 / TICKS_PER_SECOND;
pub const TICK_SECONDS: f64 = 1.0 / TICKS_PER_SECOND as f64;

/// Position/angle stream cadence: every 3rd tick is 20 Hz.
pub const BROADCAST_EVERY_TICKS: u64 = 3;

pub const PER_PLAYER_BOARD_SIDE: f64 = 80.0;
pub const DEFAULT_VELOCITY: f64 = 16.0;
pub const DEFAULT_ANGULAR_VELOCITY: f64 = 2.8;
pub const DEFAULT_RADIUS: f64 = 0.6;
pub const TRAIL_WIDTH_FACTOR: f64 = 1.0;
/// An avatar never collides with its own most recent trail bodies.
pub const TRAIL_GRACE_BODIES: u64 = 3;
pub const MIN_VELOCITY: f64 = DEFAULT_VELOCITY / 2.0;
pub const MIN_RADIUS: f64 = DEFAULT_RADIUS / 8.0;

pub const PRINT_INTERVAL_TICKS: f64 = 150.0;
pub const GAP_INTERVAL_TICKS: f64 = 10.0;

pub const WARMUP_TICKS: u64 = 3 * TICKS_PER_SECOND;
pub const ROUND_END_TICKS: u64 = 2 * TICKS_PER_SECOND;

pub const SPAWN_MARGIN: f64 = 0.05;
pub const SPAWN_ANGLE_MARGIN: f64 = 0.3;

pub const BONUS_RADIUS: f64 = 3.0;
pub const BONUS_CAP: usize = 20;
pub const BONUS_SPAWN_MIN_TICKS: u64 = 3 * TICKS_PER_SECOND;
pub const BONUS_SPAWN_MAX_TICKS: u64 = 10 * TICKS_PER_SECOND;
pub const BONUS_LIFETIME_TICKS: u64 = 8 * TICKS_PER_SECOND;
pub const BONUS_DURATION_TICKS: u64 = 7 * TICKS_PER_SECOND + TICKS_PER_SECOND / 2;
pub const BONUS_SPAWN_MARGIN: f64 = 0.01;

/// Grid cells must be at least two max body radii so that any overlapping
/// pair shares a cell.
pub const ISLAND_SIZE_HINT: f64 = 10.0;

pub const DEFAULT_MAX_PLAYERS: usize = 8;
pub const MIN_PLAYERS_TO_START: usize = 2;
pub const SPEED_MIN: f64 = 0.5;
pub const SPEED_MAX: f64 = 2.0;

pub const EMPTY_ROOM_TTL_MS: i64 = 60_000;
pub const PING_INTERVAL_MS: u64 = 1_000;
pub const SEND_DEADLINE_MS: u64 = 2_000;
pub const OUTBOUND_CAPACITY: usize = 256;
