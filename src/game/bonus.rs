use super::constants::{
    BONUS_CAP, BONUS_DURATION_TICKS, BONUS_LIFETIME_TICKS, BONUS_RADIUS, BONUS_SPAWN_MARGIN,
    BONUS_SPAWN_MAX_TICKS, BONUS_SPAWN_MIN_TICKS,
};
use super::world::{BodyKind, World};
use rand::Rng;

/// Who a picked-up bonus lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affect {
    Picker,
    Opponents,
    Everyone,
}

/// The enumerated bonus set. Codes are wire-visible and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BonusKind {
    SelfSmall,
    SelfBig,
    SelfMaster,
    SelfSlow,
    SelfFast,
    EnemySlow,
    EnemyFast,
    EnemyBig,
    EnemyInverse,
    AllBorderless,
    GameClear,
}

impl BonusKind {
    pub const ALL: [BonusKind; 11] = [
        BonusKind::SelfSmall,
        BonusKind::SelfBig,
        BonusKind::SelfMaster,
        BonusKind::SelfSlow,
        BonusKind::SelfFast,
        BonusKind::EnemySlow,
        BonusKind::EnemyFast,
        BonusKind::EnemyBig,
        BonusKind::EnemyInverse,
        BonusKind::AllBorderless,
        BonusKind::GameClear,
    ];

    pub fn code(self) -> &'static str {
        match self {
            BonusKind::SelfSmall => "BonusSelfSmall",
            BonusKind::SelfBig => "BonusSelfBig",
            BonusKind::SelfMaster => "BonusSelfMaster",
            BonusKind::SelfSlow => "BonusSelfSlow",
            BonusKind::SelfFast => "BonusSelfFast",
            BonusKind::EnemySlow => "BonusEnemySlow",
            BonusKind::EnemyFast => "BonusEnemyFast",
            BonusKind::EnemyBig => "BonusEnemyBig",
            BonusKind::EnemyInverse => "BonusEnemyInverse",
            BonusKind::AllBorderless => "BonusAllBorderless",
            BonusKind::GameClear => "BonusGameClear",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        BonusKind::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub fn affect(self) -> Affect {
        match self {
            BonusKind::SelfSmall
            | BonusKind::SelfBig
            | BonusKind::SelfMaster
            | BonusKind::SelfSlow
            | BonusKind::SelfFast => Affect::Picker,
            BonusKind::EnemySlow
            | BonusKind::EnemyFast
            | BonusKind::EnemyBig
            | BonusKind::EnemyInverse => Affect::Opponents,
            BonusKind::AllBorderless | BonusKind::GameClear => Affect::Everyone,
        }
    }

    /// Instant bonuses report zero and never enter an effect stack.
    pub fn duration_ticks(self) -> u64 {
        match self {
            BonusKind::GameClear => 0,
            _ => BONUS_DURATION_TICKS,
        }
    }

    pub fn velocity_factor(self) -> f64 {
        match self {
            BonusKind::SelfMaster | BonusKind::SelfFast | BonusKind::EnemyFast => 1.5,
            BonusKind::SelfSlow | BonusKind::EnemySlow => 0.5,
            _ => 1.0,
        }
    }

    /// Radius stacks as powers of two: each level doubles or halves.
    pub fn radius_level(self) -> i32 {
        match self {
            BonusKind::SelfSmall => -1,
            BonusKind::SelfBig | BonusKind::EnemyBig => 1,
            _ => 0,
        }
    }

    pub fn inverts_controls(self) -> bool {
        matches!(self, BonusKind::EnemyInverse)
    }

    pub fn grants_invincibility(self) -> bool {
        matches!(self, BonusKind::SelfMaster)
    }

    pub fn disables_walls(self) -> bool {
        matches!(self, BonusKind::AllBorderless)
    }

    pub fn clears_trails(self) -> bool {
        matches!(self, BonusKind::GameClear)
    }

    /// Spawn weight. Clearing the board matters less while most players are
    /// already dead, so that kind fades with the dead ratio.
    pub fn weight(self, alive: usize, present: usize) -> f64 {
        match self {
            BonusKind::GameClear => {
                if present == 0 {
                    return 0.0;
                }
                let dead_ratio = 1.0 - alive as f64 / present as f64;
                if dead_ratio < 0.5 {
                    1.0
                } else {
                    ((1.0 - dead_ratio) * 10.0).round() / 10.0
                }
            }
            _ => 1.0,
        }
    }
}

/// A timed effect sitting on an avatar or on the game itself.
#[derive(Debug, Clone)]
pub struct ActiveEffect {
    pub id: u64,
    pub kind: BonusKind,
    pub remaining: u64,
}

/// A bonus waiting on the board.
#[derive(Debug, Clone)]
pub struct Bonus {
    pub id: u64,
    pub kind: BonusKind,
    pub x: f64,
    pub y: f64,
    pub body_id: u64,
    pub remaining: u64,
}

#[derive(Debug, Default)]
pub struct BonusStep {
    pub spawned: Option<Bonus>,
    pub expired: Vec<u64>,
}

#[derive(Debug)]
pub struct BonusManager {
    pub bonuses: Vec<Bonus>,
    enabled: Vec<BonusKind>,
    next_bonus_id: u64,
    spawn_in: u64,
}

impl BonusManager {
    pub fn new(enabled: Vec<BonusKind>) -> Self {
        Self {
            bonuses: Vec::new(),
            enabled,
            next_bonus_id: 1,
            spawn_in: 0,
        }
    }

    pub fn schedule(&mut self, rng: &mut impl Rng) {
        self.spawn_in = rng.gen_range(BONUS_SPAWN_MIN_TICKS..=BONUS_SPAWN_MAX_TICKS);
    }

    pub fn by_body(&self, body_id: u64) -> Option<&Bonus> {
        self.bonuses.iter().find(|bonus| bonus.body_id == body_id)
    }

    pub fn remove(&mut self, id: u64, world: &mut World) -> Option<Bonus> {
        let index = self.bonuses.iter().position(|bonus| bonus.id == id)?;
        let bonus = self.bonuses.remove(index);
        world.remove_body(bonus.body_id);
        Some(bonus)
    }

    pub fn clear(&mut self, world: &mut World) {
        for bonus in self.bonuses.drain(..) {
            world.remove_body(bonus.body_id);
        }
    }

    /// One running tick: age uncollected bonuses out, then count the spawn
    /// timer down and pop a new bonus when it fires.
    pub fn step(
        &mut self,
        world: &mut World,
        rng: &mut impl Rng,
        alive: usize,
        present: usize,
    ) -> BonusStep {
        let mut step = BonusStep::default();

        for bonus in &mut self.bonuses {
            bonus.remaining = bonus.remaining.saturating_sub(1);
        }
        let expired: Vec<u64> = self
            .bonuses
            .iter()
            .filter(|bonus| bonus.remaining == 0)
            .map(|bonus| bonus.id)
            .collect();
        for id in expired {
            if let Some(bonus) = self.remove(id, world) {
                step.expired.push(bonus.id);
            }
        }

        if self.enabled.is_empty() {
            return step;
        }
        if self.spawn_in > 0 {
            self.spawn_in -= 1;
            return step;
        }
        self.schedule(rng);
        if self.bonuses.len() >= BONUS_CAP {
            return step;
        }
        if let Some(kind) = self.draw_kind(rng, alive, present) {
            let (x, y) = world.random_position(rng, BONUS_RADIUS, BONUS_SPAWN_MARGIN);
            let id = self.next_bonus_id;
            self.next_bonus_id += 1;
            let body_id = world.add_body(x, y, BONUS_RADIUS, BodyKind::Bonus { bonus: id });
            let bonus = Bonus {
                id,
                kind,
                x,
                y,
                body_id,
                remaining: BONUS_LIFETIME_TICKS,
            };
            self.bonuses.push(bonus.clone());
            step.spawned = Some(bonus);
        }
        step
    }

    fn draw_kind(&self, rng: &mut impl Rng, alive: usize, present: usize) -> Option<BonusKind> {
        let mut pot = Vec::with_capacity(self.enabled.len());
        let mut total = 0.0;
        for kind in &self.enabled {
            let weight = kind.weight(alive, present);
            if weight > 0.0 {
                total += weight;
                pot.push((*kind, total));
            }
        }
        if pot.is_empty() {
            return None;
        }
        let draw = rng.gen::<f64>() * total;
        pot.into_iter()
            .find(|(_, cumulative)| draw < *cumulative)
            .map(|(kind, _)| kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn codes_round_trip_for_every_kind() {
        for kind in BonusKind::ALL {
            assert_eq!(BonusKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(BonusKind::from_code("BonusNope"), None);
    }

    #[test]
    fn only_game_clear_is_instant() {
        for kind in BonusKind::ALL {
            if kind == BonusKind::GameClear {
                assert_eq!(kind.duration_ticks(), 0);
            } else {
                assert_eq!(kind.duration_ticks(), BONUS_DURATION_TICKS);
            }
        }
    }

    #[test]
    fn clear_weight_fades_as_players_die() {
        assert_eq!(BonusKind::GameClear.weight(4, 4), 1.0);
        assert_eq!(BonusKind::GameClear.weight(0, 0), 0.0);
        let late = BonusKind::GameClear.weight(1, 4);
        assert!(late < 1.0);
    }

    #[test]
    fn spawn_timer_pops_a_bonus_into_the_world() {
        let mut world = World::new(100.0);
        let mut rng = SmallRng::seed_from_u64(3);
        let mut manager = BonusManager::new(vec![BonusKind::SelfFast]);
        let mut spawned = None;
        for _ in 0..(BONUS_SPAWN_MAX_TICKS + 1) {
            let step = manager.step(&mut world, &mut rng, 2, 2);
            if let Some(bonus) = step.spawned {
                spawned = Some(bonus);
                break;
            }
        }
        let bonus = spawned.expect("a bonus within the max spawn delay");
        assert_eq!(bonus.kind, BonusKind::SelfFast);
        assert_eq!(world.body_count(), 1);
        assert!(manager.by_body(bonus.body_id).is_some());
    }

    #[test]
    fn uncollected_bonuses_expire_after_their_lifetime() {
        let mut world = World::new(100.0);
        let mut rng = SmallRng::seed_from_u64(5);
        let mut manager = BonusManager::new(vec![BonusKind::SelfSlow]);
        let mut expired = Vec::new();
        for _ in 0..(BONUS_SPAWN_MAX_TICKS + BONUS_LIFETIME_TICKS + 2) {
            let step = manager.step(&mut world, &mut rng, 2, 2);
            expired.extend(step.expired);
            if !expired.is_empty() {
                break;
            }
        }
        assert_eq!(expired.len(), 1);
        assert!(manager.bonuses.iter().all(|bonus| bonus.id != expired[0]));
    }

    #[test]
    fn disabled_kinds_are_never_drawn() {
        let mut world = World::new(100.0);
        let mut rng = SmallRng::seed_from_u64(9);
        let mut manager = BonusManager::new(Vec::new());
        for _ in 0..(BONUS_SPAWN_MAX_TICKS * 2) {
            let step = manager.step(&mut world, &mut rng, 2, 2);
            assert!(step.spawned.is_none());
        }
        assert_eq!(world.body_count(), 0);
    }
}
