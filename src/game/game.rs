use super::avatar::Avatar;
use super::bonus::{ActiveEffect, Affect, BonusKind, BonusManager};
use super::constants::{
    BROADCAST_EVERY_TICKS, PER_PLAYER_BOARD_SIDE, ROUND_END_TICKS, SPAWN_ANGLE_MARGIN,
    SPAWN_MARGIN, TICKS_PER_SECOND, TICK_SECONDS, TRAIL_GRACE_BODIES, TRAIL_WIDTH_FACTOR,
    WARMUP_TICKS,
};
use super::world::{BodyKind, World};
use crate::protocol::compress;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup { ticks_left: u64 },
    Running,
    RoundEnd { ticks_left: u64 },
    Over,
}

/// An outbound game event, buffered during a tick and drained by the room
/// at the tick boundary.
#[derive(Debug, Clone)]
pub struct OutEvent {
    pub name: &'static str,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MatchOutcome {
    Continue,
    Won(Option<String>),
}

#[derive(Debug)]
pub struct Game {
    pub avatars: Vec<Avatar>,
    pub world: World,
    pub bonus_manager: BonusManager,
    pub rng: SmallRng,
    pub phase: Phase,
    pub max_score: i64,
    pub round: u32,
    pub tick_count: u64,
    pub speed: f64,
    pub borderless: bool,
    pub game_effects: Vec<ActiveEffect>,
    pub deaths: Vec<String>,
    pub round_winner: Option<String>,
    pub winner: Option<String>,
    events: Vec<OutEvent>,
    next_effect_id: u64,
}

/// Board side for a given roster: one player plays on the base square, each
/// further player adds a fifth of its area.
pub fn board_side(players: usize) -> f64 {
    let square = PER_PLAYER_BOARD_SIDE * PER_PLAYER_BOARD_SIDE;
    (square + players.saturating_sub(1) as f64 * square / 5.0)
        .sqrt()
        .round()
}

fn ticks_to_millis(ticks: u64) -> u64 {
    ticks * 1000 / TICKS_PER_SECOND
}

impl Game {
    pub fn new(
        roster: Vec<(String, String, String)>,
        max_score: Option<i64>,
        enabled_bonuses: Vec<BonusKind>,
        speed: f64,
        seed: u64,
    ) -> Self {
        let count = roster.len();
        let avatars: Vec<Avatar> = roster
            .into_iter()
            .map(|(id, name, color)| Avatar::new(id, name, color))
            .collect();
        let max_score = max_score.unwrap_or_else(|| ((count as i64 - 1) * 10).max(1));
        let mut game = Self {
            avatars,
            world: World::new(board_side(count)),
            bonus_manager: BonusManager::new(enabled_bonuses),
            rng: SmallRng::seed_from_u64(seed),
            phase: Phase::Over,
            max_score,
            round: 0,
            tick_count: 0,
            speed,
            borderless: false,
            game_effects: Vec::new(),
            deaths: Vec::new(),
            round_winner: None,
            winner: None,
            events: Vec::new(),
            next_effect_id: 0,
        };
        let players: Vec<Value> = game
            .avatars
            .iter()
            .map(|avatar| {
                json!({
                    "id": avatar.id,
                    "name": avatar.name,
                    "color": avatar.color,
                    "score": avatar.score,
                })
            })
            .collect();
        game.emit(
            "game:start",
            json!({
                "maxScore": game.max_score,
                "size": game.world.size(),
                "players": players,
            }),
        );
        game.start_round();
        game
    }

    pub fn avatar(&self, id: &str) -> Option<&Avatar> {
        self.avatars.iter().find(|avatar| avatar.id == id)
    }

    pub fn alive_count(&self) -> usize {
        self.avatars.iter().filter(|avatar| avatar.alive).count()
    }

    pub fn present_count(&self) -> usize {
        self.avatars.iter().filter(|avatar| avatar.present).count()
    }

    pub fn is_over(&self) -> bool {
        self.phase == Phase::Over
    }

    pub fn drain_events(&mut self) -> Vec<OutEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, name: &'static str, data: Value) {
        self.events.push(OutEvent { name, data });
    }

    /// Latest steering input wins; older values are never replayed.
    pub fn set_turn(&mut self, avatar_id: &str, turn: i8) {
        if let Some(avatar) = self.avatars.iter_mut().find(|avatar| avatar.id == avatar_id) {
            avatar.turn = turn.clamp(-1, 1);
        }
    }

    /// A leaving player's avatar keeps simulating until it dies, so its
    /// trail keeps blocking and colliding like any other.
    pub fn remove_player(&mut self, avatar_id: &str) {
        let Some(index) = self
            .avatars
            .iter()
            .position(|avatar| avatar.id == avatar_id)
        else {
            return;
        };
        let running = self.phase == Phase::Running;
        self.avatars[index].present = false;
        if !running && self.avatars[index].alive {
            self.avatars[index].alive = false;
            if let Some(body_id) = self.avatars[index].body_id.take() {
                self.world.remove_body(body_id);
            }
        }
        self.emit("game:leave", json!(avatar_id));
        if running && self.alive_count() <= 1 {
            self.end_round();
        }
    }

    fn start_round(&mut self) {
        self.round += 1;
        self.world.clear();
        self.bonus_manager.clear(&mut self.world);
        self.bonus_manager.schedule(&mut self.rng);
        self.deaths.clear();
        self.game_effects.clear();
        self.borderless = false;
        self.round_winner = None;

        for index in 0..self.avatars.len() {
            self.avatars[index].reset_for_round();
            if !self.avatars[index].alive {
                continue;
            }
            let radius = self.avatars[index].radius;
            let (x, y) = self
                .world
                .random_position(&mut self.rng, radius, SPAWN_MARGIN);
            let angle = self
                .world
                .random_direction(&mut self.rng, x, y, SPAWN_ANGLE_MARGIN);
            self.avatars[index].x = x;
            self.avatars[index].y = y;
            self.avatars[index].angle = angle;
            let id = self.avatars[index].id.clone();
            let body_id = self.world.add_body(x, y, radius, BodyKind::Head { avatar: id });
            self.avatars[index].body_id = Some(body_id);
            self.broadcast_pose(index);
        }
        self.phase = Phase::Warmup {
            ticks_left: WARMUP_TICKS,
        };
    }

    fn broadcast_pose(&mut self, index: usize) {
        let (id, x, y, angle) = {
            let avatar = &self.avatars[index];
            (avatar.id.clone(), avatar.x, avatar.y, avatar.angle)
        };
        let packed_angle = compress(angle);
        self.avatars[index].last_sent_angle = Some(packed_angle);
        self.emit("position", json!([id.clone(), compress(x), compress(y)]));
        self.emit("angle", json!([id, packed_angle]));
    }

    /// Advance the simulation by exactly one fixed step.
    pub fn tick(&mut self) {
        self.tick_count += 1;
        match self.phase {
            Phase::Warmup { ticks_left } => {
                if ticks_left > 1 {
                    self.phase = Phase::Warmup {
                        ticks_left: ticks_left - 1,
                    };
                } else {
                    self.begin_running();
                }
            }
            Phase::Running => self.running_tick(),
            Phase::RoundEnd { ticks_left } => {
                if ticks_left > 1 {
                    self.phase = Phase::RoundEnd {
                        ticks_left: ticks_left - 1,
                    };
                } else {
                    self.finish_round_end();
                }
            }
            Phase::Over => {}
        }
    }

    fn begin_running(&mut self) {
        self.phase = Phase::Running;
        for index in 0..self.avatars.len() {
            if !self.avatars[index].alive {
                continue;
            }
            let before = Self::properties(&self.avatars[index]);
            self.avatars[index].start_printing(&mut self.rng);
            self.emit_property_diffs(index, before);
        }
        self.emit("round:new", json!({ "round": self.round }));
        // Leavers during warmup can empty the round before it begins.
        if self.alive_count() <= 1 {
            self.end_round();
        }
    }

    fn running_tick(&mut self) {
        self.age_effects();

        let score_base = self.deaths.len() as i64;
        let dt = TICK_SECONDS * self.speed;

        // Move everyone first so the collision pass sees this tick's
        // positions for all heads at once.
        for index in 0..self.avatars.len() {
            if !self.avatars[index].alive {
                continue;
            }
            self.avatars[index].integrate(dt);
            let (body_id, x, y, radius) = {
                let avatar = &self.avatars[index];
                (avatar.body_id, avatar.x, avatar.y, avatar.radius)
            };
            if let Some(body_id) = body_id {
                self.world.update_body(body_id, x, y, radius);
            }
        }

        let mut dying: Vec<usize> = Vec::new();
        let mut pickups: Vec<(usize, u64)> = Vec::new();

        for index in 0..self.avatars.len() {
            if !self.avatars[index].alive {
                continue;
            }
            let invincible = self.avatars[index].invincible;

            if self.hits_wall(index) {
                if self.borderless {
                    self.wrap_through_wall(index);
                } else if !invincible {
                    dying.push(index);
                    continue;
                }
            }

            self.deposit_due_trail(index);

            let (x, y, radius, own_body, own_id, body_count) = {
                let avatar = &self.avatars[index];
                (
                    avatar.x,
                    avatar.y,
                    avatar.radius,
                    avatar.body_id.unwrap_or(0),
                    avatar.id.clone(),
                    avatar.body_count,
                )
            };
            let mut deadly = false;
            let mut bonus_bodies: Vec<u64> = Vec::new();
            for body in self
                .world
                .overlapping(x, y, radius, |body| body.id != own_body)
            {
                match &body.kind {
                    BodyKind::Bonus { .. } => bonus_bodies.push(body.id),
                    BodyKind::Trail { avatar, num } if *avatar == own_id => {
                        // Grace window over the avatar's own neck.
                        if body_count.saturating_sub(*num) > TRAIL_GRACE_BODIES {
                            deadly = true;
                        }
                    }
                    BodyKind::Trail { .. } | BodyKind::Head { .. } => deadly = true,
                }
            }
            if deadly && !invincible {
                dying.push(index);
            } else {
                for body_id in bonus_bodies {
                    pickups.push((index, body_id));
                }
            }
        }

        // Deaths apply atomically with the same score base, so a mutual
        // head-on kills both and neither scores off the other.
        for index in dying {
            self.kill(index, score_base);
        }

        for index in 0..self.avatars.len() {
            if !self.avatars[index].alive {
                continue;
            }
            if self.avatars[index].step_print_toggle(&mut self.rng) {
                let (x, y) = (self.avatars[index].x, self.avatars[index].y);
                self.deposit_trail_at(index, x, y);
                let id = self.avatars[index].id.clone();
                let printing = self.avatars[index].printing;
                self.emit("property", json!([id, "printing", printing]));
            }
        }

        for (index, body_id) in pickups {
            self.apply_pickup(index, body_id);
        }

        let alive = self.alive_count();
        let present = self.present_count();
        let step = self
            .bonus_manager
            .step(&mut self.world, &mut self.rng, alive, present);
        if let Some(bonus) = step.spawned {
            self.emit(
                "bonus:pop",
                json!([bonus.id, compress(bonus.x), compress(bonus.y), bonus.kind.code()]),
            );
        }
        for id in step.expired {
            self.emit("bonus:clear", json!(id));
        }

        if self.tick_count % BROADCAST_EVERY_TICKS == 0 {
            self.stream_positions();
        }

        if self.alive_count() <= 1 {
            self.end_round();
        }
    }

    fn hits_wall(&self, index: usize) -> bool {
        let avatar = &self.avatars[index];
        let margin = if self.borderless { 0.0 } else { avatar.radius };
        self.world
            .bound_intersect(avatar.x, avatar.y, margin)
            .is_some()
    }

    fn wrap_through_wall(&mut self, index: usize) {
        let (x, y) = {
            let avatar = &self.avatars[index];
            match self.world.bound_intersect(avatar.x, avatar.y, 0.0) {
                Some((bx, by)) => self.world.opposite(bx, by),
                None => return,
            }
        };
        let radius = {
            let avatar = &mut self.avatars[index];
            avatar.x = x;
            avatar.y = y;
            // No trail across the seam.
            avatar.last_print = None;
            avatar.radius
        };
        if let Some(body_id) = self.avatars[index].body_id {
            self.world.update_body(body_id, x, y, radius);
        }
        self.broadcast_pose(index);
    }

    fn deposit_due_trail(&mut self, index: usize) {
        if let Some((px, py)) = self.avatars[index].due_print_point() {
            self.deposit_trail_at(index, px, py);
        }
    }

    fn deposit_trail_at(&mut self, index: usize, x: f64, y: f64) {
        if self.avatars[index].last_deposit_tick == Some(self.tick_count) {
            return;
        }
        let tick = self.tick_count;
        let (id, num, radius) = {
            let avatar = &mut self.avatars[index];
            let num = avatar.body_count;
            avatar.body_count += 1;
            avatar.last_print = Some((avatar.x, avatar.y));
            avatar.last_deposit_tick = Some(tick);
            (avatar.id.clone(), num, avatar.radius * TRAIL_WIDTH_FACTOR)
        };
        let body_id = self
            .world
            .add_body(x, y, radius, BodyKind::Trail { avatar: id, num });
        self.avatars[index].trail_ids.push(body_id);
    }

    fn kill(&mut self, index: usize, score_base: i64) {
        // The corpse endpoint becomes part of the trail.
        let (x, y) = (self.avatars[index].x, self.avatars[index].y);
        self.deposit_trail_at(index, x, y);

        let before = Self::properties(&self.avatars[index]);
        let (id, round_score, body_id) = {
            let avatar = &mut self.avatars[index];
            avatar.die();
            avatar.round_score += score_base;
            (avatar.id.clone(), avatar.round_score, avatar.body_id.take())
        };
        if let Some(body_id) = body_id {
            self.world.remove_body(body_id);
        }
        self.deaths.push(id.clone());
        self.emit(
            "avatar:die",
            json!([id.clone(), [compress(x), compress(y)]]),
        );
        self.emit("score:round", json!([id, round_score]));
        self.emit_property_diffs(index, before);
    }

    fn age_effects(&mut self) {
        for index in 0..self.avatars.len() {
            let expired: Vec<ActiveEffect> = {
                let avatar = &mut self.avatars[index];
                if avatar.effects.is_empty() {
                    continue;
                }
                for effect in &mut avatar.effects {
                    effect.remaining = effect.remaining.saturating_sub(1);
                }
                let expired = avatar
                    .effects
                    .iter()
                    .filter(|effect| effect.remaining == 0)
                    .cloned()
                    .collect();
                avatar.effects.retain(|effect| effect.remaining > 0);
                expired
            };
            if expired.is_empty() {
                continue;
            }
            let before = Self::properties(&self.avatars[index]);
            self.avatars[index].resolve_effects();
            let avatar_id = self.avatars[index].id.clone();
            for effect in expired {
                self.emit(
                    "bonus:stack",
                    json!([avatar_id.clone(), "remove", effect.id, effect.kind.code(), 0]),
                );
            }
            self.emit_property_diffs(index, before);
        }

        for effect in &mut self.game_effects {
            effect.remaining = effect.remaining.saturating_sub(1);
        }
        let had_borderless = self.borderless;
        self.game_effects.retain(|effect| effect.remaining > 0);
        self.borderless = self
            .game_effects
            .iter()
            .any(|effect| effect.kind.disables_walls());
        if had_borderless != self.borderless {
            self.emit("borderless", json!(self.borderless));
        }
    }

    fn apply_pickup(&mut self, picker_index: usize, body_id: u64) {
        let Some(bonus_id) = self.bonus_manager.by_body(body_id).map(|bonus| bonus.id) else {
            return;
        };
        let Some(bonus) = self.bonus_manager.remove(bonus_id, &mut self.world) else {
            return;
        };
        self.emit("bonus:clear", json!(bonus.id));

        if bonus.kind.clears_trails() {
            self.world.remove_where(|body| body.kind.is_trail());
            for avatar in &mut self.avatars {
                avatar.trail_ids.clear();
                avatar.last_print = None;
            }
            self.emit("clear", Value::Null);
            return;
        }

        if bonus.kind.disables_walls() {
            let effect = ActiveEffect {
                id: self.next_effect_id(),
                kind: bonus.kind,
                remaining: bonus.kind.duration_ticks(),
            };
            self.game_effects.push(effect);
            if !self.borderless {
                self.borderless = true;
                self.emit("borderless", json!(true));
            }
            return;
        }

        let picker_id = self.avatars[picker_index].id.clone();
        let targets: Vec<usize> = match bonus.kind.affect() {
            Affect::Picker => vec![picker_index],
            Affect::Opponents => self
                .avatars
                .iter()
                .enumerate()
                .filter(|(_, avatar)| avatar.alive && avatar.id != picker_id)
                .map(|(index, _)| index)
                .collect(),
            Affect::Everyone => self
                .avatars
                .iter()
                .enumerate()
                .filter(|(_, avatar)| avatar.alive)
                .map(|(index, _)| index)
                .collect(),
        };

        for index in targets {
            let effect = ActiveEffect {
                id: self.next_effect_id(),
                kind: bonus.kind,
                remaining: bonus.kind.duration_ticks(),
            };
            let before = Self::properties(&self.avatars[index]);
            let avatar_id = self.avatars[index].id.clone();
            self.emit(
                "bonus:stack",
                json!([
                    avatar_id,
                    "add",
                    effect.id,
                    effect.kind.code(),
                    ticks_to_millis(effect.kind.duration_ticks()),
                ]),
            );
            self.avatars[index].effects.push(effect);
            self.avatars[index].resolve_effects();
            self.emit_property_diffs(index, before);
        }
    }

    fn next_effect_id(&mut self) -> u64 {
        self.next_effect_id += 1;
        self.next_effect_id
    }

    fn properties(avatar: &Avatar) -> [(&'static str, Value); 5] {
        [
            ("velocity", json!(avatar.velocity)),
            ("radius", json!(avatar.radius)),
            ("invincible", json!(avatar.invincible)),
            ("inverse", json!(avatar.inverse)),
            ("printing", json!(avatar.printing)),
        ]
    }

    fn emit_property_diffs(&mut self, index: usize, before: [(&'static str, Value); 5]) {
        let after = Self::properties(&self.avatars[index]);
        let id = self.avatars[index].id.clone();
        for ((key, old), (_, new)) in before.into_iter().zip(after) {
            if old != new {
                self.emit("property", json!([id.clone(), key, new]));
            }
        }
    }

    fn stream_positions(&mut self) {
        for index in 0..self.avatars.len() {
            if !self.avatars[index].alive {
                continue;
            }
            let (id, x, y, angle) = {
                let avatar = &self.avatars[index];
                (avatar.id.clone(), avatar.x, avatar.y, avatar.angle)
            };
            self.emit("position", json!([id.clone(), compress(x), compress(y)]));
            let packed_angle = compress(angle);
            if self.avatars[index].last_sent_angle != Some(packed_angle) {
                self.avatars[index].last_sent_angle = Some(packed_angle);
                self.emit("angle", json!([id, packed_angle]));
            }
        }
    }

    fn end_round(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        let dead = self.deaths.len() as i64;
        for index in 0..self.avatars.len() {
            if !self.avatars[index].alive {
                continue;
            }
            let (id, round_score) = {
                let avatar = &mut self.avatars[index];
                avatar.round_score += dead;
                avatar.stop_printing();
                (avatar.id.clone(), avatar.round_score)
            };
            self.round_winner = Some(id.clone());
            self.emit("score:round", json!([id, round_score]));
        }

        let deltas: Vec<Value> = self
            .avatars
            .iter()
            .map(|avatar| {
                json!({
                    "avatar": avatar.id,
                    "roundScore": avatar.round_score,
                    "score": avatar.score + avatar.round_score,
                })
            })
            .collect();
        for index in 0..self.avatars.len() {
            self.avatars[index].resolve_score();
            let id = self.avatars[index].id.clone();
            let score = self.avatars[index].score;
            self.emit("score", json!([id, score]));
        }
        let winner = self.round_winner.clone();
        self.emit("round:end", json!({ "winner": winner, "avatars": deltas }));
        self.phase = Phase::RoundEnd {
            ticks_left: ROUND_END_TICKS,
        };
    }

    fn finish_round_end(&mut self) {
        let outcome = self.match_outcome();
        self.avatars.retain(|avatar| avatar.present);
        match outcome {
            MatchOutcome::Continue => self.start_round(),
            MatchOutcome::Won(winner) => {
                self.winner = winner.clone();
                self.phase = Phase::Over;
                self.emit("end", json!({ "winner": winner }));
            }
        }
    }

    fn match_outcome(&self) -> MatchOutcome {
        let present = self.present_count();
        if present == 0 {
            return MatchOutcome::Won(None);
        }
        if self.avatars.len() > 1 && present <= 1 {
            let last = self.avatars.iter().find(|avatar| avatar.present);
            return MatchOutcome::Won(last.map(|avatar| avatar.id.clone()));
        }
        let mut leaders: Vec<&Avatar> = self
            .avatars
            .iter()
            .filter(|avatar| avatar.present && avatar.score >= self.max_score)
            .collect();
        if leaders.is_empty() {
            return MatchOutcome::Continue;
        }
        leaders.sort_by_key(|avatar| -avatar.score);
        if leaders.len() > 1 && leaders[0].score == leaders[1].score {
            return MatchOutcome::Continue;
        }
        MatchOutcome::Won(Some(leaders[0].id.clone()))
    }

    /// Everything a late-joining spectator needs to render the game as it
    /// stands right now.
    pub fn spectate_events(&self) -> Vec<OutEvent> {
        let mut events = vec![OutEvent {
            name: "spectate",
            data: json!({
                "inRound": matches!(self.phase, Phase::Warmup { .. } | Phase::Running),
                "maxScore": self.max_score,
                "round": self.round,
                "size": self.world.size(),
            }),
        }];
        for avatar in &self.avatars {
            events.push(OutEvent {
                name: "position",
                data: json!([avatar.id, compress(avatar.x), compress(avatar.y)]),
            });
            events.push(OutEvent {
                name: "angle",
                data: json!([avatar.id, compress(avatar.angle)]),
            });
            for (key, value) in Self::properties(avatar) {
                events.push(OutEvent {
                    name: "property",
                    data: json!([avatar.id, key, value]),
                });
            }
            events.push(OutEvent {
                name: "score",
                data: json!([avatar.id, avatar.score]),
            });
            if !avatar.alive {
                events.push(OutEvent {
                    name: "avatar:die",
                    data: json!([avatar.id, [compress(avatar.x), compress(avatar.y)]]),
                });
            }
        }
        for bonus in &self.bonus_manager.bonuses {
            events.push(OutEvent {
                name: "bonus:pop",
                data: json!([bonus.id, compress(bonus.x), compress(bonus.y), bonus.kind.code()]),
            });
        }
        events
    }
}
