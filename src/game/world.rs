use super::constants::ISLAND_SIZE_HINT;
use rand::Rng;
use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, PI};

/// What a body stands for. Trail and bonus bodies are static once placed;
/// head bodies are re-indexed every tick. Bonus bodies are ghosts: they
/// trigger pickups, never deaths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyKind {
    Head { avatar: String },
    Trail { avatar: String, num: u64 },
    Bonus { bonus: u64 },
}

impl BodyKind {
    pub fn is_bonus(&self) -> bool {
        matches!(self, BodyKind::Bonus { .. })
    }

    pub fn is_trail(&self) -> bool {
        matches!(self, BodyKind::Trail { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Body {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub kind: BodyKind,
}

impl Body {
    pub fn overlaps(&self, x: f64, y: f64, radius: f64) -> bool {
        circles_overlap(self.x, self.y, self.radius, x, y, radius)
    }
}

pub fn circles_overlap(x1: f64, y1: f64, r1: f64, x2: f64, y2: f64, r2: f64) -> bool {
    let dx = x1 - x2;
    let dy = y1 - y2;
    let reach = r1 + r2;
    dx * dx + dy * dy <= reach * reach
}

/// One grid cell of the broad phase. Every body is registered in each cell
/// its bounding box touches, so any two overlapping bodies always share a
/// cell and collision checks never scan the whole board.
#[derive(Debug, Default)]
struct Island {
    bodies: Vec<u64>,
}

#[derive(Debug)]
pub struct World {
    size: f64,
    island_size: f64,
    cols: usize,
    islands: Vec<Island>,
    bodies: HashMap<u64, Body>,
    membership: HashMap<u64, Vec<usize>>,
    next_body_id: u64,
}

impl World {
    pub fn new(size: f64) -> Self {
        let cols = ((size / ISLAND_SIZE_HINT).round().max(1.0)) as usize;
        let mut islands = Vec::with_capacity(cols * cols);
        for _ in 0..cols * cols {
            islands.push(Island::default());
        }
        Self {
            size,
            island_size: size / cols as f64,
            cols,
            islands,
            bodies: HashMap::new(),
            membership: HashMap::new(),
            next_body_id: 1,
        }
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn body(&self, id: u64) -> Option<&Body> {
        self.bodies.get(&id)
    }

    fn cell_coordinate(&self, value: f64) -> usize {
        let index = (value / self.island_size).floor();
        (index.max(0.0) as usize).min(self.cols - 1)
    }

    fn islands_for(&self, x: f64, y: f64, radius: f64) -> Vec<usize> {
        let min_x = self.cell_coordinate(x - radius);
        let max_x = self.cell_coordinate(x + radius);
        let min_y = self.cell_coordinate(y - radius);
        let max_y = self.cell_coordinate(y + radius);
        let mut cells = Vec::with_capacity(4);
        for cy in min_y..=max_y {
            for cx in min_x..=max_x {
                cells.push(cy * self.cols + cx);
            }
        }
        cells
    }

    pub fn add_body(&mut self, x: f64, y: f64, radius: f64, kind: BodyKind) -> u64 {
        let id = self.next_body_id;
        self.next_body_id += 1;
        let cells = self.islands_for(x, y, radius);
        for cell in &cells {
            self.islands[*cell].bodies.push(id);
        }
        self.membership.insert(id, cells);
        self.bodies.insert(
            id,
            Body {
                id,
                x,
                y,
                radius,
                kind,
            },
        );
        id
    }

    pub fn update_body(&mut self, id: u64, x: f64, y: f64, radius: f64) {
        let Some(body) = self.bodies.get_mut(&id) else {
            return;
        };
        body.x = x;
        body.y = y;
        body.radius = radius;
        let cells = self.islands_for(x, y, radius);
        let previous = self.membership.insert(id, cells.clone());
        if previous.as_deref() == Some(cells.as_slice()) {
            return;
        }
        if let Some(previous) = previous {
            for cell in previous {
                self.islands[cell].bodies.retain(|member| *member != id);
            }
        }
        for cell in cells {
            self.islands[cell].bodies.push(id);
        }
    }

    pub fn remove_body(&mut self, id: u64) -> Option<Body> {
        let body = self.bodies.remove(&id)?;
        if let Some(cells) = self.membership.remove(&id) {
            for cell in cells {
                self.islands[cell].bodies.retain(|member| *member != id);
            }
        }
        Some(body)
    }

    pub fn remove_where(&mut self, mut predicate: impl FnMut(&Body) -> bool) -> Vec<u64> {
        let doomed: Vec<u64> = self
            .bodies
            .values()
            .filter(|body| predicate(body))
            .map(|body| body.id)
            .collect();
        for id in &doomed {
            self.remove_body(*id);
        }
        doomed
    }

    pub fn clear(&mut self) {
        self.bodies.clear();
        self.membership.clear();
        for island in &mut self.islands {
            island.bodies.clear();
        }
    }

    /// All bodies sharing an island with the probe's bounding box.
    pub fn retrieve(&self, x: f64, y: f64, radius: f64) -> Vec<&Body> {
        let mut seen: Vec<u64> = Vec::new();
        let mut found = Vec::new();
        for cell in self.islands_for(x, y, radius) {
            for id in &self.islands[cell].bodies {
                if seen.contains(id) {
                    continue;
                }
                seen.push(*id);
                if let Some(body) = self.bodies.get(id) {
                    found.push(body);
                }
            }
        }
        found
    }

    pub fn first_overlap(
        &self,
        x: f64,
        y: f64,
        radius: f64,
        mut filter: impl FnMut(&Body) -> bool,
    ) -> Option<&Body> {
        self.retrieve(x, y, radius)
            .into_iter()
            .find(|body| body.overlaps(x, y, radius) && filter(body))
    }

    pub fn overlapping(
        &self,
        x: f64,
        y: f64,
        radius: f64,
        mut filter: impl FnMut(&Body) -> bool,
    ) -> Vec<&Body> {
        self.retrieve(x, y, radius)
            .into_iter()
            .filter(|body| body.overlaps(x, y, radius) && filter(body))
            .collect()
    }

    pub fn is_free(&self, x: f64, y: f64, radius: f64) -> bool {
        self.first_overlap(x, y, radius, |_| true).is_none()
    }

    /// A random free position at least `margin_ratio` of the board away from
    /// the walls.
    pub fn random_position(
        &self,
        rng: &mut impl Rng,
        radius: f64,
        margin_ratio: f64,
    ) -> (f64, f64) {
        let margin = radius + margin_ratio * self.size;
        let mut x = self.random_point(rng, margin);
        let mut y = self.random_point(rng, margin);
        for _ in 0..1000 {
            if self.is_free(x, y, margin) {
                break;
            }
            x = self.random_point(rng, margin);
            y = self.random_point(rng, margin);
        }
        (x, y)
    }

    fn random_point(&self, rng: &mut impl Rng, margin: f64) -> f64 {
        margin + rng.gen::<f64>() * (self.size - margin * 2.0)
    }

    /// A random heading that does not run into a wall within `tolerance`
    /// of the board size.
    pub fn random_direction(&self, rng: &mut impl Rng, x: f64, y: f64, tolerance: f64) -> f64 {
        let margin = tolerance * self.size;
        let mut direction = rng.gen::<f64>() * PI * 2.0;
        for _ in 0..100 {
            if self.direction_is_valid(direction, x, y, margin) {
                return direction;
            }
            direction = rng.gen::<f64>() * PI * 2.0;
        }
        direction
    }

    fn direction_is_valid(&self, angle: f64, x: f64, y: f64, margin: f64) -> bool {
        for quadrant in 0..4 {
            let from = FRAC_PI_2 * quadrant as f64;
            let to = FRAC_PI_2 * (quadrant + 1) as f64;
            if angle < from || angle >= to {
                continue;
            }
            if hypotenuse(angle - from, self.distance_to_border(quadrant, x, y)) < margin {
                return false;
            }
            let next = (quadrant + 1) % 4;
            if hypotenuse(to - angle, self.distance_to_border(next, x, y)) < margin {
                return false;
            }
            return true;
        }
        true
    }

    fn distance_to_border(&self, border: usize, x: f64, y: f64) -> f64 {
        match border {
            0 => self.size - x,
            1 => self.size - y,
            2 => x,
            _ => y,
        }
    }

    /// Where the circle at (x, y) crosses the board bounds, if it does.
    pub fn bound_intersect(&self, x: f64, y: f64, margin: f64) -> Option<(f64, f64)> {
        if x - margin < 0.0 {
            return Some((0.0, y));
        }
        if x + margin > self.size {
            return Some((self.size, y));
        }
        if y - margin < 0.0 {
            return Some((x, 0.0));
        }
        if y + margin > self.size {
            return Some((x, self.size));
        }
        None
    }

    /// The wrap-around point for borderless rounds.
    pub fn opposite(&self, x: f64, y: f64) -> (f64, f64) {
        if x <= 0.0 {
            return (self.size, y);
        }
        if x >= self.size {
            return (0.0, y);
        }
        if y <= 0.0 {
            return (x, self.size);
        }
        if y >= self.size {
            return (x, 0.0);
        }
        (x, y)
    }
}

fn hypotenuse(angle: f64, adjacent: f64) -> f64 {
    let cos = angle.cos();
    if cos.abs() < 0.001 {
        f64::INFINITY
    } else {
        adjacent / cos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn trail(avatar: &str, num: u64) -> BodyKind {
        BodyKind::Trail {
            avatar: avatar.to_string(),
            num,
        }
    }

    #[test]
    fn circle_overlap_is_inclusive_of_touching() {
        assert!(circles_overlap(0.0, 0.0, 1.0, 2.0, 0.0, 1.0));
        assert!(!circles_overlap(0.0, 0.0, 1.0, 2.01, 0.0, 1.0));
    }

    #[test]
    fn overlapping_bodies_share_an_island() {
        let mut world = World::new(100.0);
        // Straddles a cell boundary on a 10x10 grid.
        world.add_body(9.9, 5.0, 0.6, trail("a", 0));
        let hit = world.first_overlap(10.1, 5.0, 0.6, |_| true);
        assert!(hit.is_some());
    }

    #[test]
    fn queries_only_see_nearby_islands() {
        let mut world = World::new(100.0);
        for i in 0..50 {
            world.add_body(90.0, 1.0 + i as f64, 0.6, trail("far", i));
        }
        world.add_body(5.0, 5.0, 0.6, trail("near", 0));
        let candidates = world.retrieve(5.2, 5.2, 0.6);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn moved_bodies_are_reindexed() {
        let mut world = World::new(100.0);
        let id = world.add_body(5.0, 5.0, 0.6, trail("a", 0));
        world.update_body(id, 55.0, 55.0, 0.6);
        assert!(world.first_overlap(5.0, 5.0, 0.6, |_| true).is_none());
        assert!(world.first_overlap(55.0, 55.0, 0.6, |_| true).is_some());
    }

    #[test]
    fn remove_where_clears_only_matching_kinds() {
        let mut world = World::new(100.0);
        world.add_body(5.0, 5.0, 0.6, trail("a", 0));
        world.add_body(6.0, 5.0, 0.6, trail("a", 1));
        let bonus = world.add_body(50.0, 50.0, 3.0, BodyKind::Bonus { bonus: 1 });
        let removed = world.remove_where(|body| body.kind.is_trail());
        assert_eq!(removed.len(), 2);
        assert_eq!(world.body_count(), 1);
        assert!(world.body(bonus).is_some());
    }

    #[test]
    fn random_positions_are_free_and_inside_margins() {
        let mut world = World::new(100.0);
        let mut rng = SmallRng::seed_from_u64(7);
        for i in 0..40 {
            let (x, y) = world.random_position(&mut rng, 0.6, 0.05);
            let margin = 0.6 + 0.05 * 100.0;
            assert!(x >= margin && x <= 100.0 - margin);
            assert!(y >= margin && y <= 100.0 - margin);
            assert!(world.is_free(x, y, margin));
            world.add_body(x, y, margin, trail("spawn", i));
        }
    }

    #[test]
    fn random_direction_points_away_from_close_walls() {
        let world = World::new(100.0);
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..50 {
            let angle = world.random_direction(&mut rng, 2.0, 50.0, 0.3);
            // Hugging the left wall: heading must not cross it within the margin.
            let reach_x = 2.0 + angle.cos() * 30.0;
            assert!(reach_x >= -1e-9);
        }
    }

    #[test]
    fn bounds_and_opposite_are_symmetric() {
        let world = World::new(100.0);
        assert_eq!(world.bound_intersect(0.3, 50.0, 0.6), Some((0.0, 50.0)));
        assert_eq!(world.bound_intersect(50.0, 99.8, 0.6), Some((50.0, 100.0)));
        assert_eq!(world.bound_intersect(50.0, 50.0, 0.6), None);
        assert_eq!(world.opposite(0.0, 50.0), (100.0, 50.0));
        assert_eq!(world.opposite(50.0, 100.0), (50.0, 0.0));
    }
}
