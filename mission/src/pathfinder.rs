use std::collections::VecDeque;

use h3o::CellIndex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};
use thiserror::Error;
use tracing::warn;

use crate::geo::GeoPoint;
use crate::hexgrid::{GridError, GridResult, HexGrid};
use crate::probability::{DegenerateMapError, ProbabilityMap};

#[derive(Debug, Error)]
pub enum PathError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("probability map has no cells")]
    EmptyMap,
}

/// Strategy selector carried in commands and configuration.
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, Display, EnumIter, Serialize, Deserialize,
)]
pub enum StrategyKind {
    Bayesian,
    Spiral,
}

/// Probability-greedy hill climb toward the current peak of the map.
///
/// Stateless between calls beyond its fixed configuration; the map is
/// re-seeded/updated after every move, so the climb self-corrects.
#[derive(Clone, Copy, Debug)]
pub struct BayesianHexSearch {
    grid: HexGrid,
    centre_cell: CellIndex,
}

impl BayesianHexSearch {
    pub fn new(grid: HexGrid, centre: GeoPoint) -> GridResult<Self> {
        Ok(Self {
            grid,
            centre_cell: grid.cell(centre)?,
        })
    }

    pub fn centre_cell(&self) -> CellIndex {
        self.centre_cell
    }

    /// Next waypoint given the current position and probability map.
    ///
    /// The default candidate is the second cell on the straight hex-line
    /// toward the peak; a ring-1 neighbor replaces it only on a strictly
    /// greater score. With no in-map neighbors every score stays at the
    /// 0.0 floor and the default wins.
    pub fn find_next_step(
        &self,
        current: GeoPoint,
        map: &ProbabilityMap,
    ) -> Result<GeoPoint, PathError> {
        let current_cell = self.grid.cell(current)?;
        let peak = map.peak_cell().ok_or(PathError::EmptyMap)?;

        let line = self.grid.line(current_cell, peak)?;
        let default_candidate = line.get(1).copied().unwrap_or(current_cell);

        let mut neighbors = self.grid.ring(current_cell, 1);
        neighbors.sort_unstable();

        let mut best = default_candidate;
        let mut best_score = 0.0_f64;
        for neighbor in neighbors {
            let Some(prob) = map.probability(neighbor) else {
                continue;
            };
            let dist = self.grid.cell_distance(neighbor, peak);
            let score = 100.0 / (1.0 + dist) + prob * 10.0;
            if score > best_score {
                best = neighbor;
                best_score = score;
            }
        }

        Ok(self.grid.center(best))
    }
}

/// Deterministic, probability-agnostic baseline: walks outward ring by
/// ring in local IJ coordinates around the centre cell.
#[derive(Clone, Debug)]
pub struct OutwardSpiralPathFinder {
    grid: HexGrid,
    centre_cell: CellIndex,
    ring: i32,
    segment_start: (i32, i32),
    pending: VecDeque<(i32, i32)>,
    expected: (i32, i32),
    mismatches: u64,
}

impl OutwardSpiralPathFinder {
    pub fn new(grid: HexGrid, centre: GeoPoint) -> GridResult<Self> {
        let centre_cell = grid.cell(centre)?;
        let origin = grid.to_local_ij(centre_cell, centre_cell)?;
        Ok(Self {
            grid,
            centre_cell,
            ring: 1,
            segment_start: origin,
            pending: VecDeque::new(),
            expected: origin,
            mismatches: 0,
        })
    }

    /// Position desyncs observed so far. The planner never resyncs from
    /// observation; a mismatch is logged and the planned waypoint returned
    /// anyway.
    pub fn mismatches(&self) -> u64 {
        self.mismatches
    }

    pub fn find_next_step(&mut self, current: GeoPoint) -> Result<GeoPoint, PathError> {
        let current_cell = self.grid.cell(current)?;
        let current_ij = self.grid.to_local_ij(self.centre_cell, current_cell)?;
        if current_ij != self.expected {
            warn!(
                ?current_ij,
                expected = ?self.expected,
                "reported position does not match the planned waypoint"
            );
            self.mismatches += 1;
        }

        if self.pending.is_empty() {
            self.enqueue_next_ring();
        }
        let next = self
            .pending
            .pop_front()
            .expect("ring expansion always enqueues waypoints");
        self.expected = next;

        let cell = self.grid.from_local_ij(self.centre_cell, next.0, next.1)?;
        Ok(self.grid.center(cell))
    }

    /// Enqueues one full ring traversal: 6 edges whose lengths sum to 6k.
    fn enqueue_next_ring(&mut self) {
        let k = self.ring;
        let mut cursor = self.segment_start;
        cursor = self.edge(cursor, 1, 0, -1);
        cursor = self.edge(cursor, k - 1, 1, 0);
        cursor = self.edge(cursor, k, 1, 1);
        cursor = self.edge(cursor, k, 0, 1);
        cursor = self.edge(cursor, k, -1, 0);
        cursor = self.edge(cursor, k, -1, -1);
        cursor = self.edge(cursor, k, 0, -1);
        self.segment_start = cursor;
        self.ring += 1;
    }

    fn edge(&mut self, mut cursor: (i32, i32), steps: i32, di: i32, dj: i32) -> (i32, i32) {
        for _ in 0..steps {
            cursor = (cursor.0 + di, cursor.1 + dj);
            self.pending.push_back(cursor);
        }
        cursor
    }
}

/// The two interchangeable strategies as a fixed tagged variant, chosen
/// once at session creation.
#[derive(Clone, Debug)]
pub enum PathStrategy {
    Bayesian(BayesianHexSearch),
    Spiral(OutwardSpiralPathFinder),
}

impl PathStrategy {
    pub fn new(kind: StrategyKind, grid: HexGrid, centre: GeoPoint) -> GridResult<Self> {
        Ok(match kind {
            StrategyKind::Bayesian => Self::Bayesian(BayesianHexSearch::new(grid, centre)?),
            StrategyKind::Spiral => Self::Spiral(OutwardSpiralPathFinder::new(grid, centre)?),
        })
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Bayesian(_) => StrategyKind::Bayesian,
            Self::Spiral(_) => StrategyKind::Spiral,
        }
    }

    fn find_next_step(
        &mut self,
        current: GeoPoint,
        map: &ProbabilityMap,
    ) -> Result<GeoPoint, PathError> {
        match self {
            Self::Bayesian(search) => search.find_next_step(current, map),
            Self::Spiral(spiral) => spiral.find_next_step(current),
        }
    }
}

/// Outcome of one session step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionStep {
    Waypoint(GeoPoint),
    /// Step budget exhausted.
    Exhausted,
    /// The map lost all mass; the orchestrator decides on reseeding.
    Degenerate,
}

/// Per-drone search state: the chosen strategy, the exclusively owned
/// probability map and the step budget. Never shared across drones.
#[derive(Debug)]
pub struct PathfinderSession {
    grid: HexGrid,
    strategy: PathStrategy,
    prob_map: ProbabilityMap,
    step_count: u32,
    max_step: u32,
    false_negative_rate: f64,
}

impl PathfinderSession {
    pub fn new(
        grid: HexGrid,
        kind: StrategyKind,
        centre: GeoPoint,
        prob_map: ProbabilityMap,
        max_step: u32,
        false_negative_rate: f64,
    ) -> GridResult<Self> {
        Ok(Self {
            grid,
            strategy: PathStrategy::new(kind, grid, centre)?,
            prob_map,
            step_count: 0,
            max_step,
            false_negative_rate,
        })
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn prob_map(&self) -> &ProbabilityMap {
        &self.prob_map
    }

    /// Computes the next waypoint and applies the "searched, found
    /// nothing" Bayesian update for it. Each step is atomic and
    /// synchronous; termination is signalled through the returned variant.
    pub fn next_waypoint(&mut self, current: GeoPoint) -> Result<SessionStep, PathError> {
        self.step_count += 1;
        if self.step_count > self.max_step {
            return Ok(SessionStep::Exhausted);
        }

        let next = self.strategy.find_next_step(current, &self.prob_map)?;
        let cell = self.grid.cell(next)?;
        match self.prob_map.bayesian_update(cell, self.false_negative_rate) {
            Ok(()) => Ok(SessionStep::Waypoint(next)),
            Err(DegenerateMapError) => Ok(SessionStep::Degenerate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashSet;

    const SIGMA: f64 = 0.003;

    fn centre() -> GeoPoint {
        GeoPoint::new(1.3401246, 103.9624159)
    }

    fn seeded_map(grid: &HexGrid, ring_radius: u32) -> ProbabilityMap {
        let mut map = ProbabilityMap::init_empty(grid, centre(), ring_radius).unwrap();
        map.seed_from_hotspots(grid, &[centre()], SIGMA, 10).unwrap();
        map
    }

    #[test]
    fn bayesian_step_moves_toward_the_peak() {
        let grid = HexGrid::default();
        let map = seeded_map(&grid, 6);
        let search = BayesianHexSearch::new(grid, centre()).unwrap();

        let peak = map.peak_cell().unwrap();
        // Start three rings away from the peak.
        let start_cell = grid.ring(peak, 3)[0];
        let start = grid.center(start_cell);

        let next = search.find_next_step(start, &map).unwrap();
        let next_cell = grid.cell(next).unwrap();

        let before = grid.line(start_cell, peak).unwrap().len();
        let after = grid.line(next_cell, peak).unwrap().len();
        assert!(after < before, "step must reduce hex distance to the peak");
    }

    #[test]
    fn bayesian_outside_map_returns_the_toward_peak_default() {
        let grid = HexGrid::default();
        let map = seeded_map(&grid, 2);
        let search = BayesianHexSearch::new(grid, centre()).unwrap();

        // No neighbor of this position is in the map, so every score stays
        // at the floor and the line default must win.
        let peak = map.peak_cell().unwrap();
        let faraway_cell = grid.ring(peak, 30)[0];
        let faraway = grid.center(faraway_cell);

        let next = search.find_next_step(faraway, &map).unwrap();
        let next_cell = grid.cell(next).unwrap();
        let line = grid.line(faraway_cell, peak).unwrap();
        assert_eq!(next_cell, line[1]);
    }

    #[test]
    fn bayesian_at_peak_with_empty_scores_stays_put() {
        let grid = HexGrid::default();
        // All-zero single-cell map: no line to walk, no neighbor in map.
        let map = ProbabilityMap::init_empty(&grid, centre(), 0).unwrap();
        let search = BayesianHexSearch::new(grid, centre()).unwrap();

        let next = search.find_next_step(centre(), &map).unwrap();
        let next_cell = grid.cell(next).unwrap();
        assert_eq!(next_cell, grid.cell(centre()).unwrap());
    }

    #[test]
    fn spiral_ring_k_yields_6k_fresh_waypoints() {
        let grid = HexGrid::default();
        let mut spiral = OutwardSpiralPathFinder::new(grid, centre()).unwrap();
        let centre_cell = grid.cell(centre()).unwrap();

        let mut visited: HashSet<_> = HashSet::new();
        visited.insert(centre_cell);

        let mut position = centre();
        for ring in 1..=3u32 {
            let mut fresh = 0;
            for _ in 0..6 * ring {
                position = spiral.find_next_step(position).unwrap();
                let cell = grid.cell(position).unwrap();
                assert!(visited.insert(cell), "spiral revisited {}", cell);
                fresh += 1;
                // Every waypoint stays on its ring.
                assert_eq!(grid.line(centre_cell, cell).unwrap().len() as u32, ring + 1);
            }
            assert_eq!(fresh, 6 * ring);
        }
        assert_eq!(spiral.mismatches(), 0);
    }

    #[test]
    fn spiral_desync_warns_but_keeps_the_plan() {
        let grid = HexGrid::default();
        let mut spiral = OutwardSpiralPathFinder::new(grid, centre()).unwrap();

        let planned_first = spiral.find_next_step(centre()).unwrap();

        // Report a position that is not the planned waypoint.
        let stray = GeoPoint::new(1.35, 103.97);
        let planned_second = spiral.find_next_step(stray).unwrap();

        assert_eq!(spiral.mismatches(), 1);
        assert_ne!(planned_first, planned_second);

        // The continuation matches an undisturbed spiral's third waypoint.
        let mut reference = OutwardSpiralPathFinder::new(grid, centre()).unwrap();
        let mut expected = centre();
        for _ in 0..2 {
            expected = reference.find_next_step(expected).unwrap();
        }
        assert_eq!(planned_second, expected);
    }

    #[test]
    fn session_exhausts_after_the_step_budget() {
        let grid = HexGrid::default();
        let map = seeded_map(&grid, 3);
        let mut session =
            PathfinderSession::new(grid, StrategyKind::Spiral, centre(), map, 4, 0.3).unwrap();

        let mut position = centre();
        for _ in 0..4 {
            match session.next_waypoint(position).unwrap() {
                SessionStep::Waypoint(next) => position = next,
                other => panic!("unexpected termination: {:?}", other),
            }
        }
        assert_eq!(session.next_waypoint(position).unwrap(), SessionStep::Exhausted);
    }

    #[test]
    fn session_signals_degenerate_map() {
        let grid = HexGrid::default();
        let mut map = ProbabilityMap::init_empty(&grid, centre(), 0).unwrap();
        map.seed_from_hotspots(&grid, &[centre()], SIGMA, 1).unwrap();

        // A certain observer drains the single cell in one step.
        let mut session =
            PathfinderSession::new(grid, StrategyKind::Bayesian, centre(), map, 10, 1.0)
                .unwrap();
        assert_eq!(
            session.next_waypoint(centre()).unwrap(),
            SessionStep::Degenerate
        );
    }

    #[test]
    fn session_applies_the_update_after_each_step() {
        let grid = HexGrid::default();
        let map = seeded_map(&grid, 2);
        let peak_before = map.peak_cell().unwrap();
        let p_before = map.probability(peak_before).unwrap();

        let mut session =
            PathfinderSession::new(grid, StrategyKind::Bayesian, centre(), map, 10, 0.3)
                .unwrap();

        // Standing one ring off the peak, the first step lands on the peak
        // and decays it.
        let start = grid.center(grid.ring(peak_before, 1)[0]);
        let SessionStep::Waypoint(next) = session.next_waypoint(start).unwrap() else {
            panic!("expected a waypoint");
        };
        assert_eq!(grid.cell(next).unwrap(), peak_before);
        assert!(session.prob_map().probability(peak_before).unwrap() < p_before);
    }
}
