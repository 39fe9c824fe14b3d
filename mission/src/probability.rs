use h3o::CellIndex;
use hashbrown::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::geo::{planar_distance, GeoPoint};
use crate::hexgrid::{GridResult, HexGrid};

/// The probability map lost all mass after an update. Recoverable: the
/// orchestrator decides whether to reseed or retire the session.
#[derive(Debug, Clone, Error)]
#[error("probability map mass collapsed to zero")]
pub struct DegenerateMapError;

/// Detection-probability distribution over a fixed set of hex cells.
///
/// The key set is fixed at construction; seeding and updates never insert
/// new cells. After every mutating call the values are non-negative and
/// sum to 1 (within 1e-9), unless the map has degenerated to empty.
#[derive(Clone, Debug, Default)]
pub struct ProbabilityMap {
    cells: HashMap<CellIndex, f64>,
    /// Seed or update cells that fell outside the map extent. Repetition
    /// signals an undersized sector radius.
    dropped_cells: u64,
}

impl ProbabilityMap {
    /// Allocates zero-probability entries for every cell within
    /// `ring_radius` steps of the centre cell.
    pub fn init_empty(grid: &HexGrid, centre: GeoPoint, ring_radius: u32) -> GridResult<Self> {
        let centre_cell = grid.cell(centre)?;
        let cells = grid
            .disk(centre_cell, ring_radius)
            .into_iter()
            .map(|cell| (cell, 0.0))
            .collect();
        Ok(Self {
            cells,
            dropped_cells: 0,
        })
    }

    /// Adds a Gaussian contribution `exp(-d²/(2σ²))` around every hotspot
    /// to a delta map, normalizes the delta to sum 1, merges it additively
    /// and renormalizes the whole map to sum 1.
    ///
    /// `d` is the planar degree distance from the hotspot's cell to the
    /// ring being filled. Cells outside the map extent are dropped and
    /// counted, never inserted.
    pub fn seed_from_hotspots(
        &mut self,
        grid: &HexGrid,
        hotspots: &[GeoPoint],
        sigma: f64,
        ring_search_limit: u32,
    ) -> GridResult<()> {
        let mut delta: HashMap<CellIndex, f64> = HashMap::new();
        let mut dropped = 0u64;

        for hotspot in hotspots {
            let hotspot_cell = grid.cell(*hotspot)?;
            if !self.cells.contains_key(&hotspot_cell) {
                warn!("hotspot cell {} is outside the map extent", hotspot_cell);
                dropped += 1;
            }
            let hotspot_centre = grid.center(hotspot_cell);

            for k in 0..ring_search_limit {
                let ring = grid.ring(hotspot_cell, k);
                let Some(&representative) = ring.first() else {
                    continue;
                };
                let dist = planar_distance(hotspot_centre, grid.center(representative));
                let contribution = gaussian(dist, sigma);

                for cell in ring {
                    if self.cells.contains_key(&cell) {
                        *delta.entry(cell).or_insert(0.0) += contribution;
                    } else {
                        dropped += 1;
                    }
                }
            }
        }

        if dropped > 0 {
            debug!(dropped, "seed cells fell outside the map extent");
            self.dropped_cells += dropped;
        }

        let delta_total: f64 = delta.values().sum();
        if delta_total > 0.0 {
            for (cell, value) in delta {
                if let Some(entry) = self.cells.get_mut(&cell) {
                    *entry += value / delta_total;
                }
            }
        }

        if !self.renormalize() {
            warn!("probability map is all zero after seeding");
        }
        Ok(())
    }

    /// Models "searched `observed` and found nothing" with false-negative
    /// rate `f`: posterior = prior·(1−f) / (1 − prior·f) on the observed
    /// cell only, then renormalizes.
    ///
    /// An observed cell outside the map is a counted no-op. If the total
    /// mass collapses to zero the map is emptied and
    /// `DegenerateMapError` returned.
    pub fn bayesian_update(
        &mut self,
        observed: CellIndex,
        f: f64,
    ) -> Result<(), DegenerateMapError> {
        debug_assert!((0.0..=1.0).contains(&f));

        let Some(prior) = self.cells.get(&observed).copied() else {
            warn!("observed cell {} is outside the map extent", observed);
            self.dropped_cells += 1;
            return Ok(());
        };

        let denominator = 1.0 - prior * f;
        let posterior = if denominator <= 0.0 {
            0.0
        } else {
            prior * (1.0 - f) / denominator
        };
        self.cells.insert(observed, posterior);

        if !self.renormalize() {
            self.cells.clear();
            return Err(DegenerateMapError);
        }
        Ok(())
    }

    /// Cell holding the maximum probability; ties break on ascending cell
    /// index so iteration is reproducible.
    pub fn peak_cell(&self) -> Option<CellIndex> {
        self.cells
            .iter()
            .max_by(|(cell_a, prob_a), (cell_b, prob_b)| {
                prob_a
                    .partial_cmp(prob_b)
                    .expect("probabilities are never NaN")
                    .then_with(|| cell_b.cmp(cell_a))
            })
            .map(|(cell, _)| *cell)
    }

    pub fn probability(&self, cell: CellIndex) -> Option<f64> {
        self.cells.get(&cell).copied()
    }

    pub fn contains(&self, cell: CellIndex) -> bool {
        self.cells.contains_key(&cell)
    }

    pub fn total(&self) -> f64 {
        self.cells.values().sum()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn dropped_cells(&self) -> u64 {
        self.dropped_cells
    }

    /// Scales all values so they sum to 1. Returns false (leaving the map
    /// untouched) when the total is zero.
    fn renormalize(&mut self) -> bool {
        let total = self.total();
        if total <= 0.0 {
            return false;
        }
        for value in self.cells.values_mut() {
            *value /= total;
        }
        true
    }
}

fn gaussian(dist: f64, sigma: f64) -> f64 {
    (-dist * dist / (2.0 * sigma * sigma)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::float_ext::FloatExt;
    use crate::geo::GeoPoint;

    const SIGMA: f64 = 0.003;

    fn centre() -> GeoPoint {
        GeoPoint::new(1.3401246, 103.9624159)
    }

    fn seeded_map(ring_radius: u32) -> (HexGrid, ProbabilityMap) {
        let grid = HexGrid::default();
        let mut map = ProbabilityMap::init_empty(&grid, centre(), ring_radius).unwrap();
        map.seed_from_hotspots(&grid, &[centre()], SIGMA, 10).unwrap();
        (grid, map)
    }

    #[test]
    fn init_empty_allocates_the_full_disk() {
        let grid = HexGrid::default();
        let map = ProbabilityMap::init_empty(&grid, centre(), 2).unwrap();
        // disk(k) = 1 + 3k(k+1)
        assert_eq!(map.len(), 19);
        assert_eq!(map.total(), 0.0);
    }

    #[test]
    fn seeding_normalizes_to_one() {
        let (_, map) = seeded_map(5);
        assert!(map.total().approximately_eq(1.0));
        for cell in map.cells.keys() {
            let p = map.probability(*cell).unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn seeding_peaks_at_the_hotspot() {
        let (grid, map) = seeded_map(5);
        let hotspot_cell = grid.cell(centre()).unwrap();
        assert_eq!(map.peak_cell(), Some(hotspot_cell));
    }

    #[test]
    fn update_with_zero_false_negative_rate_is_a_no_op() {
        let (grid, mut map) = seeded_map(3);
        let before: HashMap<CellIndex, f64> = map.cells.clone();
        let peak = grid.cell(centre()).unwrap();

        map.bayesian_update(peak, 0.0).unwrap();

        for (cell, prior) in before {
            assert!(map.probability(cell).unwrap().approximately_eq(prior));
        }
    }

    #[test]
    fn repeated_updates_decay_the_searched_cell() {
        let (grid, mut map) = seeded_map(1);
        let peak = grid.cell(centre()).unwrap();

        let mut previous = map.probability(peak).unwrap();
        for _ in 0..5 {
            map.bayesian_update(peak, 0.3).unwrap();
            let current = map.probability(peak).unwrap();
            assert!(
                current < previous,
                "peak probability must strictly decrease"
            );
            assert!(map.total().approximately_eq(1.0));
            previous = current;
        }
    }

    #[test]
    fn high_false_negative_rate_drives_mass_away() {
        let (grid, mut map) = seeded_map(2);
        let peak = grid.cell(centre()).unwrap();

        for _ in 0..50 {
            map.bayesian_update(peak, 0.99).unwrap();
        }
        assert!(map.probability(peak).unwrap() < 1e-3);
        assert!(map.total().approximately_eq(1.0));
    }

    #[test]
    fn update_outside_extent_is_a_counted_no_op() {
        let (grid, mut map) = seeded_map(1);
        let faraway = grid.cell(GeoPoint::new(51.5, -0.12)).unwrap();
        let total_before = map.total();
        // Seeding past the 1-ring extent already dropped cells; only the
        // delta belongs to this update.
        let dropped_before = map.dropped_cells();

        map.bayesian_update(faraway, 0.3).unwrap();

        assert!(map.total().approximately_eq(total_before));
        assert_eq!(map.dropped_cells() - dropped_before, 1);
    }

    #[test]
    fn total_collapse_degenerates_the_map() {
        let grid = HexGrid::default();
        // Single-cell map carrying all the mass.
        let mut map = ProbabilityMap::init_empty(&grid, centre(), 0).unwrap();
        map.seed_from_hotspots(&grid, &[centre()], SIGMA, 1).unwrap();
        let cell = grid.cell(centre()).unwrap();
        assert!(map.probability(cell).unwrap().approximately_eq(1.0));

        let result = map.bayesian_update(cell, 1.0);
        assert!(result.is_err());
        assert!(map.is_empty());
    }

    #[test]
    fn out_of_extent_hotspots_are_dropped_not_inserted() {
        let grid = HexGrid::default();
        let mut map = ProbabilityMap::init_empty(&grid, centre(), 1).unwrap();
        let len_before = map.len();

        let faraway = GeoPoint::new(51.5, -0.12);
        map.seed_from_hotspots(&grid, &[faraway], SIGMA, 3).unwrap();

        assert_eq!(map.len(), len_before);
        assert!(map.dropped_cells() > 0);
    }
}
