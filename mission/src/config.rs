use serde::{Deserialize, Serialize};

use crate::hexgrid::DEFAULT_RESOLUTION;
use crate::pathfinder::StrategyKind;

/// Mission-wide tuning knobs. Loaded once at startup and copied into each
/// search session; sessions never observe later changes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    /// H3 resolution for all grids in the mission.
    pub resolution: u8,
    /// Probability-map extent around a sector centre, in grid rings.
    pub sector_ring_radius: u32,
    /// Gaussian width (degrees) for hotspot seeding.
    pub seed_sigma: f64,
    /// How many rings around each hotspot receive seed mass.
    pub ring_search_limit: u32,
    /// Step budget per search session.
    pub max_step: u32,
    /// Probability that a scan misses a present victim.
    pub false_negative_rate: f64,
    /// Maximum cluster diameter (degrees) before a split.
    pub cluster_threshold: f64,
    /// Strategy used when a search is started without an explicit one.
    pub default_strategy: StrategyKind,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            sector_ring_radius: 20,
            seed_sigma: 0.003,
            ring_search_limit: 100,
            max_step: 300,
            false_negative_rate: 0.3,
            cluster_threshold: 0.1,
            default_strategy: StrategyKind::Bayesian,
        }
    }
}
