use h3o::{CellIndex, CoordIJ, LatLng, LocalIJ, Resolution};
use thiserror::Error;

use crate::geo::{planar_distance, GeoPoint};

/// Default H3 resolution; cells are a few square meters, matching a
/// drone's single-scan footprint.
pub const DEFAULT_RESOLUTION: u8 = 14;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(#[from] h3o::error::InvalidLatLng),
    #[error("invalid resolution: {0}")]
    InvalidResolution(#[from] h3o::error::InvalidResolution),
    #[error("local IJ conversion failed: {0}")]
    LocalIj(#[from] h3o::error::LocalIjError),
}

pub type GridResult<T> = Result<T, GridError>;

/// Hexagonal spatial index seam. Everything h3o-specific stays behind this
/// type; the rest of the crate treats cell ids as opaque.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HexGrid {
    resolution: Resolution,
}

impl Default for HexGrid {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLUTION).expect("default resolution is valid")
    }
}

impl HexGrid {
    pub fn new(resolution: u8) -> GridResult<Self> {
        Ok(Self {
            resolution: Resolution::try_from(resolution)?,
        })
    }

    pub fn resolution(&self) -> u8 {
        self.resolution.into()
    }

    pub fn cell(&self, pos: GeoPoint) -> GridResult<CellIndex> {
        Ok(LatLng::new(pos.lat, pos.lon)?.to_cell(self.resolution))
    }

    pub fn center(&self, cell: CellIndex) -> GeoPoint {
        let latlng = LatLng::from(cell);
        GeoPoint::new(latlng.lat(), latlng.lng())
    }

    /// Cell plus all cells within `k` grid steps.
    pub fn disk(&self, cell: CellIndex, k: u32) -> Vec<CellIndex> {
        cell.grid_disk::<Vec<_>>(k)
    }

    /// Cells exactly `k` grid steps away. Falls back to the distance-scan
    /// path near pentagon distortions.
    pub fn ring(&self, cell: CellIndex, k: u32) -> Vec<CellIndex> {
        let fast: Option<Vec<_>> = cell.grid_ring_fast(k).collect();
        fast.unwrap_or_else(|| {
            cell.grid_disk_distances_safe(k)
                .filter(|(_, dist)| *dist == k)
                .map(|(cell, _)| cell)
                .collect()
        })
    }

    /// Straight hex-line path from `a` to `b`, inclusive of both ends.
    pub fn line(&self, a: CellIndex, b: CellIndex) -> GridResult<Vec<CellIndex>> {
        let cells = a.grid_path_cells(b)?.collect::<Result<Vec<_>, _>>()?;
        Ok(cells)
    }

    pub fn to_local_ij(&self, origin: CellIndex, cell: CellIndex) -> GridResult<(i32, i32)> {
        let local = cell.to_local_ij(origin)?;
        Ok((local.coord.i, local.coord.j))
    }

    pub fn from_local_ij(&self, origin: CellIndex, i: i32, j: i32) -> GridResult<CellIndex> {
        let cell = CellIndex::try_from(LocalIJ::new(origin, CoordIJ::new(i, j)))?;
        Ok(cell)
    }

    /// Planar Euclidean distance between two cell centers, in degrees.
    pub fn cell_distance(&self, a: CellIndex, b: CellIndex) -> f64 {
        planar_distance(self.center(a), self.center(b))
    }
}
