use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::DianaClusterFinder;
use crate::geo::{haversine_distance_m, GeoPoint, HotspotPoint};

#[derive(Debug, Clone, Error)]
#[error("cannot resolve the centre of an empty cluster")]
pub struct EmptyClusterError;

/// A resolved cluster selected for active drone search. Immutable once
/// built; the assigner references sectors but never mutates them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub id: usize,
    pub centre: GeoPoint,
    pub hotspots: Vec<HotspotPoint>,
    pub max_radius_m: f64,
}

/// Geographic centre of a cluster plus the maximum great-circle distance
/// (meters) from that centre to any member.
///
/// Each member is converted to a unit 3-D Cartesian vector before
/// averaging, which avoids the antimeridian and pole distortion of a naive
/// lat/lon mean.
pub fn find_search_centre(
    cluster: &[HotspotPoint],
) -> Result<(GeoPoint, f64), EmptyClusterError> {
    if cluster.is_empty() {
        return Err(EmptyClusterError);
    }

    let (mut x, mut y, mut z) = (0.0_f64, 0.0_f64, 0.0_f64);
    for point in cluster {
        let lat = point.pos.lat.to_radians();
        let lon = point.pos.lon.to_radians();
        x += lat.cos() * lon.cos();
        y += lat.cos() * lon.sin();
        z += lat.sin();
    }

    let n = cluster.len() as f64;
    x /= n;
    y /= n;
    z /= n;

    let centre_lon = y.atan2(x);
    let centre_lat = z.atan2((x * x + y * y).sqrt());
    let centre = GeoPoint::new(centre_lat.to_degrees(), centre_lon.to_degrees());

    let max_radius_m = cluster
        .iter()
        .map(|point| haversine_distance_m(centre, point.pos))
        .fold(0.0_f64, f64::max);

    Ok((centre, max_radius_m))
}

/// Discovers search sectors from raw hotspot reports: DIANA clustering
/// followed by centre resolution.
///
/// The returned order carries no priority meaning; exploration ordering is
/// the caller's policy.
pub fn run_clustering(
    hotspots: &[GeoPoint],
    threshold: f64,
) -> Result<Vec<Sector>, EmptyClusterError> {
    if hotspots.is_empty() {
        return Ok(Vec::new());
    }

    let points: Vec<HotspotPoint> = hotspots
        .iter()
        .enumerate()
        .map(|(id, &pos)| HotspotPoint::new(id as u32, pos))
        .collect();

    let clusters = DianaClusterFinder::new(threshold).fit(&points);

    let mut ids: Vec<usize> = clusters.keys().copied().collect();
    ids.sort_unstable();

    let mut sectors = Vec::with_capacity(ids.len());
    for id in ids {
        let members = &clusters[&id];
        let (centre, max_radius_m) = find_search_centre(members)?;
        sectors.push(Sector {
            id,
            centre,
            hotspots: members.clone(),
            max_radius_m,
        });
    }
    Ok(sectors)
}
