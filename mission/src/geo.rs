use serde::{Deserialize, Serialize};

/// Geographic position in degrees. Latitude in [-90, 90], longitude in
/// [-180, 180]; out-of-range or NaN coordinates are a programming error.
#[derive(Clone, Copy, Default, PartialEq, Debug, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        debug_assert!(lat.is_finite() && (-90.0..=90.0).contains(&lat));
        debug_assert!(lon.is_finite() && (-180.0..=180.0).contains(&lon));
        Self { lat, lon }
    }
}

/// A reported point of interest. Immutable once created; owned by the
/// clustering input set for the lifetime of the mission.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct HotspotPoint {
    pub id: u32,
    pub pos: GeoPoint,
}

impl HotspotPoint {
    pub fn new(id: u32, pos: GeoPoint) -> Self {
        Self { id, pos }
    }
}

/// Euclidean distance on raw lat/lon degrees. A small-search-area
/// approximation, not geodesic; the clustering threshold and the
/// pathfinder scoring are calibrated against this metric.
pub fn planar_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = a.lat - b.lat;
    let dlon = a.lon - b.lon;
    (dlat * dlat + dlon * dlon).sqrt()
}

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters. Used only for sizing sector radii.
pub fn haversine_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}
