use common::id_type;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::geo::GeoPoint;
use crate::pathfinder::StrategyKind;
use crate::sector::Sector;

id_type!(DroneId);

#[derive(
    Clone, Copy, PartialEq, Eq, Debug, Hash, Display, EnumIter, Serialize, Deserialize, Default,
)]
pub enum DroneMode {
    #[default]
    Idle,
    Searching,
    ReturningToBase,
    Landed,
    Disconnected,
}

/// Last known state of one drone, as tracked by the orchestrator. The
/// position is whatever the latest telemetry reported; it can lag the
/// planned waypoint.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DroneState {
    pub id: DroneId,
    pub mode: DroneMode,
    pub position: GeoPoint,
}

impl DroneState {
    pub fn new(id: DroneId, position: GeoPoint) -> Self {
        Self {
            id,
            mode: DroneMode::Idle,
            position,
        }
    }
}

/// Outbound command to one drone. The orchestrator only emits these; how
/// they reach the vehicle is the transport layer's business.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DroneCommand {
    MoveTo(GeoPoint),
    SearchSector {
        sector: Sector,
        strategy: StrategyKind,
    },
    ReturnToBase,
    Land,
    Disconnect,
}
