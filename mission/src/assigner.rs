use hashbrown::HashMap;

use crate::drone::{DroneId, DroneMode, DroneState};
use crate::sector::Sector;

/// Pairs pending sectors with drones. Implementations take sectors off the
/// shared queue; whatever they leave behind stays pending for the next
/// round.
pub trait Assigner {
    /// Disconnected drones never receive work.
    fn is_eligible(&self, state: &DroneState) -> bool {
        state.mode != DroneMode::Disconnected
    }

    /// Hands out at most one sector per drone per call, removing the
    /// assigned sectors from `pending`.
    fn assign(
        &self,
        pending: &mut Vec<Sector>,
        drones: &HashMap<DroneId, DroneState>,
    ) -> HashMap<DroneId, Sector>;
}

/// Simple queue policy: eligible drones in ascending id order each pop the
/// back of the pending queue.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobinAssigner;

impl Assigner for RoundRobinAssigner {
    fn assign(
        &self,
        pending: &mut Vec<Sector>,
        drones: &HashMap<DroneId, DroneState>,
    ) -> HashMap<DroneId, Sector> {
        let mut eligible: Vec<DroneId> = drones
            .values()
            .filter(|state| self.is_eligible(state))
            .map(|state| state.id)
            .collect();
        eligible.sort_unstable();

        let mut assignment = HashMap::new();
        for drone_id in eligible {
            let Some(sector) = pending.pop() else { break };
            assignment.insert(drone_id, sector);
        }
        assignment
    }
}
