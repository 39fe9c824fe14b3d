use common::log_setup::setup_logging;
use mission::config::MissionConfig;
use mission::drone::{DroneCommand, DroneId, DroneState};
use mission::geo::GeoPoint;
use mission::pathfinder::StrategyKind;
use mission::worker::MissionWorker;
use tokio::sync::mpsc::unbounded_channel;
use tracing::info;

/// Runs a small two-drone mission against two hotspot groups, echoing
/// every MoveTo back as telemetry so the search runs to completion.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging("info");

    let base = GeoPoint::new(1.3399, 103.9599);
    let fleet = vec![
        DroneState::new(DroneId::unique(), base),
        DroneState::new(DroneId::unique(), base),
    ];

    let mut hotspots = Vec::new();
    for i in 0..5 {
        hotspots.push(GeoPoint::new(1.34 + 0.0001 * i as f64, 103.96));
        hotspots.push(GeoPoint::new(2.34 + 0.0001 * i as f64, 104.96));
    }

    let config = MissionConfig {
        max_step: 50,
        sector_ring_radius: 10,
        ring_search_limit: 10,
        ..MissionConfig::default()
    };

    let (commands_tx, mut commands_rx) = unbounded_channel();
    let (finish_tx, mut finish_rx) = tokio::sync::mpsc::channel(8);
    let mut worker = MissionWorker::new(config, fleet, commands_tx, move |result| {
        let _ = finish_tx.try_send(result);
    })?;

    worker.add_hotspots(hotspots);
    worker.start_search(StrategyKind::Bayesian);

    let stats = loop {
        tokio::select! {
            Some(result) = finish_rx.recv() => break result?,
            Some((drone_id, command)) = commands_rx.recv() => match command {
                DroneCommand::MoveTo(position) => worker.position_update(drone_id, position),
                DroneCommand::SearchSector { sector, .. } => {
                    info!(drone = %drone_id, sector = sector.id, "starting sector");
                    worker.position_update(drone_id, sector.centre);
                }
                _ => {}
            },
        }
    };

    info!(
        total_steps = stats.total_steps,
        avg_steps = stats.average_steps_per_drone(),
        "mission complete"
    );
    worker.exit();
    Ok(())
}
