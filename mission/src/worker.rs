use std::collections::VecDeque;

use common::Shared;
use hashbrown::HashMap;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::assigner::{Assigner, RoundRobinAssigner};
use crate::config::MissionConfig;
use crate::drone::{DroneCommand, DroneId, DroneMode, DroneState};
use crate::geo::GeoPoint;
use crate::hexgrid::{GridError, HexGrid};
use crate::pathfinder::{PathError, PathfinderSession, SessionStep, StrategyKind};
use crate::probability::ProbabilityMap;
use crate::sector::{run_clustering, EmptyClusterError, Sector};

#[derive(Debug, Error)]
pub enum MissionError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Cluster(#[from] EmptyClusterError),
}

pub type Result<T> = std::result::Result<T, MissionError>;

#[derive(Debug)]
pub enum MissionMessage {
    Exit,
    AddHotspots { hotspots: Vec<GeoPoint> },
    StartSearch { strategy: StrategyKind },
    PositionUpdate { drone_id: DroneId, position: GeoPoint },
    Detection { drone_id: DroneId, position: GeoPoint },
    Reassign { drone_id: DroneId },
    Disconnect { drone_id: DroneId },
    SessionStepped { drone_id: DroneId },
    SessionEnded { drone_id: DroneId, reason: SessionEnd },
    Multi { msgs: Vec<MissionMessage> },
}

/// Why a search session retired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Exhausted,
    Degenerate,
    Reassigned,
    Disconnected,
    Failed,
}

/// Aggregate search effort, reported through the completion callback.
#[derive(Clone, Debug, Default)]
pub struct MissionStats {
    pub total_steps: u64,
    pub steps_per_drone: HashMap<DroneId, u64>,
    pub victims_found: u64,
    /// Steps the reporting drone had flown when each victim was first
    /// detected, one entry per detection.
    pub detection_steps: Vec<u64>,
    pub degenerate_sessions: u64,
}

impl MissionStats {
    pub fn average_steps_per_drone(&self) -> f64 {
        if self.steps_per_drone.is_empty() {
            return 0.0;
        }
        self.total_steps as f64 / self.steps_per_drone.len() as f64
    }

    /// Mean steps-to-first-detection over all detected victims.
    pub fn average_steps_to_first_detection(&self) -> f64 {
        if self.detection_steps.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.detection_steps.iter().sum();
        sum as f64 / self.detection_steps.len() as f64
    }
}

/// Mission orchestrator: owns the control loop task, routes telemetry to
/// per-drone search sessions and emits drone commands.
#[derive(Debug)]
pub struct MissionWorker {
    task_handle: Option<JoinHandle<()>>,
    tx: UnboundedSender<MissionMessage>,
}

impl MissionWorker {
    pub fn new<Callback>(
        config: MissionConfig,
        fleet: Vec<DroneState>,
        commands: UnboundedSender<(DroneId, DroneCommand)>,
        callback: Callback,
    ) -> Result<Self>
    where
        Callback: Fn(Result<MissionStats>) + Send + 'static,
    {
        let control = MissionControl::new(config, fleet, commands)?;
        let callback: Shared<Callback> = Shared::new(callback);
        let (tx, rx) = unbounded_channel::<MissionMessage>();
        let task_handle: JoinHandle<()> = tokio::spawn({
            let tx = tx.clone();
            async move {
                worker_loop(rx, tx, control, callback).await;
            }
        });

        Ok(Self {
            task_handle: Some(task_handle),
            tx,
        })
    }

    pub fn send(&self, msg: MissionMessage) {
        self.tx.send(msg).unwrap();
    }

    pub fn add_hotspots<T: IntoIterator<Item = GeoPoint>>(&self, hotspots: T) {
        let hotspots: Vec<GeoPoint> = hotspots.into_iter().collect();
        self.send(MissionMessage::AddHotspots { hotspots });
    }

    pub fn start_search(&self, strategy: StrategyKind) {
        self.send(MissionMessage::StartSearch { strategy });
    }

    pub fn position_update(&self, drone_id: DroneId, position: GeoPoint) {
        self.send(MissionMessage::PositionUpdate { drone_id, position });
    }

    pub fn detection(&self, drone_id: DroneId, position: GeoPoint) {
        self.send(MissionMessage::Detection { drone_id, position });
    }

    pub fn reassign(&self, drone_id: DroneId) {
        self.send(MissionMessage::Reassign { drone_id });
    }

    pub fn disconnect(&self, drone_id: DroneId) {
        self.send(MissionMessage::Disconnect { drone_id });
    }

    pub fn exit(&mut self) {
        self.send(MissionMessage::Exit);
        let _ = self.task_handle.take();
    }
}

impl Drop for MissionWorker {
    fn drop(&mut self) {
        if self.task_handle.is_some() {
            error!(
                "MissionWorker dropped while the control loop is still running; \
                 call MissionWorker::exit() first"
            );
        }
    }
}

/// Input to a per-drone session task.
#[derive(Debug)]
enum SessionInput {
    Position(GeoPoint),
    Stop(SessionEnd),
}

#[derive(Debug)]
struct SessionHandle {
    tx: UnboundedSender<SessionInput>,
    task_handle: JoinHandle<()>,
    /// The sector this session is flying, kept so an interrupted session
    /// can return it to the pending queue.
    sector: Sector,
}

/// One task per active session: steps are synchronous within the task, so
/// a session's probability map is never shared.
fn spawn_session(
    drone_id: DroneId,
    sector: Sector,
    mut session: PathfinderSession,
    commands: UnboundedSender<(DroneId, DroneCommand)>,
    tx: UnboundedSender<MissionMessage>,
) -> SessionHandle {
    let (session_tx, mut session_rx) = unbounded_channel::<SessionInput>();
    let task_handle = tokio::spawn(async move {
        let reason = loop {
            let Some(input) = session_rx.recv().await else {
                break SessionEnd::Disconnected;
            };
            let position = match input {
                SessionInput::Stop(reason) => break reason,
                SessionInput::Position(position) => position,
            };
            match session.next_waypoint(position) {
                Ok(SessionStep::Waypoint(waypoint)) => {
                    if commands
                        .send((drone_id, DroneCommand::MoveTo(waypoint)))
                        .is_err()
                    {
                        break SessionEnd::Disconnected;
                    }
                    let _ = tx.send(MissionMessage::SessionStepped { drone_id });
                }
                Ok(SessionStep::Exhausted) => break SessionEnd::Exhausted,
                Ok(SessionStep::Degenerate) => break SessionEnd::Degenerate,
                Err(err) => {
                    warn!(drone = %drone_id, "session step failed: {err}");
                    break SessionEnd::Failed;
                }
            }
        };
        let _ = tx.send(MissionMessage::SessionEnded { drone_id, reason });
    });
    SessionHandle {
        tx: session_tx,
        task_handle,
        sector,
    }
}

struct MissionControl {
    config: MissionConfig,
    grid: HexGrid,
    strategy: StrategyKind,
    drones: HashMap<DroneId, DroneState>,
    hotspots: Vec<GeoPoint>,
    pending: Vec<Sector>,
    sessions: HashMap<DroneId, SessionHandle>,
    commands: UnboundedSender<(DroneId, DroneCommand)>,
    assigner: RoundRobinAssigner,
    stats: MissionStats,
    search_started: bool,
}

impl MissionControl {
    fn new(
        config: MissionConfig,
        fleet: Vec<DroneState>,
        commands: UnboundedSender<(DroneId, DroneCommand)>,
    ) -> Result<Self> {
        let grid = HexGrid::new(config.resolution)?;
        let drones = fleet.into_iter().map(|state| (state.id, state)).collect();
        Ok(Self {
            config,
            grid,
            strategy: config.default_strategy,
            drones,
            hotspots: Vec::new(),
            pending: Vec::new(),
            sessions: HashMap::new(),
            commands,
            assigner: RoundRobinAssigner,
            stats: MissionStats::default(),
            search_started: false,
        })
    }

    /// Clusters the known hotspots and hands the resulting sectors to idle
    /// drones. The pending queue is kept sorted ascending by member count
    /// and consumed from the back, so the densest sectors go out first.
    fn start_search(
        &mut self,
        strategy: StrategyKind,
        tx: &UnboundedSender<MissionMessage>,
    ) -> Result<()> {
        self.strategy = strategy;
        self.search_started = true;

        let sectors = run_clustering(&self.hotspots, self.config.cluster_threshold)?;
        self.pending.extend(sectors);
        self.pending.sort_by_key(|sector| sector.hotspots.len());
        info!(
            sectors = self.pending.len(),
            hotspots = self.hotspots.len(),
            %strategy,
            "search started"
        );

        let idle: HashMap<DroneId, DroneState> = self
            .drones
            .iter()
            .filter(|(id, _)| !self.sessions.contains_key(*id))
            .map(|(id, state)| (*id, *state))
            .collect();
        let assignment = self.assigner.assign(&mut self.pending, &idle);

        for (drone_id, sector) in assignment {
            if let Err(err) = self.launch_session(drone_id, sector, tx) {
                warn!(drone = %drone_id, "failed to launch a session: {err}");
            }
        }
        Ok(())
    }

    fn launch_session(
        &mut self,
        drone_id: DroneId,
        sector: Sector,
        tx: &UnboundedSender<MissionMessage>,
    ) -> Result<()> {
        let mut prob_map =
            ProbabilityMap::init_empty(&self.grid, sector.centre, self.config.sector_ring_radius)?;
        let positions: Vec<GeoPoint> = sector.hotspots.iter().map(|h| h.pos).collect();
        prob_map.seed_from_hotspots(
            &self.grid,
            &positions,
            self.config.seed_sigma,
            self.config.ring_search_limit,
        )?;

        let session = PathfinderSession::new(
            self.grid,
            self.strategy,
            sector.centre,
            prob_map,
            self.config.max_step,
            self.config.false_negative_rate,
        )?;

        if let Some(state) = self.drones.get_mut(&drone_id) {
            state.mode = DroneMode::Searching;
        }
        info!(drone = %drone_id, sector = sector.id, "sector assigned");
        let _ = self.commands.send((
            drone_id,
            DroneCommand::SearchSector {
                sector: sector.clone(),
                strategy: self.strategy,
            },
        ));

        let handle = spawn_session(drone_id, sector, session, self.commands.clone(), tx.clone());
        self.sessions.insert(drone_id, handle);
        Ok(())
    }

    fn position_update(&mut self, drone_id: DroneId, position: GeoPoint) {
        let Some(state) = self.drones.get_mut(&drone_id) else {
            warn!(drone = %drone_id, "position update from an unknown drone");
            return;
        };
        state.position = position;
        if let Some(handle) = self.sessions.get(&drone_id) {
            let _ = handle.tx.send(SessionInput::Position(position));
        }
    }

    fn note_step(&mut self, drone_id: DroneId) {
        self.stats.total_steps += 1;
        *self.stats.steps_per_drone.entry(drone_id).or_insert(0) += 1;
    }

    fn detection(&mut self, drone_id: DroneId, position: GeoPoint) {
        self.stats.victims_found += 1;
        let steps = self
            .stats
            .steps_per_drone
            .get(&drone_id)
            .copied()
            .unwrap_or(0);
        self.stats.detection_steps.push(steps);
        info!(drone = %drone_id, ?position, steps, "victim detected");
    }

    /// Asks the session task to retire. The bookkeeping happens when its
    /// `SessionEnded` message arrives.
    fn stop_session(&mut self, drone_id: DroneId, reason: SessionEnd) {
        if let Some(handle) = self.sessions.get(&drone_id) {
            let _ = handle.tx.send(SessionInput::Stop(reason));
        }
    }

    fn disconnect(&mut self, drone_id: DroneId) {
        if let Some(state) = self.drones.get_mut(&drone_id) {
            state.mode = DroneMode::Disconnected;
        }
        self.stop_session(drone_id, SessionEnd::Disconnected);
    }

    fn session_ended(
        &mut self,
        drone_id: DroneId,
        reason: SessionEnd,
        tx: &UnboundedSender<MissionMessage>,
    ) {
        let Some(handle) = self.sessions.remove(&drone_id) else {
            return;
        };
        drop(handle.task_handle);
        info!(drone = %drone_id, ?reason, "session retired");

        match reason {
            SessionEnd::Degenerate => {
                // The sector is retired with its collapsed map, not requeued.
                self.stats.degenerate_sessions += 1;
                warn!(drone = %drone_id, "probability map degenerated; sector retired");
            }
            SessionEnd::Reassigned | SessionEnd::Disconnected => {
                // The interrupted sector was not fully searched; put it
                // back so another (or the same) drone can pick it up.
                self.pending.push(handle.sector);
                self.pending.sort_by_key(|sector| sector.hotspots.len());
            }
            SessionEnd::Exhausted | SessionEnd::Failed => {}
        }

        if let Some(state) = self.drones.get_mut(&drone_id) {
            if state.mode != DroneMode::Disconnected {
                state.mode = DroneMode::Idle;
            }
        }

        self.try_refill(drone_id, tx);
        if !self.sessions.contains_key(&drone_id) {
            if let Some(state) = self.drones.get_mut(&drone_id) {
                if state.mode == DroneMode::Idle {
                    state.mode = DroneMode::ReturningToBase;
                    let _ = self.commands.send((drone_id, DroneCommand::ReturnToBase));
                }
            }
        }
    }

    /// Hands the next pending sector to a drone that just went idle.
    fn try_refill(&mut self, drone_id: DroneId, tx: &UnboundedSender<MissionMessage>) {
        let idle = self
            .drones
            .get(&drone_id)
            .is_some_and(|state| state.mode == DroneMode::Idle);
        if !idle {
            return;
        }
        let Some(sector) = self.pending.pop() else {
            return;
        };
        if let Err(err) = self.launch_session(drone_id, sector, tx) {
            warn!(drone = %drone_id, "failed to launch a replacement session: {err}");
        }
    }

    /// The mission is over when every session retired and no idle drone is
    /// left to take pending work.
    fn is_complete(&self) -> bool {
        if !self.search_started || !self.sessions.is_empty() {
            return false;
        }
        self.pending.is_empty()
            || !self
                .drones
                .values()
                .any(|state| state.mode == DroneMode::Idle)
    }
}

async fn worker_loop<Callback>(
    mut rx: UnboundedReceiver<MissionMessage>,
    tx: UnboundedSender<MissionMessage>,
    mut control: MissionControl,
    callback: Shared<Callback>,
) where
    Callback: Fn(Result<MissionStats>) + Send + 'static,
{
    let mut msgs: VecDeque<MissionMessage> = VecDeque::default();
    let mut completed = false;

    'worker: loop {
        let msg = rx.recv().await;
        let Some(msg) = msg else { break };
        msgs.push_back(msg);

        loop {
            match rx.try_recv() {
                Ok(msg) => msgs.push_back(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'worker,
            }
        }

        while let Some(msg) = msgs.pop_front() {
            match msg {
                MissionMessage::Exit => break 'worker,
                MissionMessage::AddHotspots { hotspots } => control.hotspots.extend(hotspots),
                MissionMessage::StartSearch { strategy } => {
                    completed = false;
                    if let Err(err) = control.start_search(strategy, &tx) {
                        error!("failed to start the search: {err}");
                        (callback.lock().await)(Err(err));
                    }
                }
                MissionMessage::PositionUpdate { drone_id, position } => {
                    control.position_update(drone_id, position)
                }
                MissionMessage::Detection { drone_id, position } => {
                    control.detection(drone_id, position)
                }
                MissionMessage::Reassign { drone_id } => {
                    control.stop_session(drone_id, SessionEnd::Reassigned)
                }
                MissionMessage::Disconnect { drone_id } => control.disconnect(drone_id),
                MissionMessage::SessionStepped { drone_id } => control.note_step(drone_id),
                MissionMessage::SessionEnded { drone_id, reason } => {
                    control.session_ended(drone_id, reason, &tx)
                }
                MissionMessage::Multi { msgs: new_msgs } => msgs.extend(new_msgs),
            }
        }

        if !completed && control.is_complete() {
            completed = true;
            (callback.lock().await)(Ok(control.stats.clone()));
        }
    }
}
