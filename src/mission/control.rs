use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use super::route::{self, Outcome};
use crate::command::{Command, CommandChannel};
use crate::config::{MissionConfig, RoadmeshConfig};
use crate::decision::{Decision, DecisionEngine, DecisionKind};
use crate::error::CommandError;
use crate::power::{PowerMonitor, PowerSource, Runtime};
use crate::recon::{HazardModel, RandomHazardModel, ReconEngine, ReconRecord, ScanTrigger};
use crate::safety::SafetyGate;
use crate::sensors::{FileSensorSource, NominalSensors, SensorSnapshot, SensorSource};
use crate::storage::{write_json_atomic, EventLog, RecordStore};
use crate::vehicle::{VehicleState, VehicleStatus, Waypoint};

const STATUS_FAILURE_ESCALATION: u32 = 3;

/// What a single tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub commands_applied: usize,
    pub commands_skipped: usize,
    pub moved: bool,
    pub waypoint_reached: bool,
    pub scan: Option<ReconRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    Safety,
    LowPower,
}

/// Owns the vehicle state and drives it one tick at a time.
pub struct MissionLoop {
    mission: MissionConfig,
    tick_interval: Duration,
    decisions_enabled: bool,

    state: VehicleState,
    channel: Arc<CommandChannel>,
    status_path: PathBuf,
    events: EventLog,

    recon: ReconEngine,
    sensors: Box<dyn SensorSource>,
    safety: SafetyGate,
    power: PowerMonitor,
    decisions: DecisionEngine,

    rng: StdRng,
    started: Instant,
    last_sensors: SensorSnapshot,
    hold: Option<Hold>,
    status_failures: u32,
}

impl MissionLoop {
    pub fn new(config: &RoadmeshConfig) -> Result<Self> {
        let sensors: Box<dyn SensorSource> = match config.paths.sensors_path() {
            Some(path) => {
                info!("Reading sensor feed from {:?}", path);
                Box::new(FileSensorSource::new(path))
            }
            None => Box::new(NominalSensors),
        };
        let model = Box::new(RandomHazardModel::from_config(&config.recon));
        Self::with_sources(config, model, sensors)
    }

    /// Builds the loop around explicit hazard and sensor sources.
    pub fn with_sources(
        config: &RoadmeshConfig,
        model: Box<dyn HazardModel>,
        sensors: Box<dyn SensorSource>,
    ) -> Result<Self> {
        let paths = &config.paths;
        fs::create_dir_all(&paths.data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", paths.data_dir))?;

        let mission = config.mission.clone();
        let state = VehicleState::new(
            mission.default_route.clone(),
            mission.speed_per_tick,
            mission.hazard_window,
        );
        let recon = ReconEngine::new(
            model,
            RecordStore::open(paths.recon_path(), config.recon.retained_records),
            EventLog::new(paths.recon_log_path(), config.logs.max_bytes),
        );
        let rng = match mission.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            tick_interval: Duration::from_millis(mission.tick_interval_ms),
            decisions_enabled: config.decision.enabled,
            state,
            channel: Arc::new(CommandChannel::new(paths.command_path())),
            status_path: paths.status_path(),
            events: EventLog::new(paths.log_path(), config.logs.max_bytes),
            recon,
            sensors,
            safety: SafetyGate::new(config.safety.max_temperature),
            power: PowerMonitor::new(config.power.low_power_threshold),
            decisions: DecisionEngine::new(
                Duration::from_secs(config.decision.timeout_secs),
                config.decision.history_limit,
            ),
            rng,
            started: Instant::now(),
            last_sensors: SensorSnapshot::default(),
            hold: None,
            status_failures: 0,
            mission,
        })
    }

    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    /// Producer handle onto the loop's command queue.
    pub fn channel(&self) -> Arc<CommandChannel> {
        Arc::clone(&self.channel)
    }

    pub fn safety(&self) -> &SafetyGate {
        &self.safety
    }

    pub fn power(&self) -> &PowerMonitor {
        &self.power
    }

    pub fn decisions(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.history()
    }

    pub fn recon_records(&self) -> impl Iterator<Item = &ReconRecord> {
        self.recon.records()
    }

    pub fn consecutive_status_failures(&self) -> u32 {
        self.status_failures
    }

    /// Ticks forever. Each tick does blocking file work, so it runs through
    /// `block_in_place` and needs the multi-threaded runtime.
    pub async fn run(&mut self) -> Result<()> {
        let snapshot = self
            .state
            .snapshot(self.safety.state(), self.power.is_critical());
        tokio::task::block_in_place(|| write_json_atomic(&self.status_path, &snapshot))
            .context("Failed to write initial status")?;
        info!(
            "Mission loop running every {:?} from {}",
            self.tick_interval, self.state.position
        );

        loop {
            let report = tokio::task::block_in_place(|| self.tick());
            debug!(
                "Tick: applied={} skipped={} moved={} status={}",
                report.commands_applied, report.commands_skipped, report.moved, self.state.status
            );

            if self.decisions_enabled {
                let decision = self.evaluate_decision();
                if decision.kind != DecisionKind::Continue {
                    info!(
                        "Decision advice: {} (confidence {:.2})",
                        decision.kind, decision.confidence
                    );
                }
            }

            tokio::time::sleep(self.tick_interval).await;
        }
    }

    /// Final status write on shutdown.
    pub fn shutdown(&mut self) {
        self.persist_status();
        info!("Mission loop stopped at {}", self.state.position);
    }

    /// Advisory decision from the latest sensor snapshot.
    pub fn evaluate_decision(&mut self) -> Decision {
        self.decisions
            .evaluate(&self.last_sensors, self.started.elapsed())
    }

    /// One control cycle: commands, gating, motion, recon, status.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.apply_commands(&mut report);

        let sensors = self.sensors.snapshot();
        let safety = self.safety.evaluate(&sensors);
        self.last_sensors = sensors;
        self.power.update(self.state.battery, PowerSource::Battery);

        let hold = if !safety.is_safe() {
            Some(Hold::Safety)
        } else if self.power.is_critical() {
            Some(Hold::LowPower)
        } else {
            None
        };
        self.update_hold(hold);

        if self.state.status.is_moving() {
            if hold.is_none() {
                self.advance(&mut report);
            } else {
                debug!("Motion held ({:?})", hold);
            }
        }

        self.persist_status();
        report
    }

    fn apply_commands(&mut self, report: &mut TickReport) {
        let mut seen = HashSet::new();
        for queued in self.channel.drain() {
            let duplicate = self.state.last_command_id.as_deref() == Some(queued.identity.as_str())
                || !seen.insert(queued.identity.clone());
            if duplicate {
                debug!("Skipping duplicate command {}", queued.identity);
                report.commands_skipped += 1;
                continue;
            }

            match queued.command.and_then(|command| self.apply(command)) {
                Ok(()) => {
                    self.state.last_command_id = Some(queued.identity);
                    report.commands_applied += 1;
                }
                Err(e) => {
                    warn!("Skipping command {}: {}", queued.identity, e);
                    report.commands_skipped += 1;
                }
            }
        }
    }

    fn apply(&mut self, command: Command) -> Result<(), CommandError> {
        info!("Applying command: {}", command.action());
        match command {
            Command::Start => {
                self.state.status = VehicleStatus::Enroute;
                self.log_event("Vehicle started");
            }
            Command::Stop => {
                if self.set_status(VehicleStatus::Stopped) {
                    self.log_event("Vehicle stopped");
                }
            }
            Command::Manual { direction, speed } => {
                self.log_event(&format!("Manual control: {} at {}", direction, speed));
                self.set_status(VehicleStatus::Manual { direction, speed });
            }
            Command::AddRoute { route } => {
                let route = self.route_or_default(route, "add_route")?;
                self.log_event(&format!("Route added: {}", format_route(&route)));
                self.state.load_route(route);
                self.set_status(VehicleStatus::Enroute);
            }
            Command::UpdateRoute { route } => {
                let route = self.route_or_default(route, "update_route")?;
                self.log_event(&format!("Route updated: {}", format_route(&route)));
                self.state.load_route(route);
                self.set_status(VehicleStatus::Enroute);
            }
            Command::DeleteRoute => {
                self.state.clear_route();
                self.set_status(VehicleStatus::Idle);
                self.log_event("Route deleted");
            }
            Command::Reroute { reason } => {
                let reason = reason.unwrap_or_else(|| "unknown".to_string());
                let detour = self.detour();
                self.log_event(&format!(
                    "Rerouted due to {}: {}",
                    reason,
                    format_route(&detour)
                ));
                self.state.load_route(detour);
                self.state.reroute_reason = Some(reason);
                self.state.status = VehicleStatus::Rerouted;
            }
            Command::Recon => {
                self.state.recon_mode = true;
                self.log_event("Recon mission started");
            }
            Command::StopRecon => {
                self.state.recon_mode = false;
                self.log_event("Recon mission stopped");
            }
            Command::ResetSafety => {
                self.safety.reset();
                self.log_event("Safety state reset");
            }
        }
        Ok(())
    }

    /// Status change from a command other than `start` or `reroute`. A
    /// hazard pause outranks it; the command's other effects still apply.
    fn set_status(&mut self, status: VehicleStatus) -> bool {
        if let VehicleStatus::Paused { hazard } = self.state.status {
            info!("Holding pause for {} over requested {}", hazard, status);
            self.log_event(&format!("Still paused due to severe hazard: {}", hazard));
            return false;
        }
        self.state.status = status;
        true
    }

    fn route_or_default(
        &self,
        route: Option<Vec<Waypoint>>,
        action: &'static str,
    ) -> Result<Vec<Waypoint>, CommandError> {
        match route {
            Some(route) if route.is_empty() => Err(CommandError::EmptyRoute { action }),
            Some(route) => Ok(route),
            None => Ok(self.mission.default_route.clone()),
        }
    }

    /// Current position, a random offset point, then the default destination.
    fn detour(&mut self) -> Vec<Waypoint> {
        let here = self.state.position;
        let offsets = self.mission.detour_offset_min..=self.mission.detour_offset_max;
        let via = Waypoint::new(
            here.lat + self.rng.gen_range(offsets.clone()),
            here.lon + self.rng.gen_range(offsets),
        );
        let destination = self
            .mission
            .default_route
            .last()
            .copied()
            .unwrap_or(via);
        vec![here, via, destination]
    }

    fn advance(&mut self, report: &mut TickReport) {
        let state = &mut self.state;
        if state.route.is_empty() {
            if state.status != VehicleStatus::Idle {
                state.status = VehicleStatus::Idle;
                self.log_event("No route loaded, vehicle idle");
            }
            return;
        }
        if state.current_index >= state.route.len() {
            state.status = VehicleStatus::Arrived;
            return;
        }

        let step = route::advance(
            state.position,
            &state.route,
            state.current_index,
            state.speed_per_tick,
        );
        report.moved = step.position != state.position;
        report.waypoint_reached = step.reached;
        state.position = step.position;
        state.current_index = step.index;
        state.drain_battery(self.mission.battery_drain_per_tick);

        let arrived = step.outcome == Outcome::Arrived;
        if arrived {
            state.status = VehicleStatus::Arrived;
        }
        if step.reached {
            let message = format!("Reached waypoint {}: {}", step.index, step.position);
            self.log_event(&message);
        }
        if arrived {
            let message = format!("Arrived at destination {}", step.position);
            self.log_event(&message);
        }

        if let Runtime::Ticks(ticks) = self.power.estimate_runtime(self.mission.battery_drain_per_tick) {
            debug!("Battery {:.2}%, about {:.0} ticks left", self.state.battery, ticks);
        }

        let trigger = if step.reached {
            ScanTrigger::WaypointReached
        } else {
            ScanTrigger::Transit
        };
        report.scan = self
            .recon
            .maybe_scan(self.state.position, self.state.recon_mode, trigger);
        if let Some(record) = &report.scan {
            self.handle_scan(record, arrived);
        }
    }

    fn handle_scan(&mut self, record: &ReconRecord, arrived: bool) {
        for hazard in &record.detected {
            self.state.record_hazard(hazard.clone());
            self.log_event(&format!(
                "Hazard detected: {} ({}) at {}",
                hazard.kind, hazard.severity, hazard.location
            ));
        }
        // Arrival at the final waypoint stands; the hazard is still recorded.
        if let Some(hazard) = record.severe_hazard().filter(|_| !arrived) {
            warn!("Severe {} at {}, pausing", hazard.kind, hazard.location);
            self.state.status = VehicleStatus::Paused { hazard: hazard.kind };
            self.log_event(&format!("Vehicle paused due to severe hazard: {}", hazard.kind));
        }
    }

    fn update_hold(&mut self, hold: Option<Hold>) {
        if hold == self.hold {
            return;
        }
        match hold {
            Some(Hold::Safety) => {
                let safety = self.safety.state();
                warn!("Motion held by safety gate: {:?}", safety);
                self.log_event(&format!(
                    "Motion held: safety (override={}, abort={})",
                    safety.override_active, safety.abort_active
                ));
            }
            Some(Hold::LowPower) => {
                warn!("Motion held by low power: {:.2}%", self.power.level());
                self.log_event(&format!("Motion held: low power ({:.2}%)", self.power.level()));
            }
            None => {
                info!("Motion gate open");
                self.log_event("Motion resumed");
            }
        }
        self.hold = hold;
    }

    fn persist_status(&mut self) {
        let snapshot = self
            .state
            .snapshot(self.safety.state(), self.power.is_critical());
        match write_json_atomic(&self.status_path, &snapshot) {
            Ok(()) => self.status_failures = 0,
            Err(e) => {
                self.status_failures += 1;
                if self.status_failures >= STATUS_FAILURE_ESCALATION {
                    error!(
                        "Status write failed {} times in a row: {:#}",
                        self.status_failures, e
                    );
                } else {
                    warn!("Failed to write status: {:#}", e);
                }
            }
        }
    }

    fn log_event(&self, message: &str) {
        info!("{}", message);
        if let Err(e) = self.events.append(message) {
            error!("Failed to write event log: {:#}", e);
        }
    }
}

fn format_route(route: &[Waypoint]) -> String {
    let points: Vec<String> = route.iter().map(ToString::to_string).collect();
    format!("[{}]", points.join(", "))
}
