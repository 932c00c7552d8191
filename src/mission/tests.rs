#[cfg(test)]
mod mission_tests {
    use std::fs;
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use crate::command::Command;
    use crate::config::RoadmeshConfig;
    use crate::decision::DecisionKind;
    use crate::mission::MissionLoop;
    use crate::recon::tests::ScriptedModel;
    use crate::recon::{HazardKind, Severity};
    use crate::sensors::{SensorSnapshot, SensorSource};
    use crate::vehicle::{StatusSnapshot, VehicleStatus, Waypoint};

    /// Sensor feed the test flips between ticks.
    #[derive(Clone, Default)]
    struct SharedSensors(Arc<Mutex<SensorSnapshot>>);

    impl SharedSensors {
        fn set(&self, snapshot: SensorSnapshot) {
            *self.0.lock().unwrap() = snapshot;
        }
    }

    impl SensorSource for SharedSensors {
        fn snapshot(&mut self) -> SensorSnapshot {
            self.0.lock().unwrap().clone()
        }
    }

    struct Harness {
        dir: TempDir,
        mission: MissionLoop,
        sensors: SharedSensors,
    }

    impl Harness {
        fn new(detections: Vec<Option<(HazardKind, Severity)>>) -> Result<Self> {
            Self::with_config(detections, |_| {})
        }

        fn with_config(
            detections: Vec<Option<(HazardKind, Severity)>>,
            tweak: impl FnOnce(&mut RoadmeshConfig),
        ) -> Result<Self> {
            let dir = TempDir::new()?;
            let mut config = RoadmeshConfig::with_data_dir(dir.path());
            config.mission.seed = Some(7);
            tweak(&mut config);

            let sensors = SharedSensors::default();
            let mission = MissionLoop::with_sources(
                &config,
                Box::new(ScriptedModel::new(detections)),
                Box::new(sensors.clone()),
            )?;
            Ok(Self {
                dir,
                mission,
                sensors,
            })
        }

        fn queue(&self, commands: &[Value]) -> Result<()> {
            let channel = self.mission.channel();
            for command in commands {
                channel.append(command.clone())?;
            }
            Ok(())
        }

        fn read_status(&self) -> Result<StatusSnapshot> {
            let raw = fs::read_to_string(self.dir.path().join("vehicle_status.json"))?;
            Ok(serde_json::from_str(&raw)?)
        }

        fn event_log(&self) -> Result<String> {
            Ok(fs::read_to_string(self.dir.path().join("vehicle_logs.txt"))?)
        }
    }

    #[test]
    fn short_route_arrives_in_two_ticks() -> Result<()> {
        let mut h = Harness::new(vec![])?;
        assert_eq!(h.mission.state().status, VehicleStatus::Idle);

        h.queue(&[json!({"action": "add_route", "route": [[0, 0], [0, 0.002]]})])?;

        let first = h.mission.tick();
        assert_eq!(first.commands_applied, 1);
        assert!(first.moved);
        assert_eq!(h.mission.state().status, VehicleStatus::Enroute);

        let second = h.mission.tick();
        assert!(second.moved);
        assert!(second.waypoint_reached);

        let state = h.mission.state();
        assert_eq!(state.status, VehicleStatus::Arrived);
        assert_eq!(state.position, Waypoint::new(0.0, 0.002));
        assert_eq!(state.current_index, 2);
        assert!((state.battery - (100.0 - 2.0 * 0.01)).abs() < 1e-9);

        let status = h.read_status()?;
        assert_eq!(status.status, VehicleStatus::Arrived);
        assert_eq!(status.current_waypoint, 2);

        // Arrived vehicles stay put and stop draining.
        let third = h.mission.tick();
        assert!(!third.moved);
        assert!((h.mission.state().battery - 99.98).abs() < 1e-9);

        let log = h.event_log()?;
        assert!(log.contains("Route added"));
        assert!(log.contains("Arrived at destination"));
        Ok(())
    }

    #[test]
    fn reroute_builds_detour_from_current_position() -> Result<()> {
        let mut h = Harness::new(vec![])?;
        h.queue(&[
            json!({"action": "add_route", "route": [[10, 10], [20, 20]]}),
            json!({"action": "reroute", "reason": "storm"}),
        ])?;
        let report = h.mission.tick();
        assert_eq!(report.commands_applied, 2);

        let state = h.mission.state();
        assert_eq!(state.route.len(), 3);
        assert_eq!(state.route[0], Waypoint::new(10.0, 10.0));
        assert_eq!(state.status, VehicleStatus::Rerouted);
        assert_eq!(state.reroute_reason.as_deref(), Some("storm"));

        let via = state.route[1];
        assert!((0.01..=0.05).contains(&(via.lat - 10.0)));
        assert!((0.01..=0.05).contains(&(via.lon - 10.0)));
        assert_eq!(
            state.route[2],
            *RoadmeshConfig::default().mission.default_route.last().unwrap()
        );

        h.queue(&[json!({"action": "reroute"})])?;
        h.mission.tick();
        assert_eq!(h.mission.state().reroute_reason.as_deref(), Some("unknown"));
        Ok(())
    }

    #[test]
    fn identical_commands_apply_once() -> Result<()> {
        let mut h = Harness::new(vec![])?;
        h.queue(&[json!({"action": "recon"}), json!({"action": "recon"})])?;
        let report = h.mission.tick();
        assert_eq!(report.commands_applied, 1);
        assert_eq!(report.commands_skipped, 1);

        // Same object again is indistinguishable from redelivery.
        h.queue(&[json!({"action": "recon"})])?;
        assert_eq!(h.mission.tick().commands_skipped, 1);

        let channel = h.mission.channel();
        channel.submit(&Command::Stop)?;
        channel.submit(&Command::Stop)?;
        assert_eq!(h.mission.tick().commands_applied, 2);
        assert_eq!(h.mission.state().status, VehicleStatus::Stopped);
        Ok(())
    }

    #[test]
    fn invalid_commands_are_skipped_and_cleared() -> Result<()> {
        let mut h = Harness::new(vec![])?;
        h.queue(&[
            json!({"action": "fly"}),
            json!({"direction": "north"}),
            json!({"action": "manual", "direction": "north"}),
            json!({"action": "add_route", "route": []}),
            json!({"action": "manual", "direction": "north", "speed": "NaN"}),
            json!({"action": "manual", "direction": "north", "speed": "5"}),
        ])?;
        let report = h.mission.tick();
        assert_eq!(report.commands_applied, 1);
        assert_eq!(report.commands_skipped, 5);
        assert_eq!(
            h.mission.state().status,
            VehicleStatus::Manual {
                direction: "north".to_string(),
                speed: 5.0
            }
        );
        assert!(!report.moved);

        let queue = fs::read_to_string(h.dir.path().join("vehicle_commands.json"))?;
        assert_eq!(queue, "[]");
        assert!(matches!(h.read_status()?.status, VehicleStatus::Manual { .. }));
        assert!(h.event_log()?.contains("Manual control: north at 5"));
        Ok(())
    }

    #[test]
    fn severe_hazard_pauses_until_start() -> Result<()> {
        let mut h = Harness::new(vec![None, Some((HazardKind::Fire, Severity::Severe))])?;
        h.queue(&[
            json!({"action": "add_route", "route": [[0, 0], [0, 1]]}),
            json!({"action": "recon"}),
        ])?;

        let first = h.mission.tick();
        assert!(first.scan.is_some());
        assert_eq!(h.mission.state().status, VehicleStatus::Enroute);

        let second = h.mission.tick();
        let record = second.scan.expect("transit scan");
        assert_eq!(record.severe_hazard().map(|hazard| hazard.kind), Some(HazardKind::Fire));
        assert_eq!(
            h.mission.state().status,
            VehicleStatus::Paused {
                hazard: HazardKind::Fire
            }
        );
        assert_eq!(h.mission.state().hazards.len(), 1);

        let held_at = h.mission.state().position;
        let battery = h.mission.state().battery;
        for _ in 0..3 {
            assert!(!h.mission.tick().moved);
        }
        assert_eq!(h.mission.state().position, held_at);
        assert_eq!(h.mission.state().battery, battery);

        h.queue(&[json!({"action": "start"})])?;
        assert!(h.mission.tick().moved);
        assert_eq!(h.mission.state().status, VehicleStatus::Enroute);
        assert_eq!(h.mission.recon_records().count(), 3);

        let status = h.read_status()?;
        assert_eq!(status.hazards.len(), 1);
        assert!(h.event_log()?.contains("Vehicle paused due to severe hazard: fire"));
        Ok(())
    }

    #[test]
    fn pause_outranks_route_and_motion_commands() -> Result<()> {
        let mut h = Harness::new(vec![None, Some((HazardKind::Flood, Severity::Severe))])?;
        h.queue(&[
            json!({"action": "add_route", "route": [[0, 0], [0, 1]]}),
            json!({"action": "recon"}),
        ])?;
        h.mission.tick();
        h.mission.tick();
        let paused = VehicleStatus::Paused {
            hazard: HazardKind::Flood,
        };
        assert_eq!(h.mission.state().status, paused);

        h.queue(&[
            json!({"action": "update_route", "route": [[5, 5], [5, 6]]}),
            json!({"action": "stop"}),
            json!({"action": "manual", "direction": "east", "speed": 1}),
            json!({"action": "add_route", "route": [[6, 6], [6, 7]]}),
        ])?;
        let report = h.mission.tick();
        assert_eq!(report.commands_applied, 4);
        assert!(!report.moved);

        let state = h.mission.state();
        assert_eq!(state.status, paused);
        assert_eq!(state.route, vec![Waypoint::new(6.0, 6.0), Waypoint::new(6.0, 7.0)]);
        assert_eq!(state.position, Waypoint::new(6.0, 6.0));
        assert_eq!(h.read_status()?.status, paused);
        assert!(!h.event_log()?.contains("Vehicle stopped"));

        h.queue(&[json!({"action": "start"})])?;
        assert!(h.mission.tick().moved);
        assert_eq!(h.mission.state().status, VehicleStatus::Enroute);
        Ok(())
    }

    #[test]
    fn severe_hazard_on_arrival_keeps_arrived() -> Result<()> {
        let mut h = Harness::new(vec![None, Some((HazardKind::Fire, Severity::Severe))])?;
        h.queue(&[
            json!({"action": "add_route", "route": [[0, 0], [0, 0.002]]}),
            json!({"action": "recon"}),
        ])?;

        assert!(h.mission.tick().scan.is_some());
        let last = h.mission.tick();
        assert!(last.waypoint_reached);
        let record = last.scan.expect("arrival scan");
        assert_eq!(record.severe_hazard().map(|hazard| hazard.kind), Some(HazardKind::Fire));

        let state = h.mission.state();
        assert_eq!(state.status, VehicleStatus::Arrived);
        assert_eq!(state.current_index, 2);
        assert_eq!(state.hazards.len(), 1);

        let log = h.event_log()?;
        assert!(log.contains("Arrived at destination"));
        assert!(log.contains("Hazard detected: fire"));
        assert!(!log.contains("Vehicle paused"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_ticks_on_the_configured_interval() -> Result<()> {
        let mut h = Harness::with_config(vec![], |config| {
            config.mission.tick_interval_ms = 10;
        })?;
        h.queue(&[json!({"action": "add_route", "route": [[0, 0], [0, 0.002]]})])?;

        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(300), h.mission.run()).await;
        assert!(outcome.is_err(), "run only returns on error");

        assert_eq!(h.mission.state().status, VehicleStatus::Arrived);
        assert_eq!(h.read_status()?.status, VehicleStatus::Arrived);
        Ok(())
    }

    #[test]
    fn safety_hold_is_sticky_until_reset() -> Result<()> {
        let mut h = Harness::new(vec![])?;
        h.queue(&[json!({"action": "add_route", "route": [[0, 0], [0, 1]]})])?;
        assert!(h.mission.tick().moved);

        h.sensors.set(SensorSnapshot {
            collision_risk: true,
            ..Default::default()
        });
        assert!(!h.mission.tick().moved);

        h.sensors.set(SensorSnapshot::default());
        let report = h.mission.tick();
        assert!(!report.moved);
        assert!(h.mission.safety().state().override_active);
        assert!(h.read_status()?.safety.override_active);

        h.queue(&[json!({"action": "reset_safety"})])?;
        let report = h.mission.tick();
        assert_eq!(report.commands_applied, 1);
        assert!(report.moved);
        assert!(h.mission.safety().is_safe_to_proceed());

        let log = h.event_log()?;
        assert_eq!(log.matches("Motion held: safety").count(), 1);
        assert!(log.contains("Motion resumed"));
        Ok(())
    }

    #[test]
    fn overheating_holds_motion() -> Result<()> {
        let mut h = Harness::new(vec![])?;
        h.sensors.set(SensorSnapshot {
            temperature: Some(75.0),
            ..Default::default()
        });
        h.queue(&[json!({"action": "start"})])?;
        assert!(!h.mission.tick().moved);
        assert_eq!(h.mission.state().status, VehicleStatus::Enroute);
        Ok(())
    }

    #[test]
    fn low_battery_holds_motion_but_not_commands() -> Result<()> {
        let mut h = Harness::with_config(vec![], |config| {
            config.mission.battery_drain_per_tick = 40.0;
        })?;
        h.queue(&[json!({"action": "add_route", "route": [[0, 0], [0, 1]]})])?;
        assert!(h.mission.tick().moved);
        assert!(h.mission.tick().moved);
        assert_eq!(h.mission.state().battery, 20.0);

        let held = h.mission.tick();
        assert!(!held.moved);
        assert!(h.mission.power().is_critical());
        assert!(h.read_status()?.power_critical);

        h.queue(&[json!({"action": "recon"})])?;
        let report = h.mission.tick();
        assert_eq!(report.commands_applied, 1);
        assert!(!report.moved);
        assert!(h.mission.state().recon_mode);
        assert_eq!(h.mission.state().battery, 20.0);
        Ok(())
    }

    #[test]
    fn delete_route_goes_idle_and_start_stays_idle() -> Result<()> {
        let mut h = Harness::new(vec![])?;
        h.queue(&[json!({"action": "delete_route"})])?;
        h.mission.tick();
        assert_eq!(h.mission.state().status, VehicleStatus::Idle);
        assert!(h.mission.state().route.is_empty());

        h.queue(&[json!({"action": "start"})])?;
        let report = h.mission.tick();
        assert!(!report.moved);
        assert_eq!(h.mission.state().status, VehicleStatus::Idle);
        assert_eq!(h.mission.state().battery, 100.0);
        Ok(())
    }

    #[test]
    fn missing_route_falls_back_to_default() -> Result<()> {
        let mut h = Harness::new(vec![])?;
        h.queue(&[json!({"action": "update_route"})])?;
        h.mission.tick();
        let default_route = RoadmeshConfig::default().mission.default_route;
        assert_eq!(h.mission.state().route, default_route);
        assert_eq!(h.mission.state().status, VehicleStatus::Enroute);
        Ok(())
    }

    #[test]
    fn status_write_failures_are_counted() -> Result<()> {
        let mut h = Harness::new(vec![])?;
        fs::create_dir(h.dir.path().join("vehicle_status.json"))?;
        for _ in 0..3 {
            h.mission.tick();
        }
        assert_eq!(h.mission.consecutive_status_failures(), 3);

        fs::remove_dir(h.dir.path().join("vehicle_status.json"))?;
        h.mission.tick();
        assert_eq!(h.mission.consecutive_status_failures(), 0);
        Ok(())
    }

    #[test]
    fn decisions_use_latest_sensors() -> Result<()> {
        let mut h = Harness::new(vec![])?;
        h.sensors.set(SensorSnapshot {
            obstacle_detected: true,
            ..Default::default()
        });
        h.mission.tick();
        assert_eq!(h.mission.evaluate_decision().kind, DecisionKind::AvoidObstacle);

        h.sensors.set(SensorSnapshot::default());
        h.mission.tick();
        assert_eq!(h.mission.evaluate_decision().kind, DecisionKind::Continue);
        assert_eq!(h.mission.decisions().count(), 2);
        Ok(())
    }
}
