//! Scenario loading and whole-world runs

use tokio::task::LocalSet;

use traffic_agents::simulation::{
    ConfigError, ConfigOverrides, DespawnReason, MapConfig, PolicySettings, ResourceKey,
    ScenarioMode, SimClock, SimError, SimWorld, WorldOptions,
};

const TWO_ROADS: &str = r#"{
    "roads": [
        {"id": "in", "x1": 0, "y1": 0, "x2": 100, "y2": 0, "is_spawn_point": true, "color": "gray"},
        {"id": "out", "x1": 100, "y1": 0, "x2": 200, "y2": 0, "is_despawn_point": true}
    ],
    "spawn_points": [{"id": "sp_1", "x": 0, "y": 0, "road_id": "in"}],
    "vehicles": [
        {"id": "car_1", "spawn": true},
        {"id": "car_2", "spawn": true}
    ]
}"#;

fn options(seed: u64) -> WorldOptions {
    WorldOptions {
        seed: Some(seed),
        clock: SimClock::from_millis(100),
        ..WorldOptions::default()
    }
}

// --- Configuration ---

#[test]
fn test_builtin_scenarios_load() {
    let basic = MapConfig::builtin(ScenarioMode::Basic).unwrap();
    assert_eq!(basic.roads.len(), 32);
    assert_eq!(basic.traffic_lights.len(), 4);
    assert_eq!(basic.crossings.len(), 3);
    assert!(basic.parking_areas.is_empty());

    let complete = MapConfig::builtin(ScenarioMode::Complete).unwrap();
    assert_eq!(complete.parking_areas.len(), 3);
    assert!(complete.vehicles.len() > basic.vehicles.len());
}

#[test]
fn test_document_defaults() {
    let config = MapConfig::from_json(
        r#"{
            "roads": [{"x1": 0, "y1": 0, "x2": 10, "y2": 0}],
            "parking_areas": [{"id": "p", "x": 1, "y": 1, "capacity": 2}],
            "crossings": [{"id": "c", "x": 5, "y": 0}]
        }"#,
    )
    .unwrap();

    let road = &config.roads[0];
    assert_eq!(road.name(0), "road_0");
    assert_eq!(road.capacity, 2);
    assert!(!road.one_way && !road.is_spawn_point && !road.is_despawn_point);
    assert!(road.connections.is_none());

    let area = &config.parking_areas[0];
    assert_eq!((area.parking_time, area.exit_time), (2, 1));
    assert!(!area.is_building());

    assert_eq!(config.crossings[0].road_type, "2_carriles");
    assert_eq!(config.landmarks().crossings.len(), 1);
}

#[test]
fn test_invalid_documents_are_rejected() {
    assert!(matches!(
        MapConfig::from_json(r#"{"roads": []}"#),
        Err(ConfigError::NoRoads)
    ));
    assert!(matches!(
        MapConfig::from_json("not json"),
        Err(ConfigError::Parse(_))
    ));

    let unknown_spawn = r#"{
        "roads": [{"id": "a", "x1": 0, "y1": 0, "x2": 10, "y2": 0}],
        "spawn_points": [{"id": "sp", "x": 0, "y": 0, "road_id": "b"}]
    }"#;
    assert!(matches!(
        MapConfig::from_json(unknown_spawn),
        Err(ConfigError::UnknownRoad { referrer, road }) if referrer == "sp" && road == "b"
    ));

    let duplicate_agent = r#"{
        "roads": [{"id": "a", "x1": 0, "y1": 0, "x2": 10, "y2": 0}],
        "traffic_lights": [{"id": "x", "x": 0, "y": 0}],
        "vehicles": [{"id": "x"}]
    }"#;
    assert!(matches!(
        MapConfig::from_json(duplicate_agent),
        Err(ConfigError::DuplicateId(id)) if id == "x"
    ));

    let zero_capacity = r#"{"roads": [{"x1": 0, "y1": 0, "x2": 10, "y2": 0, "capacity": 0}]}"#;
    assert!(matches!(
        MapConfig::from_json(zero_capacity),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_overrides() {
    let mut config = MapConfig::builtin(ScenarioMode::Complete).unwrap();
    config
        .apply_overrides(&ConfigOverrides {
            lane_capacity: Some(1),
            parking_capacity: Some(2),
            parking_time: Some(4),
            traffic_light_wait: Some(3.0),
            pedestrian_wait: Some(2),
            ..ConfigOverrides::default()
        })
        .unwrap();

    assert!(config.roads.iter().all(|road| road.capacity == 1));
    for area in &config.parking_areas {
        let expected = if area.is_building() { 4 } else { 2 };
        assert_eq!(area.capacity, expected, "{}", area.id);
        assert_eq!(area.parking_time, 4);
    }
    assert!(config
        .traffic_lights
        .iter()
        .all(|light| light.change_time == Some(3.0)));
    assert!(config
        .crossings
        .iter()
        .all(|crossing| crossing.wait_time == Some(2)));

    let invalid = config.apply_overrides(&ConfigOverrides {
        lane_capacity: Some(0),
        ..ConfigOverrides::default()
    });
    assert!(matches!(invalid, Err(ConfigError::Invalid(_))));
}

// --- World ---

#[tokio::test(start_paused = true)]
async fn test_world_build_launches_controllers() {
    LocalSet::new()
        .run_until(async {
            let config = MapConfig::builtin(ScenarioMode::Complete).unwrap();
            let controllers =
                config.traffic_lights.len() + config.crossings.len() + config.parking_areas.len();
            let vehicles = config.vehicles.len();

            let world = SimWorld::build(config, options(1)).unwrap();
            assert_eq!(world.runtime().agent_count(), controllers);
            assert_eq!(world.pending_count(), vehicles);
            assert_eq!(world.entered_count(), 0);
            assert_eq!(world.network().segment_count(), 32);

            world.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_vehicles_enter_one_at_a_time() {
    LocalSet::new()
        .run_until(async {
            let config = MapConfig::from_json(TWO_ROADS).unwrap();
            let mut world = SimWorld::build(config, options(2)).unwrap();

            world.tick().await.unwrap();
            assert_eq!(world.entered_count(), 1);
            world.tick().await.unwrap();
            assert_eq!(world.entered_count(), 2);
            assert_eq!(world.pending_count(), 0);

            world.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_vehicles_leave_through_despawn_road() {
    LocalSet::new()
        .run_until(async {
            let config = MapConfig::from_json(TWO_ROADS).unwrap();
            let mut world = SimWorld::build(config, options(3)).unwrap();

            let summary = world.run(40).await.unwrap();
            assert_eq!(summary.elapsed_seconds, 40);
            assert_eq!(summary.vehicles_entered, 2);
            assert_eq!(summary.vehicles_despawned(), 2);
            assert_eq!(
                summary.despawn_reasons().get(&DespawnReason::ReachedExit),
                Some(&2)
            );
            assert_eq!(summary.total_wait(), 0);
            assert_eq!(world.ledger().borrow().total(), 0);
            assert!(world.board().is_empty());

            world.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_segment_capacity_is_never_exceeded() {
    LocalSet::new()
        .run_until(async {
            let mut config = MapConfig::builtin(ScenarioMode::Complete).unwrap();
            config
                .apply_overrides(&ConfigOverrides {
                    lane_capacity: Some(1),
                    ..ConfigOverrides::default()
                })
                .unwrap();
            let mut world = SimWorld::build(config, options(4)).unwrap();

            for _ in 0..40 {
                world.tick().await.unwrap();
                SimClock::from_millis(100).sleep(1.0).await;

                let ledger = world.ledger().borrow();
                for segment in world.network().segments() {
                    let occupancy = ledger.occupancy(&ResourceKey::Segment(segment.index));
                    assert!(
                        occupancy <= segment.capacity,
                        "road {} holds {} of {}",
                        segment.name,
                        occupancy,
                        segment.capacity
                    );
                }
            }

            let summary = world.summary().await;
            assert!(summary.vehicles_entered >= 1);
            assert_eq!(summary.vehicles.len(), summary.vehicles_entered);
            summary.log();

            world.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_learning_run_reports_policies() {
    LocalSet::new()
        .run_until(async {
            let config = MapConfig::builtin(ScenarioMode::Basic).unwrap();
            let controllers = config.traffic_lights.len() + config.crossings.len();
            let mut world = SimWorld::build(
                config,
                WorldOptions {
                    use_rl: true,
                    policy: PolicySettings::new(0.2, 0.1).unwrap(),
                    ..options(5)
                },
            )
            .unwrap();

            let summary = world.run(6).await.unwrap();
            assert_eq!(summary.policies.len(), controllers);
            assert!(summary
                .policies
                .iter()
                .all(|(_, stats)| stats.steps >= 4 && stats.epsilon == 0.2));

            world.shutdown();
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_bad_spawn_point_fails_build() {
    LocalSet::new()
        .run_until(async {
            let mut config = MapConfig::from_json(TWO_ROADS).unwrap();
            config.spawn_points[0].road_id = "nowhere".to_string();

            let result = SimWorld::build(config, options(6));
            assert!(matches!(
                result,
                Err(SimError::Config(ConfigError::UnknownRoad { .. }))
            ));
        })
        .await;
}
