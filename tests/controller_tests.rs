//! Synchronous controller logic: ledger, learning policy, message
//! vocabulary, crossing and parking bookkeeping

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::SeedableRng;

use traffic_agents::simulation::{
    AgentId, Command, CrossingAction, CrossingStatus, DecodeError, LightGroup, Message,
    ParkingLot, PolicyError, PolicySettings, QLearningPolicy, Rejection, Reply, ResourceKey,
    ResourceLedger, RngFactory, RoadType, SegmentIndex, SignalState, EARLY_STOP_PENALTY,
};

fn rng() -> StdRng {
    StdRng::seed_from_u64(7)
}

// --- Resource ledger ---

#[test]
fn test_ledger_admits_up_to_capacity() {
    let mut ledger = ResourceLedger::new();
    let key = ResourceKey::Segment(SegmentIndex(3));

    assert!(ledger.try_enter(&key, 2));
    assert!(ledger.try_enter(&key, 2));
    assert!(!ledger.try_enter(&key, 2));
    assert_eq!(ledger.occupancy(&key), 2);

    ledger.leave(&key);
    assert_eq!(ledger.occupancy(&key), 1);
    assert!(ledger.try_enter(&key, 2));
}

#[test]
fn test_ledger_never_goes_negative() {
    let mut ledger = ResourceLedger::new();
    let key = ResourceKey::Parking(AgentId::new("lot"));

    ledger.leave(&key);
    assert_eq!(ledger.occupancy(&key), 0);

    assert!(ledger.try_enter(&key, 1));
    ledger.leave(&key);
    ledger.leave(&key);
    assert_eq!(ledger.occupancy(&key), 0);
    assert_eq!(ledger.total(), 0);
}

#[test]
fn test_ledger_keys_are_independent() {
    let mut ledger = ResourceLedger::new();
    let road = ResourceKey::Segment(SegmentIndex(0));
    let lot = ResourceKey::Parking(AgentId::new("lot"));

    assert!(ledger.try_enter(&road, 1));
    assert!(ledger.try_enter(&lot, 1));
    assert!(!ledger.try_enter(&road, 1));
    assert_eq!(ledger.total(), 2);
}

// --- Q-learning policy ---

#[test]
fn test_policy_update_with_fixed_rate() {
    let settings = PolicySettings {
        epsilon: 0.0,
        learning_rate: Some(0.5),
    };
    let mut policy = QLearningPolicy::new(3, settings, rng());

    policy.update(1, 10.0);
    assert_eq!(policy.q_value(1), Some(5.0));
    policy.update(1, 10.0);
    assert_eq!(policy.q_value(1), Some(7.5));
    assert_eq!(policy.steps(), 2);
    assert_eq!(policy.stats().visits, vec![0, 2, 0]);
}

#[test]
fn test_policy_sample_average_rate() {
    let settings = PolicySettings {
        epsilon: 0.0,
        learning_rate: None,
    };
    let mut policy = QLearningPolicy::new(2, settings, rng());

    policy.update(0, 4.0);
    policy.update(0, 2.0);
    // Running mean of 4 and 2
    assert_eq!(policy.q_value(0), Some(3.0));
}

#[test]
fn test_policy_greedy_choice_and_ties() {
    let settings = PolicySettings {
        epsilon: 0.0,
        learning_rate: Some(1.0),
    };
    let mut policy = QLearningPolicy::new(3, settings, rng());

    // All zero: lowest index wins
    assert_eq!(policy.choose(), 0);

    policy.update(2, 1.0);
    assert_eq!(policy.best_action(), 2);
    assert_eq!(policy.choose(), 2);

    policy.update(0, 1.0);
    assert_eq!(policy.best_action(), 0);
}

#[test]
fn test_policy_converges_on_best_rewarded_action() {
    let rewards = [1.0, 0.5, 3.0];

    for learning_rate in [None, Some(0.1)] {
        let settings = PolicySettings {
            epsilon: 0.0,
            learning_rate,
        };
        let mut policy = QLearningPolicy::new(3, settings, rng());

        for _ in 0..300 {
            let action = policy.choose_action(0.3);
            policy.update(action, rewards[action]);
        }

        let mut last = Vec::new();
        for _ in 0..50 {
            let action = policy.choose_action(0.0);
            policy.update(action, rewards[action]);
            last.push(action);
        }
        assert!(
            last.iter().all(|action| *action == 2),
            "rate {:?} settled on {:?}",
            learning_rate,
            last
        );
        assert_eq!(policy.best_action(), 2);
    }
}

#[test]
fn test_policy_full_exploration_visits_every_action() {
    let mut policy = QLearningPolicy::new(3, PolicySettings::default(), rng());
    policy.update(0, 100.0);

    let mut seen = [false; 3];
    for _ in 0..200 {
        seen[policy.choose_action(1.0)] = true;
    }
    assert!(seen.iter().all(|s| *s));
}

#[test]
fn test_policy_overrides_are_validated() {
    let mut policy = QLearningPolicy::new(2, PolicySettings::default(), rng());

    assert_eq!(policy.set_epsilon(1.5), Err(PolicyError::InvalidEpsilon(1.5)));
    assert_eq!(
        policy.set_learning_rate(0.0),
        Err(PolicyError::InvalidLearningRate(0.0))
    );
    assert!(policy.set_epsilon(0.3).is_ok());
    assert_eq!(policy.epsilon(), 0.3);

    assert!(PolicySettings::new(0.2, 0.5).is_ok());
    assert!(PolicySettings::new(-0.1, 0.5).is_err());
    assert!(PolicySettings::new(0.1, 1.5).is_err());
}

// --- Message vocabulary ---

#[test]
fn test_command_decoding() {
    assert_eq!(Command::decode("move"), Ok(Command::Move));
    assert_eq!(Command::decode("Please PARK here"), Ok(Command::Park));
    assert_eq!(Command::decode("unpark"), Ok(Command::Unpark));
    assert_eq!(Command::decode("exit"), Ok(Command::Exit));
    assert_eq!(
        Command::decode("exit_notification"),
        Ok(Command::ExitNotification)
    );
    assert_eq!(Command::decode("request_state"), Ok(Command::RequestState));
    assert_eq!(Command::decode("request_group"), Ok(Command::RequestGroup));
    assert_eq!(
        Command::decode("request_rl_stats"),
        Ok(Command::RequestRlStats)
    );
    assert_eq!(
        Command::decode("update_timing=3.5"),
        Ok(Command::UpdateTiming(3.5))
    );
    assert_eq!(
        Command::decode("update_epsilon 0.2"),
        Ok(Command::UpdateEpsilon(0.2))
    );
    assert_eq!(
        Command::decode("update_learning=0.05"),
        Ok(Command::UpdateLearning(0.05))
    );
}

#[test]
fn test_command_decoding_errors() {
    assert_eq!(
        Command::decode("hello"),
        Err(DecodeError::Unknown("hello".to_string()))
    );
    assert!(matches!(
        Command::decode("update_timing=fast"),
        Err(DecodeError::BadParameter { command: "update_timing", .. })
    ));
}

#[test]
fn test_command_text_round_trips() {
    let commands = [
        Command::Unpark,
        Command::ExitNotification,
        Command::UpdateTiming(2.0),
    ];
    for command in commands {
        let message = Message::command(&command, "tester");
        assert_eq!(message.source, AgentId::new("tester"));
        assert_eq!(message.content.parse::<Command>(), Ok(command));
        assert!(message.message_id.is_none() && message.timestamp.is_none());
    }

    let tagged = Message::new("request_state", "orchestrator")
        .with_id("msg_7")
        .with_timestamp(12.5);
    assert_eq!(tagged.message_id.as_deref(), Some("msg_7"));
    assert_eq!(tagged.timestamp, Some(12.5));
    assert_eq!(tagged.content.parse::<Command>(), Ok(Command::RequestState));
}

#[test]
fn test_reply_text() {
    assert_eq!(Reply::Signal(SignalState::Red).to_string(), "RED");
    assert_eq!(
        Reply::Crossing {
            occupied: true,
            queue: 2
        }
        .to_string(),
        "occupied queue=2"
    );
    assert_eq!(
        Reply::ParkingStatus {
            occupancy: 3,
            capacity: 3
        }
        .to_string(),
        "full (3/3)"
    );
    assert_eq!(
        Reply::Rejected(Rejection::ParkingFull {
            occupancy: 1,
            capacity: 1
        })
        .to_string(),
        "rejected: parking is full (1/1)"
    );
    assert_eq!(
        Reply::Group {
            group: LightGroup::NorthSouth,
            state: SignalState::Green
        }
        .to_string(),
        "Group: north_south, State: GREEN"
    );
    assert_eq!(Reply::invalid_command().to_string(), "Invalid command received");
}

// --- Traffic light groups ---

#[test]
fn test_light_group_from_name() {
    assert_eq!(LightGroup::from_name("light_left_1"), LightGroup::NorthSouth);
    assert_eq!(LightGroup::from_name("light_right"), LightGroup::NorthSouth);
    assert_eq!(LightGroup::from_name("light_top"), LightGroup::EastWest);
    assert_eq!(LightGroup::from_name("light_mid_2"), LightGroup::EastWest);
    assert_eq!(LightGroup::from_name("light_4"), LightGroup::NorthSouth);
    assert_eq!(LightGroup::from_name("light_3"), LightGroup::EastWest);
    assert_eq!(LightGroup::NorthSouth.initial_state(), SignalState::Red);
    assert_eq!(LightGroup::EastWest.initial_state(), SignalState::Green);
}

// --- Pedestrian crossing ---

#[test]
fn test_road_type_from_name() {
    assert_eq!(RoadType::from_name("1_carril"), RoadType::OneLane);
    assert_eq!(RoadType::from_name("one_lane"), RoadType::OneLane);
    assert_eq!(RoadType::from_name("2_carriles"), RoadType::TwoLanes);
    assert_eq!(RoadType::OneLane.min_wait(), 1);
    assert_eq!(RoadType::TwoLanes.min_wait(), 2);
}

#[test]
fn test_crossing_fixed_cycle() {
    let mut crossing = CrossingStatus::new(RoadType::TwoLanes, None);
    crossing.arrive([2, 1]);
    assert_eq!(crossing.queue_length(), 2);
    assert_eq!(crossing.max_queue_length, 2);

    crossing.advance();
    assert!(crossing.occupied);
    assert_eq!(crossing.remaining, 2);
    assert_eq!(crossing.queue_length(), 1);

    crossing.advance();
    assert!(crossing.occupied);
    crossing.advance();
    assert!(!crossing.occupied);

    crossing.advance();
    assert!(crossing.occupied);
    assert_eq!(crossing.remaining, 1);
    assert!(crossing.queue.is_empty());
}

#[test]
fn test_crossing_fixed_duration_override() {
    let mut crossing = CrossingStatus::new(RoadType::OneLane, Some(4));
    crossing.arrive([1]);
    crossing.advance();
    assert_eq!(crossing.remaining, 4);
}

#[test]
fn test_crossing_early_stop_is_penalised() {
    let mut crossing = CrossingStatus::new(RoadType::TwoLanes, None);
    let mut rng = rng();
    crossing.arrive([3]);

    // First decision after a reset: waited is 1, below the two-lane minimum
    let reward = crossing.decide(CrossingAction::StopTraffic, &mut rng);
    assert_eq!(reward, EARLY_STOP_PENALTY);
    assert!(crossing.occupied);
    assert_eq!(crossing.remaining, 3);
}

#[test]
fn test_crossing_rewards_after_minimum_wait() {
    let mut crossing = CrossingStatus::new(RoadType::TwoLanes, None);
    let mut rng = rng();
    crossing.queue = VecDeque::from(vec![1, 1, 1]);

    assert_eq!(crossing.decide(CrossingAction::AllowTraffic, &mut rng), 3.0);
    // waited reaches 2: stopping is rewarded with minus the queue length
    let reward = crossing.decide(CrossingAction::StopTraffic, &mut rng);
    assert_eq!(reward, -3.0);
    assert_eq!(crossing.waited, 0);
    assert!(crossing.occupied);
    assert!(crossing.queue_length() < 3);
}

// --- Parking bookkeeping ---

#[test]
fn test_parking_capacity_and_rejection() {
    let id = AgentId::new("lot");
    let mut lot = ParkingLot::new(&id, 1, 2, 1);
    let mut ledger = ResourceLedger::new();
    let mut rng = rng();

    let first = lot.request_park(&AgentId::new("car_1"), &mut ledger, &mut rng);
    assert!(first.is_accepted());
    let second = lot.request_park(&AgentId::new("car_2"), &mut ledger, &mut rng);
    assert_eq!(
        second,
        Reply::Rejected(Rejection::ParkingFull {
            occupancy: 1,
            capacity: 1
        })
    );
    assert_eq!(lot.occupancy(), 1);
    assert_eq!(ledger.occupancy(&lot.key), 1);
    assert_eq!(lot.total_rejected, 1);
}

#[test]
fn test_parking_times_are_jittered_and_floored() {
    let id = AgentId::new("lot");
    let mut lot = ParkingLot::new(&id, 100, 2, 1);
    let mut ledger = ResourceLedger::new();
    let mut rng = rng();

    for i in 0..50 {
        match lot.request_park(&AgentId::new(format!("car_{}", i)), &mut ledger, &mut rng) {
            Reply::ParkAccepted { parking_time } => assert!((1..=2).contains(&parking_time)),
            other => panic!("unexpected reply {}", other),
        }
    }
}

#[test]
fn test_parking_exit_lifecycle() {
    let id = AgentId::new("lot");
    let car = AgentId::new("car_1");
    let mut lot = ParkingLot::new(&id, 2, 1, 1);
    let mut ledger = ResourceLedger::new();
    let mut rng = rng();

    assert!(lot.request_park(&car, &mut ledger, &mut rng).is_accepted());
    assert_eq!(
        lot.request_park(&car, &mut ledger, &mut rng),
        Reply::Rejected(Rejection::AlreadyPresent)
    );
    assert_eq!(
        lot.request_exit(&car, &mut rng),
        Reply::Rejected(Rejection::StillParking)
    );

    // Parking time 1 plus jitter truncates to 1 or 0 floored to 1
    lot.advance_entering();
    assert!(lot.parked.contains_key(&car));

    assert!(lot.request_exit(&car, &mut rng).is_accepted());
    assert_eq!(
        lot.request_exit(&car, &mut rng),
        Reply::Rejected(Rejection::AlreadyExiting)
    );

    lot.advance_exiting(&mut ledger);
    assert!(!lot.contains(&car));
    assert_eq!(ledger.occupancy(&lot.key), 0);

    // A second release must not double-decrement
    lot.advance_exiting(&mut ledger);
    assert_eq!(ledger.occupancy(&lot.key), 0);
    assert_eq!(
        lot.request_exit(&car, &mut rng),
        Reply::Rejected(Rejection::NotParkedHere)
    );
}

#[test]
fn test_forced_exit_after_fifteen_seconds() {
    let id = AgentId::new("lot");
    let car = AgentId::new("car_1");
    let mut lot = ParkingLot::new(&id, 1, 1, 1);
    lot.parked.insert(car.clone(), 15);
    let mut rng = rng();

    let due = lot.due_exits(&mut rng);
    assert_eq!(due, vec![car.clone()]);
    assert!(lot.notified.contains(&car));

    // Already notified: not notified again
    assert!(lot.due_exits(&mut rng).is_empty());
}

#[test]
fn test_no_exit_before_five_seconds() {
    let id = AgentId::new("lot");
    let mut lot = ParkingLot::new(&id, 1, 1, 1);
    lot.parked.insert(AgentId::new("car_1"), 0);
    let mut rng = rng();

    for _ in 0..5 {
        assert!(lot.due_exits(&mut rng).is_empty());
    }
}

#[test]
fn test_learned_exit_rewards() {
    let id = AgentId::new("lot");
    let car = AgentId::new("car_1");
    let mut lot = ParkingLot::new(&id, 1, 1, 1);
    lot.parked.insert(car.clone(), 5);
    let settings = PolicySettings {
        epsilon: 0.0,
        learning_rate: Some(1.0),
    };
    let mut policy = QLearningPolicy::new(2, settings, rng());
    // Make exiting the greedy choice
    policy.update(1, 1.0);

    let due = lot.learned_exits(&mut policy);
    assert_eq!(due, vec![car]);
    // Full lot: exit reward 5 replaces the Q-value
    assert_eq!(policy.q_value(1), Some(5.0));
}

// --- Randomness ---

#[test]
fn test_seeded_agent_rngs_are_reproducible() {
    use rand::Rng;

    let factory = RngFactory::seeded(99);
    let id = AgentId::new("car_1");
    let a: Vec<u32> = factory.for_agent(&id).random_iter().take(5).collect();
    let b: Vec<u32> = factory.for_agent(&id).random_iter().take(5).collect();
    let other: Vec<u32> = factory
        .for_agent(&AgentId::new("car_2"))
        .random_iter()
        .take(5)
        .collect();

    assert_eq!(a, b);
    assert_ne!(a, other);
}
