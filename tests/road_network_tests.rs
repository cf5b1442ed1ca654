//! Road network construction and turn selection tests

use rand::rngs::StdRng;
use rand::SeedableRng;

use traffic_agents::simulation::{
    segment_intersection, ConfigError, Direction, Position, RoadNetwork, SegmentIndex,
    SegmentSpec, TurnKind,
};

fn p(x: f64, y: f64) -> Position {
    Position::new(x, y)
}

/// seg0 heads east into a junction at (100, 0) with a straight, a right
/// turn and a U-turn available
fn junction_network() -> RoadNetwork {
    RoadNetwork::build(vec![
        SegmentSpec::new("approach", p(0.0, 0.0), p(100.0, 0.0), 2),
        SegmentSpec::new("straight", p(100.0, 0.0), p(200.0, 0.0), 2),
        SegmentSpec::new("south", p(100.0, 0.0), p(100.0, 100.0), 2),
        SegmentSpec::new("back", p(100.0, 0.0), p(0.0, 0.0), 2),
    ])
    .unwrap()
}

#[test]
fn test_turn_options_exclude_u_turn_when_alternatives_exist() {
    let network = junction_network();
    let options = network.turn_options(SegmentIndex(0));

    assert_eq!(options.len(), 2);
    assert_eq!(options[0].target, SegmentIndex(1));
    assert_eq!(options[0].kind(), TurnKind::Straight);
    assert_eq!(options[1].target, SegmentIndex(2));
    assert_eq!(options[1].kind(), TurnKind::Turn);
    assert_eq!(options[1].to, Direction::South);
    assert!(options.iter().all(|option| option.kind() != TurnKind::UTurn));
}

#[test]
fn test_u_turn_kept_when_it_is_the_only_option() {
    let network = RoadNetwork::build(vec![
        SegmentSpec::new("out", p(0.0, 0.0), p(100.0, 0.0), 1),
        SegmentSpec::new("back", p(100.0, 0.0), p(0.0, 0.0), 1),
    ])
    .unwrap();

    let options = network.turn_options(SegmentIndex(0));
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].kind(), TurnKind::UTurn);
    assert_eq!(options[0].junction, p(100.0, 0.0));
}

#[test]
fn test_junction_is_the_segment_intersection() {
    let network = junction_network();
    let turn = network.turn_options(SegmentIndex(0))[1];
    assert!(turn.junction.distance(&p(100.0, 0.0)) < 1e-9);
}

#[test]
fn test_segments_crossing_at_interior_point() {
    let junction = segment_intersection(
        p(0.0, 50.0),
        p(100.0, 50.0),
        p(50.0, 0.0),
        p(50.0, 100.0),
    )
    .unwrap();
    assert!(junction.distance(&p(50.0, 50.0)) < 1e-9);

    // Lines meet at (150, 50), past the end of the first segment
    assert!(segment_intersection(
        p(0.0, 50.0),
        p(100.0, 50.0),
        p(150.0, 0.0),
        p(150.0, 100.0)
    )
    .is_none());
}

#[test]
fn test_parallel_and_collinear_segments_have_no_junction() {
    let parallel = segment_intersection(p(0.0, 0.0), p(100.0, 0.0), p(0.0, 10.0), p(100.0, 10.0));
    assert!(parallel.is_none());

    let collinear = segment_intersection(p(0.0, 0.0), p(100.0, 0.0), p(50.0, 0.0), p(150.0, 0.0));
    assert!(collinear.is_none());
}

#[test]
fn test_one_way_target_entered_from_its_end_is_rejected() {
    let network = RoadNetwork::build(vec![
        SegmentSpec::new("approach", p(0.0, 0.0), p(100.0, 0.0), 2)
            .connected_to(&["northbound", "east"]),
        // Ends at the junction, so entering it would mean driving against it
        SegmentSpec::new("northbound", p(100.0, 100.0), p(100.0, 0.0), 2).one_way(),
        SegmentSpec::new("east", p(100.0, 0.0), p(200.0, 0.0), 2).one_way(),
    ])
    .unwrap();

    let targets: Vec<SegmentIndex> = network
        .turn_options(SegmentIndex(0))
        .iter()
        .map(|option| option.target)
        .collect();
    assert_eq!(targets, vec![SegmentIndex(2)]);
}

#[test]
fn test_connections_inferred_within_snap_distance() {
    let network = RoadNetwork::build(vec![
        SegmentSpec::new("a", p(0.0, 0.0), p(100.0, 0.0), 2),
        SegmentSpec::new("near", p(103.0, 0.0), p(200.0, 0.0), 2),
        SegmentSpec::new("far", p(110.0, 0.0), p(110.0, 100.0), 2),
    ])
    .unwrap();

    let a = network.segment_by_name("a").unwrap();
    assert_eq!(a.connections, vec![SegmentIndex(1)]);
}

#[test]
fn test_explicit_empty_connections_mean_dead_end() {
    let network = RoadNetwork::build(vec![
        SegmentSpec::new("a", p(0.0, 0.0), p(100.0, 0.0), 2).connected_to(&[]),
        SegmentSpec::new("b", p(100.0, 0.0), p(200.0, 0.0), 2),
    ])
    .unwrap();

    let mut rng = StdRng::seed_from_u64(1);
    assert!(network.turn_options(SegmentIndex(0)).is_empty());
    assert!(network.choose_turn(SegmentIndex(0), &mut rng).is_none());
}

#[test]
fn test_build_errors() {
    assert!(matches!(RoadNetwork::build(vec![]), Err(ConfigError::NoRoads)));

    let duplicate = RoadNetwork::build(vec![
        SegmentSpec::new("a", p(0.0, 0.0), p(1.0, 0.0), 1),
        SegmentSpec::new("a", p(1.0, 0.0), p(2.0, 0.0), 1),
    ]);
    assert!(matches!(duplicate, Err(ConfigError::DuplicateId(name)) if name == "a"));

    let unknown = RoadNetwork::build(vec![
        SegmentSpec::new("a", p(0.0, 0.0), p(1.0, 0.0), 1).connected_to(&["missing"])
    ]);
    assert!(matches!(
        unknown,
        Err(ConfigError::UnknownRoad { referrer, road }) if referrer == "a" && road == "missing"
    ));

    let zero = RoadNetwork::build(vec![SegmentSpec::new("a", p(0.0, 0.0), p(1.0, 0.0), 0)]);
    assert!(matches!(zero, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_choose_turn_prefers_straight() {
    let network = junction_network();
    let mut rng = StdRng::seed_from_u64(42);

    let mut straight = 0;
    for _ in 0..1000 {
        let option = network.choose_turn(SegmentIndex(0), &mut rng).unwrap();
        assert_ne!(option.kind(), TurnKind::UTurn);
        if option.kind() == TurnKind::Straight {
            straight += 1;
        }
    }
    // Expected share is 0.9 * 10/11 + 0.1 * 1/2, roughly 87%
    assert!(straight > 750, "straight chosen only {} times", straight);
    assert!(straight < 980, "turn never chosen ({} straight)", straight);
}

#[test]
fn test_find_closest_point_on_road() {
    let network = junction_network();
    let (segment, point, progress) = network
        .find_closest_point_on_road(&p(150.0, 10.0))
        .unwrap();

    assert_eq!(segment, SegmentIndex(1));
    assert!(point.distance(&p(150.0, 0.0)) < 1e-9);
    assert!((progress - 0.5).abs() < 1e-9);
}

#[test]
fn test_segment_geometry() {
    let network = junction_network();
    let south = network.segment(SegmentIndex(2)).unwrap();

    assert_eq!(south.direction(), Direction::South);
    assert!((south.length() - 100.0).abs() < 1e-9);
    assert_eq!(south.point_at(0.25), p(100.0, 25.0));
    assert_eq!(network.segment_count(), 4);
}
