//! Road network graph and junction resolution
//!
//! Segments are nodes of a petgraph directed graph; every edge is a
//! precomputed [`TurnOption`] carrying the junction point and the headings
//! on both sides of it. The network is immutable once built and shared
//! read-only by every vehicle.

use std::collections::HashMap;

use log::{debug, warn};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rand::seq::IndexedRandom;
use rand::Rng;

use super::error::ConfigError;
use super::geometry::{cardinal_direction, project_onto_segment, segment_intersection};
use super::types::{Direction, Position, SegmentIndex, CONNECTION_SNAP_DISTANCE};

/// Probability of using the weighted roulette instead of a uniform pick
pub const WEIGHTED_CHOICE_PROBABILITY: f64 = 0.9;
/// Weight of continuing in the same cardinal direction
pub const STRAIGHT_WEIGHT: f64 = 10.0;
/// Weight of a left or right turn
pub const TURN_WEIGHT: f64 = 1.0;
/// Weight of reversing direction
pub const U_TURN_WEIGHT: f64 = 0.1;

/// Description of a segment before the network is built
#[derive(Debug, Clone)]
pub struct SegmentSpec {
    pub name: String,
    pub start: Position,
    pub end: Position,
    pub capacity: u32,
    pub one_way: bool,
    pub is_spawn: bool,
    pub is_despawn: bool,
    /// Explicit successor names; `None` means infer them by proximity
    pub connections: Option<Vec<String>>,
}

impl SegmentSpec {
    pub fn new(name: impl Into<String>, start: Position, end: Position, capacity: u32) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            capacity,
            one_way: false,
            is_spawn: false,
            is_despawn: false,
            connections: None,
        }
    }

    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    pub fn spawn(mut self) -> Self {
        self.is_spawn = true;
        self
    }

    pub fn despawn(mut self) -> Self {
        self.is_despawn = true;
        self
    }

    pub fn connected_to(mut self, names: &[&str]) -> Self {
        self.connections = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }
}

/// A directed road edge with capacity and connectivity
#[derive(Debug, Clone)]
pub struct RoadSegment {
    pub index: SegmentIndex,
    pub name: String,
    pub start: Position,
    pub end: Position,
    pub capacity: u32,
    pub one_way: bool,
    pub is_spawn: bool,
    pub is_despawn: bool,
    /// Resolved successors, explicit or inferred
    pub connections: Vec<SegmentIndex>,
}

impl RoadSegment {
    pub fn direction(&self) -> Direction {
        cardinal_direction(self.start, self.end)
    }

    pub fn length(&self) -> f64 {
        self.start.distance(&self.end)
    }

    /// Point at `progress` ∈ [0, 1] along the segment
    pub fn point_at(&self, progress: f64) -> Position {
        self.start.lerp(&self.end, progress.clamp(0.0, 1.0))
    }
}

/// How a turn option changes the heading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Straight,
    Turn,
    UTurn,
}

/// A precomputed move from the end of one segment onto another
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnOption {
    pub target: SegmentIndex,
    pub junction: Position,
    pub from: Direction,
    pub to: Direction,
}

impl TurnOption {
    pub fn kind(&self) -> TurnKind {
        if self.from == self.to {
            TurnKind::Straight
        } else if self.from.opposite() == self.to {
            TurnKind::UTurn
        } else {
            TurnKind::Turn
        }
    }

    pub fn weight(&self) -> f64 {
        match self.kind() {
            TurnKind::Straight => STRAIGHT_WEIGHT,
            TurnKind::Turn => TURN_WEIGHT,
            TurnKind::UTurn => U_TURN_WEIGHT,
        }
    }
}

/// Immutable road graph shared by all agents
#[derive(Debug)]
pub struct RoadNetwork {
    /// Segments as nodes, turn options as edges
    graph: DiGraph<SegmentIndex, TurnOption>,

    /// Maps segment indices to their node indices in the graph
    segment_to_node: Vec<NodeIndex>,

    /// Storage for segment data, indexed by `SegmentIndex`
    segments: Vec<RoadSegment>,

    /// Maps configured names back to segment indices
    by_name: HashMap<String, SegmentIndex>,
}

impl RoadNetwork {
    /// Builds the network, resolving connections and precomputing every
    /// segment's turn options
    pub fn build(specs: Vec<SegmentSpec>) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::NoRoads);
        }

        let mut by_name = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            if spec.capacity == 0 {
                return Err(ConfigError::Invalid(format!(
                    "road {} must have a positive capacity",
                    spec.name
                )));
            }
            if by_name.insert(spec.name.clone(), SegmentIndex(i)).is_some() {
                return Err(ConfigError::DuplicateId(spec.name.clone()));
            }
        }

        let mut segments = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            let connections = match &spec.connections {
                Some(names) => names
                    .iter()
                    .map(|name| {
                        by_name
                            .get(name)
                            .copied()
                            .ok_or_else(|| ConfigError::UnknownRoad {
                                referrer: spec.name.clone(),
                                road: name.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                None => specs
                    .iter()
                    .enumerate()
                    .filter(|(j, other)| {
                        *j != i && other.start.distance(&spec.end) <= CONNECTION_SNAP_DISTANCE
                    })
                    .map(|(j, _)| SegmentIndex(j))
                    .collect(),
            };

            segments.push(RoadSegment {
                index: SegmentIndex(i),
                name: spec.name.clone(),
                start: spec.start,
                end: spec.end,
                capacity: spec.capacity,
                one_way: spec.one_way,
                is_spawn: spec.is_spawn,
                is_despawn: spec.is_despawn,
                connections,
            });
        }

        let mut graph = DiGraph::new();
        let segment_to_node: Vec<NodeIndex> = segments
            .iter()
            .map(|segment| graph.add_node(segment.index))
            .collect();

        for segment in &segments {
            let options = Self::compute_turn_options(&segments, segment);
            if options.is_empty() && !segment.is_despawn {
                warn!(
                    "Road {} has no legal successor and is not a despawn point",
                    segment.name
                );
            }
            for option in options {
                graph.add_edge(
                    segment_to_node[segment.index.0],
                    segment_to_node[option.target.0],
                    option,
                );
            }
        }

        debug!(
            "Built road network with {} segments and {} turn options",
            segments.len(),
            graph.edge_count()
        );

        Ok(Self {
            graph,
            segment_to_node,
            segments,
            by_name,
        })
    }

    /// Turn options of `from`: junction geometry, one-way filtering and
    /// U-turn exclusion (kept only when nothing else is possible)
    fn compute_turn_options(segments: &[RoadSegment], from: &RoadSegment) -> Vec<TurnOption> {
        let heading = from.direction();

        let candidates: Vec<TurnOption> = from
            .connections
            .iter()
            .filter_map(|target| segments.get(target.0))
            .filter_map(|target| {
                let junction = segment_intersection(from.start, from.end, target.start, target.end)
                    .unwrap_or(target.start);

                if target.one_way
                    && junction.distance(&target.end) < junction.distance(&target.start)
                {
                    return None;
                }

                Some(TurnOption {
                    target: target.index,
                    junction,
                    from: heading,
                    to: target.direction(),
                })
            })
            .collect();

        let forward: Vec<TurnOption> = candidates
            .iter()
            .copied()
            .filter(|option| option.kind() != TurnKind::UTurn)
            .collect();

        if forward.is_empty() {
            candidates
        } else {
            forward
        }
    }

    /// Gets a segment by index
    pub fn segment(&self, index: SegmentIndex) -> Option<&RoadSegment> {
        self.segments.get(index.0)
    }

    /// Gets a segment by its configured name
    pub fn segment_by_name(&self, name: &str) -> Option<&RoadSegment> {
        self.by_name.get(name).and_then(|index| self.segment(*index))
    }

    /// Get all segments
    pub fn segments(&self) -> &[RoadSegment] {
        &self.segments
    }

    /// Get number of segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Get number of precomputed turn options
    pub fn turn_option_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Precomputed turn options at the end of `from`, ordered by target
    pub fn turn_options(&self, from: SegmentIndex) -> Vec<TurnOption> {
        let Some(node) = self.segment_to_node.get(from.0) else {
            return Vec::new();
        };

        let mut options: Vec<TurnOption> = self
            .graph
            .edges(*node)
            .map(|edge| *edge.weight())
            .collect();
        options.sort_by_key(|option| option.target);
        options
    }

    /// Picks the next segment: a weighted roulette most of the time, a
    /// uniform pick otherwise
    pub fn choose_turn<R: Rng + ?Sized>(
        &self,
        from: SegmentIndex,
        rng: &mut R,
    ) -> Option<TurnOption> {
        let options = self.turn_options(from);
        if options.is_empty() {
            return None;
        }

        if rng.random_bool(WEIGHTED_CHOICE_PROBABILITY) {
            Self::roulette(&options, rng)
        } else {
            options.choose(rng).copied()
        }
    }

    fn roulette<R: Rng + ?Sized>(options: &[TurnOption], rng: &mut R) -> Option<TurnOption> {
        let total: f64 = options.iter().map(TurnOption::weight).sum();
        let mut pick = rng.random::<f64>() * total;
        for option in options {
            pick -= option.weight();
            if pick <= 0.0 {
                return Some(*option);
            }
        }
        options.last().copied()
    }

    /// Find the closest point on any segment to a given position
    /// Returns (segment, closest_position, progress along the segment)
    pub fn find_closest_point_on_road(
        &self,
        position: &Position,
    ) -> Option<(SegmentIndex, Position, f64)> {
        let mut closest: Option<(SegmentIndex, Position, f64, f64)> = None;

        for segment in &self.segments {
            let t = project_onto_segment(*position, segment.start, segment.end);
            let closest_point = segment.point_at(t);
            let distance = position.distance(&closest_point);

            let is_closer = closest
                .as_ref()
                .map_or(true, |(_, _, _, best)| distance < *best);
            if is_closer {
                closest = Some((segment.index, closest_point, t, distance));
            }
        }

        closest.map(|(index, point, t, _)| (index, point, t))
    }
}
