//! Run statistics
//!
//! Despawning vehicles push a [`VehicleReport`] onto a channel; the
//! collector drains it between ticks. At the end of a run the reports are
//! merged with snapshots of the vehicles still on the map.

use std::collections::BTreeMap;

use log::info;
use tokio::sync::mpsc;

use super::qlearning::PolicyStats;
use super::types::AgentId;
use super::vehicle::{DespawnReason, VehicleReport, VehicleSnapshot};

/// Wait history of one vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleStats {
    pub id: AgentId,
    pub wait_times: Vec<u32>,
    pub steps: u32,
    /// Segments driven, in order
    pub route_length: usize,
    /// `None` while the vehicle is still on the map
    pub despawn: Option<DespawnReason>,
}

impl VehicleStats {
    pub fn total_wait(&self) -> u32 {
        self.wait_times.iter().sum()
    }

    pub fn wait_count(&self) -> usize {
        self.wait_times.len()
    }

    pub fn average_wait(&self) -> f64 {
        if self.wait_times.is_empty() {
            0.0
        } else {
            self.total_wait() as f64 / self.wait_times.len() as f64
        }
    }
}

impl From<&VehicleReport> for VehicleStats {
    fn from(report: &VehicleReport) -> Self {
        Self {
            id: report.id.clone(),
            wait_times: report.wait_times.clone(),
            steps: report.steps,
            route_length: report.route.len(),
            despawn: Some(report.reason),
        }
    }
}

impl From<&VehicleSnapshot> for VehicleStats {
    fn from(snapshot: &VehicleSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            wait_times: snapshot.wait_times.clone(),
            steps: snapshot.steps,
            route_length: snapshot.route.len(),
            despawn: None,
        }
    }
}

/// Everything reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationSummary {
    pub elapsed_seconds: u32,
    pub vehicles_configured: usize,
    pub vehicles_entered: usize,
    pub vehicles: Vec<VehicleStats>,
    /// Learning statistics per controller; empty without learning
    pub policies: Vec<(AgentId, PolicyStats)>,
}

impl SimulationSummary {
    pub fn vehicles_despawned(&self) -> usize {
        self.vehicles.iter().filter(|v| v.despawn.is_some()).count()
    }

    pub fn vehicles_active(&self) -> usize {
        self.vehicles.len() - self.vehicles_despawned()
    }

    pub fn despawn_reasons(&self) -> BTreeMap<DespawnReason, usize> {
        let mut reasons = BTreeMap::new();
        for reason in self.vehicles.iter().filter_map(|v| v.despawn) {
            *reasons.entry(reason).or_insert(0) += 1;
        }
        reasons
    }

    fn all_waits(&self) -> impl Iterator<Item = u32> + '_ {
        self.vehicles
            .iter()
            .flat_map(|vehicle| vehicle.wait_times.iter().copied())
    }

    pub fn total_wait(&self) -> u32 {
        self.all_waits().sum()
    }

    pub fn wait_count(&self) -> usize {
        self.all_waits().count()
    }

    pub fn max_wait(&self) -> Option<u32> {
        self.all_waits().max()
    }

    pub fn min_wait(&self) -> Option<u32> {
        self.all_waits().min()
    }

    pub fn average_wait(&self) -> f64 {
        match self.wait_count() {
            0 => 0.0,
            count => self.total_wait() as f64 / count as f64,
        }
    }

    /// Writes the final statistics block to the log
    pub fn log(&self) {
        info!("=== SIMULATION COMPLETE ===");
        info!("Simulated time: {}s", self.elapsed_seconds);
        info!("Vehicles configured: {}", self.vehicles_configured);
        info!("Vehicles entered: {}", self.vehicles_entered);
        info!("Vehicles despawned: {}", self.vehicles_despawned());
        info!("Vehicles still active: {}", self.vehicles_active());
        for (reason, count) in self.despawn_reasons() {
            info!("  {}: {}", reason, count);
        }

        info!("--- Vehicle wait times ---");
        for vehicle in &self.vehicles {
            info!(
                "{}: Total wait time: {} seconds, Waits: {}, Avg: {:.2} sec/wait",
                vehicle.id,
                vehicle.total_wait(),
                vehicle.wait_count(),
                vehicle.average_wait()
            );
        }

        info!("--- Global wait statistics ---");
        match (self.max_wait(), self.min_wait()) {
            (Some(max), Some(min)) => {
                info!("Maximum wait: {} seconds", max);
                info!("Minimum wait: {} seconds", min);
            }
            _ => info!("No waits recorded"),
        }
        info!("Average wait: {:.2} seconds", self.average_wait());
        info!("Total wait time: {} seconds", self.total_wait());
        info!("Number of waits: {}", self.wait_count());

        if !self.policies.is_empty() {
            info!("--- Learning statistics ---");
            for (id, stats) in &self.policies {
                let q_values: Vec<String> =
                    stats.q_values.iter().map(|q| format!("{:.2}", q)).collect();
                info!(
                    "{}: Q-values [{}], action counts {:?}, steps {}, epsilon {}",
                    id,
                    q_values.join(", "),
                    stats.visits,
                    stats.steps,
                    stats.epsilon
                );
            }
        }
    }
}

/// Receiving end of the despawn channel
pub struct StatsCollector {
    receiver: mpsc::UnboundedReceiver<VehicleReport>,
    despawned: BTreeMap<AgentId, VehicleReport>,
}

impl StatsCollector {
    /// Collector plus the sender vehicles report to
    pub fn channel() -> (mpsc::UnboundedSender<VehicleReport>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            sender,
            Self {
                receiver,
                despawned: BTreeMap::new(),
            },
        )
    }

    /// Pulls every pending report. Returns how many arrived.
    pub fn drain(&mut self) -> usize {
        let mut received = 0;
        while let Ok(report) = self.receiver.try_recv() {
            info!(
                "Vehicle {} despawned ({}) after {} steps",
                report.id, report.reason, report.steps
            );
            self.despawned.insert(report.id.clone(), report);
            received += 1;
        }
        received
    }

    pub fn is_despawned(&self, id: &AgentId) -> bool {
        self.despawned.contains_key(id)
    }

    pub fn despawned_count(&self) -> usize {
        self.despawned.len()
    }

    pub fn reports(&self) -> impl Iterator<Item = &VehicleReport> {
        self.despawned.values()
    }

    /// Combines despawn reports with snapshots of live vehicles
    pub fn summarize(
        &self,
        elapsed_seconds: u32,
        vehicles_configured: usize,
        vehicles_entered: usize,
        live: &[VehicleSnapshot],
        policies: Vec<(AgentId, PolicyStats)>,
    ) -> SimulationSummary {
        let mut vehicles: Vec<VehicleStats> = self.reports().map(VehicleStats::from).collect();
        vehicles.extend(
            live.iter()
                .filter(|snapshot| !self.is_despawned(&snapshot.id))
                .map(VehicleStats::from),
        );
        vehicles.sort_by(|a, b| a.id.cmp(&b.id));

        SimulationSummary {
            elapsed_seconds,
            vehicles_configured,
            vehicles_entered,
            vehicles,
            policies,
        }
    }
}
