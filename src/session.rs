//! Analysis session orchestration.
//!
//! One session owns the shared analysis state: the trace store the
//! transport appends into, the accumulated topology, and the per-pair
//! delivery results. Periodic workers rerun the inference engines over a
//! fresh trace snapshot on a fixed interval; batches on the same logical
//! target are serialized, and a trigger that fires while the previous
//! batch is still in flight is dropped. Stopping joins every worker, so
//! an in-flight batch always publishes before shared state is released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::analysis::topology::TopologyState;
use crate::analysis::types::{ConnectionSet, LatencyReport, MacLabelMap, MdrResult, MdrStore};
use crate::analysis::{compute_latency, compute_mdr, find_connections};
use crate::config::AnalysisConfig;
use crate::graph::GraphModel;
use crate::site::DeviceRegistry;
use crate::trace::TraceStore;

/// How often sleeping workers re-check the stop flag.
const STOP_POLL: Duration = Duration::from_millis(50);

/// State shared between the session handle and its worker threads.
struct SessionCore {
    trace: Arc<TraceStore>,
    registry: DeviceRegistry,
    config: AnalysisConfig,
    topology: Mutex<TopologyState>,
    delivery: Mutex<MdrStore>,
    latency: Mutex<HashMap<String, LatencyReport>>,
    batches_run: AtomicU64,
    /// Per-target serialization guards, keyed "topology" or
    /// "<kind>:<source>-><destination>".
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionCore {
    fn guard(&self, target: &str) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().expect("guard map poisoned");
        Arc::clone(guards.entry(target.to_string()).or_default())
    }

    fn run_topology_batch(&self) -> (ConnectionSet, MacLabelMap) {
        let rotation = &self.config.rotation;
        let dropped = self
            .trace
            .retain_recent(rotation.keep_records, rotation.rotate_threshold);
        if dropped > 0 {
            log::info!("Trace rotated: dropped {} oldest records", dropped);
        }

        let snapshot = self.trace.snapshot();
        let mut state = self.topology.lock().expect("topology state poisoned");
        find_connections(&snapshot, &self.registry, &self.config.topology, &mut state);
        self.batches_run.fetch_add(1, Ordering::Relaxed);
        (state.connections.clone(), state.labels.clone())
    }

    fn run_delivery_batch(&self, source: &str, destination: &str) -> MdrResult {
        let snapshot = self.trace.snapshot();
        let (labels, neighbor_map) = self.topology_view();

        let result = compute_mdr(
            source,
            destination,
            &snapshot,
            &self.registry,
            &labels,
            &neighbor_map,
            &self.config.trickle,
            &self.config.sampling,
        );

        self.batches_run.fetch_add(1, Ordering::Relaxed);
        self.delivery
            .lock()
            .expect("delivery store poisoned")
            .record(result, self.config.sampling.min_sample)
            .clone()
    }

    fn run_latency_batch(&self, source: &str, destination: &str) -> LatencyReport {
        let snapshot = self.trace.snapshot();
        let (labels, neighbor_map) = self.topology_view();

        let report = compute_latency(
            source,
            destination,
            &snapshot,
            &self.registry,
            &labels,
            &neighbor_map,
        );

        self.batches_run.fetch_add(1, Ordering::Relaxed);
        self.latency
            .lock()
            .expect("latency results poisoned")
            .insert(format!("{}->{}", source, destination), report.clone());
        report
    }

    /// Labels plus neighbor map under one short lock, so the engines
    /// work against a consistent topology view.
    fn topology_view(&self) -> (MacLabelMap, HashMap<u32, HashSet<u32>>) {
        let state = self.topology.lock().expect("topology state poisoned");
        let graph = GraphModel::from_topology(&state.connections, &state.labels);
        (state.labels.clone(), graph.neighbor_map())
    }
}

/// Handle owning the workers of one analysis run.
pub struct AnalysisSession {
    core: Arc<SessionCore>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl AnalysisSession {
    pub fn new(registry: DeviceRegistry, config: AnalysisConfig) -> Self {
        Self {
            core: Arc::new(SessionCore {
                trace: Arc::new(TraceStore::new()),
                registry,
                config,
                topology: Mutex::new(TopologyState::new()),
                delivery: Mutex::new(MdrStore::new()),
                latency: Mutex::new(HashMap::new()),
                batches_run: AtomicU64::new(0),
                guards: Mutex::new(HashMap::new()),
            }),
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        }
    }

    /// The trace store the ingesting transport appends into.
    pub fn trace(&self) -> Arc<TraceStore> {
        Arc::clone(&self.core.trace)
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.core.registry
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.core.config
    }

    pub fn batches_run(&self) -> u64 {
        self.core.batches_run.load(Ordering::Relaxed)
    }

    /// Run one topology batch synchronously and return the resulting
    /// connection set and label map.
    pub fn find_connections(&self) -> (ConnectionSet, MacLabelMap) {
        let guard = self.core.guard("topology");
        let _held = guard.lock().expect("topology guard poisoned");
        self.core.run_topology_batch()
    }

    /// Run one delivery batch synchronously for the given pair.
    pub fn compute_mdr(&self, source: &str, destination: &str) -> MdrResult {
        let guard = self.core.guard(&format!("mdr:{}->{}", source, destination));
        let _held = guard.lock().expect("delivery guard poisoned");
        self.core.run_delivery_batch(source, destination)
    }

    /// Run one latency batch synchronously for the given pair.
    pub fn compute_latency(&self, source: &str, destination: &str) -> LatencyReport {
        let guard = self
            .core
            .guard(&format!("latency:{}->{}", source, destination));
        let _held = guard.lock().expect("latency guard poisoned");
        self.core.run_latency_batch(source, destination)
    }

    /// Topology graph built from the current session state.
    pub fn graph(&self) -> GraphModel {
        let state = self.core.topology.lock().expect("topology state poisoned");
        GraphModel::from_topology(&state.connections, &state.labels)
    }

    /// Labels snapshot for presentation layers.
    pub fn labels(&self) -> MacLabelMap {
        self.core
            .topology
            .lock()
            .expect("topology state poisoned")
            .labels
            .clone()
    }

    /// Accumulated delivery results snapshot.
    pub fn delivery_results(&self) -> MdrStore {
        self.core.delivery.lock().expect("delivery store poisoned").clone()
    }

    /// Latest latency report for a pair, if a batch has produced one.
    pub fn latency_report(&self, source: &str, destination: &str) -> Option<LatencyReport> {
        self.core
            .latency
            .lock()
            .expect("latency results poisoned")
            .get(&format!("{}->{}", source, destination))
            .cloned()
    }

    /// Spawn the periodic topology worker.
    pub fn start_topology_worker(&mut self) {
        let core = Arc::clone(&self.core);
        let stop = Arc::clone(&self.stop);
        let guard = self.core.guard("topology");
        let interval = self.core.config.topology_interval;

        let handle = std::thread::Builder::new()
            .name("topology-worker".to_string())
            .spawn(move || {
                run_periodic(&stop, interval, || match guard.try_lock() {
                    Ok(_held) => {
                        core.run_topology_batch();
                        true
                    }
                    Err(_) => {
                        log::debug!("Topology batch still in flight; dropping trigger");
                        true
                    }
                });
            })
            .expect("Failed to spawn topology worker");
        self.workers.push(handle);
    }

    /// Spawn a periodic delivery worker for one pair.
    pub fn start_delivery_worker(&mut self, source: &str, destination: &str) {
        let core = Arc::clone(&self.core);
        let stop = Arc::clone(&self.stop);
        let guard = self.core.guard(&format!("mdr:{}->{}", source, destination));
        let interval = self.core.config.analysis_interval;
        let (source, destination) = (source.to_string(), destination.to_string());

        let handle = std::thread::Builder::new()
            .name(format!("mdr-worker-{}", destination))
            .spawn(move || {
                run_periodic(&stop, interval, || match guard.try_lock() {
                    Ok(_held) => {
                        core.run_delivery_batch(&source, &destination);
                        true
                    }
                    Err(_) => {
                        log::debug!("Delivery batch still in flight; dropping trigger");
                        true
                    }
                });
            })
            .expect("Failed to spawn delivery worker");
        self.workers.push(handle);
    }

    /// Spawn a periodic latency worker for one pair. The worker retires
    /// itself once the configured sample target is reached.
    pub fn start_latency_worker(&mut self, source: &str, destination: &str) {
        let core = Arc::clone(&self.core);
        let stop = Arc::clone(&self.stop);
        let guard = self
            .core
            .guard(&format!("latency:{}->{}", source, destination));
        let interval = self.core.config.analysis_interval;
        let target = self.core.config.sampling.latency_target_samples;
        let (source, destination) = (source.to_string(), destination.to_string());

        let handle = std::thread::Builder::new()
            .name(format!("latency-worker-{}", destination))
            .spawn(move || {
                run_periodic(&stop, interval, || match guard.try_lock() {
                    Ok(_held) => {
                        let report = core.run_latency_batch(&source, &destination);
                        if report.samples_ms.len() > target {
                            log::info!(
                                "Latency run {} -> {} complete: {} samples",
                                source,
                                destination,
                                report.samples_ms.len()
                            );
                            return false;
                        }
                        true
                    }
                    Err(_) => {
                        log::debug!("Latency batch still in flight; dropping trigger");
                        true
                    }
                });
            })
            .expect("Failed to spawn latency worker");
        self.workers.push(handle);
    }

    /// Stop all workers. In-flight batches complete and publish before
    /// this returns.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Analysis worker panicked");
            }
        }
        // Allow a later restart of workers on the same session state.
        self.stop.store(false, Ordering::Relaxed);
    }

    /// Full session reset: trace, topology, labels and results are all
    /// discarded. Call after `stop()`.
    pub fn reset(&self) {
        self.core.trace.clear();
        *self.core.topology.lock().expect("topology state poisoned") = TopologyState::new();
        self.core
            .delivery
            .lock()
            .expect("delivery store poisoned")
            .clear();
        self.core
            .latency
            .lock()
            .expect("latency results poisoned")
            .clear();
        self.core.batches_run.store(0, Ordering::Relaxed);
    }
}

impl Drop for AnalysisSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drive a worker body on a fixed interval until the stop flag is set or
/// the body retires by returning false. The first run fires immediately;
/// the stop flag is polled while sleeping so shutdown never waits out a
/// full interval.
fn run_periodic(stop: &AtomicBool, interval: Duration, mut body: impl FnMut() -> bool) {
    let mut next_run = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        if Instant::now() >= next_run {
            next_run = Instant::now() + interval;
            if !body() {
                return;
            }
        }
        std::thread::sleep(STOP_POLL.min(interval));
    }
}

#[cfg(test)]
mod tests {
    use crate::trace::{Flag, PacketRecord};

    use super::*;

    fn resp(mac: &str, index: u16, version: u32, at_ms: f64) -> PacketRecord {
        PacketRecord {
            timestamp: at_ms / 1000.0,
            mac: mac.to_string(),
            command: "[0056]".into(),
            flag: Flag::Resp,
            index,
            payload: Some(vec![0x01]),
            version,
            channel: None,
        }
    }

    fn linked_pair_trace() -> Vec<PacketRecord> {
        vec![
            resp("AA", 1, 1, 0.0),
            resp("BB", 1, 1, 20.0),
            resp("AA", 1, 2, 1000.0),
            resp("BB", 1, 2, 1025.0),
        ]
    }

    #[test]
    fn test_synchronous_topology_batch() {
        let session = AnalysisSession::new(DeviceRegistry::default(), AnalysisConfig::default());
        session.trace().extend(linked_pair_trace());

        let (connections, labels) = session.find_connections();
        assert!(connections.contains_edge("AA", "BB"));
        assert_eq!(labels.len(), 2);
        assert_eq!(session.batches_run(), 1);
    }

    #[test]
    fn test_graph_reflects_topology_state() {
        let session = AnalysisSession::new(DeviceRegistry::default(), AnalysisConfig::default());
        session.trace().extend(linked_pair_trace());
        session.find_connections();

        let graph = session.graph();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_stop_joins_workers() {
        let mut config = AnalysisConfig::default();
        config.topology_interval = Duration::from_millis(20);
        let mut session = AnalysisSession::new(DeviceRegistry::default(), config);
        session.trace().extend(linked_pair_trace());

        session.start_topology_worker();
        std::thread::sleep(Duration::from_millis(100));
        session.stop();

        assert!(session.batches_run() >= 1);
        let (connections, _) = session.find_connections();
        assert!(connections.contains_edge("AA", "BB"));
    }

    #[test]
    fn test_reset_clears_session_state() {
        let session = AnalysisSession::new(DeviceRegistry::default(), AnalysisConfig::default());
        session.trace().extend(linked_pair_trace());
        session.find_connections();
        assert!(!session.labels().is_empty());

        session.reset();
        assert!(session.trace().is_empty());
        assert!(session.labels().is_empty());
        assert_eq!(session.batches_run(), 0);
    }
}
