//! Core result types for passive mesh analysis.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::site::DeviceRegistry;

/// Undirected connection pairs discovered by topology inference, plus
/// "unlinked" markers for addresses seen on air but not yet tied to a
/// peer.
///
/// Pairs are canonicalized (sorted endpoints) so (A,B) and (B,A) are one
/// entry; inserting a real edge evicts the unlinked marker of both
/// endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSet {
    edges: BTreeSet<(String, String)>,
    unlinked: BTreeSet<String>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an undirected edge. Returns false for self-loops and
    /// duplicates.
    pub fn insert_edge(&mut self, a: &str, b: &str) -> bool {
        if a == b {
            return false;
        }
        let pair = if a < b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        self.unlinked.remove(a);
        self.unlinked.remove(b);
        self.edges.insert(pair)
    }

    /// Mark an address as seen-but-unconnected. Refused while the address
    /// participates in any real edge.
    pub fn mark_unlinked(&mut self, mac: &str) -> bool {
        if self.is_linked(mac) {
            return false;
        }
        self.unlinked.insert(mac.to_string())
    }

    /// True when the address participates in at least one real edge.
    pub fn is_linked(&self, mac: &str) -> bool {
        self.edges.iter().any(|(a, b)| a == mac || b == mac)
    }

    pub fn contains_edge(&self, a: &str, b: &str) -> bool {
        let pair = if a < b { (a, b) } else { (b, a) };
        self.edges
            .iter()
            .any(|(x, y)| (x.as_str(), y.as_str()) == pair)
    }

    pub fn edges(&self) -> impl Iterator<Item = &(String, String)> {
        self.edges.iter()
    }

    pub fn unlinked(&self) -> impl Iterator<Item = &String> {
        self.unlinked.iter()
    }

    /// Every address referenced by an edge or an unlinked marker.
    pub fn all_macs(&self) -> BTreeSet<String> {
        let mut macs: BTreeSet<String> = self.unlinked.clone();
        for (a, b) in &self.edges {
            macs.insert(a.clone());
            macs.insert(b.clone());
        }
        macs
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.unlinked.is_empty()
    }
}

/// Label map entry: session-stable integer label plus display title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelEntry {
    pub label: u32,
    pub title: String,
}

/// Physical address -> (sequential label, title) mapping.
///
/// Labels are assigned 1..N on first sight and never reused; addresses
/// appearing in later passes extend the sequence. Cleared only by a full
/// session reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MacLabelMap {
    entries: BTreeMap<String, LabelEntry>,
    next_label: u32,
}

impl MacLabelMap {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_label: 1,
        }
    }

    /// Register every address the connection set references, keeping
    /// existing labels and handing new addresses the next free labels in
    /// lexicographic address order so reruns agree.
    pub fn assign(&mut self, connections: &ConnectionSet, registry: &DeviceRegistry) {
        if self.next_label == 0 {
            self.next_label = 1;
        }
        for mac in connections.all_macs() {
            if self.entries.contains_key(&mac) {
                continue;
            }
            let title = registry.title(&mac).to_string();
            self.entries.insert(
                mac,
                LabelEntry {
                    label: self.next_label,
                    title,
                },
            );
            self.next_label += 1;
        }
    }

    pub fn get(&self, mac: &str) -> Option<&LabelEntry> {
        self.entries.get(mac)
    }

    pub fn label_of(&self, mac: &str) -> Option<u32> {
        self.entries.get(mac).map(|e| e.label)
    }

    pub fn mac_for_label(&self, label: u32) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.label == label)
            .map(|(mac, _)| mac.as_str())
    }

    /// Addresses carrying any of the given labels, sorted.
    pub fn macs_for_labels(&self, labels: &HashSet<u32>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| labels.contains(&entry.label))
            .map(|(mac, _)| mac.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LabelEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Message delivery result for one ordered (source, destination) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MdrResult {
    pub source: String,
    pub destination: String,
    /// Messages the source is known to have originated in the trace.
    pub source_messages: usize,
    /// Directly or indirectly acknowledged messages.
    pub acks: usize,
    /// Source messages per second over the observed span; 0 below the
    /// sample cutoff.
    pub throughput: f64,
    /// Delivery percentage; `None` below the sample cutoff.
    pub mdr: Option<f64>,
}

impl MdrResult {
    /// The degraded result any pipeline fault collapses to.
    pub fn degraded(source: &str, destination: &str) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            source_messages: 0,
            acks: 0,
            throughput: 0.0,
            mdr: None,
        }
    }
}

/// Accumulated delivery results keyed "source->destination".
///
/// A freshly computed result always creates a missing entry; it replaces
/// an existing entry only when its sample size clears the cutoff, so a
/// thin batch never clobbers a well-sampled earlier one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MdrStore {
    results: BTreeMap<String, MdrResult>,
}

impl MdrStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(source: &str, destination: &str) -> String {
        format!("{}->{}", source, destination)
    }

    /// Apply the insert/replace rule and return the stored entry.
    pub fn record(&mut self, result: MdrResult, min_sample: usize) -> &MdrResult {
        let key = Self::key(&result.source, &result.destination);
        match self.results.entry(key) {
            std::collections::btree_map::Entry::Vacant(slot) => slot.insert(result),
            std::collections::btree_map::Entry::Occupied(slot) => {
                let stored = slot.into_mut();
                if result.source_messages > min_sample {
                    *stored = result;
                }
                stored
            }
        }
    }

    pub fn get(&self, source: &str, destination: &str) -> Option<&MdrResult> {
        self.results.get(&Self::key(source, destination))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MdrResult> {
        self.results.values()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }
}

/// Empirical propagation latency between one node pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyReport {
    /// Fastest observed propagation per distinct message, milliseconds.
    pub samples_ms: Vec<f64>,
    pub avg_ms: f64,
    pub max_ms: f64,
}

impl LatencyReport {
    /// The empty result degenerate inputs and pipeline faults produce.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_canonicalized_and_deduplicated() {
        let mut connections = ConnectionSet::new();
        assert!(connections.insert_edge("BB", "AA"));
        assert!(!connections.insert_edge("AA", "BB"));
        assert_eq!(connections.edge_count(), 1);
        assert!(connections.contains_edge("AA", "BB"));
        assert!(connections.contains_edge("BB", "AA"));
    }

    #[test]
    fn test_real_edge_evicts_unlinked_marker() {
        let mut connections = ConnectionSet::new();
        connections.mark_unlinked("AA");
        connections.mark_unlinked("BB");
        connections.insert_edge("AA", "BB");
        assert_eq!(connections.unlinked().count(), 0);
        assert!(!connections.mark_unlinked("AA"));
    }

    #[test]
    fn test_all_macs_covers_edges_and_markers() {
        let mut connections = ConnectionSet::new();
        connections.insert_edge("AA", "BB");
        connections.mark_unlinked("CC");
        let macs: Vec<String> = connections.all_macs().into_iter().collect();
        assert_eq!(macs, vec!["AA", "BB", "CC"]);
    }

    #[test]
    fn test_labels_stable_and_never_reused() {
        let registry = DeviceRegistry::default();
        let mut labels = MacLabelMap::new();

        let mut first = ConnectionSet::new();
        first.insert_edge("AA", "BB");
        labels.assign(&first, &registry);
        assert_eq!(labels.label_of("AA"), Some(1));
        assert_eq!(labels.label_of("BB"), Some(2));

        let mut second = ConnectionSet::new();
        second.insert_edge("AA", "BB");
        second.mark_unlinked("00");
        labels.assign(&second, &registry);
        // "00" sorts first but still gets the next label, not a reused one.
        assert_eq!(labels.label_of("00"), Some(3));
        assert_eq!(labels.label_of("AA"), Some(1));
    }

    #[test]
    fn test_mdr_store_replace_rule() {
        let mut store = MdrStore::new();
        let thin = MdrResult {
            source: "A".into(),
            destination: "B".into(),
            source_messages: 4,
            acks: 4,
            throughput: 0.0,
            mdr: None,
        };
        let solid = MdrResult {
            source: "A".into(),
            destination: "B".into(),
            source_messages: 40,
            acks: 30,
            throughput: 2.0,
            mdr: Some(75.0),
        };

        store.record(thin.clone(), 10);
        assert_eq!(store.get("A", "B"), Some(&thin));

        store.record(solid.clone(), 10);
        assert_eq!(store.get("A", "B"), Some(&solid));

        // A later thin batch must not clobber the well-sampled result.
        store.record(thin, 10);
        assert_eq!(store.get("A", "B"), Some(&solid));
    }
}
