//! Trickle-timing topology inference.
//!
//! Reconstructs which node pairs hear each other directly, from nothing
//! but the timing of overheard RESPONSE traffic. A node answering a GET
//! broadcasts a RESPONSE on its own index; every neighbor that hears it
//! rebroadcasts the identical (index, payload, version) message within
//! the first Trickle interval. A copy landing inside the acceptance
//! window is evidence of a direct link; a copy landing before the
//! window's lower edge means we never heard the true original, so that
//! message group proves nothing.

use std::collections::{BTreeSet, HashMap};

use rayon::prelude::*;

use crate::config::TopologyParams;
use crate::site::DeviceRegistry;
use crate::trace::{Flag, MessageKey, PacketRecord};

use super::first_occurrences;
use super::types::{ConnectionSet, MacLabelMap};

/// Accumulated topology knowledge for one analysis session.
///
/// Owned by the orchestrating caller and passed into each pass
/// explicitly; connections and labels survive across passes, the trace
/// is reprocessed from scratch every time.
#[derive(Debug, Clone, Default)]
pub struct TopologyState {
    pub connections: ConnectionSet,
    pub labels: MacLabelMap,
    /// Every transmitter address ever seen in a processed trace.
    known_macs: BTreeSet<String>,
}

impl TopologyState {
    pub fn new() -> Self {
        Self {
            connections: ConnectionSet::new(),
            labels: MacLabelMap::new(),
            known_macs: BTreeSet::new(),
        }
    }

    pub fn known_macs(&self) -> impl Iterator<Item = &String> {
        self.known_macs.iter()
    }
}

/// Run one topology inference pass over the full trace, updating the
/// session state in place.
pub fn find_connections(
    trace: &[PacketRecord],
    registry: &DeviceRegistry,
    params: &TopologyParams,
    state: &mut TopologyState,
) {
    for record in trace {
        state.known_macs.insert(record.mac.clone());
    }

    // Only RESPONSE traffic is stimulated and analyzed; everything else
    // is noise for edge discovery.
    let responses: Vec<&PacketRecord> = trace.iter().filter(|r| r.flag == Flag::Resp).collect();

    // (index, version, payload) -> all copies heard, in trace order.
    let mut copies: HashMap<MessageKey, Vec<&PacketRecord>> = HashMap::new();
    for record in trace {
        copies.entry(record.message_key()).or_default().push(record);
    }

    let sources: Vec<&String> = state.known_macs.iter().collect();
    let discovered: Vec<(String, Vec<String>)> = sources
        .par_iter()
        .map(|source| {
            let heard = directly_heard_by(source, &responses, &copies, registry, params);
            (source.to_string(), heard)
        })
        .collect();

    // Merge sequentially in sorted source order so reruns agree.
    for (source, heard) in discovered {
        for peer in heard {
            if state.connections.insert_edge(&source, &peer) {
                log::debug!("Registered connection {} <-> {}", source, peer);
            }
        }
    }

    // Anything seen on air but never linked keeps a placeholder so the
    // presentation layer can show it as an isolated participant.
    let unlinked: Vec<String> = state
        .known_macs
        .iter()
        .filter(|mac| !state.connections.is_linked(mac))
        .cloned()
        .collect();
    for mac in unlinked {
        state.connections.mark_unlinked(&mac);
    }

    state.labels.assign(&state.connections, registry);

    log::info!(
        "Topology pass: {} addresses, {} edges, {} unlinked",
        state.known_macs.len(),
        state.connections.edge_count(),
        state.connections.unlinked().count()
    );
}

/// Addresses with enough accepted rebroadcast evidence to be considered
/// in direct radio range of `source`.
fn directly_heard_by(
    source: &str,
    responses: &[&PacketRecord],
    copies: &HashMap<MessageKey, Vec<&PacketRecord>>,
    registry: &DeviceRegistry,
    params: &TopologyParams,
) -> Vec<String> {
    let mut origins = first_occurrences(responses.iter().copied(), source);

    // A node only originates RESPONSE traffic on its own index; anything
    // else is this address relaying someone else's answer first.
    if let Some(own_index) = registry.device_address(source) {
        origins.retain(|r| r.index == own_index);
    }

    if origins.is_empty() {
        return Vec::new();
    }

    let mut tallies: HashMap<&str, usize> = HashMap::new();

    for origin in origins {
        let Some(group) = copies.get(&origin.message_key()) else {
            continue;
        };

        let mut evidence: Vec<&str> = Vec::new();
        let mut provenance_unreliable = false;

        for candidate in group.iter().filter(|c| c.mac != source) {
            let delta_ms = (candidate.timestamp - origin.timestamp).abs() * 1000.0;
            if delta_ms < params.window_low_ms {
                // We missed the true original; this whole message group
                // proves nothing about who heard `source`.
                provenance_unreliable = true;
                break;
            }
            if delta_ms < params.window_high_ms {
                evidence.push(&candidate.mac);
            }
        }

        if provenance_unreliable {
            continue;
        }
        for mac in evidence {
            *tallies.entry(mac).or_insert(0) += 1;
        }
    }

    let mut heard: Vec<String> = tallies
        .into_iter()
        .filter(|(_, tally)| *tally >= params.min_occurrences)
        .map(|(mac, _)| mac.to_string())
        .collect();
    heard.sort();
    heard
}
