//! Propagation latency estimation.
//!
//! Empirical latency for a message is measured from the source's
//! transmission to the first rebroadcast by any neighbor of the
//! destination: the soonest evidence the message reached the
//! destination's radio vicinity. A closed-form Trickle propagation model
//! over the same topology provides the theoretical figure to compare
//! against.

use std::collections::{BTreeMap, HashMap, HashSet};

use color_eyre::eyre::{eyre, Result};

use crate::site::DeviceRegistry;
use crate::trace::{MessageKey, PacketRecord, TraceTime};

use super::first_occurrences;
use super::types::{LatencyReport, MacLabelMap};

/// Maximum number of Trickle rebroadcast rounds the model accounts for.
const MODEL_ROUNDS: u32 = 7;

/// Empirically calibrated per-round relay success probability.
const ROUND_SUCCESS_PROBABILITY: f64 = 1.0 - 10.0 / 152.0;

/// Compute the empirical latency distribution for one ordered pair.
///
/// Degenerate inputs and pipeline faults yield the empty report.
pub fn compute_latency(
    source: &str,
    destination: &str,
    trace: &[PacketRecord],
    registry: &DeviceRegistry,
    labels: &MacLabelMap,
    neighbor_map: &HashMap<u32, HashSet<u32>>,
) -> LatencyReport {
    match latency_pipeline(source, destination, trace, registry, labels, neighbor_map) {
        Ok(report) => report,
        Err(e) => {
            log::warn!(
                "Latency analysis {} -> {} degraded: {}",
                source,
                destination,
                e
            );
            LatencyReport::empty()
        }
    }
}

fn latency_pipeline(
    source: &str,
    destination: &str,
    trace: &[PacketRecord],
    registry: &DeviceRegistry,
    labels: &MacLabelMap,
    neighbor_map: &HashMap<u32, HashSet<u32>>,
) -> Result<LatencyReport> {
    let source_index = registry
        .device_address(source)
        .ok_or_else(|| eyre!("source {} not in site registry", source))?;
    let destination_index = registry
        .device_address(destination)
        .ok_or_else(|| eyre!("destination {} not in site registry", destination))?;

    // Messages the destination is expected to acknowledge or rebroadcast:
    // requests addressed at it, plus the source's own-index ambient
    // traffic.
    let source_messages = first_occurrences(trace.iter(), source);
    let mut interest: HashMap<MessageKey, TraceTime> = HashMap::new();
    for record in source_messages {
        let relevant = (record.flag.is_request() && record.index == destination_index)
            || (!record.flag.is_request() && record.index == source_index);
        if relevant {
            interest.insert(record.message_key(), record.timestamp);
        }
    }

    let destination_label = labels
        .label_of(destination)
        .ok_or_else(|| eyre!("destination {} has no topology label", destination))?;
    let neighbor_macs: HashSet<String> = neighbor_map
        .get(&destination_label)
        .map(|neighbor_labels| labels.macs_for_labels(neighbor_labels).into_iter().collect())
        .unwrap_or_default();

    if interest.is_empty() || neighbor_macs.is_empty() {
        return Ok(LatencyReport::empty());
    }

    // Earliest copy of each message of interest per neighbor: the
    // soonest physical propagation evidence that neighbor provides.
    let mut earliest_copy: HashMap<(MessageKey, &str), TraceTime> = HashMap::new();
    for record in trace {
        if !neighbor_macs.contains(&record.mac) {
            continue;
        }
        let key = record.message_key();
        if !interest.contains_key(&key) {
            continue;
        }
        earliest_copy
            .entry((key, record.mac.as_str()))
            .and_modify(|ts| {
                if record.timestamp < *ts {
                    *ts = record.timestamp;
                }
            })
            .or_insert(record.timestamp);
    }

    // Per message: fastest and slowest observed path into the
    // destination's vicinity. BTreeMap keeps sample order deterministic.
    let mut spreads: BTreeMap<MessageKey, (f64, f64)> = BTreeMap::new();
    for ((key, _), neighbor_ts) in &earliest_copy {
        let delta_ms = (neighbor_ts - interest[key]) * 1000.0;
        spreads
            .entry(key.clone())
            .and_modify(|(min, max)| {
                *min = min.min(delta_ms);
                *max = max.max(delta_ms);
            })
            .or_insert((delta_ms, delta_ms));
    }

    if spreads.is_empty() {
        return Ok(LatencyReport::empty());
    }

    let samples_ms: Vec<f64> = spreads.values().map(|(min, _)| *min).collect();
    let avg_ms = samples_ms.iter().sum::<f64>() / samples_ms.len() as f64;
    let max_ms = spreads
        .values()
        .map(|(_, max)| *max)
        .fold(f64::MIN, f64::max);

    Ok(LatencyReport {
        samples_ms,
        avg_ms,
        max_ms,
    })
}

/// Expected multi-hop Trickle propagation latency in milliseconds.
///
/// `path` is a shortest path of node labels, endpoints included;
/// `fanout_per_hop` gives, for each intermediate hop start, the number
/// of neighbors able to relay across that two-hop segment. Each hop
/// models up to seven rebroadcast rounds of exponentially doubling
/// width: a round contributes its expected in-window transmit position
/// (earlier the more relays compete) plus the full width of every
/// earlier round, weighted by the chance all earlier rounds failed.
/// Paths without an intermediate hop have zero latency by definition.
pub fn theoretical_latency(path: &[u32], fanout_per_hop: &HashMap<u32, usize>, i_min_ms: f64) -> f64 {
    if path.len() < 3 {
        return 0.0;
    }
    let hops = path.len() - 2;

    let p = ROUND_SUCCESS_PROBABILITY;
    let fail = 1.0 - p;

    let mut expected_ms = 0.0;
    for hop in 0..hops {
        let n = fanout_per_hop.get(&path[hop]).copied().unwrap_or(0);
        let position = 0.5 + 1.0 / (2.0 * (n as f64 + 1.0));

        let mut earlier_widths = 0.0;
        for round in 0..MODEL_ROUNDS {
            let width = (1u64 << round) as f64 * i_min_ms;
            expected_ms += p * (width * position + earlier_widths) * fail.powi(round as i32);
            earlier_widths += width;
        }
    }

    expected_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theoretical_latency_trivial_paths() {
        let fanout = HashMap::new();
        assert_eq!(theoretical_latency(&[], &fanout, 32.0), 0.0);
        assert_eq!(theoretical_latency(&[1], &fanout, 32.0), 0.0);
        assert_eq!(theoretical_latency(&[1, 2], &fanout, 32.0), 0.0);
    }

    #[test]
    fn test_theoretical_latency_single_hop_round_zero_term() {
        // With one intermediate hop and fan-out 1 the round-0 term is
        // p * I_min * (1/2 + 1/4); later rounds only add on top.
        let fanout = HashMap::from([(1u32, 1usize)]);
        let latency = theoretical_latency(&[1, 2, 3], &fanout, 32.0);
        let round0 = ROUND_SUCCESS_PROBABILITY * 32.0 * 0.75;
        assert!(latency > round0);
        // All later rounds carry at least one failure factor.
        let fail = 1.0 - ROUND_SUCCESS_PROBABILITY;
        assert!(latency < round0 + fail * 10_000.0);
    }

    #[test]
    fn test_theoretical_latency_monotone_in_fanout() {
        // More competing relays pull the expected in-window position
        // earlier, so latency must not grow with fan-out.
        let path = [1u32, 2, 3];
        let mut previous = f64::MAX;
        for n in 0..6usize {
            let fanout = HashMap::from([(1u32, n)]);
            let latency = theoretical_latency(&path, &fanout, 32.0);
            assert!(latency <= previous);
            previous = latency;
        }
    }

    #[test]
    fn test_theoretical_latency_sums_over_hops() {
        let fanout = HashMap::from([(1u32, 2usize), (2u32, 2usize)]);
        let one_hop = theoretical_latency(&[1, 2, 3], &fanout, 32.0);
        let two_hops = theoretical_latency(&[1, 2, 3, 4], &fanout, 32.0);
        assert!((two_hops - 2.0 * one_hop).abs() < 1e-9);
    }
}
