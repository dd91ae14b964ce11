//! Message delivery rate estimation.
//!
//! For an ordered (source, destination) pair, three acknowledgment
//! detectors run over the full trace:
//!
//! 1. request/response: a SET or GET on the destination's index must be
//!    answered with a version bump; the answer counts no matter which
//!    address we heard it from.
//! 2. ambient correlation: traffic the source sends on its own index is
//!    acknowledged when the destination is observed rebroadcasting the
//!    identical message.
//! 3. Trickle suppression: a message the destination never rebroadcast
//!    still arrived, with high probability, if its neighbors rebroadcast
//!    it more often than the redundancy constant inside one minimum
//!    interval; the destination then dropped its own copy by design of
//!    the protocol, not because it missed the message.
//!
//! Any fault inside the pipeline degrades to a zero-valued result so the
//! periodic batch loop keeps running.

use std::collections::{HashMap, HashSet};

use color_eyre::eyre::{eyre, Result};

use crate::config::{SamplingParams, TrickleParams};
use crate::site::DeviceRegistry;
use crate::trace::{Flag, MessageKey, PacketRecord, TraceTime};

use super::first_occurrences;
use super::types::{MacLabelMap, MdrResult};

/// Raw pipeline counts before the sample-size policy is applied.
struct DeliveryCounts {
    total: usize,
    acks: usize,
    span_seconds: f64,
}

/// Compute the delivery result for one ordered pair.
///
/// `neighbor_map` is the label -> neighbor-labels view of the current
/// topology graph. Faults degrade to `MdrResult::degraded`.
#[allow(clippy::too_many_arguments)]
pub fn compute_mdr(
    source: &str,
    destination: &str,
    trace: &[PacketRecord],
    registry: &DeviceRegistry,
    labels: &MacLabelMap,
    neighbor_map: &HashMap<u32, HashSet<u32>>,
    trickle: &TrickleParams,
    sampling: &SamplingParams,
) -> MdrResult {
    match delivery_pipeline(
        source,
        destination,
        trace,
        registry,
        labels,
        neighbor_map,
        trickle,
    ) {
        Ok(counts) => {
            let mut result = MdrResult {
                source: source.to_string(),
                destination: destination.to_string(),
                source_messages: counts.total,
                acks: counts.acks,
                throughput: 0.0,
                mdr: None,
            };
            if counts.total > sampling.min_sample {
                if counts.span_seconds > 0.0 {
                    result.throughput = counts.total as f64 / counts.span_seconds;
                }
                result.mdr = Some(counts.acks as f64 / counts.total as f64 * 100.0);
            }
            result
        }
        Err(e) => {
            log::warn!(
                "Delivery analysis {} -> {} degraded: {}",
                source,
                destination,
                e
            );
            MdrResult::degraded(source, destination)
        }
    }
}

fn delivery_pipeline(
    source: &str,
    destination: &str,
    trace: &[PacketRecord],
    registry: &DeviceRegistry,
    labels: &MacLabelMap,
    neighbor_map: &HashMap<u32, HashSet<u32>>,
    trickle: &TrickleParams,
) -> Result<DeliveryCounts> {
    if trace.is_empty() {
        return Err(eyre!("empty trace"));
    }

    let source_index = registry
        .device_address(source)
        .ok_or_else(|| eyre!("source {} not in site registry", source))?;
    let destination_index = registry
        .device_address(destination)
        .ok_or_else(|| eyre!("destination {} not in site registry", destination))?;

    let source_messages = first_occurrences(trace.iter(), source);

    // Phase 1: requests addressed at the destination, answered by anyone.
    let requests: Vec<&PacketRecord> = source_messages
        .iter()
        .copied()
        .filter(|r| r.flag.is_request() && r.index == destination_index)
        .collect();

    let answer_keys: HashSet<(u16, u32)> = trace
        .iter()
        .filter(|r| matches!(r.flag, Flag::Ack | Flag::Resp))
        .map(|r| (r.index, r.version))
        .collect();

    let phase1_acks = requests
        .iter()
        .filter(|req| answer_keys.contains(&(req.index, req.version + 1)))
        .count();

    // Phase 2: ambient traffic on the source's own index, matched against
    // everything the destination itself transmitted.
    let ambient: Vec<&PacketRecord> = source_messages
        .iter()
        .copied()
        .filter(|r| !r.flag.is_request() && r.index == source_index)
        .collect();

    let destination_keys: HashSet<MessageKey> = trace
        .iter()
        .filter(|r| r.mac == destination)
        .map(|r| r.message_key())
        .collect();

    let mut phase2_acks = 0usize;
    let mut unacknowledged: Vec<&PacketRecord> = Vec::new();
    for message in &ambient {
        if destination_keys.contains(&message.message_key()) {
            phase2_acks += 1;
        } else {
            unacknowledged.push(*message);
        }
    }

    let total = requests.len() + ambient.len();
    let span_seconds = observation_span(&source_messages);
    let mut acks = phase1_acks + phase2_acks;

    // Phase 3: Trickle suppression inference over the destination's
    // neighborhood.
    let destination_label = labels
        .label_of(destination)
        .ok_or_else(|| eyre!("destination {} has no topology label", destination))?;

    if let Some(neighbor_labels) = neighbor_map.get(&destination_label) {
        if !neighbor_labels.is_empty() && !unacknowledged.is_empty() {
            let neighbor_macs: HashSet<String> = labels
                .macs_for_labels(neighbor_labels)
                .into_iter()
                .collect();
            acks += count_suppressed_acks(trace, &neighbor_macs, &unacknowledged, trickle);
        }
    }

    Ok(DeliveryCounts {
        total,
        acks,
        span_seconds,
    })
}

/// Seconds between the earliest and latest message the source originated.
fn observation_span(source_messages: &[&PacketRecord]) -> f64 {
    let mut earliest = f64::MAX;
    let mut latest = f64::MIN;
    for record in source_messages {
        earliest = earliest.min(record.timestamp);
        latest = latest.max(record.timestamp);
    }
    if earliest == f64::MAX {
        0.0
    } else {
        latest - earliest
    }
}

/// Count unacknowledged messages whose neighborhood rebroadcast density
/// proves the destination received them anyway.
///
/// Per (index, version) partition a sliding window one minimum interval
/// wide, anchored at each observed timestamp, counts the retransmissions
/// in flight; exceeding the redundancy constant in any window means the
/// destination suppressed its own rebroadcast.
fn count_suppressed_acks(
    trace: &[PacketRecord],
    neighbor_macs: &HashSet<String>,
    unacknowledged: &[&PacketRecord],
    trickle: &TrickleParams,
) -> usize {
    let wanted: HashSet<MessageKey> = unacknowledged.iter().map(|r| r.message_key()).collect();

    // (index, version) -> neighbor retransmission timestamps.
    let mut partitions: HashMap<(u16, u32), Vec<TraceTime>> = HashMap::new();
    for record in trace {
        if neighbor_macs.contains(&record.mac) && wanted.contains(&record.message_key()) {
            partitions
                .entry((record.index, record.version))
                .or_default()
                .push(record.timestamp);
        }
    }

    let window = trickle.i_min_ms / 1000.0;
    let mut suppressed = 0usize;
    for timestamps in partitions.values_mut() {
        timestamps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if max_within_window(timestamps, window) > trickle.redundancy_constant {
            suppressed += 1;
        }
    }
    suppressed
}

/// Maximum number of entries of a sorted timestamp sequence that fall in
/// any half-open window of the given width anchored at one of them.
fn max_within_window(sorted: &[TraceTime], window: f64) -> usize {
    let mut best = 0usize;
    let mut start = 0usize;
    for end in 0..sorted.len() {
        while sorted[end] - sorted[start] >= window {
            start += 1;
        }
        best = best.max(end - start + 1);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_within_window() {
        let window = 0.032;
        assert_eq!(max_within_window(&[], window), 0);
        assert_eq!(max_within_window(&[0.0], window), 1);
        // Five inside one interval.
        assert_eq!(
            max_within_window(&[0.0, 0.005, 0.010, 0.020, 0.030], window),
            5
        );
        // Window is half-open: an entry a full interval away is outside.
        assert_eq!(max_within_window(&[0.0, 0.032], window), 1);
        // Dense burst in the middle of sparse traffic.
        assert_eq!(
            max_within_window(&[0.0, 1.0, 1.01, 1.02, 1.025, 2.0], window),
            4
        );
    }

    #[test]
    fn test_observation_span() {
        let make = |ts: f64| PacketRecord {
            timestamp: ts,
            mac: "AA".into(),
            command: "[0056]".into(),
            flag: Flag::Dr,
            index: 1,
            payload: None,
            version: 1,
            channel: None,
        };
        let records = [make(2.0), make(8.5), make(4.0)];
        let refs: Vec<&PacketRecord> = records.iter().collect();
        assert_eq!(observation_span(&refs), 6.5);
        assert_eq!(observation_span(&[]), 0.0);
    }
}
