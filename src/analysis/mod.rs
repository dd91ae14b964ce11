//! Passive inference engines for Trickle-based mesh traces.
//!
//! This module holds the correlation core: topology inference from
//! rebroadcast timing, message delivery rate estimation with direct and
//! indirect acknowledgment detection, and empirical plus theoretical
//! propagation latency.

pub mod latency;
pub mod mdr;
pub mod report;
pub mod topology;
pub mod types;

pub use latency::{compute_latency, theoretical_latency};
pub use mdr::compute_mdr;
pub use report::{generate_json_report, generate_text_report, print_summary, FullAnalysisReport};
pub use topology::{find_connections, TopologyState};
pub use types::{ConnectionSet, LatencyReport, MacLabelMap, MdrResult, MdrStore};

use std::collections::HashMap;

use crate::trace::PacketRecord;

/// First-occurrence extraction: for each (version, index) group, the
/// earliest record transmitted by `mac` (ties broken by arrival order).
///
/// This is the shared heuristic proxy for "this address originated that
/// version of that index's state"; it is deliberately optimistic and
/// every engine layering on top applies its own noise rejection.
pub fn first_occurrences<'a>(
    records: impl IntoIterator<Item = &'a PacketRecord>,
    mac: &str,
) -> Vec<&'a PacketRecord> {
    let mut firsts: HashMap<(u32, u16), &'a PacketRecord> = HashMap::new();

    for record in records {
        if record.mac != mac {
            continue;
        }
        firsts
            .entry((record.version, record.index))
            .and_modify(|current| {
                // Strict comparison keeps the earlier arrival on a tie.
                if record.timestamp < current.timestamp {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    let mut result: Vec<&PacketRecord> = firsts.into_values().collect();
    result.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (a.index, a.version).cmp(&(b.index, b.version)))
    });
    result
}

#[cfg(test)]
mod tests {
    use crate::trace::Flag;

    use super::*;

    fn record(mac: &str, index: u16, version: u32, ts: f64) -> PacketRecord {
        PacketRecord {
            timestamp: ts,
            mac: mac.to_string(),
            command: "[0056]".into(),
            flag: Flag::Resp,
            index,
            payload: None,
            version,
            channel: None,
        }
    }

    #[test]
    fn test_first_occurrences_picks_earliest_per_group() {
        let trace = vec![
            record("AA", 1, 1, 5.0),
            record("AA", 1, 1, 2.0),
            record("BB", 1, 1, 1.0),
            record("AA", 1, 2, 3.0),
        ];
        let firsts = first_occurrences(trace.iter(), "AA");
        assert_eq!(firsts.len(), 2);
        assert_eq!(firsts[0].timestamp, 2.0);
        assert_eq!(firsts[0].version, 1);
        assert_eq!(firsts[1].timestamp, 3.0);
        assert_eq!(firsts[1].version, 2);
    }

    #[test]
    fn test_first_occurrences_tie_keeps_first_arrival() {
        let mut a = record("AA", 1, 1, 2.0);
        a.payload = Some(vec![0x01]);
        let b = record("AA", 1, 1, 2.0);
        let trace = vec![a, b];
        let firsts = first_occurrences(trace.iter(), "AA");
        assert_eq!(firsts.len(), 1);
        assert_eq!(firsts[0].payload, Some(vec![0x01]));
    }

    #[test]
    fn test_first_occurrences_other_macs_ignored() {
        let trace = vec![record("BB", 1, 1, 1.0)];
        assert!(first_occurrences(trace.iter(), "AA").is_empty());
    }
}
