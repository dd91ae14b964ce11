//! Report generation for mesh analysis results.
//!
//! Generates both JSON and human-readable text reports.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::Serialize;

use super::types::{ConnectionSet, LatencyReport, MacLabelMap, MdrResult};

/// Report metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub analysis_timestamp: String,
    pub trace_path: String,
    pub site: String,
    pub total_records: usize,
    /// How many analysis batches fed the session so far.
    pub batches_run: u64,
}

impl ReportMetadata {
    pub fn new(trace_path: &str, site: &str, total_records: usize, batches_run: u64) -> Self {
        Self {
            analysis_timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            trace_path: trace_path.to_string(),
            site: site.to_string(),
            total_records,
            batches_run,
        }
    }
}

/// One labeled topology participant.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub mac: String,
    pub label: u32,
    pub title: String,
}

/// Topology pass output in reportable form.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySummary {
    pub nodes: Vec<NodeSummary>,
    pub edges: Vec<(String, String)>,
    pub unlinked: Vec<String>,
}

impl TopologySummary {
    pub fn new(connections: &ConnectionSet, labels: &MacLabelMap) -> Self {
        let nodes = labels
            .iter()
            .map(|(mac, entry)| NodeSummary {
                mac: mac.clone(),
                label: entry.label,
                title: entry.title.clone(),
            })
            .collect();
        Self {
            nodes,
            edges: connections.edges().cloned().collect(),
            unlinked: connections.unlinked().cloned().collect(),
        }
    }
}

/// Latency analysis output for one pair, empirical and theoretical.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub source: String,
    pub destination: String,
    pub report: LatencyReport,
    /// Shortest path the theoretical figure was computed over, if any.
    pub shortest_path: Option<Vec<u32>>,
    pub theoretical_ms: Option<f64>,
}

/// Complete analysis report.
#[derive(Debug, Clone, Serialize)]
pub struct FullAnalysisReport {
    pub metadata: ReportMetadata,
    pub topology: Option<TopologySummary>,
    pub delivery: Vec<MdrResult>,
    pub latency: Option<LatencySummary>,
}

/// Generate JSON report
pub fn generate_json_report(report: &FullAnalysisReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Generate human-readable text report
pub fn generate_text_report(report: &FullAnalysisReport, output_path: &Path) -> Result<()> {
    let mut lines: Vec<String> = Vec::new();

    lines.push("=".repeat(80));
    lines.push("                      MESHPROBE PASSIVE MESH ANALYSIS".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());

    lines.push(format!("Analysis Date: {}", report.metadata.analysis_timestamp));
    lines.push(format!("Trace: {}", report.metadata.trace_path));
    lines.push(format!("Site: {}", report.metadata.site));
    lines.push(format!("Records Analyzed: {}", report.metadata.total_records));
    lines.push(format!("Batches Run: {}", report.metadata.batches_run));
    lines.push(String::new());

    if let Some(ref topology) = report.topology {
        lines.push("=".repeat(80));
        lines.push("                            INFERRED TOPOLOGY".to_string());
        lines.push("=".repeat(80));
        lines.push(String::new());

        lines.push(format!(
            "Participants: {} ({} unlinked)",
            topology.nodes.len(),
            topology.unlinked.len()
        ));
        for node in &topology.nodes {
            lines.push(format!("  {:>3}. {} [{}]", node.label, node.title, node.mac));
        }
        lines.push(String::new());

        lines.push(format!("Direct connections: {}", topology.edges.len()));
        for (a, b) in &topology.edges {
            lines.push(format!("  {} <-> {}", a, b));
        }
        if !topology.unlinked.is_empty() {
            lines.push(String::new());
            lines.push(format!("Seen but unconnected: {}", topology.unlinked.join(", ")));
        }
        lines.push(String::new());
    }

    if !report.delivery.is_empty() {
        lines.push("=".repeat(80));
        lines.push("                         MESSAGE DELIVERY RATE".to_string());
        lines.push("=".repeat(80));
        lines.push(String::new());

        for result in &report.delivery {
            lines.push(format!("{} -> {}", result.source, result.destination));
            lines.push(format!(
                "  Messages: {}  Acknowledged: {}",
                result.source_messages, result.acks
            ));
            match result.mdr {
                Some(mdr) => {
                    lines.push(format!(
                        "  MDR: {:.1}%  Throughput: {:.2} msg/s",
                        mdr, result.throughput
                    ));
                }
                None => {
                    lines.push("  MDR: insufficient sample".to_string());
                }
            }
            lines.push(String::new());
        }
    }

    if let Some(ref latency) = report.latency {
        lines.push("=".repeat(80));
        lines.push("                          PROPAGATION LATENCY".to_string());
        lines.push("=".repeat(80));
        lines.push(String::new());

        lines.push(format!("{} -> {}", latency.source, latency.destination));
        lines.push(format!("  Samples: {}", latency.report.samples_ms.len()));
        if !latency.report.samples_ms.is_empty() {
            lines.push(format!("  Average: {:.1}ms", latency.report.avg_ms));
            lines.push(format!("  Maximum: {:.1}ms", latency.report.max_ms));
        }
        match (&latency.shortest_path, latency.theoretical_ms) {
            (Some(path), Some(theoretical)) => {
                let hops: Vec<String> = path.iter().map(|l| l.to_string()).collect();
                lines.push(format!("  Shortest path: {}", hops.join(" -> ")));
                lines.push(format!("  Theoretical: {:.1}ms", theoretical));
            }
            _ => {
                lines.push("  No path in inferred topology".to_string());
            }
        }
        lines.push(String::new());
    }

    lines.push("=".repeat(80));

    let content = lines.join("\n");
    fs::write(output_path, content)
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

/// Print a summary to stdout
pub fn print_summary(report: &FullAnalysisReport) {
    println!("\n=== MESH ANALYSIS SUMMARY ===\n");
    println!("Records: {}", report.metadata.total_records);

    if let Some(ref topology) = report.topology {
        println!("\nTopology:");
        println!("  Nodes: {}", topology.nodes.len());
        println!("  Edges: {}", topology.edges.len());
        println!("  Unlinked: {}", topology.unlinked.len());
    }

    for result in &report.delivery {
        println!("\nDelivery {} -> {}:", result.source, result.destination);
        match result.mdr {
            Some(mdr) => println!("  MDR: {:.1}% ({} of {} messages)", mdr, result.acks, result.source_messages),
            None => println!("  Insufficient sample ({} messages)", result.source_messages),
        }
    }

    if let Some(ref latency) = report.latency {
        println!("\nLatency {} -> {}:", latency.source, latency.destination);
        println!("  Samples: {}", latency.report.samples_ms.len());
        println!("  Average: {:.1}ms", latency.report.avg_ms);
        if let Some(theoretical) = latency.theoretical_ms {
            println!("  Theoretical: {:.1}ms", theoretical);
        }
    }

    println!();
}
