//! Passive mesh analysis CLI.
//!
//! Analyzes an overheard-packet trace against a site descriptor:
//! topology inference, message delivery rate, and propagation latency.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};

use meshprobe::analysis::report::{
    self, FullAnalysisReport, LatencySummary, ReportMetadata, TopologySummary,
};
use meshprobe::analysis::theoretical_latency;
use meshprobe::config::{self, AnalysisConfig};
use meshprobe::session::AnalysisSession;
use meshprobe::site::DeviceRegistry;
use meshprobe::trace::parse_trace_file;

#[derive(Parser)]
#[command(name = "mesh-analyzer")]
#[command(about = "Passive topology, delivery and latency analysis for Trickle meshes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the packet trace CSV
    #[arg(short, long, default_value = ".results/discovery.csv")]
    trace: PathBuf,

    /// Path to the site descriptor JSON
    #[arg(short, long)]
    site: PathBuf,

    /// Optional analysis configuration YAML
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for reports
    #[arg(short, long, default_value = "analysis_output")]
    output: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Infer the mesh topology from rebroadcast timing
    Topology,

    /// Compute the message delivery rate for one node pair
    Mdr {
        /// Source address (colon-form MAC)
        #[arg(long)]
        source: String,

        /// Destination address (colon-form MAC)
        #[arg(long)]
        destination: String,
    },

    /// Compute the propagation latency distribution for one node pair
    Latency {
        /// Source address (colon-form MAC)
        #[arg(long)]
        source: String,

        /// Destination address (colon-form MAC)
        #[arg(long)]
        destination: String,
    },

    /// Run topology plus delivery and latency for one node pair
    Full {
        #[arg(long)]
        source: String,

        #[arg(long)]
        destination: String,
    },

    /// Show trace and site summary statistics
    Summary,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    // Set thread pool size
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let analysis_config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => AnalysisConfig::default(),
    };

    log::info!("Loading site descriptor {}...", cli.site.display());
    let registry = DeviceRegistry::load(&cli.site)?;

    log::info!("Loading trace {}...", cli.trace.display());
    let records = parse_trace_file(&cli.trace)?;
    let total_records = records.len();
    log::info!("Loaded {} records, {} known devices", total_records, registry.len());

    let session = AnalysisSession::new(registry, analysis_config);
    session.trace().extend(records);

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("Failed to create output directory: {}", cli.output.display()))?;

    match &cli.command {
        Commands::Topology => {
            let (connections, labels) = session.find_connections();
            let report = FullAnalysisReport {
                metadata: metadata(&cli, &session, total_records),
                topology: Some(TopologySummary::new(&connections, &labels)),
                delivery: Vec::new(),
                latency: None,
            };
            report::generate_json_report(&report, &cli.output.join("topology_report.json"))?;
            report::generate_text_report(&report, &cli.output.join("topology_report.txt"))?;
            report::print_summary(&report);
        }
        Commands::Mdr {
            source,
            destination,
        } => {
            // Delivery detection needs the destination's neighborhood.
            session.find_connections();
            let result = session.compute_mdr(source, destination);
            let report = FullAnalysisReport {
                metadata: metadata(&cli, &session, total_records),
                topology: None,
                delivery: vec![result],
                latency: None,
            };
            report::generate_json_report(&report, &cli.output.join("mdr_report.json"))?;
            report::generate_text_report(&report, &cli.output.join("mdr_report.txt"))?;
            report::print_summary(&report);
        }
        Commands::Latency {
            source,
            destination,
        } => {
            session.find_connections();
            let latency = latency_summary(&session, source, destination);
            let report = FullAnalysisReport {
                metadata: metadata(&cli, &session, total_records),
                topology: None,
                delivery: Vec::new(),
                latency: Some(latency),
            };
            report::generate_json_report(&report, &cli.output.join("latency_report.json"))?;
            report::generate_text_report(&report, &cli.output.join("latency_report.txt"))?;
            report::print_summary(&report);
        }
        Commands::Full {
            source,
            destination,
        } => {
            let (connections, labels) = session.find_connections();
            let delivery = session.compute_mdr(source, destination);
            let latency = latency_summary(&session, source, destination);
            let report = FullAnalysisReport {
                metadata: metadata(&cli, &session, total_records),
                topology: Some(TopologySummary::new(&connections, &labels)),
                delivery: vec![delivery],
                latency: Some(latency),
            };
            report::generate_json_report(&report, &cli.output.join("full_report.json"))?;
            report::generate_text_report(&report, &cli.output.join("report.txt"))?;
            report::print_summary(&report);
        }
        Commands::Summary => {
            println!("\n=== MESHPROBE DATA SUMMARY ===\n");
            println!("Trace: {}", cli.trace.display());
            println!("Site: {}", cli.site.display());
            println!();
            println!("Records: {}", total_records);
            println!("Registered devices: {}", session.registry().len());
            println!(
                "Stimulation indices: {:?}",
                session.registry().stimulation_indices()
            );
            println!();
        }
    }

    log::info!("Analysis complete. Reports written to {}", cli.output.display());

    Ok(())
}

/// Empirical latency plus the theoretical figure over the inferred
/// shortest path, when one exists.
fn latency_summary(session: &AnalysisSession, source: &str, destination: &str) -> LatencySummary {
    let report = session.compute_latency(source, destination);

    let labels = session.labels();
    let graph = session.graph();
    let path = labels
        .label_of(source)
        .zip(labels.label_of(destination))
        .and_then(|(from, to)| graph.shortest_path(from, to));

    let theoretical_ms = path.as_ref().map(|path| {
        let fanout = graph.hop_fanout(path);
        theoretical_latency(path, &fanout, session.config().trickle.i_min_ms)
    });

    LatencySummary {
        source: source.to_string(),
        destination: destination.to_string(),
        report,
        shortest_path: path,
        theoretical_ms,
    }
}

fn metadata(cli: &Cli, session: &AnalysisSession, total_records: usize) -> ReportMetadata {
    ReportMetadata::new(
        &cli.trace.display().to_string(),
        &cli.site.display().to_string(),
        total_records,
        session.batches_run(),
    )
}
