//! # Meshprobe - Passive analysis of Trickle-based wireless mesh networks
//!
//! This library reconstructs the behavior of a Trickle-based mesh from a
//! log of overheard packets, without any cooperation from the mesh nodes
//! themselves. Given a chronological trace of observed transmissions and
//! a static site descriptor mapping physical addresses to device
//! identities, it derives:
//!
//! - **Topology**: which node pairs can hear each other directly,
//!   inferred from rebroadcast timing inside the first Trickle interval
//! - **Message delivery rate**: what fraction of a source's messages
//!   provably or probabilistically reached a destination, combining
//!   direct acknowledgments, observed rebroadcasts, and
//!   redundancy-suppression inference
//! - **Latency**: the empirical propagation delay distribution between
//!   two nodes, plus a closed-form Trickle model for cross-validation
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `trace`: packet record model, timestamp parsing, CSV trace
//!   ingestion and the snapshot/rotation trace store
//! - `site`: read-only device registry loaded from a site descriptor
//! - `graph`: undirected topology graph with shortest-path and
//!   common-neighbor queries
//! - `analysis`: the inference engines (topology, delivery rate,
//!   latency) and report generation
//! - `config`: engine tunables with protocol defaults and validation
//! - `session`: shared-state ownership and periodic batch scheduling
//!
//! Analyses are batch computations: every pass reprocesses the full
//! accumulated trace from scratch, so rerunning on an unchanged trace
//! yields identical results. Sample-size and no-path conditions are
//! ordinary result states; unexpected pipeline faults degrade to
//! zero-valued results rather than propagating, so a periodic batch loop
//! never dies mid-session.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use meshprobe::config::AnalysisConfig;
//! use meshprobe::session::AnalysisSession;
//! use meshprobe::site::DeviceRegistry;
//! use meshprobe::trace::parse_trace_file;
//!
//! let registry = DeviceRegistry::load(std::path::Path::new(".auth/site.json"))?;
//! let session = AnalysisSession::new(registry, AnalysisConfig::default());
//!
//! let records = parse_trace_file(std::path::Path::new(".results/discovery.csv"))?;
//! session.trace().extend(records);
//!
//! let (connections, labels) = session.find_connections();
//! println!("{} direct connections, {} participants", connections.edge_count(), labels.len());
//!
//! let result = session.compute_mdr("AA:BB:CC:DD:EE:FF:00", "11:22:33:44:55:66:77");
//! println!("MDR: {:?}", result.mdr);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! The library uses `color_eyre` for error reporting with context on
//! fallible IO paths, and typed `thiserror` enums where callers need to
//! match on the failure (timestamp parsing, configuration validation).

pub mod analysis;
pub mod config;
pub mod graph;
pub mod session;
pub mod site;
pub mod trace;
