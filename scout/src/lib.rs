//! scout is a smart-contract discovery engine: starting from a set of seed
//! addresses it walks the on-chain reference graph breadth-first at a pinned
//! block, extracts typed facts about every contract it meets (proxy layout,
//! storage values, role holders, ...) and materializes a deterministic,
//! diff-able JSON artifact describing the whole system.
//!
//! The crate is organized around the pipeline: the [`engine`] drives the
//! traversal, the [`analyzer`] orchestrates one address, the [`proxy`]
//! detector and [`handlers`] read chain state through the provider
//! capability, the [`template`] service assigns reusable configuration by
//! source shape, and [`output`] shapes the final artifact.

/// the internal per-address result record
pub mod analysis;
/// per-address orchestration
pub mod analyzer;
/// field post-transform expressions
pub mod edit;
/// the breadth-first traversal core
pub mod engine;
/// error kinds recorded as data, and the fatal run error
pub mod errors;
/// typed per-field extractors
pub mod handlers;
/// artifact materialization
pub mod output;
/// proxy pattern detection
pub mod proxy;
/// template matching and merging
pub mod template;

/// contains the cli command
#[cfg(feature = "cmd")]
pub mod cmd;

pub use analysis::{Analysis, ContractAnalysis, EoaAnalysis};
pub use analyzer::AddressAnalyzer;
pub use engine::{DiscoveryEngine, DiscoveryOutcome};
pub use errors::{DiscoveryError, ErrorKind};
pub use output::DiscoveryOutput;
pub use proxy::{ProxyDetection, ProxyDetector};
pub use template::TemplateService;
