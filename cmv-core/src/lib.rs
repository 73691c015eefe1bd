//! # cmv-core
//!
//! Core engine for cmv: git-like version control for AI coding-assistant
//! conversation transcripts stored as append-only JSONL.
//!
//! This library provides:
//! - Transcript discovery across the host assistant's per-project layout
//! - A streaming two-pass trimmer with byte-accounted metrics
//! - A single-pass content breakdown analyzer with token estimation
//! - A content-addressed snapshot store with branching and portable archives
//! - A prompt-cache cost impact model
//! - The auto-trim hook protocol
//!
//! ## Example
//!
//! ```rust,no_run
//! use cmv_core::{CreateSnapshotParams, Store, TrimOptions};
//!
//! let store = Store::new();
//! let (snapshot, warnings) = store
//!     .create_snapshot(&CreateSnapshotParams {
//!         name: "before-refactor".to_string(),
//!         ..Default::default()
//!     })
//!     .expect("failed to create snapshot");
//! for warning in &warnings {
//!     eprintln!("warning: {}", warning);
//! }
//!
//! let metrics = cmv_core::trim(
//!     &store.snapshot_session_file(&snapshot),
//!     std::path::Path::new("/tmp/trimmed.jsonl"),
//!     &TrimOptions::default(),
//! )
//! .expect("failed to trim");
//! println!("saved {} bytes", metrics.original_bytes - metrics.trimmed_bytes);
//! ```

// Re-export commonly used items at the crate root
pub use analyze::{analyze, SessionAnalysis, CONTEXT_LIMIT, SYSTEM_OVERHEAD_TOKENS};
pub use cache::{
    analyze_cache_impact, cache_impact, cache_impact_for_tokens, pricing_for, CacheImpactReport,
    ModelPricing, DEFAULT_CACHE_HIT_RATE, KNOWN_MODELS,
};
pub use config::Config;
pub use error::{Error, Result};
pub use hook::run_auto_trim_hook;
pub use store::{
    Branch, BranchOptions, BranchResult, CreateSnapshotParams, ImportOptions, ImportResult,
    Snapshot, SnapshotNode, Store,
};
pub use transcript::{SessionEntry, SessionFilter, TranscriptReader};
pub use trim::{trim, TrimMetrics, TrimOptions, DEFAULT_STUB_THRESHOLD};

// Public modules
pub mod analyze;
pub mod cache;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod hook;
pub mod host;
pub mod logging;
pub mod store;
pub mod transcript;
pub mod trim;
