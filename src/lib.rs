//! Rule-driven data loss prevention for plain text, key/value maps, and JSON.
//!
//! The engine owns a set of compiled detectors (one per rule) and a set of
//! mask workers (one per mask rule). Detection walks the input, applies
//! per-rule filters and algorithmic verifiers, and emits findings with exact
//! byte offsets; de-identification splices each finding's masked form back
//! into the input.
//!
//! High-level flow (plain text):
//! 1) Split the input into newline-delimited blocks.
//! 2) Normalize each block in place (escape unquoting, wide-char folding);
//!    both transforms preserve length so offsets stay meaningful.
//! 3) Run value rules over the block bytes and key/value rules over tokens
//!    extracted from `k:v`-shaped fragments.
//! 4) Merge the two result streams into a non-overlapping, deterministically
//!    ordered list and attach masked text per rule.
//!
//! Maps are scanned pairwise; JSON documents are projected into a flat
//! `path -> value` map, scanned as key/value input, and reconstructed with
//! masked leaves.
//!
//! An [`Engine`] is a single-producer object: scanning takes `&self`, every
//! reconfiguration takes `&mut self`. Construct one engine per thread.
//!
//! ```no_run
//! use dataveil::Engine;
//!
//! let mut engine = Engine::new();
//! engine.apply_config_default()?;
//! let (masked, results) = engine.de_identify("my phone is 18612341234")?;
//! assert_eq!(masked, "my phone is 186******34");
//! assert_eq!(results.len(), 1);
//! # Ok::<(), dataveil::DlpError>(())
//! ```

pub mod api;
pub mod config;
mod detector;
pub mod engine;
pub mod errors;
mod mask;

pub use api::{DetectResult, KVItem, ResultType, MAX_CALL_DEPTH, MAX_INPUT, MAX_ITEM, MAX_LOG_ITEM};
pub use engine::{Engine, FieldVisitor, LogProcessor, MaskTagged};
pub use errors::DlpError;

/// Crate version reported by [`Engine::version`].
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
