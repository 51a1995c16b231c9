//! # Package Auto-Conversion
//!
//! When the prestations on a fiche navette cover a predefined package, the
//! individual items are replaced by one package item at the package price.
//!
//! - [`preparer`] decides whether and how to convert (read-only)
//! - [`executor`] performs the replacement in one transaction
//! - [`job`] runs the two from the background job runner
//! - [`totals`] holds the money arithmetic shared with the item observer

pub mod executor;
pub mod job;
pub mod preparer;
pub mod totals;

pub use executor::{ConversionExecutor, ConversionOutcome};
pub use job::{ConversionJobPayload, PackageConversionJob};
pub use preparer::{evaluate, ConversionDecision, ConversionPreparer, EvaluationInput, ItemToRemove};
pub use totals::{FloorPolicy, RecalculationStrategy, TotalAdjustment};
