//! Symptom triage backed by a language model.
//!
//! A triage runs as its own tokio task under a timeout; the caller gets a
//! [`TriageJob`] it can await or cancel, and the result is always a tagged
//! [`TriageOutcome`].

pub mod job;
pub mod provider;
pub mod types;

pub use job::{TriageJob, TriageService};
pub use provider::{RigTriageProvider, TriageProvider, triage_prompt};
pub use types::{ManchesterLevel, TriageOutcome, TriageSuggestion};
