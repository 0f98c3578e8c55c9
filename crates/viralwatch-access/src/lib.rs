//! Quota-aware access control for outbound collector calls.
//!
//! [`AccessCoordinator`] tracks per-credential budgets for each source,
//! rotates API keys and proxies, and backs off after blocks and network
//! failures. [`run_guarded`] is the async lane collectors call through.

pub mod backoff;
pub mod budget;
pub mod coordinator;
pub mod error;
pub mod lane;
pub mod policy;

pub use budget::{AccessBudget, Credential, CredentialKind, CredentialStatus};
pub use coordinator::{AccessCoordinator, Acquisition, Grant, Outcome, OutcomeAction, WaitReason};
pub use error::AccessError;
pub use lane::{run_guarded, ClassifyOutcome, LaneError};
pub use policy::{AccessPolicy, SourcePolicy};
