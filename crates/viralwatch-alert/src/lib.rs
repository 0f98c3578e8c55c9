//! Edge-triggered alerting with deterministic ids and notifier hand-off.

pub mod error;
pub mod evaluator;
pub mod notifier;

pub use error::AlertError;
pub use evaluator::{alert_id, AlertEvaluator, Dispatch};
pub use notifier::{ChannelResult, DeliveryReport, Fanout, LogNotifier, Notifier, WebhookNotifier};
