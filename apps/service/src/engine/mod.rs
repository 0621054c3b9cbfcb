/// Status engine: state machine, incident bookkeeping, debounced alerting
/// and the pipeline that ties them to the store.
pub mod applier;
pub mod incidents;
pub mod notifier;
pub mod pipeline;

pub use applier::{Applied, Event, Transition, apply_verdict};
pub use notifier::{Evaluation, Notifier, Skip};
pub use pipeline::{ApplyOutcome, ResultPipeline};
