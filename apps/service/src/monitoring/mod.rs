/// Prober: HTTPS reachability and TLS certificate checks for one domain.
pub mod certificate;
pub mod checker;
pub mod executor;
pub mod types;
pub mod validation;

pub use executor::{Probe, Prober};
pub use types::{ProbeError, Verdict, VerdictStatus};
