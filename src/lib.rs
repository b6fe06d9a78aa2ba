// Appointment rebooking bot: watches a scheduling portal for earlier slots than the one held
// and rebooks automatically when a sufficiently better date shows up.

pub mod availability;
pub mod backoff;
pub mod config;
pub mod dates;
pub mod logging;
pub mod polling;
pub mod portal;

// Re-export key types for convenience
pub use availability::{AvailabilityDecision, AvailabilityEngine};
pub use backoff::{failure_backoff_delay, BackoffPolicy};
pub use config::{Config, ConfigError};
pub use dates::{CalendarDate, DateError};
pub use polling::{CycleOutcome, LoopSettings, PollingLoop, PollingState};
pub use portal::{Portal, PortalError, SessionClient, SessionContext};
