//! Sliding-window admission control and state management.

mod clock;
mod key;
mod limiter;
mod policy;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{client_origin, IdentityKey, UNKNOWN_IDENTITY};
pub use limiter::{
    AdmissionController, AdmissionControllerBuilder, AdmissionResult, AdmissionStats,
    DEFAULT_RETENTION,
};
pub use policy::{PolicyTable, Preset, WindowPolicy};
pub use store::{InMemoryStore, RequestLogStore, SweepReport, WindowSnapshot};
pub use sweeper::{Sweeper, SweeperHandle, DEFAULT_SWEEP_INTERVAL};
