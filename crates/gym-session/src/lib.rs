//! Session layer for the gym member API
//!
//! Wraps an `ApiClient` with the operations the application performs:
//!
//! - `SessionFacade`: login, register, profile lookup, session checks
//! - `CheckRepository`: check-in/out, occupancy and inside-facility status
//! - `HeartRateRepository`: heart-rate samples per member
//! - `spawn_occupancy_poller`: background occupancy refresh for display
//!
//! Input is validated here, before anything reaches the network.

pub mod checks;
pub mod heart_rate;
pub mod model;
pub mod occupancy;
pub mod session;
pub mod validation;

pub use checks::CheckRepository;
pub use heart_rate::HeartRateRepository;
pub use model::{AuthSession, HeartRate, Membership, RegisterData, Role, Status, User};
pub use occupancy::{DEFAULT_POLL_INTERVAL, spawn_occupancy_poller};
pub use session::SessionFacade;
