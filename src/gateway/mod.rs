//! Authentication gateway: service, policy, HTTP surface

pub mod audit;
pub mod auth;
pub mod lockout;
mod router;
mod server;
pub mod service;
pub mod sweeper;
pub mod throttle;

pub use auth::{ClientSource, SourcePolicy, session_middleware};
pub use lockout::{AttemptGuard, LockoutTracker};
pub use router::{AppState, create_router};
pub use server::Gateway;
pub use service::{AuthGateway, AuthenticatedPrincipal, IssuedSession, RotationOutcome, SweepReport};
pub use sweeper::{SweeperHandle, spawn_sweeper};
pub use throttle::SourceThrottle;
