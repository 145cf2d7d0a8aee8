//! Function runner
//!
//! A runner serves one [`Transform`] over the `run` streaming call. Each
//! accepted connection is one independent session; sessions share nothing but
//! the transform and the read-only TLS configuration.

pub mod exec;
pub mod server;
pub mod session;
pub mod transform;

pub use exec::Exec;
pub use server::RunnerServer;
pub use session::{serve_session, SessionLimits, SessionOutcome};
pub use transform::{
    transform_by_name, transform_for, Echo, SessionContext, Transform, Uppercase,
    BUILTIN_TRANSFORMS, EXEC_FUNCTION,
};
