//! Library half of the `convoke` binary: assembling the tool registry from
//! configuration and the minimal turn loop that drives an adapter.

pub mod session;
pub mod workspace;

pub use session::{Outcome, Session};
pub use workspace::{file_access, registry};
