//! Ad and tracker blocking
//!
//! - A fixed pattern set compiled once at startup
//! - A synchronous interceptor consulted per network request
//! - A process-wide blocked-request counter

mod counter;
mod interceptor;
mod matcher;
mod patterns;

pub use counter::*;
pub use interceptor::*;
pub use matcher::*;
pub use patterns::*;
