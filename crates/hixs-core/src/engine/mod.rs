//! Download pipeline
//!
//! One worker task per transfer, a coordinator that owns the job table, and
//! the naming and progress helpers they share.

mod coordinator;
mod mime;
mod naming;
mod progress;
mod worker;

#[cfg(test)]
pub(crate) mod test_server;

pub use coordinator::*;
pub use mime::*;
pub use naming::*;
pub use progress::*;
pub use worker::*;
