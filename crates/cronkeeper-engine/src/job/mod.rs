//! Job model and persistence.

mod definition;
mod store;

pub use definition::*;
pub use store::{FileJobStore, JobStore, MemoryJobStore};
