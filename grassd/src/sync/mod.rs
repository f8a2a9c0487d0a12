pub mod cache;
pub mod codec;
pub mod coordinator;
pub mod layout;
pub mod locks;
pub mod node;
pub mod paths;
pub mod process;
pub mod retry;
pub mod scheduler;
pub mod transfer;

#[cfg(test)]
mod test_support;

pub use coordinator::{ListEntry, SyncCoordinator, SyncError, SyncSettings};
