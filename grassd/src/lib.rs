pub mod config;
pub mod daemon;
pub mod remote;
pub mod sync;
