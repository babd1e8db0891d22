pub mod config;
pub mod error;
pub mod flock;
pub mod hasher;
pub mod ids;
pub mod scheduler;
pub mod store;

pub use config::LsmConfig;
pub use error::{Error, Result};
pub use hasher::Hasher;
pub use store::lsm::{Document, LsmTree, Record};
pub use store::Store;
