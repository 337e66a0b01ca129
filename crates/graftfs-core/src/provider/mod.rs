//! Reference backing stores: an in-memory store and the local disk.

pub mod local;
pub mod ram;

pub use local::{LocalAdapter, LocalProvider};
pub use ram::{RamAdapter, RamProvider, RamStore};
