//! Long-lived service facades shared across hosts

mod local_store;

pub use local_store::LocalStore;
