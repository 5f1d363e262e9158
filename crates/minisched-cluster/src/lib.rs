//! Minisched Cluster - In-process cluster state store
//!
//! This crate provides:
//! - Pod and node storage with create/update/delete
//! - A broadcast watch bus publishing every mutation
//! - Node listing and pod binding for the scheduler

pub mod event_bus;
pub mod store;

pub use event_bus::EventBusConfig;
pub use store::ClusterStore;
