//! Minisched Scheduler - plugin-driven pod scheduling
//!
//! This crate provides:
//! - The plugin traits (Filter, PreScore, Score, Permit) and per-attempt cycle state
//! - A three-tier scheduling queue with backoff and event-driven requeue
//! - The waiting-pod registry backing permit approval
//! - The scheduling loop that binds pods to nodes
//! - Example plugins (NodeUnschedulable, NodeResourcesFit, NodeNumber)

pub mod cycle_state;
pub mod error;
pub mod event_handler;
pub mod filter;
pub mod plugin;
pub mod queue;
pub mod scheduler;
pub mod score;
pub mod types;
pub mod waiting;

// Re-export commonly used types
pub use cycle_state::CycleState;
pub use error::{Result, SchedulerError};
pub use event_handler::EventHandler;
pub use filter::{NodeResourcesFit, NodeUnschedulable};
pub use plugin::{FilterPlugin, PermitPlugin, Plugin, PreScorePlugin, ScorePlugin};
pub use queue::{QueueConfig, QueueStats, SchedulingQueue};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use score::{default_plugins, NodeNumber};
pub use types::{Code, NodeScore, QueuedPodInfo, Status};
pub use waiting::{WaitingPod, WaitingPods};
