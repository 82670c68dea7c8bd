//! Tracked task spawning with cancellation support

pub mod task_management;

pub use task_management::{TaskHandle, TaskManager, TaskStats};
