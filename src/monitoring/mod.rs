// monitoring/mod.rs
pub mod observer;
pub mod observer_agent;
pub mod report_chart;
pub mod report_log;

pub use observer::{AggregateMetrics, Observer};
pub use observer_agent::{ObserverAgent, ObserverHandle};
