// control_system/mod.rs
pub mod coordination;
pub mod intersection_agent;
pub mod pressure;
pub mod signal_controller;

pub use intersection_agent::{AgentCommand, IntersectionAgent, IntersectionHandle};
pub use signal_controller::{decide_green_time, ControllerState, DecisionBranch, SignalController};
