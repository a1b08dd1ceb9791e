// simulation_engine/mod.rs
pub mod intersection;
pub mod queue_model;
pub mod simulation;
