// src/config/mod.rs
pub mod engine;

pub use engine::{load_default, load_from, EngineConfig, ValidationMode};
