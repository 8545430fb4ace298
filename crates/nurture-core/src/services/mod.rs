//! Operations the CLI calls, one module per resource.

pub mod config;
pub mod enrollment;
pub mod flow;
