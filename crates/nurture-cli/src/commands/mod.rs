pub mod config;
pub mod engine;
pub mod enrollment;
pub mod event;
pub mod flow;
pub mod shared;
pub mod trigger;
pub mod user;
