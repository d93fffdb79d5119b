pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod geometry;
pub mod meta;
pub mod palette;
pub mod render;
pub mod session;
pub mod source;
pub mod state;
pub mod tasks;
