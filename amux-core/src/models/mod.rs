pub mod config;
pub mod error;
pub mod params;
pub mod poll;
pub mod state;
