pub mod api;
pub mod config;
pub mod control_plane;
pub mod controller;
pub mod decode;
pub mod error;
pub mod probe;
pub mod progress;
pub mod sigv4;
pub mod state;
pub mod watchdog;

#[cfg(test)]
mod testing;
