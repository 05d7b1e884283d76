pub mod config;
pub mod custom_stations;
pub mod favorites;
pub mod platform;
pub mod protocol;
pub mod state;
pub mod stations;
pub mod store;
