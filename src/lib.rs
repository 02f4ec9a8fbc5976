pub mod chat;
pub mod constants;
pub mod economy;
pub mod engine;
pub mod loot;
pub mod persist;
pub mod rng;
pub mod round;
pub mod server_protocol;
pub mod server_utils;
pub mod state;
pub mod types;
pub mod waves;
pub mod world;
