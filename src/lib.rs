pub mod config;
pub mod db;
pub mod model;
pub mod normalize;
pub mod notion;
pub mod server;
pub mod status;
pub mod sync;
