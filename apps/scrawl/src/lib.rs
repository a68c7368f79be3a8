pub mod cache;
pub mod camera;
pub mod config;
pub mod edit;
pub mod gateway;
pub mod realtime;
pub mod session;
pub mod telemetry;
pub mod terminal;
pub mod viewport;
