use thiserror::Error;
use tile_hub::HubError;

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::telemetry::logging::InitError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tile service error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("realtime hub error: {0}")]
    Hub(#[from] HubError),
    #[error("logging initialization failed: {0}")]
    Logging(#[from] InitError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
