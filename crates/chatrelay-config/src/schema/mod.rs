//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod database;
mod generator;
mod logging;
mod server;

pub use database::*;
pub use generator::*;
pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatRelayConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub generator: GeneratorConfig,
    pub logging: LoggingConfig,
}
