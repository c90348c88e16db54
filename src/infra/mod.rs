//! Runtime bootstrap: settings plus telemetry.

pub mod error;
pub mod telemetry;

use crate::config::{self, LoadOptions, Settings};

use self::error::InfraError;

/// Load settings and install the tracing subscriber they describe.
pub fn bootstrap(options: &LoadOptions) -> Result<Settings, InfraError> {
    let settings = config::load(options)?;
    telemetry::init(&settings.logging)?;
    Ok(settings)
}
