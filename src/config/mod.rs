mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, LoggingSettings, ServerSettings, Settings};

/// Prefix for environment overrides, e.g. `PUBWIRE_SERVER__PORT=1884`.
pub const ENV_PREFIX: &str = "PUBWIRE";

/// Loads the configuration from `config/default` and environment variables,
/// merged over the built-in defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`] but reads the file source from `path` (extension
/// optional; the file itself is optional).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_with_defaults())
}
