use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging defaults, TOML, environment
    /// variables (`APP_` prefix, `__` for nesting), and JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config")
    }

    /// Same as [`ConfigLoader::load`] with an explicit config directory.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_from(dir: impl AsRef<Path>) -> Result<AppConfig> {
        let dir = dir.as_ref();
        let config: AppConfig = Self::figment(dir).extract()?;
        tracing::debug!(dir = %dir.display(), exchange = %config.exchange, "configuration loaded");
        Ok(config)
    }

    /// Loads application configuration with a specific profile overlay
    /// (`config/Config.{profile}.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        let dir = Path::new("config");
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(dir.join("Config.toml")))
            .merge(Toml::file(dir.join(format!("Config.{profile}.toml"))))
            .merge(Env::prefixed("APP_").split("__"))
            .join(Json::file(dir.join("Config.json")))
            .extract()?;

        Ok(config)
    }

    fn figment(dir: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(dir.join("Config.toml")))
            .merge(Env::prefixed("APP_").split("__"))
            .join(Json::file(dir.join("Config.json")))
    }
}
