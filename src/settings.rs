//! Process settings: a YAML file overlaid with `PG_SANDBOX_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::manager::PoolConfig;
use crate::provisioner::DockerOptions;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_POOL_SIZE: usize = 4;

const ENV_PREFIX: &str = "PG_SANDBOX";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DockerSettings {
    pub image: String,
    pub user: String,
    pub password: String,
    #[serde(alias = "init_script")]
    pub init_script: PathBuf,
    #[serde(alias = "startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

impl Default for DockerSettings {
    fn default() -> Self {
        let options = DockerOptions::default();
        Self {
            image: options.image,
            user: options.user,
            password: options.password,
            init_script: PathBuf::from("init-script.sql"),
            startup_timeout_secs: options.startup_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Number of instances kept warm.
    #[serde(alias = "pool_size")]
    pub pool_size: usize,
    #[serde(alias = "poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// HTTP bind address.
    pub listen: String,
    /// Query run by `GET /query` without a `sql` parameter.
    #[serde(alias = "default_query")]
    pub default_query: String,
    /// Overall graceful-shutdown deadline. Shutdown waits for an in-flight
    /// provision, so this should exceed `docker.startup-timeout-secs`;
    /// a deadline hit mid-provision leaves that container running.
    #[serde(alias = "shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    pub docker: DockerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            poll_interval_ms: 20,
            listen: "0.0.0.0:8080".to_string(),
            default_query: "SELECT * FROM testdb".to_string(),
            shutdown_timeout_secs: 30,
            docker: DockerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path` and the environment.
    ///
    /// Never fails: a missing or malformed file is reported and the defaults
    /// apply, as does a pool size of zero.
    pub fn load(path: &Path) -> Self {
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "config file not found, applying defaults");
        }

        let file = File::from(path).format(FileFormat::Yaml).required(false);
        let env = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);

        match Self::build(Config::builder().add_source(file).add_source(env)) {
            Ok(settings) => settings.validated(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to load config, applying defaults");
                Self::default()
            }
        }
    }

    /// Parse settings from YAML text alone.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml)))
            .map(Self::validated)
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }

    fn validated(mut self) -> Self {
        if self.pool_size == 0 {
            tracing::warn!(default = DEFAULT_POOL_SIZE, "pool-size must be positive, applying default");
            self.pool_size = DEFAULT_POOL_SIZE;
        }
        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = Self::default().poll_interval_ms;
        }
        self
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            capacity: self.pool_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn docker_options(&self) -> DockerOptions {
        let init_script = Some(self.docker.init_script.clone())
            .filter(|path| !path.as_os_str().is_empty());
        DockerOptions {
            image: self.docker.image.clone(),
            user: self.docker.user.clone(),
            password: self.docker.password.clone(),
            init_script,
            startup_timeout: Duration::from_secs(self.docker.startup_timeout_secs),
            ..DockerOptions::default()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
