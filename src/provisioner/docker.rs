//! Provisioner backed by the `docker` CLI.

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;

use crate::error::InstanceError;
use crate::opts::{Opts, SslMode};

use super::Provisioner;

/// Logged once by the temporary server that runs init scripts and once by the real one.
const READY_LINE: &str = "database system is ready to accept connections";
const READY_OCCURRENCES: usize = 2;

const CONTAINER_PORT: &str = "5432/tcp";
const INIT_SCRIPT_TARGET: &str = "/docker-entrypoint-initdb.d/init-script.sql";

/// How [`DockerProvisioner`] starts containers.
#[derive(Debug, Clone)]
pub struct DockerOptions {
    /// Docker executable.
    ///
    /// Default: `"docker"`
    pub program: String,

    /// Image to run.
    ///
    /// Default: `"postgres:14.8-alpine"`
    pub image: String,

    /// Superuser created by the image (`POSTGRES_USER`); also the database name.
    ///
    /// Default: `"dev"`
    pub user: String,

    /// Password of `user` (`POSTGRES_PASSWORD`).
    ///
    /// Default: `"dev"`
    pub password: String,

    /// SQL script mounted into `/docker-entrypoint-initdb.d/`. Skipped when
    /// the file does not exist.
    ///
    /// Default: `Some("init-script.sql")`
    pub init_script: Option<PathBuf>,

    /// Upper bound on waiting for the ready line.
    ///
    /// Default: `20s`
    pub startup_timeout: Duration,

    /// Interval between `docker logs` checks while waiting.
    ///
    /// Default: `250ms`
    pub log_poll_interval: Duration,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            image: "postgres:14.8-alpine".to_string(),
            user: "dev".to_string(),
            password: "dev".to_string(),
            init_script: Some(PathBuf::from("init-script.sql")),
            startup_timeout: Duration::from_secs(20),
            log_poll_interval: Duration::from_millis(250),
        }
    }
}

/// A running container.
#[derive(Debug)]
pub struct Container {
    id: String,
}

impl Container {
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Runs each instance as a throwaway PostgreSQL container with a random host port.
#[derive(Debug, Clone)]
pub struct DockerProvisioner {
    options: DockerOptions,
}

impl DockerProvisioner {
    pub fn new(options: DockerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DockerOptions {
        &self.options
    }

    async fn docker(&self, args: &[&str]) -> Result<Output, InstanceError> {
        let output = Command::new(&self.options.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| InstanceError::Spawn {
                program: self.options.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(InstanceError::Command {
                command: format!("{} {}", self.options.program, args.first().unwrap_or(&"")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    fn run_args(&self, mount: Option<String>) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "-p".to_string(),
            CONTAINER_PORT.to_string(),
            "-e".to_string(),
            format!("POSTGRES_USER={}", self.options.user),
            "-e".to_string(),
            format!("POSTGRES_PASSWORD={}", self.options.password),
        ];
        if let Some(mount) = mount {
            args.push("-v".to_string());
            args.push(mount);
        }
        args.push(self.options.image.clone());
        args
    }

    /// `host:container[:ro]` bind mount for the seed script, if it exists.
    fn init_script_mount(&self) -> Option<String> {
        let script = self.options.init_script.as_deref()?;
        match std::path::absolute(script) {
            Ok(path) if path.is_file() => {
                Some(format!("{}:{}:ro", path.display(), INIT_SCRIPT_TARGET))
            }
            _ => {
                tracing::debug!(script = %script.display(), "init script not found, skipping mount");
                None
            }
        }
    }

    async fn wait_ready(&self, id: &str) -> Result<(), InstanceError> {
        loop {
            let output = self.docker(&["logs", id]).await?;
            // The server logs to stderr; `docker logs` replays both streams.
            let logs = [
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            ];
            if count_ready_lines(&logs) >= READY_OCCURRENCES {
                return Ok(());
            }
            tokio::time::sleep(self.options.log_poll_interval).await;
        }
    }

    async fn remove(&self, id: &str) -> Result<(), InstanceError> {
        self.docker(&["rm", "-f", "-v", id]).await.map(|_| ())
    }
}

impl Provisioner for DockerProvisioner {
    type Instance = Container;

    async fn provision(&self) -> Result<Container, InstanceError> {
        let args = self.run_args(self.init_script_mount());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.docker(&args).await?;

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(InstanceError::Other(
                "docker run printed no container id".into(),
            ));
        }
        tracing::debug!(instance = %id, image = %self.options.image, "container started");

        let timeout = self.options.startup_timeout;
        let ready = match tokio::time::timeout(timeout, self.wait_ready(&id)).await {
            Ok(result) => result,
            Err(_) => Err(InstanceError::NotReady {
                id: id.clone(),
                timeout,
            }),
        };

        if let Err(err) = ready {
            if let Err(rm_err) = self.remove(&id).await {
                tracing::warn!(instance = %id, error = %rm_err, "failed to remove unready container");
            }
            return Err(err);
        }

        tracing::info!(instance = %id, "container ready");
        Ok(Container { id })
    }

    async fn endpoint(&self, instance: &Container) -> Result<Opts, InstanceError> {
        let output = self
            .docker(&["port", &instance.id, CONTAINER_PORT])
            .await
            .map_err(|e| InstanceError::Endpoint(e.to_string()))?;
        let (host, port) = parse_port_mapping(&String::from_utf8_lossy(&output.stdout))?;

        Ok(Opts {
            host,
            port,
            user: self.options.user.clone(),
            password: Some(self.options.password.clone()),
            database: Some(self.options.user.clone()),
            ssl_mode: SslMode::Disable,
            ..Opts::default()
        })
    }

    async fn terminate(&self, instance: Container) -> Result<(), InstanceError> {
        self.remove(&instance.id).await?;
        tracing::debug!(instance = %instance.id, "container removed");
        Ok(())
    }
}

fn count_ready_lines(logs: &[impl AsRef<str>]) -> usize {
    logs.iter()
        .map(|log| log.as_ref().matches(READY_LINE).count())
        .sum()
}

/// Parse `docker port` output (`0.0.0.0:49153`, `[::]:49153`, one per line).
///
/// Wildcard bind addresses resolve to the loopback address.
fn parse_port_mapping(output: &str) -> Result<(String, u16), InstanceError> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| InstanceError::Endpoint("no port mapping for 5432/tcp".into()))?;

    let (host, port) = line
        .rsplit_once(':')
        .ok_or_else(|| InstanceError::Endpoint(format!("unrecognized port mapping: {line}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| InstanceError::Endpoint(format!("invalid mapped port: {port}")))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = match host {
        "" | "0.0.0.0" | "::" => "127.0.0.1",
        other => other,
    };
    Ok((host.to_string(), port))
}
