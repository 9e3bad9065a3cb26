//! Connection options.

use std::time::Duration;

use url::Url;

use crate::error::Error;

/// SSL negotiation mode.
///
/// The client only speaks plaintext; `Prefer` asks the server first and
/// continues unencrypted when the server declines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't ask for SSL
    #[default]
    Disable,
    /// Ask for SSL, continue unencrypted if the server declines
    Prefer,
}

/// Connection options for one PostgreSQL instance.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `"localhost"`
    pub host: String,

    /// Port number.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Username for authentication.
    ///
    /// Default: `"postgres"`
    pub user: String,

    /// Database name. The server defaults it to the user name when absent.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `Some("pg-sandbox")`
    pub application_name: Option<String>,

    /// SSL negotiation mode.
    ///
    /// Default: `SslMode::Disable`
    pub ssl_mode: SslMode,

    /// Upper bound on establishing the TCP connection.
    ///
    /// Default: `10s`
    pub connect_timeout: Duration,

    /// Additional startup parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            database: None,
            password: None,
            application_name: Some("pg-sandbox".to_string()),
            ssl_mode: SslMode::Disable,
            connect_timeout: Duration::from_secs(10),
            params: Vec::new(),
        }
    }
}

impl Opts {
    /// Render as a `postgresql://` URL with the password masked.
    pub fn redacted_url(&self) -> String {
        let auth = match &self.password {
            Some(_) => format!("{}:***", self.user),
            None => self.user.clone(),
        };
        format!(
            "postgresql://{}@{}:{}/{}",
            auth,
            self.host,
            self.port,
            self.database.as_deref().unwrap_or("")
        )
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param=value&..]`
    ///
    /// Recognized query parameters:
    /// - `sslmode`: disable, prefer
    /// - `application_name`
    /// - `connect_timeout`: seconds (positive integer)
    ///
    /// Anything else is forwarded as a startup parameter.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'postgresql://', got '{}://'",
                url.scheme()
            )));
        }

        let defaults = Opts::default();
        let user = if url.username().is_empty() {
            defaults.user.clone()
        } else {
            url.username().to_string()
        };
        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user,
            password: url.password().map(|s| s.to_string()),
            database: url
                .path()
                .strip_prefix('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ..defaults
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" => {
                    opts.ssl_mode = match value.as_ref() {
                        "disable" => SslMode::Disable,
                        "prefer" | "allow" => SslMode::Prefer,
                        _ => {
                            return Err(Error::InvalidUsage(format!(
                                "Invalid sslmode: expected one of ['disable', 'prefer'], got {}",
                                value
                            )));
                        }
                    };
                }
                "application_name" => {
                    opts.application_name = Some(value.to_string());
                }
                "connect_timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        Error::InvalidUsage(format!("Invalid connect_timeout: {}", value))
                    })?;
                    opts.connect_timeout = Duration::from_secs(secs.max(1));
                }
                _ => {
                    opts.params.push((key.to_string(), value.to_string()));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}
