use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::mcp::server::VersionMismatchPolicy;

const DEFAULT_FORWARD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ExecutorCommand {
    /// Splits a whitespace-separated command line. Returns `None` for blank input.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub executor_command: Option<ExecutorCommand>,
    pub forward_timeout: Option<Duration>,
    pub fetch_timeout: Duration,
    pub version_policy: VersionMismatchPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("FORWARD_TIMEOUT_SECS must be a non-negative integer")]
    InvalidForwardTimeout,
    #[error("FETCH_TIMEOUT_SECS must be a positive integer")]
    InvalidFetchTimeout,
    #[error("JSONRPC_VERSION_MISMATCH must be one of: drop, reject")]
    InvalidVersionPolicy,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = value("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = value("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let executor_command =
            value("TOOL_EXECUTOR_CMD").and_then(|line| ExecutorCommand::parse(&line));

        let forward_timeout_secs = value("FORWARD_TIMEOUT_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidForwardTimeout)
            })
            .transpose()?
            .unwrap_or(DEFAULT_FORWARD_TIMEOUT_SECS);
        let forward_timeout =
            (forward_timeout_secs > 0).then(|| Duration::from_secs(forward_timeout_secs));

        let fetch_timeout_secs = value("FETCH_TIMEOUT_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or(ConfigError::InvalidFetchTimeout)
            })
            .transpose()?
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);

        let version_policy = match value("JSONRPC_VERSION_MISMATCH")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("drop") => VersionMismatchPolicy::Drop,
            Some("reject") => VersionMismatchPolicy::Reject,
            Some(_) => return Err(ConfigError::InvalidVersionPolicy),
        };

        let config = Self {
            bind_addr,
            bind_port,
            executor_command,
            forward_timeout,
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            version_policy,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
