use std::time::Duration;

use genpod_comfyui::api::RequestTimeouts;
use genpod_comfyui::client::DEFAULT_RECEIVE_TIMEOUT;
use genpod_comfyui::probe::ProbeConfig;

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults matching a ComfyUI started locally with
/// `--listen --port 3001`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// ComfyUI host (default: `127.0.0.1`).
    pub comfy_host: String,
    /// ComfyUI port (default: `3001`).
    pub comfy_port: u16,
    /// Health probe budget and pacing.
    pub probe: ProbeConfig,
    /// Per-endpoint HTTP timeouts.
    pub timeouts: RequestTimeouts,
    /// Bound on a single event-channel receive (default: 10s).
    pub receive_timeout: Duration,
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            comfy_host: "127.0.0.1".to_string(),
            comfy_port: 3001,
            probe: ProbeConfig::default(),
            timeouts: RequestTimeouts::default(),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default     |
    /// |-----------------------------------|-------------|
    /// | `COMFY_HOST`                      | `127.0.0.1` |
    /// | `COMFY_PORT`                      | `3001`      |
    /// | `COMFY_API_AVAILABLE_MAX_RETRIES` | `180`       |
    /// | `COMFY_API_AVAILABLE_INTERVAL_MS` | `1000`      |
    /// | `COMFY_PROBE_TIMEOUT_SECS`        | `5`         |
    /// | `UPLOAD_TIMEOUT_SECS`             | `30`        |
    /// | `SUBMIT_TIMEOUT_SECS`             | `30`        |
    /// | `HISTORY_TIMEOUT_SECS`            | `30`        |
    /// | `FETCH_TIMEOUT_SECS`              | `60`        |
    /// | `WEBSOCKET_RECEIVE_TIMEOUT_SECS`  | `10`        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let comfy_host = lookup("COMFY_HOST")
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or(defaults.comfy_host);

        let comfy_port = parse_var(&lookup, "COMFY_PORT", "a port number")?
            .unwrap_or(defaults.comfy_port);

        let probe = ProbeConfig {
            max_attempts: parse_var(&lookup, "COMFY_API_AVAILABLE_MAX_RETRIES", "a u32")?
                .unwrap_or(defaults.probe.max_attempts),
            interval: millis_var(&lookup, "COMFY_API_AVAILABLE_INTERVAL_MS")?
                .unwrap_or(defaults.probe.interval),
            request_timeout: secs_var(&lookup, "COMFY_PROBE_TIMEOUT_SECS")?
                .unwrap_or(defaults.probe.request_timeout),
        };

        let timeouts = RequestTimeouts {
            upload: secs_var(&lookup, "UPLOAD_TIMEOUT_SECS")?.unwrap_or(defaults.timeouts.upload),
            submit: secs_var(&lookup, "SUBMIT_TIMEOUT_SECS")?.unwrap_or(defaults.timeouts.submit),
            history: secs_var(&lookup, "HISTORY_TIMEOUT_SECS")?
                .unwrap_or(defaults.timeouts.history),
            fetch: secs_var(&lookup, "FETCH_TIMEOUT_SECS")?.unwrap_or(defaults.timeouts.fetch),
        };

        let receive_timeout = secs_var(&lookup, "WEBSOCKET_RECEIVE_TIMEOUT_SECS")?
            .unwrap_or(defaults.receive_timeout);

        Ok(Self {
            comfy_host,
            comfy_port,
            probe,
            timeouts,
            receive_timeout,
        })
    }

    /// HTTP base URL of the ComfyUI instance, e.g. `http://127.0.0.1:3001`.
    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.comfy_host, self.comfy_port)
    }

    /// WebSocket base URL of the ComfyUI instance, e.g. `ws://127.0.0.1:3001`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.comfy_host, self.comfy_port)
    }

    /// Health endpoint polled before each job.
    pub fn health_url(&self) -> String {
        format!("{}/", self.api_url())
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, expected: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var,
                value,
                expected,
            }),
    }
}

fn secs_var<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var(lookup, var, "a number of seconds")?.map(Duration::from_secs))
}

fn millis_var<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var(lookup, var, "a number of milliseconds")?.map(Duration::from_millis))
}
