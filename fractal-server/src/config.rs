//! Process configuration, read from the environment with documented
//! defaults rather than a config file — this binary is meant to run one
//! per worker in a fleet, so flags live in the deployment manifest that
//! starts the process, not in a tracked file.

use std::time::Duration;

/// `FRACTAL_BIND_ADDRESS` — where the gRPC service listens.
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:50151";
/// `FRACTAL_HTTP_BIND_ADDRESS` — where the `/rpc` WebSocket bridge listens.
const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:8081";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub http_bind_address: String,
    /// Size of the local compute pool backing synchronous `map`/`sketch`
    /// work; defaults to `ComputePool::cpu_bound()`'s own default when
    /// unset, so `None` here means "let fractal-core pick."
    pub compute_pool_size: Option<usize>,
    pub separate_thread: bool,
    /// Per-call timeout; on expiry the subscription is disposed and the
    /// stream ends with a `Cancelled` error. `None` (the default) means
    /// unbounded, per spec.
    pub rpc_deadline: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_address: std::env::var("FRACTAL_BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
            http_bind_address: std::env::var("FRACTAL_HTTP_BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_HTTP_BIND_ADDRESS.to_string()),
            compute_pool_size: std::env::var("FRACTAL_COMPUTE_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok()),
            separate_thread: std::env::var("FRACTAL_SEPARATE_THREAD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            rpc_deadline: std::env::var("FRACTAL_RPC_DEADLINE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis),
        }
    }

    pub fn local_config(&self) -> fractal_core::LocalConfig {
        let pool = match self.compute_pool_size {
            Some(n) => fractal_stream::ComputePool::new(n),
            None => fractal_stream::ComputePool::cpu_bound(),
        };
        fractal_core::LocalConfig {
            pool,
            separate_thread: self.separate_thread,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable_when_env_is_unset() {
        std::env::remove_var("FRACTAL_BIND_ADDRESS");
        std::env::remove_var("FRACTAL_HTTP_BIND_ADDRESS");
        let config = Config::from_env();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.http_bind_address, DEFAULT_HTTP_BIND_ADDRESS);
        assert!(config.separate_thread);
    }
}
