//! Process configuration: TOML file plus `ORCHESTRATOR_`-prefixed
//! environment overrides layered on top.

use orchestrator_core::{OrchestratorConfig as CoreConfig, Policy, RetentionConfig, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the REST/WebSocket API listens on.
    pub listen_addr: String,
    /// Address the Prometheus exporter listens on.
    pub metrics_addr: String,
    /// Whether the `/ws` upgrade route and periodic `network_status`
    /// broadcast are enabled at all.
    pub websocket_enabled: bool,
    /// How often a `network_status` frame is pushed to connected
    /// WebSocket clients.
    pub broadcast_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// One of round_robin, weighted_round_robin, least_connections,
    /// resource_aware, latency_optimized.
    pub policy: String,
    pub task_queue_soft_cap: Option<usize>,
    pub heartbeat_interval_secs: u64,
    pub failure_window_secs: i64,
    pub dispatch_timeout_secs: u64,
    pub no_eligible_backoff_secs: u64,
    pub starvation_rotate_after: u32,
    pub retention_hours: u64,
    pub retention_sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorNodeConfig {
    pub server: ServerConfig,
    pub orchestration: OrchestrationConfig,
    pub logging: LoggingConfig,
}

impl Default for OrchestratorNodeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "0.0.0.0:8080".to_string(),
                metrics_addr: "0.0.0.0:9090".to_string(),
                websocket_enabled: true,
                broadcast_interval_secs: 5,
            },
            orchestration: OrchestrationConfig {
                policy: "weighted_round_robin".to_string(),
                task_queue_soft_cap: None,
                heartbeat_interval_secs: 10,
                failure_window_secs: 120,
                dispatch_timeout_secs: 10,
                no_eligible_backoff_secs: 1,
                starvation_rotate_after: 5,
                retention_hours: 24,
                retention_sweep_interval_secs: 3600,
            },
            logging: LoggingConfig {
                filter: "orchestrator_node=info".to_string(),
            },
        }
    }
}

impl OrchestratorNodeConfig {
    /// Loads from `path` (a TOML file, extension omitted per the `config`
    /// crate's convention) layered under `ORCHESTRATOR_`-prefixed
    /// environment variables, falling back to [`Default`] if the file is
    /// absent.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("ORCHESTRATOR").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "server.listen_addr {} is not a valid socket address",
                self.server.listen_addr
            ));
        }
        if self.server.metrics_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "server.metrics_addr {} is not a valid socket address",
                self.server.metrics_addr
            ));
        }
        if self.orchestration.heartbeat_interval_secs == 0 {
            return Err("orchestration.heartbeat_interval_secs cannot be 0".to_string());
        }
        Ok(())
    }

    fn policy(&self) -> Policy {
        match self.orchestration.policy.as_str() {
            "round_robin" => Policy::RoundRobin,
            "weighted_round_robin" => Policy::WeightedRoundRobin,
            "least_connections" => Policy::LeastConnections,
            "resource_aware" => Policy::ResourceAware,
            "latency_optimized" => Policy::LatencyOptimized,
            other => {
                warn!(policy = other, "unknown load balancer policy, defaulting to weighted_round_robin");
                Policy::default()
            }
        }
    }

    /// Translates this process config into the `orchestrator-core`
    /// construction config.
    pub fn to_core_config(&self) -> CoreConfig {
        CoreConfig {
            policy: self.policy(),
            task_queue_soft_cap: self.orchestration.task_queue_soft_cap,
            heartbeat_interval: Duration::from_secs(self.orchestration.heartbeat_interval_secs),
            failure_window_secs: self.orchestration.failure_window_secs,
            scheduler: SchedulerConfig {
                no_eligible_backoff: Duration::from_secs(self.orchestration.no_eligible_backoff_secs),
                starvation_rotate_after: self.orchestration.starvation_rotate_after,
                ..SchedulerConfig::default()
            },
            retention: RetentionConfig {
                retention: Duration::from_secs(self.orchestration.retention_hours * 3600),
                sweep_interval: Duration::from_secs(self.orchestration.retention_sweep_interval_secs),
            },
            dispatch_timeout: Duration::from_secs(self.orchestration.dispatch_timeout_secs),
        }
    }
}
