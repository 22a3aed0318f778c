use std::net::SocketAddr;

use common_types::{EndpointConfig, StreamConfig};
use envconfig::Envconfig;
use serde::Deserialize;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3400")]
    pub address: SocketAddr,

    /// Downstream sink URL. Records are logged instead when unset.
    pub sink_url: Option<String>,

    #[envconfig(default = "5")]
    pub sink_timeout_seconds: u64,

    #[envconfig(default = "1000")]
    pub queue_capacity: usize,

    #[envconfig(default = "4")]
    pub webhook_workers: usize,

    #[envconfig(default = "3")]
    pub max_retries: u32,

    #[envconfig(default = "1000")]
    pub retry_base_ms: u64,

    #[envconfig(default = "30000")]
    pub retry_max_ms: u64,

    #[envconfig(default = "60")]
    pub rate_limit_window_seconds: u64,

    #[envconfig(default = "600")]
    pub rate_limit_sweep_seconds: u64,

    #[envconfig(default = "3600")]
    pub dedup_retention_seconds: u64,

    #[envconfig(default = "600")]
    pub dedup_sweep_seconds: u64,

    #[envconfig(default = "30")]
    pub supervisor_scan_seconds: u64,

    #[envconfig(default = "5")]
    pub max_stream_restarts: u32,

    #[envconfig(default = "10")]
    pub shutdown_grace_seconds: u64,

    #[envconfig(default = "1000")]
    pub dead_letter_capacity: usize,

    /// JSON file with initial endpoint and stream configs, applied at
    /// startup before the admin API takes over.
    pub seed_file: Option<String>,

    // Disabled when the crates are exercised as libraries in tests.
    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

/// Shape of the optional seed file.
#[derive(Deserialize, Default)]
pub struct SeedFile {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}
