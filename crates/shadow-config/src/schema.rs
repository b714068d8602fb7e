// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    4000
}

fn default_socket_port() -> u16 {
    4001
}

fn default_client_url() -> String {
    "http://localhost:3000".into()
}

fn default_workspace_dir() -> String {
    "/tmp/shadow-workspaces".into()
}

fn default_namespace() -> String {
    "shadow-agents".into()
}

fn default_sidecar_port() -> u16 {
    8080
}

fn default_cleanup_delay_minutes() -> i64 {
    10
}

fn default_cleanup_sweep_secs() -> u64 {
    60
}

fn default_sandbox_ready_timeout_secs() -> u64 {
    300
}

fn default_max_tasks_per_user() -> u32 {
    0
}

/// Top-level configuration for the Shadow server.
///
/// Every field maps to an environment variable (see `loader::load`); the
/// deployment surface is env-driven so the same binary runs locally and in
/// the cluster without a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub kernel: KernelConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            github: GithubConfig::default(),
            sandbox: SandboxConfig::default(),
            kernel: KernelConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port for the HTTP API (webhook sink, health).
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Port for the task event socket surface.
    #[serde(default = "default_socket_port")]
    pub socket_port: u16,
    /// Frontend origin allowed by CORS and used in PR bodies.
    #[serde(default = "default_client_url")]
    pub client_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            socket_port: default_socket_port(),
            client_url: default_client_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GithubConfig {
    /// OAuth app client id used for token refresh.
    pub client_id: Option<String>,
    /// OAuth app client secret used for token refresh.
    pub client_secret: Option<String>,
    /// Shared secret for webhook signature verification.
    pub webhook_secret: Option<String>,
}

/// Where task workspaces live and how pods are provisioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Execution mode: `local` runs tools against a directory on this host,
    /// `remote` provisions a pod per task and talks to its sidecar.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Base directory for local-mode workspaces.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
    /// Kubernetes namespace for task pods.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// In-cluster API server host (e.g. `kubernetes.default.svc`).
    pub k8s_host: Option<String>,
    /// In-cluster API server port.
    pub k8s_port: Option<u16>,
    /// Bearer token for the API server (service-account token).
    pub k8s_token: Option<String>,
    /// Container image for the task VM.
    pub vm_image: Option<String>,
    /// CPU limit for the task container, e.g. `"2"`.
    pub vm_cpu_limit: Option<String>,
    /// Memory limit for the task container, e.g. `"4Gi"`.
    pub vm_memory_limit: Option<String>,
    /// Port the sidecar exposes the executor surface on.
    #[serde(default = "default_sidecar_port")]
    pub sidecar_port: u16,
    /// Outer deadline for pod readiness polling.
    #[serde(default = "default_sandbox_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            workspace_dir: default_workspace_dir(),
            namespace: default_namespace(),
            k8s_host: None,
            k8s_port: None,
            k8s_token: None,
            vm_image: None,
            vm_cpu_limit: None,
            vm_memory_limit: None,
            sidecar_port: default_sidecar_port(),
            ready_timeout_secs: default_sandbox_ready_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Local,
    Remote,
}

/// Kernel timing and policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Minutes after a terminal transition before the sandbox is torn down.
    #[serde(default = "default_cleanup_delay_minutes")]
    pub cleanup_delay_minutes: i64,
    /// Interval of the cleanup sweep.
    #[serde(default = "default_cleanup_sweep_secs")]
    pub cleanup_sweep_secs: u64,
    /// Open a draft PR automatically after a successful stream.
    #[serde(default = "default_true")]
    pub auto_pull_request: bool,
    /// Take a workspace checkpoint after each completed assistant turn.
    #[serde(default = "default_true")]
    pub checkpoints: bool,
    /// Per-user cap on live tasks; 0 disables the cap (development).
    #[serde(default = "default_max_tasks_per_user")]
    pub max_tasks_per_user: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cleanup_delay_minutes: default_cleanup_delay_minutes(),
            cleanup_sweep_secs: default_cleanup_sweep_secs(),
            auto_pull_request: true,
            checkpoints: true,
            max_tasks_per_user: default_max_tasks_per_user(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path; `:memory:` for tests.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "shadow.db".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
