// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tracing::debug;

use crate::{Config, DatabaseConfig, ExecutionMode, GithubConfig, KernelConfig, SandboxConfig,
            ServerConfig};

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env(name).and_then(|v| v.parse().ok())
}

/// Build the configuration from the process environment.
///
/// Every knob has a default suitable for local development; production
/// deployments set the full surface. Unknown or malformed values fall back
/// to defaults rather than failing startup — the server logs what it loaded.
pub fn load() -> anyhow::Result<Config> {
    let server = ServerConfig {
        api_port: env_parse("SHADOW_API_PORT").unwrap_or(4000),
        socket_port: env_parse("SHADOW_SOCKET_PORT").unwrap_or(4001),
        client_url: env("SHADOW_CLIENT_URL").unwrap_or_else(|| "http://localhost:3000".into()),
    };

    let github = GithubConfig {
        client_id: env("GITHUB_CLIENT_ID"),
        client_secret: env("GITHUB_CLIENT_SECRET"),
        webhook_secret: env("GITHUB_WEBHOOK_SECRET"),
    };

    let mode = match env("SHADOW_AGENT_MODE").as_deref() {
        Some("remote") => ExecutionMode::Remote,
        _ => ExecutionMode::Local,
    };
    let sandbox = SandboxConfig {
        mode,
        workspace_dir: env("SHADOW_WORKSPACE_DIR")
            .unwrap_or_else(|| "/tmp/shadow-workspaces".into()),
        namespace: env("SHADOW_K8S_NAMESPACE").unwrap_or_else(|| "shadow-agents".into()),
        k8s_host: env("KUBERNETES_SERVICE_HOST"),
        k8s_port: env_parse("KUBERNETES_SERVICE_PORT"),
        k8s_token: env("SHADOW_K8S_TOKEN"),
        vm_image: env("SHADOW_VM_IMAGE"),
        vm_cpu_limit: env("SHADOW_VM_CPU_LIMIT"),
        vm_memory_limit: env("SHADOW_VM_MEMORY_LIMIT"),
        sidecar_port: env_parse("SHADOW_SIDECAR_PORT").unwrap_or(8080),
        ready_timeout_secs: env_parse("SHADOW_SANDBOX_READY_TIMEOUT_SECS").unwrap_or(300),
    };

    let kernel = KernelConfig {
        cleanup_delay_minutes: env_parse("SHADOW_CLEANUP_DELAY_MINUTES").unwrap_or(10),
        cleanup_sweep_secs: env_parse("SHADOW_CLEANUP_SWEEP_SECS").unwrap_or(60),
        auto_pull_request: env("SHADOW_AUTO_PR").map(|v| v != "false").unwrap_or(true),
        checkpoints: env("SHADOW_CHECKPOINTS").map(|v| v != "false").unwrap_or(true),
        max_tasks_per_user: env_parse("SHADOW_MAX_TASKS_PER_USER").unwrap_or(0),
    };

    let database = DatabaseConfig {
        path: env("SHADOW_DB_PATH").unwrap_or_else(|| "shadow.db".into()),
    };

    debug!(
        api_port = server.api_port,
        mode = ?sandbox.mode,
        namespace = %sandbox.namespace,
        db = %database.path,
        "configuration loaded"
    );

    Ok(Config {
        server,
        github,
        sandbox,
        kernel,
        database,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them to a single test so
    // parallel test execution cannot interleave.
    #[test]
    fn load_reads_environment_overrides() {
        std::env::set_var("SHADOW_API_PORT", "5005");
        std::env::set_var("SHADOW_AGENT_MODE", "remote");
        std::env::set_var("SHADOW_AUTO_PR", "false");
        let c = load().unwrap();
        assert_eq!(c.server.api_port, 5005);
        assert_eq!(c.sandbox.mode, ExecutionMode::Remote);
        assert!(!c.kernel.auto_pull_request);
        std::env::remove_var("SHADOW_API_PORT");
        std::env::remove_var("SHADOW_AGENT_MODE");
        std::env::remove_var("SHADOW_AUTO_PR");

        let c = load().unwrap();
        assert_eq!(c.server.api_port, 4000);
        assert_eq!(c.sandbox.mode, ExecutionMode::Local);
        assert!(c.kernel.auto_pull_request);
    }
}
