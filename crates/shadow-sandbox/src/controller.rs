// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use shadow_config::SandboxConfig;

use crate::SandboxError;

/// Everything the controller needs to provision one task pod.
#[derive(Debug, Clone)]
pub struct TaskPodSpec {
    pub task_id: String,
    pub user_id: String,
    pub repo_url: String,
    pub base_branch: String,
    /// GitHub token injected into the init clone; never baked into the image.
    pub github_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct PodStatus {
    pub phase: PodPhase,
    pub ready: bool,
    pub pod_ip: Option<String>,
    pub reason: String,
}

/// Provisions, observes, addresses, and tears down per-task pods through
/// the Kubernetes REST API with a service-account bearer token.
pub struct SandboxController {
    client: reqwest::Client,
    base_url: String,
    token: String,
    config: SandboxConfig,
}

const POLL_INTERVAL: Duration = Duration::from_secs(2);

impl SandboxController {
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let (host, port, token) = match (&config.k8s_host, config.k8s_port, &config.k8s_token) {
            (Some(h), Some(p), Some(t)) => (h.clone(), p, t.clone()),
            _ => return Err(SandboxError::NotConfigured),
        };
        Ok(Self {
            client: reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .expect("reqwest client"),
            base_url: format!("https://{host}:{port}"),
            token,
            config,
        })
    }

    fn pods_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods",
            self.base_url, self.config.namespace
        )
    }

    fn pod_url(&self, task_id: &str) -> String {
        format!("{}/{}", self.pods_url(), pod_name(task_id))
    }

    /// Provision the pod: an init container shallow-clones the repository at
    /// the base branch into the shared `/workspace` volume, then the VM
    /// container and the tool-executor sidecar start.
    pub async fn create(&self, spec: &TaskPodSpec) -> Result<String, SandboxError> {
        let name = pod_name(&spec.task_id);
        let manifest = self.pod_manifest(&name, spec);
        let resp = self
            .client
            .post(self.pods_url())
            .bearer_auth(&self.token)
            .json(&manifest)
            .send()
            .await?;
        let status = resp.status();
        if status.as_u16() == 409 {
            // Already exists: idempotent re-entry after a process restart.
            debug!(pod = %name, "pod already exists; reusing");
            return Ok(name);
        }
        if !status.is_success() {
            return Err(SandboxError::Api {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        info!(pod = %name, task = %spec.task_id, "sandbox pod created");
        Ok(name)
    }

    pub async fn status(&self, task_id: &str) -> Result<PodStatus, SandboxError> {
        let resp = self
            .client
            .get(self.pod_url(task_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Err(SandboxError::NotFound(task_id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(SandboxError::Api {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let pod: Value = resp.json().await?;
        Ok(parse_pod_status(&pod))
    }

    /// Poll phase and readiness until both are green, failing fast on a
    /// `Failed` phase.  The outer deadline comes from configuration
    /// (default 300 s).
    pub async fn wait_ready(&self, task_id: &str) -> Result<PodStatus, SandboxError> {
        let deadline = Duration::from_secs(self.config.ready_timeout_secs);
        let started = tokio::time::Instant::now();
        loop {
            match self.status(task_id).await {
                Ok(status) => {
                    if status.phase == PodPhase::Failed {
                        return Err(SandboxError::PodFailed {
                            task: task_id.to_string(),
                            reason: status.reason,
                        });
                    }
                    if status.phase == PodPhase::Running && status.ready {
                        debug!(task = %task_id, "sandbox ready");
                        return Ok(status);
                    }
                }
                // The pod may not be visible yet right after create.
                Err(SandboxError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            if started.elapsed() >= deadline {
                return Err(SandboxError::ReadyTimeout {
                    task: task_id.to_string(),
                    seconds: deadline.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Base URL of the pod's tool-executor sidecar.
    pub async fn sidecar_address(&self, task_id: &str) -> Result<String, SandboxError> {
        let status = self.status(task_id).await?;
        let ip = status
            .pod_ip
            .ok_or_else(|| SandboxError::NotFound(task_id.to_string()))?;
        Ok(format!("http://{}:{}", ip, self.config.sidecar_port))
    }

    /// Idempotent teardown: deleting an already-deleted pod is a no-op.
    pub async fn delete(&self, task_id: &str) -> Result<(), SandboxError> {
        let resp = self
            .client
            .delete(self.pod_url(task_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status();
        if status.as_u16() == 404 {
            debug!(task = %task_id, "pod already gone");
            return Ok(());
        }
        if !status.is_success() {
            return Err(SandboxError::Api {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        info!(task = %task_id, "sandbox pod deleted");
        Ok(())
    }

    fn pod_manifest(&self, name: &str, spec: &TaskPodSpec) -> Value {
        let image = self
            .config
            .vm_image
            .clone()
            .unwrap_or_else(|| "ghcr.io/shadowrealm/task-vm:latest".into());
        let cpu = self.config.vm_cpu_limit.clone().unwrap_or_else(|| "2".into());
        let memory = self
            .config
            .vm_memory_limit
            .clone()
            .unwrap_or_else(|| "4Gi".into());
        let clone_cmd = "git clone --depth 1 --single-branch --branch \"$BASE_BRANCH\" \
             \"https://x-access-token:${GITHUB_TOKEN}@${REPO_HOST_PATH}\" /workspace";
        let host_path = spec
            .repo_url
            .strip_prefix("https://")
            .unwrap_or(&spec.repo_url);
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "labels": {
                    "app": "shadow-task",
                    "shadow.task-id": sanitize_label(&spec.task_id),
                    "shadow.user-id": sanitize_label(&spec.user_id),
                },
            },
            "spec": {
                "restartPolicy": "Never",
                "nodeSelector": { "shadow.dedicated": "tasks" },
                "tolerations": [{
                    "key": "shadow.dedicated",
                    "operator": "Equal",
                    "value": "tasks",
                    "effect": "NoSchedule",
                }],
                "volumes": [{ "name": "workspace", "emptyDir": {} }],
                "initContainers": [{
                    "name": "clone",
                    "image": "alpine/git:latest",
                    "command": ["sh", "-c", clone_cmd],
                    "env": [
                        { "name": "BASE_BRANCH", "value": spec.base_branch },
                        { "name": "GITHUB_TOKEN", "value": spec.github_token },
                        { "name": "REPO_HOST_PATH", "value": host_path },
                    ],
                    "volumeMounts": [{ "name": "workspace", "mountPath": "/workspace" }],
                }],
                "containers": [
                    {
                        "name": "vm",
                        "image": image,
                        "workingDir": "/workspace",
                        "resources": {
                            "limits": { "cpu": cpu, "memory": memory },
                        },
                        "volumeMounts": [{ "name": "workspace", "mountPath": "/workspace" }],
                    },
                    {
                        "name": "sidecar",
                        "image": image,
                        "command": ["shadow-sidecar"],
                        "ports": [{ "containerPort": self.config.sidecar_port }],
                        "readinessProbe": {
                            "httpGet": { "path": "/health", "port": self.config.sidecar_port },
                            "initialDelaySeconds": 1,
                            "periodSeconds": 2,
                        },
                        "volumeMounts": [{ "name": "workspace", "mountPath": "/workspace" }],
                    },
                ],
            },
        })
    }
}

/// Pod name derived from a sanitized task id.
///
/// Kubernetes names must be DNS-1123 labels: lowercase alphanumerics and
/// dashes, at most 63 characters.
pub fn pod_name(task_id: &str) -> String {
    let sanitized: String = task_id
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let mut name = format!("shadow-task-{}", sanitized.trim_matches('-'));
    name.truncate(63);
    name.trim_end_matches('-').to_string()
}

fn sanitize_label(value: &str) -> String {
    let mut out: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    out.truncate(63);
    out
}

fn parse_pod_status(pod: &Value) -> PodStatus {
    let phase = match pod["status"]["phase"].as_str().unwrap_or("") {
        "Pending" => PodPhase::Pending,
        "Running" => PodPhase::Running,
        "Succeeded" => PodPhase::Succeeded,
        "Failed" => PodPhase::Failed,
        _ => PodPhase::Unknown,
    };
    let ready = pod["status"]["conditions"]
        .as_array()
        .map(|conds| {
            conds.iter().any(|c| {
                c["type"].as_str() == Some("Ready") && c["status"].as_str() == Some("True")
            })
        })
        .unwrap_or(false);
    let reason = pod["status"]["reason"]
        .as_str()
        .or_else(|| pod["status"]["message"].as_str())
        .unwrap_or("")
        .to_string();
    PodStatus {
        phase,
        ready,
        pod_ip: pod["status"]["podIP"].as_str().map(|s| s.to_string()),
        reason,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn pod_name_is_sanitized_and_bounded() {
        assert_eq!(pod_name("Task_123"), "shadow-task-task-123");
        let long = "x".repeat(100);
        let name = pod_name(&long);
        assert!(name.len() <= 63);
        assert!(name.starts_with("shadow-task-x"));
    }

    #[test]
    fn pod_name_trims_trailing_dashes() {
        assert_eq!(pod_name("abc---"), "shadow-task-abc");
    }

    #[test]
    fn status_parses_ready_condition() {
        let pod = json!({
            "status": {
                "phase": "Running",
                "podIP": "10.0.0.9",
                "conditions": [
                    { "type": "Initialized", "status": "True" },
                    { "type": "Ready", "status": "True" },
                ],
            }
        });
        let status = parse_pod_status(&pod);
        assert_eq!(status.phase, PodPhase::Running);
        assert!(status.ready);
        assert_eq!(status.pod_ip.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn status_not_ready_without_condition() {
        let pod = json!({ "status": { "phase": "Pending" } });
        let status = parse_pod_status(&pod);
        assert_eq!(status.phase, PodPhase::Pending);
        assert!(!status.ready);
    }

    #[test]
    fn status_failed_carries_reason() {
        let pod = json!({
            "status": { "phase": "Failed", "reason": "ImagePullBackOff" }
        });
        let status = parse_pod_status(&pod);
        assert_eq!(status.phase, PodPhase::Failed);
        assert_eq!(status.reason, "ImagePullBackOff");
    }

    #[test]
    fn controller_requires_remote_configuration() {
        let config = SandboxConfig::default();
        assert!(matches!(
            SandboxController::new(config),
            Err(SandboxError::NotConfigured)
        ));
    }

    #[test]
    fn manifest_carries_labels_clone_and_sidecar() {
        let mut config = SandboxConfig::default();
        config.k8s_host = Some("kubernetes.default.svc".into());
        config.k8s_port = Some(443);
        config.k8s_token = Some("tok".into());
        let controller = SandboxController::new(config).unwrap();
        let spec = TaskPodSpec {
            task_id: "t1".into(),
            user_id: "u1".into(),
            repo_url: "https://github.com/o/r.git".into(),
            base_branch: "main".into(),
            github_token: "gho_x".into(),
        };
        let manifest = controller.pod_manifest(&pod_name("t1"), &spec);
        assert_eq!(manifest["metadata"]["labels"]["shadow.task-id"], "t1");
        assert_eq!(
            manifest["spec"]["initContainers"][0]["env"][0]["value"],
            "main"
        );
        assert_eq!(manifest["spec"]["containers"][1]["name"], "sidecar");
        assert_eq!(
            manifest["spec"]["nodeSelector"]["shadow.dedicated"],
            "tasks"
        );
    }
}
