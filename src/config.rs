//! Agent-level configuration, read from the environment: no
//! config-file crate, just typed defaults with an env override.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Size of the BundleDeployment reconcile worker pool.
    pub bundle_deployment_workers: usize,
    /// Size of the drift-check worker pool.
    pub drift_workers: usize,
    /// Default poll interval for `Ready`/`Applied` requeues.
    pub poll_interval: Duration,
    /// Default release history retention when options don't override it.
    pub default_max_history: usize,
    /// Our agent namespace, stamped on releases and used to filter
    /// `listDeployments` so we never touch another agent's releases.
    pub agent_namespace: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bundle_deployment_workers: 4,
            drift_workers: 2,
            poll_interval: Duration::from_secs(30),
            default_max_history: 10,
            agent_namespace: "cattle-fleet-system".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("FLEET_BUNDLE_DEPLOYMENT_WORKERS") {
            if let Ok(n) = v.parse() {
                cfg.bundle_deployment_workers = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_DRIFT_WORKERS") {
            if let Ok(n) = v.parse() {
                cfg.drift_workers = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_POLL_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                cfg.poll_interval = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("FLEET_DEFAULT_MAX_HISTORY") {
            if let Ok(n) = v.parse() {
                cfg.default_max_history = n;
            }
        }
        if let Ok(v) = std::env::var("FLEET_AGENT_NAMESPACE") {
            cfg.agent_namespace = v;
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.default_max_history, 10);
        assert!(cfg.default_max_history >= 2);
    }
}
