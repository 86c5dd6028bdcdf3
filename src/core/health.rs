//! Backend health tracking.
//!
//! The monitor owns the only writable view of backend health. Workers read it
//! through [`BackendHealth::assign`] to pick a backend, and the scheduler
//! reacts to [`HealthChange::PrimaryRecovered`] by reprioritizing the fast
//! lane.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::HealthConfig;
use crate::core::executor::HealthProbe;

/// Health of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Last probe succeeded.
    Healthy,
    /// Not probed yet or last probe failed.
    Down,
}

/// A named backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendEndpoint {
    /// Backend name.
    pub name: String,
    /// Address handed to the probe.
    pub address: String,
    /// Current health.
    pub health: HealthState,
}

/// Notable transitions produced by one probe round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthChange {
    /// A backend changed state.
    Transition {
        /// Backend name.
        backend: String,
        /// New state.
        health: HealthState,
    },
    /// The primary went from unhealthy to healthy.
    PrimaryRecovered,
}

#[derive(Debug)]
struct HealthTable {
    backends: BTreeMap<String, BackendEndpoint>,
    preferred: Option<String>,
}

/// Shared backend health table plus the derived preferred backend.
#[derive(Debug, Clone)]
pub struct BackendHealth {
    primary: String,
    secondary: String,
    table: Arc<RwLock<HealthTable>>,
}

impl BackendHealth {
    /// Build from configuration; every backend starts `Down`.
    #[must_use]
    pub fn from_config(cfg: &HealthConfig) -> Self {
        let backends = cfg
            .backends
            .iter()
            .map(|b| {
                (
                    b.name.clone(),
                    BackendEndpoint {
                        name: b.name.clone(),
                        address: b.address.clone(),
                        health: HealthState::Down,
                    },
                )
            })
            .collect();
        Self {
            primary: cfg.primary.clone(),
            secondary: cfg.secondary.clone(),
            table: Arc::new(RwLock::new(HealthTable {
                backends,
                preferred: None,
            })),
        }
    }

    /// Name of the primary backend.
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Name of the secondary backend.
    pub fn secondary(&self) -> &str {
        &self.secondary
    }

    /// True if `name` is known and healthy.
    pub fn is_healthy(&self, name: &str) -> bool {
        self.table
            .read()
            .backends
            .get(name)
            .is_some_and(|b| b.health == HealthState::Healthy)
    }

    /// Endpoint by name.
    pub fn endpoint(&self, name: &str) -> Option<BackendEndpoint> {
        self.table.read().backends.get(name).cloned()
    }

    /// All endpoints, sorted by name.
    pub fn endpoints(&self) -> Vec<BackendEndpoint> {
        self.table.read().backends.values().cloned().collect()
    }

    /// Current preferred backend: the primary while healthy, otherwise the
    /// secondary while healthy.
    pub fn preferred(&self) -> Option<String> {
        self.table.read().preferred.clone()
    }

    /// Backend a worker should use.
    ///
    /// Worker 0 takes the primary when it is healthy; every other worker
    /// takes the secondary. Either falls back to the other backend, and to
    /// no backend at all when neither is healthy.
    pub fn assign(&self, worker_id: usize) -> Option<BackendEndpoint> {
        let table = self.table.read();
        let healthy = |name: &str| {
            table
                .backends
                .get(name)
                .filter(|b| b.health == HealthState::Healthy)
                .cloned()
        };
        let (first, second) = if worker_id == 0 {
            (&self.primary, &self.secondary)
        } else {
            (&self.secondary, &self.primary)
        };
        healthy(first).or_else(|| healthy(second))
    }

    /// Record a probe result. Returns the transitions it caused; nothing is
    /// returned when the state did not change.
    pub fn record(&self, name: &str, healthy: bool) -> Vec<HealthChange> {
        let mut table = self.table.write();
        let Some(endpoint) = table.backends.get_mut(name) else {
            return Vec::new();
        };
        let next = if healthy {
            HealthState::Healthy
        } else {
            HealthState::Down
        };
        if endpoint.health == next {
            return Vec::new();
        }
        endpoint.health = next;
        let mut changes = vec![HealthChange::Transition {
            backend: name.to_string(),
            health: next,
        }];

        let primary_ok = table
            .backends
            .get(&self.primary)
            .is_some_and(|b| b.health == HealthState::Healthy);
        let secondary_ok = table
            .backends
            .get(&self.secondary)
            .is_some_and(|b| b.health == HealthState::Healthy);
        let preferred = if primary_ok {
            Some(self.primary.clone())
        } else if secondary_ok {
            Some(self.secondary.clone())
        } else {
            None
        };
        table.preferred = preferred;

        if name == self.primary && next == HealthState::Healthy {
            changes.push(HealthChange::PrimaryRecovered);
        }
        changes
    }

    /// Probe every backend once and record the results.
    pub async fn probe_all<P>(&self, probe: &P) -> Vec<HealthChange>
    where
        P: HealthProbe + ?Sized,
    {
        let targets: Vec<(String, String)> = self
            .table
            .read()
            .backends
            .values()
            .map(|b| (b.name.clone(), b.address.clone()))
            .collect();

        let mut changes = Vec::new();
        for (name, address) in targets {
            let healthy = probe.probe(&address).await;
            let found = self.record(&name, healthy);
            for change in &found {
                if let HealthChange::Transition { backend, health } = change {
                    tracing::info!(backend = %backend, health = ?health, "backend health changed");
                }
            }
            changes.extend(found);
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health() -> BackendHealth {
        BackendHealth::from_config(&HealthConfig::default())
    }

    #[test]
    fn test_starts_down_without_preference() {
        let h = health();
        assert!(!h.is_healthy("primary"));
        assert!(h.preferred().is_none());
        assert!(h.assign(0).is_none());
    }

    #[test]
    fn test_primary_preferred_when_healthy() {
        let h = health();
        h.record("secondary", true);
        assert_eq!(h.preferred().as_deref(), Some("secondary"));
        let changes = h.record("primary", true);
        assert!(changes.contains(&HealthChange::PrimaryRecovered));
        assert_eq!(h.preferred().as_deref(), Some("primary"));
    }

    #[test]
    fn test_only_changes_are_reported() {
        let h = health();
        assert!(!h.record("primary", true).is_empty());
        assert!(h.record("primary", true).is_empty());
        assert!(h.record("unknown", true).is_empty());
        assert_eq!(h.record("primary", false).len(), 1);
    }

    #[test]
    fn test_worker_assignment_and_fallback() {
        let h = health();
        h.record("primary", true);
        h.record("secondary", true);
        assert_eq!(h.assign(0).unwrap().name, "primary");
        assert_eq!(h.assign(3).unwrap().name, "secondary");

        h.record("primary", false);
        assert_eq!(h.assign(0).unwrap().name, "secondary");

        h.record("primary", true);
        h.record("secondary", false);
        assert_eq!(h.assign(5).unwrap().name, "primary");
    }
}
