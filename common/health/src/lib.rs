use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

/// Liveness reporting for the long-lived loops of the service.
///
/// The process runs several independent loops (gateway workers, stream
/// consumers, the supervisor) and is only trustworthy when all of them are
/// making progress. Each loop registers a component and must report healthy
/// more often than its deadline; a component that stops reporting counts as
/// stalled and fails the aggregate status.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentState>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ComponentState {
    /// Registered but has not reported yet.
    Starting,
    HealthyUntil(DateTime<Utc>),
    Unhealthy,
}

/// Handle held by one component to report its own status.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentState>>>,
}

impl HealthHandle {
    /// Must be called more frequently than the registered deadline.
    pub fn report_healthy(&self) {
        self.set(ComponentState::HealthyUntil(Utc::now() + self.deadline));
    }

    pub fn report_unhealthy(&self) {
        self.set(ComponentState::Unhealthy);
    }

    fn set(&self, state: ComponentState) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), state);
            }
            // A poisoned registry makes the probes fail and the process restart.
            Err(_) => warn!(component = %self.component, "poisoned health registry"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: BTreeMap<String, String>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let code = if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = serde_json::to_string(&self).unwrap_or_else(|_| "{}".to_string());
        (code, body).into_response()
    }
}

impl HealthRegistry {
    pub fn new() -> HealthRegistry {
        HealthRegistry::default()
    }

    pub fn register(&self, component: &str, deadline: std::time::Duration) -> HealthHandle {
        let deadline = Duration::from_std(deadline).unwrap_or_else(|_| Duration::seconds(30));
        if let Ok(mut map) = self.components.write() {
            map.insert(component.to_string(), ComponentState::Starting);
        }
        HealthHandle {
            component: component.to_string(),
            deadline,
            components: self.components.clone(),
        }
    }

    /// Remove a component, e.g. when the stream it watched is deactivated.
    /// Its old handle becomes a no-op target and may be dropped.
    pub fn deregister(&self, component: &str) {
        if let Ok(mut map) = self.components.write() {
            map.remove(component);
        }
    }

    /// Aggregate status: healthy only when every registered component has
    /// recently reported healthy. Unhealthy while empty, so a probe cannot
    /// pass before the loops are wired up.
    pub fn status(&self) -> HealthStatus {
        let now = Utc::now();
        let map = match self.components.read() {
            Ok(map) => map,
            Err(_) => {
                return HealthStatus {
                    healthy: false,
                    components: BTreeMap::new(),
                }
            }
        };

        let mut healthy = !map.is_empty();
        let mut components = BTreeMap::new();
        for (name, state) in map.iter() {
            let label = match state {
                ComponentState::Starting => {
                    healthy = false;
                    "starting"
                }
                ComponentState::HealthyUntil(until) if *until > now => "healthy",
                ComponentState::HealthyUntil(_) => {
                    healthy = false;
                    "stalled"
                }
                ComponentState::Unhealthy => {
                    healthy = false;
                    "unhealthy"
                }
            };
            components.insert(name.clone(), label.to_string());
        }
        HealthStatus {
            healthy,
            components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new();
        assert!(!registry.status().healthy);
    }

    #[test]
    fn component_lifecycle() {
        let registry = HealthRegistry::new();
        let handle = registry.register("worker", std::time::Duration::from_secs(30));

        // registered but silent
        let status = registry.status();
        assert!(!status.healthy);
        assert_eq!(status.components["worker"], "starting");

        handle.report_healthy();
        assert!(registry.status().healthy);

        handle.report_unhealthy();
        let status = registry.status();
        assert!(!status.healthy);
        assert_eq!(status.components["worker"], "unhealthy");
    }

    #[test]
    fn silent_component_stalls_after_deadline() {
        let registry = HealthRegistry::new();
        let handle = registry.register("consumer", std::time::Duration::from_secs(0));
        handle.report_healthy();

        let status = registry.status();
        assert!(!status.healthy);
        assert_eq!(status.components["consumer"], "stalled");
    }

    #[test]
    fn all_components_must_report() {
        let registry = HealthRegistry::new();
        let one = registry.register("one", std::time::Duration::from_secs(30));
        let two = registry.register("two", std::time::Duration::from_secs(30));

        one.report_healthy();
        assert!(!registry.status().healthy);
        two.report_healthy();
        assert!(registry.status().healthy);
    }

    #[test]
    fn deregistered_components_stop_counting() {
        let registry = HealthRegistry::new();
        let keep = registry.register("keep", std::time::Duration::from_secs(30));
        let _gone = registry.register("gone", std::time::Duration::from_secs(30));
        keep.report_healthy();

        assert!(!registry.status().healthy);
        registry.deregister("gone");
        assert!(registry.status().healthy);
    }

    #[test]
    fn status_maps_to_http_codes() {
        use axum::response::IntoResponse;

        let nok = HealthStatus {
            healthy: false,
            components: BTreeMap::new(),
        }
        .into_response();
        assert_eq!(nok.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = HealthStatus {
            healthy: true,
            components: BTreeMap::new(),
        }
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
