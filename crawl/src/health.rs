use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// The health state a single registered component last reported.
#[derive(Debug, Clone)]
enum ComponentStatus {
    Starting,
    HealthyUntil(DateTime<Utc>),
    Unhealthy,
}

impl ComponentStatus {
    fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::Starting => false,
            ComponentStatus::HealthyUntil(deadline) => Utc::now() <= *deadline,
            ComponentStatus::Unhealthy => false,
        }
    }
}

enum HealthMessage {
    ReportHealthy { component: String, deadline: DateTime<Utc> },
    ReportUnhealthy { component: String },
}

/// A handle a single loop (discoverer, worker, progress reporter) uses to
/// report its own liveness without holding a lock itself.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline_span: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    pub async fn report_healthy(&self) {
        let _ = self
            .sender
            .send(HealthMessage::ReportHealthy {
                component: self.component.clone(),
                deadline: Utc::now() + self.deadline_span,
            })
            .await;
    }

    pub async fn report_unhealthy(&self) {
        let _ = self
            .sender
            .send(HealthMessage::ReportUnhealthy {
                component: self.component.clone(),
            })
            .await;
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, bool>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> axum::response::Response {
        let code = if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (code, Json(self)).into_response()
    }
}

/// Process-wide liveness registry. Each long-running loop registers once at
/// startup and reports healthy on every iteration; a component that never
/// reports, or whose deadline lapses, drags the whole process unhealthy.
#[derive(Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::channel(256);
        let components: Arc<RwLock<HashMap<String, ComponentStatus>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let task_components = components.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let mut guard = task_components.write().expect("health registry lock poisoned");
                match message {
                    HealthMessage::ReportHealthy { component, deadline } => {
                        guard.insert(component, ComponentStatus::HealthyUntil(deadline));
                    }
                    HealthMessage::ReportUnhealthy { component } => {
                        guard.insert(component, ComponentStatus::Unhealthy);
                    }
                }
            }
        });

        Self { components, sender }
    }

    /// Registers a component, returning a handle it can clone into its own
    /// loop. `deadline_span` should be a small multiple of the component's
    /// expected loop period.
    pub fn register(&self, component: impl Into<String>, deadline_span: Duration) -> HealthHandle {
        let component = component.into();
        self.components
            .write()
            .expect("health registry lock poisoned")
            .insert(component.clone(), ComponentStatus::Starting);
        HealthHandle {
            component,
            deadline_span,
            sender: self.sender.clone(),
        }
    }

    pub fn status(&self) -> HealthStatus {
        let guard = self.components.read().expect("health registry lock poisoned");
        let components: HashMap<String, bool> = guard
            .iter()
            .map(|(name, status)| (name.clone(), status.is_healthy()))
            .collect();
        let healthy = !components.is_empty() && components.values().all(|h| *h);
        HealthStatus { healthy, components }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_unhealthy_before_first_report() {
        let registry = HealthRegistry::new();
        registry.register("worker", Duration::seconds(5));
        assert!(!registry.status().healthy);
    }

    #[tokio::test]
    async fn healthy_after_report() {
        let registry = HealthRegistry::new();
        let handle = registry.register("worker", Duration::seconds(5));
        handle.report_healthy().await;
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(registry.status().healthy);
    }

    #[tokio::test]
    async fn stale_report_goes_unhealthy() {
        let registry = HealthRegistry::new();
        let handle = registry.register("worker", Duration::milliseconds(10));
        handle.report_healthy().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!registry.status().healthy);
    }
}
