//! Application reference resolution.
//!
//! The admin application owns the canonical mapping from application name to
//! application identifier; the pipeline only consumes it. A missing mapping
//! is retryable: the application may simply not be registered yet.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

/// Errors that can occur during reference resolution.
#[derive(Debug)]
pub enum ResolveError {
    /// No active application matches the name exactly. Transient: the queue
    /// retries per its backoff policy
    NotFound(String),

    /// The resolver backend could not be reached or answered unusably
    Unreachable(String),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::NotFound(name) => {
                write!(f, "no active application named '{}'", name)
            }
            ResolveError::Unreachable(msg) => write!(f, "resolver unreachable: {}", msg),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Maps an application name to its identifier.
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Resolve an application name to its identifier. Matching is exact.
    async fn resolve(&self, app_name: &str) -> Result<String, ResolveError>;
}

#[derive(Debug, Deserialize)]
struct ApplicationRef {
    id: String,
}

/// Resolver backed by the admin application's HTTP API.
pub struct HttpResolver {
    client: Client,
    lookup_url_base: String,
}

impl HttpResolver {
    /// Create a resolver against the admin API base URL.
    pub fn new(client: Client, api_url: &str) -> Self {
        Self {
            client,
            lookup_url_base: format!("{}/api/v1/applications/by-name", api_url),
        }
    }
}

#[async_trait]
impl ReferenceResolver for HttpResolver {
    async fn resolve(&self, app_name: &str) -> Result<String, ResolveError> {
        let url = format!("{}/{}", self.lookup_url_base, app_name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ResolveError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            Err(ResolveError::NotFound(app_name.to_string()))
        } else if status.is_success() {
            let app: ApplicationRef = response
                .json()
                .await
                .map_err(|e| ResolveError::Unreachable(e.to_string()))?;
            debug!(app_name = app_name, app_id = %app.id, "application resolved");
            Ok(app.id)
        } else {
            Err(ResolveError::Unreachable(format!(
                "resolver returned status {}",
                status
            )))
        }
    }
}

/// In-memory resolver for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
    apps: Mutex<HashMap<String, String>>,
}

impl InMemoryResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application name-to-id mapping.
    pub fn register(&self, app_name: impl Into<String>, app_id: impl Into<String>) {
        if let Ok(mut apps) = self.apps.lock() {
            apps.insert(app_name.into(), app_id.into());
        }
    }
}

#[async_trait]
impl ReferenceResolver for InMemoryResolver {
    async fn resolve(&self, app_name: &str) -> Result<String, ResolveError> {
        let apps = self
            .apps
            .lock()
            .map_err(|_| ResolveError::Unreachable("resolver lock poisoned".to_string()))?;
        apps.get(app_name)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(app_name.to_string()))
    }
}
