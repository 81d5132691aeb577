#![forbid(unsafe_code)]

use std::time::Duration;

use fleet_core::Collection;

use crate::{FleetError, FleetResult};

/// Where the backend lives and how long a single request may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL without trailing slash, e.g. `http://localhost:8080/app`.
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { base_url: "http://localhost:8080".to_string(), timeout: Duration::from_millis(10_000) }
    }
}

impl ApiConfig {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string(), timeout }
    }

    /// `FLEET_BASE_URL`, `FLEET_HTTP_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let base = std::env::var("FLEET_BASE_URL").unwrap_or(d.base_url);
        let timeout_ms = std::env::var("FLEET_HTTP_TIMEOUT_MS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(10_000);
        Self::new(&base, Duration::from_millis(timeout_ms))
    }

    pub fn rest_url(&self, collection: Collection, suffix: &str) -> String {
        format!("{}/api/{}{}", self.base_url, collection.rest_segment(), suffix)
    }

    /// Push channel URL: `http→ws`, `https→wss`, path `/ws/{collection}` under the base path.
    pub fn socket_url(&self, collection: Collection) -> FleetResult<url::Url> {
        let mut u = url::Url::parse(&self.base_url).map_err(|e| FleetError::Validation(format!("invalid base url {}: {}", self.base_url, e)))?;
        let scheme = match u.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => return Err(FleetError::Validation(format!("unsupported scheme: {}", other))),
        };
        u.set_scheme(scheme).map_err(|_| FleetError::Validation(format!("cannot switch {} to {}", self.base_url, scheme)))?;
        let path = format!("{}/ws/{}", u.path().trim_end_matches('/'), collection.socket_segment());
        u.set_path(&path);
        u.set_query(None);
        Ok(u)
    }
}
