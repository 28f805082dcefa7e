//! Minimal REST collaborator used by the binary to load supervision windows.
//! The signaling core never calls it.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use sigcore::net::{HttpClient, HttpRequest};
use sigcore::schedule::SupervisionWindow;
use std::sync::Arc;

/// Which supervision list the current user can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Supervisor,
}

impl Role {
    fn supervisions_path(&self) -> &'static str {
        match self {
            Self::Student => "/supervisions/student",
            Self::Supervisor => "/supervisions/supervisor",
        }
    }
}

/// A supervision record as returned by the backend. Only scheduling fields
/// are read.
#[derive(Debug, Clone, Deserialize)]
struct SupervisionRecord {
    #[serde(alias = "_id")]
    id: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl SupervisionRecord {
    fn into_window(self) -> Option<SupervisionWindow> {
        let start = self.start?;
        let mut window = match self.end {
            Some(end) if end > start => SupervisionWindow::new(start, end),
            _ => SupervisionWindow::starting_at(start),
        };
        window.supervision_id = self.id;
        Some(window)
    }
}

pub struct ApiClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let request = HttpRequest::get(format!("{}{path}", self.base_url))
            .with_header("Accept", "application/json")
            .with_bearer(&self.token);
        let response = self.http.execute(request).await?;
        if !response.is_success() {
            let body = response.body_string().unwrap_or_default();
            return Err(anyhow!(
                "GET {path} returned {}: {}",
                response.status_code,
                body.trim()
            ));
        }
        serde_json::from_slice(&response.body).with_context(|| format!("GET {path}: invalid JSON"))
    }

    /// Scheduled supervisions of the current user as time windows.
    ///
    /// Records without a start date are skipped.
    pub async fn fetch_supervision_windows(&self, role: Role) -> Result<Vec<SupervisionWindow>> {
        let path = role.supervisions_path();
        let body = self.get_json(path).await?;
        let list = match body {
            serde_json::Value::Object(mut map) if map.contains_key("data") => map
                .remove("data")
                .unwrap_or(serde_json::Value::Array(Vec::new())),
            other => other,
        };
        let records: Vec<SupervisionRecord> =
            serde_json::from_value(list).with_context(|| format!("GET {path}: unexpected shape"))?;
        let total = records.len();
        let windows: Vec<SupervisionWindow> = records
            .into_iter()
            .filter_map(SupervisionRecord::into_window)
            .collect();
        debug!(target: "Signal/Rest", "Loaded {} of {total} supervisions as windows", windows.len());
        Ok(windows)
    }
}
