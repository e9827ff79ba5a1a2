//! REST API request/response data transfer objects

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::registry::ModelState;

/// `GET /` query string
#[derive(Debug, Default, Deserialize)]
pub struct DetectQuery {
    pub url: Option<String>,
    /// Detection mode: `0` attributes (default), `1` descriptor, `2` full
    pub reco: Option<String>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    /// All models loaded
    pub ready: bool,
    pub version: String,
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub models: BTreeMap<String, ModelState>,
}
