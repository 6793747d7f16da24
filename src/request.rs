use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type EndpointId = String;

pub const DEFAULT_GROUP: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestDirection {
    #[default]
    Inbound,
    Outbound,
}

/// A captured call, as handed over by the interception layer.
///
/// Header and cookie keys are stored lower-cased; lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceRequest {
    pub service: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub direction: RequestDirection,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    query: BTreeMap<String, String>,
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    #[serde(default)]
    arguments: Vec<serde_json::Value>,
}

impl ServiceRequest {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_direction(mut self, direction: RequestDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.cookies
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_argument(mut self, argument: serde_json::Value) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn group_or_default(&self) -> &str {
        self.group.as_deref().unwrap_or(DEFAULT_GROUP)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn cookie(&self, key: &str) -> Option<&str> {
        self.cookies
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn argument(&self, index: usize) -> Option<&serde_json::Value> {
        self.arguments.get(index)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

/// One instance of a service, as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub cell: Option<String>,
    #[serde(default)]
    pub lane: Option<String>,
    #[serde(default = "default_endpoint_weight")]
    pub weight: u32,
    #[serde(default = "default_endpoint_healthy")]
    pub healthy: bool,
}

fn default_endpoint_weight() -> u32 {
    100
}

fn default_endpoint_healthy() -> bool {
    true
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            id: format!("{host}:{port}"),
            host,
            port,
            unit: None,
            cell: None,
            lane: None,
            weight: default_endpoint_weight(),
            healthy: default_endpoint_healthy(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>, cell: Option<&str>) -> Self {
        self.unit = Some(unit.into());
        self.cell = cell.map(str::to_string);
        self
    }

    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }
}
