use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use urlencoding::{decode, encode};

use crate::policy::error::{PolicyError, invalid_policy_id};

pub const SCHEME_SERVICE: &str = "service";

pub const KEY_GROUP: &str = "group";
pub const KEY_METHOD: &str = "method";
pub const KEY_LOAD_BALANCE: &str = "loadbalance";
pub const KEY_CLUSTER: &str = "cluster";
pub const KEY_LIVE: &str = "live";
pub const KEY_RATE_LIMIT: &str = "ratelimit";
pub const KEY_CONCURRENCY_LIMIT: &str = "concurrencylimit";
pub const KEY_LOAD_LIMIT: &str = "loadlimit";
pub const KEY_ROUTE: &str = "route";
pub const KEY_LANE: &str = "lane";
pub const KEY_CIRCUIT_BREAK: &str = "circuitbreak";
pub const KEY_AUTH: &str = "auth";
pub const KEY_FAULT_INJECTION: &str = "faultinjection";

/// URI-shaped identity of a governance target.
///
/// Renders as `scheme://host/path?k1=v1&k2=v2` with parameters in key order,
/// so two ids compare equal exactly when their rendered forms do. Parameter
/// keys and values are percent-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolicyId {
    scheme: String,
    host: String,
    path: String,
    parameters: BTreeMap<String, String>,
}

impl PolicyId {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            scheme: scheme.into(),
            host: host.into(),
            path: normalize_path(&path),
            parameters: BTreeMap::new(),
        }
    }

    pub fn service(service: &str, path: &str) -> Self {
        Self::new(SCHEME_SERVICE, service, path)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Returns a copy carrying `key=value`; an empty value removes the key.
    pub fn with_parameter(&self, key: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        let value = value.into();
        if value.is_empty() {
            next.parameters.remove(key);
        } else {
            next.parameters.insert(key.to_string(), value);
        }
        next
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host, self.path)?;
        let mut separator = '?';
        for (key, value) in &self.parameters {
            write!(f, "{separator}{}={}", encode(key), encode(value))?;
            separator = '&';
        }
        Ok(())
    }
}

impl FromStr for PolicyId {
    type Err = PolicyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| invalid_policy_id(format!("policy id '{raw}' is missing a scheme")))?;
        if scheme.is_empty() {
            return Err(invalid_policy_id(format!(
                "policy id '{raw}' has an empty scheme"
            )));
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };
        let (host, path) = match location.find('/') {
            Some(index) => location.split_at(index),
            None => (location, ""),
        };
        if host.is_empty() {
            return Err(invalid_policy_id(format!(
                "policy id '{raw}' has an empty host"
            )));
        }

        let mut id = PolicyId::new(scheme, host, path);
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                invalid_policy_id(format!("policy id '{raw}' has a malformed parameter '{pair}'"))
            })?;
            id.parameters.insert(decode_component(raw, key)?, decode_component(raw, value)?);
        }
        Ok(id)
    }
}

fn decode_component(raw: &str, component: &str) -> Result<String, PolicyError> {
    decode(component)
        .map(|decoded| decoded.into_owned())
        .map_err(|err| invalid_policy_id(format!("policy id '{raw}' has an undecodable parameter: {err}")))
}

impl TryFrom<String> for PolicyId {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PolicyId> for String {
    fn from(value: PolicyId) -> Self {
        value.to_string()
    }
}
