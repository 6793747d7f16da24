use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::ServiceRequest;

pub const SOURCE_METHOD: &str = "method";
pub const SOURCE_HTTP: &str = "http";
pub const SOURCE_EXPRESSION: &str = "expression";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpLocation {
    Header,
    Query,
    Cookie,
}

/// Where a unit rule reads its routing variable from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableSource {
    /// A call argument, optionally navigated by a dotted path (`user.id`, `items.0`).
    Method {
        argument: usize,
        #[serde(default)]
        path: Option<String>,
    },
    Http {
        location: HttpLocation,
        key: String,
    },
    /// `||`-separated references; the first non-empty one wins.
    /// References are `header:<k>`, `query:<k>`, `cookie:<k>`, `arg:<i>[.<path>]`.
    Expression { expression: String },
}

impl VariableSource {
    pub fn kind(&self) -> &'static str {
        match self {
            VariableSource::Method { .. } => SOURCE_METHOD,
            VariableSource::Http { .. } => SOURCE_HTTP,
            VariableSource::Expression { .. } => SOURCE_EXPRESSION,
        }
    }
}

pub trait VariableParser: Send + Sync {
    fn parse(&self, request: &ServiceRequest, source: &VariableSource) -> Option<String>;
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_empty(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn navigate<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn argument_value(request: &ServiceRequest, argument: usize, path: Option<&str>) -> Option<String> {
    let value = request.argument(argument)?;
    let value = match path {
        Some(path) => navigate(value, path)?,
        None => value,
    };
    scalar_text(value)
}

fn http_value(request: &ServiceRequest, location: HttpLocation, key: &str) -> Option<String> {
    let raw = match location {
        HttpLocation::Header => request.header(key),
        HttpLocation::Query => request.query(key),
        HttpLocation::Cookie => request.cookie(key),
    };
    raw.and_then(non_empty)
}

pub struct MethodVariableParser;

impl VariableParser for MethodVariableParser {
    fn parse(&self, request: &ServiceRequest, source: &VariableSource) -> Option<String> {
        let VariableSource::Method { argument, path } = source else {
            return None;
        };
        argument_value(request, *argument, path.as_deref())
    }
}

pub struct HttpVariableParser;

impl VariableParser for HttpVariableParser {
    fn parse(&self, request: &ServiceRequest, source: &VariableSource) -> Option<String> {
        let VariableSource::Http { location, key } = source else {
            return None;
        };
        http_value(request, *location, key)
    }
}

pub struct ExpressionVariableParser;

impl ExpressionVariableParser {
    fn reference(request: &ServiceRequest, reference: &str) -> Option<String> {
        let (scheme, key) = reference.trim().split_once(':')?;
        match scheme.trim() {
            "header" => http_value(request, HttpLocation::Header, key.trim()),
            "query" => http_value(request, HttpLocation::Query, key.trim()),
            "cookie" => http_value(request, HttpLocation::Cookie, key.trim()),
            "arg" => {
                let key = key.trim();
                let (index, path) = match key.split_once('.') {
                    Some((index, path)) => (index, Some(path)),
                    None => (key, None),
                };
                argument_value(request, index.parse().ok()?, path)
            }
            _ => None,
        }
    }
}

impl VariableParser for ExpressionVariableParser {
    fn parse(&self, request: &ServiceRequest, source: &VariableSource) -> Option<String> {
        let VariableSource::Expression { expression } = source else {
            return None;
        };
        expression
            .split("||")
            .find_map(|reference| Self::reference(request, reference))
    }
}

/// Parsers keyed by source type.
#[derive(Clone)]
pub struct VariableParserRegistry {
    parsers: HashMap<String, Arc<dyn VariableParser>>,
}

impl VariableParserRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(SOURCE_METHOD, Arc::new(MethodVariableParser));
        registry.register(SOURCE_HTTP, Arc::new(HttpVariableParser));
        registry.register(SOURCE_EXPRESSION, Arc::new(ExpressionVariableParser));
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, parser: Arc<dyn VariableParser>) {
        self.parsers.insert(kind.into(), parser);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.parsers.contains_key(kind)
    }

    pub fn parse(&self, request: &ServiceRequest, source: &VariableSource) -> Option<String> {
        self.parsers
            .get(source.kind())
            .and_then(|parser| parser.parse(request, source))
    }
}

impl Default for VariableParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
