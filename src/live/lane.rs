use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    live::{
        error::{LiveError, invalid_rule},
        metadata::LaneMetadata,
        types::Location,
    },
    policy::model::{TagCondition, conditions_match},
    request::ServiceRequest,
};

pub const LANE_HEADER: &str = "x-live-lane";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lane {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub default_lane: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneRule {
    pub id: String,
    pub lane: String,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneSpace {
    pub id: String,
    #[serde(default)]
    pub lanes: Vec<Lane>,
    #[serde(default)]
    pub rules: Vec<LaneRule>,
}

impl LaneSpace {
    pub fn lane(&self, code: &str) -> Option<&Lane> {
        self.lanes.iter().find(|lane| lane.code == code)
    }

    pub fn default_lane(&self) -> Option<&Lane> {
        self.lanes.iter().find(|lane| lane.default_lane)
    }

    pub fn validate(&self) -> Result<(), LiveError> {
        if self.lanes.iter().filter(|lane| lane.default_lane).count() > 1 {
            return Err(invalid_rule(format!(
                "lane space '{}' declares more than one default lane",
                self.id
            )));
        }
        for rule in &self.rules {
            if self.lane(&rule.lane).is_none() {
                return Err(invalid_rule(format!(
                    "lane rule '{}' references unknown lane '{}'",
                    rule.id, rule.lane
                )));
            }
        }
        Ok(())
    }
}

/// Resolves the lane of a call: explicit header, then the first matching rule.
pub struct LaneResolver;

impl LaneResolver {
    pub fn resolve(
        space: &LaneSpace,
        request: &ServiceRequest,
        location: &Location,
        redirections: Option<&BTreeMap<String, String>>,
    ) -> LaneMetadata {
        let requested = request
            .header(LANE_HEADER)
            .filter(|code| space.lane(code).is_some())
            .map(str::to_string)
            .or_else(|| {
                space
                    .rules
                    .iter()
                    .find(|rule| conditions_match(&rule.conditions, request))
                    .map(|rule| rule.lane.clone())
            });

        let target_lane = requested.map(|lane| {
            redirections
                .and_then(|map| map.get(&lane))
                .filter(|redirected| space.lane(redirected).is_some())
                .cloned()
                .unwrap_or(lane)
        });

        let local_lane = location
            .lane_space_id
            .as_deref()
            .is_none_or(|id| id == space.id)
            .then(|| location.lane.clone())
            .flatten();

        LaneMetadata {
            space_id: space.id.clone(),
            target_lane,
            local_lane,
            default_lane: space.default_lane().map(|lane| lane.code.clone()),
        }
    }
}
