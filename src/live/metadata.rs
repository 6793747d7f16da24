use serde::{Deserialize, Serialize};

/// Which step of the precedence chain produced the target unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Rule,
    Local,
    Center,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveMetadata {
    pub space_id: String,
    pub rule_id: Option<String>,
    pub variable: Option<String>,
    pub index: Option<u32>,
    pub target_unit: Option<String>,
    pub target_cell: Option<String>,
    pub local_unit: Option<String>,
    pub local_cell: Option<String>,
    pub center_unit: Option<String>,
    pub source: RouteSource,
}

impl LiveMetadata {
    pub fn is_local_unit(&self) -> bool {
        self.target_unit.is_some() && self.target_unit == self.local_unit
    }

    pub fn is_local_cell(&self) -> bool {
        self.is_local_unit() && self.target_cell.is_some() && self.target_cell == self.local_cell
    }

    pub fn is_cross_unit(&self) -> bool {
        self.target_unit.is_some() && !self.is_local_unit()
    }
}

/// Live metadata of a call addressed by host, as seen by a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveDomainMetadata {
    pub host: String,
    pub path: String,
    pub live: LiveMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneMetadata {
    pub space_id: String,
    pub target_lane: Option<String>,
    pub local_lane: Option<String>,
    pub default_lane: Option<String>,
}

impl LaneMetadata {
    /// Lane the call should be dispatched to.
    pub fn effective_lane(&self) -> Option<&str> {
        self.target_lane
            .as_deref()
            .or(self.default_lane.as_deref())
    }

    pub fn is_local_lane(&self) -> bool {
        self.effective_lane() == self.local_lane.as_deref()
    }
}
