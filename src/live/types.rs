use serde::{Deserialize, Serialize};

use crate::live::{
    error::{LiveError, invalid_rule, unknown_cell, unknown_unit},
    variable::VariableSource,
};

pub const DEFAULT_MODULO: u32 = 10_000;
pub const DEFAULT_UNIT_FUNCTION: &str = "hash";
pub const DEFAULT_ALLOCATION: &str = "explicit";

fn default_weight() -> u32 {
    1
}

fn default_modulo() -> u32 {
    DEFAULT_MODULO
}

fn default_function() -> String {
    DEFAULT_UNIT_FUNCTION.to_string()
}

fn default_allocation() -> String {
    DEFAULT_ALLOCATION.to_string()
}

/// Where this process is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Location {
    #[serde(default)]
    pub live_space_id: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub cell: Option<String>,
    #[serde(default)]
    pub lane: Option<String>,
    #[serde(default)]
    pub lane_space_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Unit {
    pub fn cell(&self, code: &str) -> Option<&Cell> {
        self.cells.iter().find(|cell| cell.code == code)
    }
}

/// Half-open slice `[start, end)` of a rule's modulo space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRange {
    pub unit: String,
    #[serde(default)]
    pub cell: Option<String>,
    pub start: u32,
    pub end: u32,
}

impl UnitRange {
    pub fn contains(&self, index: u32) -> bool {
        self.start <= index && index < self.end
    }

    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRule {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_modulo")]
    pub modulo: u32,
    pub variable: VariableSource,
    #[serde(default = "default_function")]
    pub function: String,
    #[serde(default = "default_allocation")]
    pub allocation: String,
    #[serde(default)]
    pub ranges: Vec<UnitRange>,
}

impl UnitRule {
    /// Range owning `index`; only meaningful on a validated rule.
    pub fn locate(&self, index: u32) -> Option<&UnitRange> {
        let position = self.ranges.partition_point(|range| range.end <= index);
        self.ranges
            .get(position)
            .filter(|range| range.contains(index))
    }

    /// Checks that the ranges partition `[0, modulo)` and reference known units/cells.
    pub fn validate(&self, space: &LiveSpace) -> Result<(), LiveError> {
        if self.modulo == 0 {
            return Err(invalid_rule(format!(
                "unit rule '{}' must have a positive modulo",
                self.id
            )));
        }
        if self.ranges.is_empty() {
            return Err(invalid_rule(format!(
                "unit rule '{}' has no ranges",
                self.id
            )));
        }

        let mut cursor = 0u32;
        for range in &self.ranges {
            if range.start != cursor {
                let problem = if range.start < cursor { "overlaps" } else { "leaves a gap" };
                return Err(invalid_rule(format!(
                    "unit rule '{}' {} at index {} (range {}..{})",
                    self.id, problem, cursor, range.start, range.end
                )));
            }
            if range.end <= range.start {
                return Err(invalid_rule(format!(
                    "unit rule '{}' has an empty range {}..{}",
                    self.id, range.start, range.end
                )));
            }

            let unit = space.unit(&range.unit).ok_or_else(|| {
                unknown_unit(format!(
                    "unit rule '{}' references unknown unit '{}'",
                    self.id, range.unit
                ))
            })?;
            if let Some(cell) = range.cell.as_deref()
                && unit.cell(cell).is_none()
            {
                return Err(unknown_cell(format!(
                    "unit rule '{}' references unknown cell '{}' in unit '{}'",
                    self.id, cell, unit.code
                )));
            }
            cursor = range.end;
        }

        if cursor != self.modulo {
            return Err(invalid_rule(format!(
                "unit rule '{}' covers {} of modulo {}",
                self.id, cursor, self.modulo
            )));
        }
        Ok(())
    }
}

/// A named multi-region topology. Read-only once installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSpace {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default)]
    pub center_unit: Option<String>,
    #[serde(default)]
    pub unit_rules: Vec<UnitRule>,
}

impl LiveSpace {
    pub fn unit(&self, code: &str) -> Option<&Unit> {
        self.units.iter().find(|unit| unit.code == code)
    }

    pub fn center(&self) -> Option<&Unit> {
        self.center_unit.as_deref().and_then(|code| self.unit(code))
    }

    pub fn rule(&self, id: &str) -> Option<&UnitRule> {
        self.unit_rules.iter().find(|rule| rule.id == id)
    }

    pub fn local_unit(&self, location: &Location) -> Option<&Unit> {
        if let Some(space_id) = location.live_space_id.as_deref()
            && space_id != self.id
        {
            return None;
        }
        location.unit.as_deref().and_then(|code| self.unit(code))
    }

    pub fn local_cell(&self, location: &Location) -> Option<&Cell> {
        let unit = self.local_unit(location)?;
        location.cell.as_deref().and_then(|code| unit.cell(code))
    }

    pub fn validate(&self) -> Result<(), LiveError> {
        if let Some(center) = self.center_unit.as_deref()
            && self.unit(center).is_none()
        {
            return Err(unknown_unit(format!(
                "live space '{}' declares unknown center unit '{}'",
                self.id, center
            )));
        }
        for rule in &self.unit_rules {
            rule.validate(self)?;
        }
        Ok(())
    }
}
