use std::{collections::HashMap, sync::Arc};

use crate::live::{
    error::{LiveError, invalid_rule, unknown_allocator},
    types::{DEFAULT_ALLOCATION, LiveSpace, UnitRange, UnitRule},
};

pub const ALLOCATION_EXPLICIT: &str = DEFAULT_ALLOCATION;
pub const ALLOCATION_WEIGHT: &str = "weight";

/// Builds the range partition of a rule at policy-load time.
pub trait RangeAllocator: Send + Sync {
    fn allocate(&self, rule: &UnitRule, space: &LiveSpace) -> Result<Vec<UnitRange>, LiveError>;
}

/// Uses the ranges declared in the topology document, ordered by start.
pub struct ExplicitRangeAllocator;

impl RangeAllocator for ExplicitRangeAllocator {
    fn allocate(&self, rule: &UnitRule, _space: &LiveSpace) -> Result<Vec<UnitRange>, LiveError> {
        let mut ranges = rule.ranges.clone();
        ranges.sort_by_key(|range| (range.start, range.end));
        Ok(ranges)
    }
}

/// Splits the modulo space across units in proportion to their weight,
/// in declaration order, using largest-remainder rounding.
pub struct WeightedRangeAllocator;

impl RangeAllocator for WeightedRangeAllocator {
    fn allocate(&self, rule: &UnitRule, space: &LiveSpace) -> Result<Vec<UnitRange>, LiveError> {
        let weighted: Vec<_> = space.units.iter().filter(|unit| unit.weight > 0).collect();
        let total: u64 = weighted.iter().map(|unit| u64::from(unit.weight)).sum();
        if total == 0 {
            return Err(invalid_rule(format!(
                "unit rule '{}' uses weight allocation but no unit has a positive weight",
                rule.id
            )));
        }

        let modulo = u64::from(rule.modulo);
        let mut widths: Vec<u64> = Vec::with_capacity(weighted.len());
        let mut remainders: Vec<(u64, usize)> = Vec::with_capacity(weighted.len());
        for (position, unit) in weighted.iter().enumerate() {
            let scaled = modulo * u64::from(unit.weight);
            widths.push(scaled / total);
            remainders.push((scaled % total, position));
        }

        let assigned: u64 = widths.iter().sum();
        let mut leftover = modulo - assigned;
        remainders.sort_by(|lhs, rhs| rhs.0.cmp(&lhs.0).then(lhs.1.cmp(&rhs.1)));
        for (_, position) in remainders {
            if leftover == 0 {
                break;
            }
            widths[position] += 1;
            leftover -= 1;
        }

        let mut ranges = Vec::with_capacity(weighted.len());
        let mut cursor = 0u32;
        for (unit, width) in weighted.iter().zip(widths) {
            if width == 0 {
                continue;
            }
            let end = cursor + width as u32;
            ranges.push(UnitRange {
                unit: unit.code.clone(),
                cell: None,
                start: cursor,
                end,
            });
            cursor = end;
        }
        Ok(ranges)
    }
}

#[derive(Clone)]
pub struct RangeAllocatorRegistry {
    allocators: HashMap<String, Arc<dyn RangeAllocator>>,
}

impl RangeAllocatorRegistry {
    pub fn with_defaults() -> Self {
        let mut allocators: HashMap<String, Arc<dyn RangeAllocator>> = HashMap::new();
        allocators.insert(ALLOCATION_EXPLICIT.to_string(), Arc::new(ExplicitRangeAllocator));
        allocators.insert(ALLOCATION_WEIGHT.to_string(), Arc::new(WeightedRangeAllocator));
        Self { allocators }
    }

    pub fn register(&mut self, name: impl Into<String>, allocator: Arc<dyn RangeAllocator>) {
        self.allocators.insert(name.into(), allocator);
    }

    pub fn allocate(&self, rule: &UnitRule, space: &LiveSpace) -> Result<Vec<UnitRange>, LiveError> {
        let allocator = self.allocators.get(&rule.allocation).ok_or_else(|| {
            unknown_allocator(format!(
                "unit rule '{}' uses unknown allocation '{}'",
                rule.id, rule.allocation
            ))
        })?;
        allocator.allocate(rule, space)
    }
}

impl Default for RangeAllocatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
