use crate::{
    live::{
        allocation::RangeAllocatorRegistry,
        error::{LiveError, invalid_rule, unknown_function},
        function::UnitFunctionRegistry,
        metadata::{LiveDomainMetadata, LiveMetadata, RouteSource},
        types::{Cell, LiveSpace, Location, Unit},
        variable::VariableParserRegistry,
    },
    policy::model::{CellPolicy, ServiceLivePolicy, UnitPolicy},
    request::ServiceRequest,
};

#[derive(Clone, Default)]
pub struct UnitRouter {
    parsers: VariableParserRegistry,
    functions: UnitFunctionRegistry,
    allocators: RangeAllocatorRegistry,
}

impl UnitRouter {
    pub fn new(
        parsers: VariableParserRegistry,
        functions: UnitFunctionRegistry,
        allocators: RangeAllocatorRegistry,
    ) -> Self {
        Self {
            parsers,
            functions,
            allocators,
        }
    }

    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Builds every rule's range partition and validates the space.
    ///
    /// Runs once per topology version, before the space is installed.
    pub fn prepare(&self, space: &mut LiveSpace) -> Result<(), LiveError> {
        for rule in &space.unit_rules {
            if self.functions.get(&rule.function).is_none() {
                return Err(unknown_function(format!(
                    "unit rule '{}' uses unknown function '{}'",
                    rule.id, rule.function
                )));
            }
            if !self.parsers.contains(rule.variable.kind()) {
                return Err(invalid_rule(format!(
                    "unit rule '{}' uses unsupported variable source '{}'",
                    rule.id,
                    rule.variable.kind()
                )));
            }
        }

        let allocated = space
            .unit_rules
            .iter()
            .map(|rule| self.allocators.allocate(rule, space))
            .collect::<Result<Vec<_>, _>>()?;
        for (rule, ranges) in space.unit_rules.iter_mut().zip(allocated) {
            rule.ranges = ranges;
        }

        space.validate()
    }

    /// Resolves the unit/cell that should serve `request`.
    ///
    /// Precedence is rule target, then local unit, then the space's center unit.
    pub fn route(
        &self,
        space: &LiveSpace,
        live_policy: &ServiceLivePolicy,
        request: &ServiceRequest,
        location: &Location,
    ) -> LiveMetadata {
        let local_unit = space.local_unit(location);
        let local_cell = space.local_cell(location);
        let center = space.center();

        let mut rule_id = None;
        let mut variable = None;
        let mut index = None;
        let mut target: Option<(&Unit, Option<&Cell>)> = None;

        match live_policy.unit_policy.unwrap_or(UnitPolicy::Unit) {
            UnitPolicy::None => {}
            UnitPolicy::Center => target = center.map(|unit| (unit, None)),
            UnitPolicy::PreferLocalUnit => target = local_unit.map(|unit| (unit, local_cell)),
            UnitPolicy::Unit => {
                let rule = match live_policy.unit_rule_id.as_deref() {
                    Some(id) => space.rule(id),
                    None => space.unit_rules.first(),
                };
                if let Some(rule) = rule {
                    rule_id = Some(rule.id.clone());
                    variable = self.parsers.parse(request, &rule.variable);
                    if let Some(value) = variable.as_deref() {
                        match self.functions.get(&rule.function) {
                            Some(function) => {
                                let computed = function.compute(value, rule.modulo);
                                index = Some(computed);
                                target = rule.locate(computed).and_then(|range| {
                                    let unit = space.unit(&range.unit)?;
                                    let cell = range.cell.as_deref().and_then(|c| unit.cell(c));
                                    Some((unit, cell))
                                });
                            }
                            None => tracing::warn!(
                                target: "live",
                                space_id = %space.id,
                                rule_id = %rule.id,
                                function = %rule.function,
                                "unit_function_missing"
                            ),
                        }
                    }
                }
            }
        }

        let (source, resolved) = match (target, local_unit, center) {
            (Some(found), _, _) => {
                let source = if index.is_some() {
                    RouteSource::Rule
                } else if live_policy.unit_policy == Some(UnitPolicy::Center) {
                    RouteSource::Center
                } else {
                    RouteSource::Local
                };
                (source, Some(found))
            }
            (None, Some(unit), _) => (RouteSource::Local, Some((unit, local_cell))),
            (None, None, Some(unit)) => (RouteSource::Center, Some((unit, None))),
            (None, None, None) => (RouteSource::Unresolved, None),
        };

        let target_unit = resolved.map(|(unit, _)| unit);
        let mut target_cell = resolved.and_then(|(_, cell)| cell);
        let same_unit = matches!((target_unit, local_unit), (Some(t), Some(l)) if t.code == l.code);
        if target_cell.is_none()
            && same_unit
            && live_policy.cell_policy != Some(CellPolicy::Any)
        {
            target_cell = local_cell;
        }

        let metadata = LiveMetadata {
            space_id: space.id.clone(),
            rule_id,
            variable,
            index,
            target_unit: target_unit.map(|unit| unit.code.clone()),
            target_cell: target_cell.map(|cell| cell.code.clone()),
            local_unit: local_unit.map(|unit| unit.code.clone()),
            local_cell: local_cell.map(|cell| cell.code.clone()),
            center_unit: center.map(|unit| unit.code.clone()),
            source,
        };

        tracing::debug!(
            target: "live",
            space_id = %metadata.space_id,
            service = %request.service,
            source = ?metadata.source,
            target_unit = ?metadata.target_unit,
            target_cell = ?metadata.target_cell,
            "unit_routed"
        );
        metadata
    }

    /// Same as [`UnitRouter::route`] for calls addressed by host; `None` without a host.
    pub fn route_domain(
        &self,
        space: &LiveSpace,
        live_policy: &ServiceLivePolicy,
        request: &ServiceRequest,
        location: &Location,
    ) -> Option<LiveDomainMetadata> {
        let host = request.host.clone()?;
        Some(LiveDomainMetadata {
            host,
            path: request.path.clone(),
            live: self.route(space, live_policy, request, location),
        })
    }
}
