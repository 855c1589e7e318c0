// src/resolver/conflict.rs

//! Range-level conflict detection
//!
//! Constraints are (origin, component, range) triples gathered by the
//! caller; two constraints on the same component conflict when their ranges
//! share no version. Resolution strategies over candidate sets live in
//! [`crate::version::resolve`].

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::version::Range;

/// One requirement on a component's version
#[derive(Debug, Clone)]
pub struct Constraint {
    /// Who states the requirement (component or environment name)
    pub origin: String,
    /// The component being constrained
    pub component: String,
    pub range: Range,
}

impl Constraint {
    pub fn new(origin: &str, component: &str, range: Range) -> Self {
        Self { origin: origin.to_string(), component: component.to_string(), range }
    }
}

/// A set of mutually unsatisfiable requirements on one component
#[derive(Debug, Clone)]
pub struct Conflict {
    pub component: String,
    /// (origin, range) pairs that cannot all hold
    pub conflicting_ranges: Vec<(String, Range)>,
}

/// Find all components whose constraints cannot be satisfied together.
///
/// Detection is pairwise: any two ranges with an empty intersection make the
/// component's whole constraint set conflicting, and every constraint on
/// that component is reported so the user sees the full picture.
pub fn find_conflicts(constraints: &[Constraint]) -> Vec<Conflict> {
    let mut by_component: BTreeMap<&str, Vec<&Constraint>> = BTreeMap::new();
    for constraint in constraints {
        by_component.entry(&constraint.component).or_default().push(constraint);
    }

    let mut conflicts = Vec::new();
    for (component, constraints) in by_component {
        let incompatible = constraints.iter().enumerate().any(|(i, a)| {
            constraints[i + 1..].iter().any(|b| !a.range.intersects(&b.range))
        });
        if incompatible {
            conflicts.push(Conflict {
                component: component.to_string(),
                conflicting_ranges: constraints
                    .iter()
                    .map(|c| (c.origin.clone(), c.range.clone()))
                    .collect(),
            });
        }
    }
    conflicts
}

/// Error out on the first conflicting component
pub fn check_conflicts(constraints: &[Constraint]) -> Result<()> {
    match find_conflicts(constraints).into_iter().next() {
        None => Ok(()),
        Some(conflict) => Err(Error::Conflict {
            component: conflict.component,
            constraints: conflict
                .conflicting_ranges
                .iter()
                .map(|(origin, range)| format!("{origin} requires {range}"))
                .collect(),
        }),
    }
}
