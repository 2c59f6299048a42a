//! Tuple generation
//!
//! A matrix is the set of role-to-configuration assignments a test runs
//! over. Generation is a pure function of the configuration; execution
//! state never leaks in.

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::config::{RoleSpec, SessionConfig, TestDefinition};

/// One role assignment inside a tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleSlot {
    pub role: String,
    pub config: SessionConfig,
}

/// Ordered role-to-configuration assignment for one test execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    slots: Vec<TupleSlot>,
}

impl Tuple {
    pub fn new(slots: Vec<TupleSlot>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[TupleSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Label joining the slot configuration names, e.g. `chrome-firefox`
    pub fn id(&self) -> String {
        self.slots
            .iter()
            .map(|s| s.config.name.as_str())
            .collect::<Vec<_>>()
            .join("-")
    }
}

fn unique_candidates(role: &RoleSpec) -> Vec<&SessionConfig> {
    let mut unique: Vec<&SessionConfig> = Vec::new();
    for candidate in &role.candidates {
        if unique.iter().any(|kept| *kept == candidate) {
            tracing::warn!(
                role = %role.role,
                candidate = %candidate.name,
                "duplicate candidate configuration removed"
            );
        } else {
            unique.push(candidate);
        }
    }
    unique
}

/// Build the full Cartesian product of role assignments.
///
/// Role order is preserved within each tuple and the first role varies
/// slowest, so generation order is deterministic. Duplicate candidates
/// within a role are dropped with a warning. A role with no candidates is
/// a configuration error, never silently skipped.
pub fn generate_tuples(definition: &TestDefinition, roles: &[RoleSpec]) -> Result<Vec<Tuple>> {
    if roles.len() != definition.participants {
        return Err(Error::RoleCountMismatch {
            required: definition.participants,
            available: roles.len(),
        });
    }

    let mut per_role = Vec::with_capacity(roles.len());
    for role in roles {
        let unique = unique_candidates(role);
        if unique.is_empty() {
            return Err(Error::EmptyRole(role.role.clone()));
        }
        per_role.push((role, unique));
    }

    let mut partial: Vec<Vec<TupleSlot>> = vec![Vec::new()];
    for (role, candidates) in &per_role {
        let mut extended = Vec::with_capacity(partial.len() * candidates.len());
        for prefix in &partial {
            for candidate in candidates {
                let mut slots = prefix.clone();
                slots.push(TupleSlot {
                    role: role.role.clone(),
                    config: (*candidate).clone(),
                });
                extended.push(slots);
            }
        }
        partial = extended;
    }

    tracing::debug!(test = %definition.name, tuples = partial.len(), "matrix generated");
    Ok(partial.into_iter().map(Tuple::new).collect())
}

/// Build tuples from explicit candidate picks instead of the full product.
///
/// Each pick lists one candidate index per role, in role order; an
/// out-of-range index is a configuration error.
pub fn generate_explicit(
    definition: &TestDefinition,
    roles: &[RoleSpec],
    picks: &[Vec<usize>],
) -> Result<Vec<Tuple>> {
    if roles.len() != definition.participants {
        return Err(Error::RoleCountMismatch {
            required: definition.participants,
            available: roles.len(),
        });
    }
    for role in roles {
        if role.candidates.is_empty() {
            return Err(Error::EmptyRole(role.role.clone()));
        }
    }

    let mut tuples = Vec::with_capacity(picks.len());
    for pick in picks {
        if pick.len() != roles.len() {
            return Err(Error::config(format!(
                "matrix pick {pick:?} must list one candidate per role ({} roles)",
                roles.len()
            )));
        }
        let mut slots = Vec::with_capacity(pick.len());
        for (role, &index) in roles.iter().zip(pick) {
            let config = role.candidates.get(index).ok_or_else(|| {
                Error::config(format!(
                    "matrix pick index {index} out of range for role '{}' ({} candidates)",
                    role.role,
                    role.candidates.len()
                ))
            })?;
            slots.push(TupleSlot {
                role: role.role.clone(),
                config: config.clone(),
            });
        }
        tuples.push(Tuple::new(slots));
    }
    Ok(tuples)
}
