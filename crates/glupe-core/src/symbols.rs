//! Symbol table and inheritance resolver.
//!
//! Units are defined in source order; a parent or parameter is visible only
//! once its own unit has been defined. Persistent variables loaded from
//! [`PersistentState`] are visible from the start of the pass.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::cache::{content_hash, PersistentState};
use crate::unit::{SemanticUnit, UnitKind};

/// Non-fatal resolution problem, reported alongside the resolved unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    /// Parent not defined yet (or never); skipped
    MissingParent { unit: String, parent: String },
    /// Parameter not defined; passed through as a bare name
    MissingParam { unit: String, param: String },
    /// Parent is a variable rather than a container
    ParentNotContainer { unit: String, parent: String },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveWarning::MissingParent { unit, parent } => {
                write!(f, "\"{unit}\" inherits from undefined parent \"{parent}\"")
            }
            ResolveWarning::MissingParam { unit, param } => {
                write!(f, "\"{unit}\" uses undefined parameter \"{param}\"")
            }
            ResolveWarning::ParentNotContainer { unit, parent } => {
                write!(f, "\"{unit}\" inherits from \"{parent}\", which is not a container")
            }
        }
    }
}

/// Resolved units of one pass, keyed by id.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    units: BTreeMap<String, SemanticUnit>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with the persistent variables of an earlier run.
    pub fn with_persistent(state: &PersistentState) -> Self {
        let mut table = Self::new();
        for (id, record) in &state.variables {
            let mut unit = SemanticUnit::new(id.as_str(), UnitKind::PersistentVar, record.content.as_str());
            unit.resolved_content = Some(record.content.clone());
            unit.content_hash = Some(record.hash.clone());
            table.units.insert(id.clone(), unit);
        }
        debug!(variables_count = table.units.len(), "Loaded persistent variables");
        table
    }

    pub fn get(&self, id: &str) -> Option<&SemanticUnit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Resolve `unit` against the units defined so far and define it.
    ///
    /// Returns the resolved copy plus any warnings. Warnings are also logged.
    pub fn resolve(&mut self, mut unit: SemanticUnit) -> (SemanticUnit, Vec<ResolveWarning>) {
        let mut warnings = Vec::new();
        let resolved = if unit.kind.is_container() {
            self.inherit(&unit, &mut warnings)
        } else {
            unit.raw_content.clone()
        };

        for warning in &warnings {
            warn!(line = unit.line, "{warning}");
        }

        unit.content_hash = Some(content_hash(&resolved));
        unit.resolved_content = Some(resolved);
        debug!(id = %unit.id, kind = %unit.kind, "Defined unit");

        self.units.insert(unit.id.clone(), unit.clone());
        (unit, warnings)
    }

    fn inherit(&self, unit: &SemanticUnit, warnings: &mut Vec<ResolveWarning>) -> String {
        let mut context = String::new();

        for parent in &unit.parents {
            match self.units.get(parent) {
                Some(found) => {
                    if !found.kind.is_container() {
                        warnings.push(ResolveWarning::ParentNotContainer {
                            unit: unit.id.clone(),
                            parent: parent.clone(),
                        });
                    }
                    context.push_str(&format!(
                        "\n--- INHERITED FROM {parent} ---\n{}\n",
                        found.effective_content()
                    ));
                }
                None => warnings.push(ResolveWarning::MissingParent {
                    unit: unit.id.clone(),
                    parent: parent.clone(),
                }),
            }
        }

        for param in &unit.params {
            match self.units.get(param) {
                Some(found) => context.push_str(&format!(
                    "\n--- INJECTED CONTEXT ({param}) ---\n{}\n",
                    found.effective_content()
                )),
                None => {
                    warnings.push(ResolveWarning::MissingParam {
                        unit: unit.id.clone(),
                        param: param.clone(),
                    });
                    context.push_str(&format!("\n--- PARAMETER: {param} ---\n"));
                }
            }
        }

        if context.is_empty() {
            return unit.raw_content.clone();
        }

        format!(
            "CONTEXT:\n{context}\n\
             RESOLUTION RULES:\n\
             1. Child logic overrides parent logic.\n\
             2. Use injected context as data/functions.\n\
             3. When inherited parents contradict each other, the last listed parent wins.\n\
             \n--- CHILD LOGIC ({}) ---\n{}",
            unit.id, unit.raw_content
        )
    }
}
