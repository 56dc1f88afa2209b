//! Queries that select struct instances, either by type or by following struct-typed fields.

use std::fmt::{self, Write};

use crate::{ast::indent, Expr, VariableSource};

/// A literal filter `field=value`, matching the field's preview text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralCondition {
    /// The field name.
    pub field: String,
    /// The expected preview.
    pub value: String,
}

/// An expression filter `#name=expr`, after the expression has been evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntCondition {
    /// The field, argument or parameter name.
    pub name: String,
    /// The expected value.
    pub value: i64,
}

/// The filters attached to one step of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    /// `field=value` filters.
    pub conditions: Vec<LiteralCondition>,
    /// `#name=expr` filters.
    pub expr_conditions: Vec<(String, Expr)>,
    /// The `#=expr` selector.
    pub selector: Option<Box<Expr>>,
}

impl Filters {
    /// Return true if no filter is present.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.expr_conditions.is_empty() && self.selector.is_none()
    }

    fn dump_to(&self, out: &mut String, level: usize) -> fmt::Result {
        for condition in &self.conditions {
            write!(out, " \"{}\"=\"{}\"", condition.field, condition.value)?;
        }
        writeln!(out)?;
        for (name, expr) in &self.expr_conditions {
            indent(out, level + 1);
            writeln!(out, "#{}=", name)?;
            expr.dump_to(out, level + 2)?;
        }
        if let Some(selector) = &self.selector {
            indent(out, level + 1);
            writeln!(out, "#=")?;
            selector.dump_to(out, level + 2)?;
        }
        Ok(())
    }
}

/// The membership filters passed to a [VariableSource] query.
///
/// The selector is not included. It is applied to the result afterwards.
#[derive(Debug, Clone, Copy)]
pub struct QueryFilter<'a> {
    /// Literal preview conditions.
    pub conditions: &'a [LiteralCondition],
    /// Evaluated expression conditions.
    pub int_conditions: &'a [IntCondition],
}

impl QueryFilter<'_> {
    /// A filter that accepts every instance.
    pub const NONE: QueryFilter<'static> = QueryFilter {
        conditions: &[],
        int_conditions: &[],
    };

    /// Return true if the filter accepts every instance.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.int_conditions.is_empty()
    }
}

/// A compiled query.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// `#Type[filters]`: live instances of a struct type.
    Root {
        /// The struct definition name.
        type_name: String,
        /// Whether instances in every file are considered, not just the current one.
        global: bool,
        /// The filters.
        filters: Filters,
    },
    /// `parent.field[filters]`: the child instances of a struct-typed field.
    ///
    /// Without a parent, the field is taken from the evaluation root.
    Sub {
        /// The query producing the parent instances.
        parent: Option<Box<Query>>,
        /// The struct-typed field name.
        field: String,
        /// The filters.
        filters: Filters,
    },
    /// A query that failed to compile. Always empty.
    Error,
}

impl Query {
    /// Run the query, returning matching instances.
    ///
    /// Results are in creation order unless a selector reduced them to a single instance.
    pub fn execute<V: VariableSource>(&self, vs: &V) -> Vec<V::Instance> {
        match self {
            Query::Root {
                type_name,
                global,
                filters,
            } => {
                let int_conditions = evaluate_conditions(filters, vs);
                let filter = QueryFilter {
                    conditions: &filters.conditions,
                    int_conditions: &int_conditions,
                };
                let found = vs.root_query(type_name, *global, &filter);
                apply_selector(filters, vs, found)
            }
            Query::Sub {
                parent,
                field,
                filters,
            } => {
                let source = match parent {
                    Some(parent) => parent.execute(vs),
                    None => vs.initial_set(),
                };
                let int_conditions = evaluate_conditions(filters, vs);
                let filter = QueryFilter {
                    conditions: &filters.conditions,
                    int_conditions: &int_conditions,
                };
                let found = vs.subquery(&source, field, &filter);
                apply_selector(filters, vs, found)
            }
            Query::Error => Vec::new(),
        }
    }

    /// Render the query tree, one node per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = self.dump_to(&mut out, 0);
        out
    }

    pub(crate) fn dump_to(&self, out: &mut String, level: usize) -> fmt::Result {
        indent(out, level);
        match self {
            Query::Root {
                type_name,
                global,
                filters,
            } => {
                write!(
                    out,
                    "root{} query \"{}\"",
                    if *global { " (global)" } else { "" },
                    type_name
                )?;
                filters.dump_to(out, level)
            }
            Query::Sub {
                parent,
                field,
                filters,
            } => {
                write!(out, "subfield query \"{}\"", field)?;
                filters.dump_to(out, level)?;
                match parent {
                    Some(parent) => parent.dump_to(out, level + 1),
                    None => Ok(()),
                }
            }
            Query::Error => writeln!(out, "ERROR"),
        }
    }
}

fn evaluate_conditions<V: VariableSource>(filters: &Filters, vs: &V) -> Vec<IntCondition> {
    filters
        .expr_conditions
        .iter()
        .map(|(name, expr)| IntCondition {
            name: name.clone(),
            value: expr.evaluate(vs),
        })
        .collect()
}

/// Reduce `found` to the element with the n-th smallest offset.
///
/// Ties keep creation order. A negative or out of range index gives an empty result.
fn apply_selector<V: VariableSource>(
    filters: &Filters,
    vs: &V,
    mut found: Vec<V::Instance>,
) -> Vec<V::Instance> {
    let nth = match &filters.selector {
        Some(selector) => selector.evaluate(vs),
        None => return found,
    };
    let nth = match usize::try_from(nth) {
        Ok(nth) if nth < found.len() => nth,
        _ => return Vec::new(),
    };
    found.sort_by_key(|inst| vs.instance_offset(inst));
    vec![found.swap_remove(nth)]
}
