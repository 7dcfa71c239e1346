//! Clause module: the seam to the backend search service.
//!
//! Filters never look inside a clause. They ask a ClauseBuilder for one when
//! they are created and hand it back when a query needs it.

use crate::types::{CompoundType, FilterValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Builds backend-specific filter clauses.
pub trait ClauseBuilder {
    type Clause: Clone + fmt::Debug;

    fn build_filter_clause(&self, field: &str, operator: &str, value: &FilterValue) -> Self::Clause;

    fn build_compound_filter_clause(&self, clauses: Vec<Self::Clause>, compound_type: CompoundType) -> Self::Clause;
}

/// A backend-neutral clause tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterClause {
    Where {
        field: String,
        operator: String,
        value: FilterValue,
    },
    Compound {
        #[serde(rename = "type")]
        compound_type: CompoundType,
        clauses: Vec<FilterClause>,
    },
}

impl fmt::Display for FilterClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterClause::Where { field, operator, value } => write!(f, "{} {} {}", field, operator, value),
            FilterClause::Compound { compound_type, clauses } => {
                write!(f, "(")?;
                for (i, clause) in clauses.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", compound_type)?;
                    }
                    write!(f, "{}", clause)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Builds [`FilterClause`] trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClauseBuilder;

impl ClauseBuilder for DefaultClauseBuilder {
    type Clause = FilterClause;

    fn build_filter_clause(&self, field: &str, operator: &str, value: &FilterValue) -> FilterClause {
        FilterClause::Where {
            field: field.to_string(),
            operator: operator.to_string(),
            value: value.clone(),
        }
    }

    fn build_compound_filter_clause(&self, clauses: Vec<FilterClause>, compound_type: CompoundType) -> FilterClause {
        FilterClause::Compound { compound_type, clauses }
    }
}
