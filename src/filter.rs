//! Filter module: runtime filter objects and their algebra.
//!
//! This module provides the Filter type (a simple field condition or an AND/OR
//! compound of nested filters) together with the checks the service relies on:
//! search relevance, design compatibility, structural equivalence and
//! relation substitution.

use crate::clause::{ClauseBuilder, FilterClause};
use crate::datasource::{DataSourceList, FilterDataSource, SingleField};
use crate::design::{CompoundFilterDesign, FilterDesign, SimpleFilterDesign};
use crate::types::{CompoundType, FilterValue};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Compound filters with more nested filters than this get abbreviated names.
const MAX_NAMED_FILTERS: usize = 5;

#[derive(Debug, Clone)]
pub struct SimpleFilter<C = FilterClause> {
    pub id: String,
    pub name: Option<String>,
    pub root: CompoundType,
    pub relations: Vec<String>,
    pub clause: C,
    pub datastore: String,
    pub database: String,
    pub table: String,
    pub field: String,
    pub operator: String,
    pub value: FilterValue,
}

#[derive(Debug, Clone)]
pub struct CompoundFilter<C = FilterClause> {
    pub id: String,
    pub name: Option<String>,
    pub root: CompoundType,
    pub relations: Vec<String>,
    pub clause: C,
    pub compound_type: CompoundType,
    pub filters: Vec<Filter<C>>,
}

/// An active filter.
///
/// Filters are values: once built they only change by having their relation
/// ids linked, which happens before they enter a collection.
#[derive(Debug, Clone)]
pub enum Filter<C = FilterClause> {
    Simple(SimpleFilter<C>),
    Compound(CompoundFilter<C>),
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl<C: Clone> Filter<C> {
    /// Build a filter from a design, or `None` if the design is incomplete.
    ///
    /// Simple designs need a database, table, field, operator and value.
    /// Nested designs of a compound that fail to convert are dropped. A
    /// compound with no nested filters is still a filter, on no data sources.
    pub fn from_design<B>(design: &FilterDesign, builder: &B) -> Option<Self>
    where
        B: ClauseBuilder<Clause = C>,
    {
        match design {
            FilterDesign::Simple(s) => {
                if s.database.is_empty() || s.table.is_empty() || s.field.is_empty() || s.operator.is_empty() {
                    debug!(field = %s.field, table = %s.table, "rejecting incomplete simple filter design");
                    return None;
                }
                let Some(value) = s.value.clone() else {
                    debug!(field = %s.field, "rejecting simple filter design without a value");
                    return None;
                };
                let clause = builder.build_filter_clause(&s.field, &s.operator, &value);
                Some(Filter::Simple(SimpleFilter {
                    id: s.id.clone().unwrap_or_else(generate_id),
                    name: s.name.clone(),
                    root: s.root,
                    relations: Vec::new(),
                    clause,
                    datastore: s.datastore.clone(),
                    database: s.database.clone(),
                    table: s.table.clone(),
                    field: s.field.clone(),
                    operator: s.operator.clone(),
                    value,
                }))
            }
            FilterDesign::Compound(c) => {
                let filters: Vec<Filter<C>> = c
                    .filters
                    .iter()
                    .filter_map(|nested| Filter::from_design(nested, builder))
                    .collect();
                if filters.len() < c.filters.len() {
                    debug!(
                        dropped = c.filters.len() - filters.len(),
                        "dropped invalid nested designs from compound filter"
                    );
                }
                let clauses = filters.iter().map(|f| f.clause().clone()).collect();
                let clause = builder.build_compound_filter_clause(clauses, c.compound_type);
                Some(Filter::Compound(CompoundFilter {
                    id: c.id.clone().unwrap_or_else(generate_id),
                    name: c.name.clone(),
                    root: c.root,
                    relations: Vec::new(),
                    clause,
                    compound_type: c.compound_type,
                    filters,
                }))
            }
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Filter::Simple(s) => &s.id,
            Filter::Compound(c) => &c.id,
        }
    }

    /// The custom name if one was given, else the generated description.
    pub fn name(&self) -> String {
        let custom = match self {
            Filter::Simple(s) => s.name.as_ref(),
            Filter::Compound(c) => c.name.as_ref(),
        };
        custom.cloned().unwrap_or_else(|| self.to_string())
    }

    pub fn root(&self) -> CompoundType {
        match self {
            Filter::Simple(s) => s.root,
            Filter::Compound(c) => c.root,
        }
    }

    /// Ids of the filters created together with this one as a relation group.
    pub fn relations(&self) -> &[String] {
        match self {
            Filter::Simple(s) => &s.relations,
            Filter::Compound(c) => &c.relations,
        }
    }

    pub(crate) fn set_relations(&mut self, relations: Vec<String>) {
        match self {
            Filter::Simple(s) => s.relations = relations,
            Filter::Compound(c) => c.relations = relations,
        }
    }

    pub fn clause(&self) -> &C {
        match self {
            Filter::Simple(s) => &s.clause,
            Filter::Compound(c) => &c.clause,
        }
    }

    pub fn data_sources(&self, ignore_operator: bool) -> Vec<FilterDataSource> {
        self.to_design().data_sources(ignore_operator)
    }

    pub fn data_source_list(&self, ignore_operator: bool) -> DataSourceList {
        DataSourceList::new(self.data_sources(ignore_operator))
    }

    /// Copy this filter onto the substitute fields of a relation.
    ///
    /// `equivalent_fields[i]` maps to `substitute_fields[i]`. A simple filter
    /// converts only if it sits on one of the equivalent fields; a compound
    /// filter converts every nested filter that can and keeps the rest, and
    /// returns `None` if nothing was substituted.
    pub fn create_relation_filter<B>(
        &self,
        equivalent_fields: &[SingleField],
        substitute_fields: &[SingleField],
        builder: &B,
    ) -> Option<Self>
    where
        B: ClauseBuilder<Clause = C>,
    {
        match self {
            Filter::Simple(s) => {
                if equivalent_fields.len() != substitute_fields.len() {
                    return None;
                }
                let index = equivalent_fields
                    .iter()
                    .position(|f| f.is_field(&s.datastore, &s.database, &s.table, &s.field))?;
                let substitute = &substitute_fields[index];
                let design = SimpleFilterDesign {
                    id: None,
                    name: None,
                    root: s.root,
                    datastore: substitute.datastore.clone(),
                    database: substitute.database.clone(),
                    table: substitute.table.clone(),
                    field: substitute.field.clone(),
                    operator: s.operator.clone(),
                    value: Some(s.value.clone()),
                };
                Filter::from_design(&design.into(), builder)
            }
            Filter::Compound(c) => {
                let mut substituted = false;
                let filters: Vec<FilterDesign> = c
                    .filters
                    .iter()
                    .map(|nested| match nested.create_relation_filter(equivalent_fields, substitute_fields, builder) {
                        Some(relation) => {
                            substituted = true;
                            relation.to_design()
                        }
                        None => nested.to_design(),
                    })
                    .collect();
                if !substituted {
                    return None;
                }
                let design = CompoundFilterDesign {
                    id: None,
                    name: None,
                    root: c.root,
                    compound_type: c.compound_type,
                    filters,
                };
                Filter::from_design(&design.into(), builder)
            }
        }
    }

    /// Whether a search on the given table must apply this filter.
    pub fn does_affect_search(&self, datastore: &str, database: &str, table: &str) -> bool {
        match self {
            Filter::Simple(s) => s.datastore == datastore && s.database == database && s.table == table,
            Filter::Compound(c) => c.filters.iter().any(|f| f.does_affect_search(datastore, database, table)),
        }
    }

    /// Whether this filter fits the shape described by `design`.
    ///
    /// A design without a value matches any value. For compound designs over
    /// several data sources the nested filters and designs must match one to
    /// one (order free, same count); over a single data source every nested
    /// design only needs some matching nested filter, so a multi-select with
    /// any number of values still matches.
    pub fn is_compatible_with_design(&self, design: &FilterDesign) -> bool {
        match (self, design) {
            (Filter::Simple(s), FilterDesign::Simple(d)) => {
                s.datastore == d.datastore
                    && s.database == d.database
                    && s.table == d.table
                    && s.field == d.field
                    && s.operator == d.operator
                    && s.root == d.root
                    && d.value.as_ref().map_or(true, |value| *value == s.value)
            }
            (Filter::Compound(c), FilterDesign::Compound(d)) => {
                if c.compound_type != d.compound_type || c.root != d.root {
                    return false;
                }
                let every_design_matched = d
                    .filters
                    .iter()
                    .all(|nested| c.filters.iter().any(|f| f.is_compatible_with_design(nested)));
                if design.data_sources(false).len() > 1 {
                    c.filters.len() == d.filters.len()
                        && every_design_matched
                        && c.filters
                            .iter()
                            .all(|f| d.filters.iter().any(|nested| f.is_compatible_with_design(nested)))
                } else {
                    every_design_matched
                }
            }
            _ => false,
        }
    }

    /// Structural equality, ignoring ids, names and relations. Order matters
    /// for nested filters.
    pub fn is_equivalent_to_filter(&self, other: &Filter<C>) -> bool {
        match (self, other) {
            (Filter::Simple(a), Filter::Simple(b)) => {
                a.root == b.root
                    && a.datastore == b.datastore
                    && a.database == b.database
                    && a.table == b.table
                    && a.field == b.field
                    && a.operator == b.operator
                    && a.value == b.value
            }
            (Filter::Compound(a), Filter::Compound(b)) => {
                a.root == b.root
                    && a.compound_type == b.compound_type
                    && a.filters.len() == b.filters.len()
                    && a.filters.iter().zip(&b.filters).all(|(x, y)| x.is_equivalent_to_filter(y))
            }
            _ => false,
        }
    }

    pub fn to_design(&self) -> FilterDesign {
        match self {
            Filter::Simple(s) => FilterDesign::Simple(SimpleFilterDesign {
                id: Some(s.id.clone()),
                name: s.name.clone(),
                root: s.root,
                datastore: s.datastore.clone(),
                database: s.database.clone(),
                table: s.table.clone(),
                field: s.field.clone(),
                operator: s.operator.clone(),
                value: Some(s.value.clone()),
            }),
            Filter::Compound(c) => FilterDesign::Compound(CompoundFilterDesign {
                id: Some(c.id.clone()),
                name: c.name.clone(),
                root: c.root,
                compound_type: c.compound_type,
                filters: c.filters.iter().map(Filter::to_design).collect(),
            }),
        }
    }

    fn collect_simple<'a>(&'a self, out: &mut Vec<&'a SimpleFilter<C>>) {
        match self {
            Filter::Simple(s) => out.push(s),
            Filter::Compound(c) => c.filters.iter().for_each(|f| f.collect_simple(out)),
        }
    }
}

impl<C: Clone> fmt::Display for Filter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Simple(s) => write!(f, "{} / {} / {} {} {}", s.database, s.table, s.field, s.operator, s.value),
            Filter::Compound(c) => {
                let parts: Vec<String> = if c.filters.len() > MAX_NAMED_FILTERS {
                    // (field, operator, count) in order of first appearance
                    let mut simple = Vec::new();
                    c.filters.iter().for_each(|nested| nested.collect_simple(&mut simple));
                    let mut groups: Vec<(&str, &str, usize)> = Vec::new();
                    for s in simple {
                        match groups.iter_mut().find(|(field, op, _)| *field == s.field && *op == s.operator) {
                            Some(group) => group.2 += 1,
                            None => groups.push((s.field.as_str(), s.operator.as_str(), 1)),
                        }
                    }
                    groups
                        .into_iter()
                        .map(|(field, op, count)| format!("{} {} {} FILTERS", field, op, count))
                        .collect()
                } else {
                    c.filters.iter().map(|nested| nested.to_string()).collect()
                };
                write!(f, "({})", parts.join(&format!(") {} (", c.compound_type)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::DefaultClauseBuilder;

    fn simple_design(table: &str, field: &str, operator: &str, value: i64) -> FilterDesign {
        SimpleFilterDesign::new("ds", "db", table, field, operator, Some(FilterValue::from(value))).into()
    }

    fn filter(design: &FilterDesign) -> Filter {
        Filter::from_design(design, &DefaultClauseBuilder).unwrap()
    }

    fn box_design(value: Option<i64>) -> FilterDesign {
        let nested = |field: &str, op: &str| -> FilterDesign {
            SimpleFilterDesign::new("ds", "db", "tb", field, op, value.map(FilterValue::from)).into()
        };
        CompoundFilterDesign::new(
            CompoundType::And,
            vec![nested("x", ">="), nested("x", "<="), nested("y", ">="), nested("y", "<=")],
        )
        .into()
    }

    #[test]
    fn test_from_design_simple() {
        let f = filter(&simple_design("tb", "f", "=", 5));
        match &f {
            Filter::Simple(s) => {
                assert_eq!(s.field, "f");
                assert_eq!(s.value, FilterValue::Int(5));
                assert_eq!(s.root, CompoundType::And);
                assert!(!s.id.is_empty());
            }
            _ => panic!("Expected simple filter"),
        }
        assert_eq!(f.to_string(), "db / tb / f = 5");
        assert_eq!(
            f.clause(),
            &FilterClause::Where { field: "f".to_string(), operator: "=".to_string(), value: FilterValue::Int(5) }
        );
    }

    #[test]
    fn test_from_design_rejects_incomplete() {
        let builder = DefaultClauseBuilder;
        let no_value: FilterDesign = SimpleFilterDesign::new("ds", "db", "tb", "f", "=", None).into();
        assert!(Filter::from_design(&no_value, &builder).is_none());
        let no_field: FilterDesign = SimpleFilterDesign::new("ds", "db", "tb", "", "=", Some(1.into())).into();
        assert!(Filter::from_design(&no_field, &builder).is_none());
        let no_operator: FilterDesign = SimpleFilterDesign::new("ds", "db", "tb", "f", "", Some(1.into())).into();
        assert!(Filter::from_design(&no_operator, &builder).is_none());
    }

    #[test]
    fn test_from_design_drops_invalid_nested() {
        let design: FilterDesign = CompoundFilterDesign::new(
            CompoundType::Or,
            vec![
                simple_design("tb", "f", "=", 1),
                SimpleFilterDesign::new("ds", "db", "tb", "f", "=", None).into(),
            ],
        )
        .into();
        match filter(&design) {
            Filter::Compound(c) => assert_eq!(c.filters.len(), 1),
            _ => panic!("Expected compound filter"),
        }
    }

    #[test]
    fn test_empty_compound_round_trips() {
        let empty: FilterDesign = CompoundFilterDesign::new(CompoundType::Or, vec![]).with_id("none").into();
        let f = filter(&empty);
        assert!(f.data_sources(false).is_empty());
        assert!(!f.does_affect_search("ds", "db", "tb"));
        assert_eq!(f.clause(), &FilterClause::Compound { compound_type: CompoundType::Or, clauses: vec![] });
        assert_eq!(f.to_design(), empty);
    }

    #[test]
    fn test_to_design_preserves_id_name_root() {
        let design: FilterDesign = SimpleFilterDesign::new("ds", "db", "tb", "f", "!=", Some("x".into()))
            .with_id("id-1")
            .with_name("not x")
            .with_root(CompoundType::Or)
            .into();
        assert_eq!(filter(&design).to_design(), design);
    }

    #[test]
    fn test_name_defaults_to_description() {
        let f = filter(&simple_design("tb", "f", ">", 3));
        assert_eq!(f.name(), "db / tb / f > 3");
        let named = filter(&SimpleFilterDesign::new("ds", "db", "tb", "f", ">", Some(3.into())).with_name("big").into());
        assert_eq!(named.name(), "big");
    }

    #[test]
    fn test_compound_name_abbreviates_long_lists() {
        let short: FilterDesign =
            CompoundFilterDesign::new(CompoundType::Or, vec![simple_design("tb", "f", "=", 1), simple_design("tb", "f", "=", 2)]).into();
        assert_eq!(filter(&short).to_string(), "(db / tb / f = 1) OR (db / tb / f = 2)");

        let mut nested: Vec<FilterDesign> = (0..6).map(|i| simple_design("tb", "f", "=", i)).collect();
        nested.push(simple_design("tb", "g", "!=", 0));
        let long: FilterDesign = CompoundFilterDesign::new(CompoundType::Or, nested).into();
        assert_eq!(filter(&long).to_string(), "(f = 6 FILTERS) OR (g != 1 FILTERS)");
    }

    #[test]
    fn test_simple_does_affect_search() {
        let f = filter(&simple_design("tb", "f", "=", 1));
        assert!(f.does_affect_search("ds", "db", "tb"));
        assert!(!f.does_affect_search("ds", "db", "other"));
        assert!(!f.does_affect_search("other", "db", "tb"));
    }

    #[test]
    fn test_compound_does_affect_search_any_nested() {
        let design: FilterDesign =
            CompoundFilterDesign::new(CompoundType::And, vec![simple_design("a", "f", "=", 1), simple_design("b", "f", "=", 1)]).into();
        let f = filter(&design);
        assert!(f.does_affect_search("ds", "db", "a"));
        assert!(f.does_affect_search("ds", "db", "b"));
        assert!(!f.does_affect_search("ds", "db", "c"));
    }

    #[test]
    fn test_simple_compatibility_value_optional() {
        let f = filter(&simple_design("tb", "f", "=", 1));
        assert!(f.is_compatible_with_design(&simple_design("tb", "f", "=", 1)));
        assert!(!f.is_compatible_with_design(&simple_design("tb", "f", "=", 2)));
        assert!(!f.is_compatible_with_design(&simple_design("tb", "f", "!=", 1)));
        let any_value: FilterDesign = SimpleFilterDesign::new("ds", "db", "tb", "f", "=", None).into();
        assert!(f.is_compatible_with_design(&any_value));
        let or_root: FilterDesign = SimpleFilterDesign::new("ds", "db", "tb", "f", "=", None).with_root(CompoundType::Or).into();
        assert!(!f.is_compatible_with_design(&or_root));
    }

    #[test]
    fn test_compound_compatibility_fixed_shape() {
        let f = filter(&box_design(Some(1)));
        assert!(f.is_compatible_with_design(&box_design(None)));

        // Same sources, one clause short: the bijection fails.
        let three: FilterDesign = match box_design(None) {
            FilterDesign::Compound(mut c) => {
                c.filters.pop();
                c.into()
            }
            other => other,
        };
        assert!(!f.is_compatible_with_design(&three));

        let or_box: FilterDesign = match box_design(None) {
            FilterDesign::Compound(c) => CompoundFilterDesign { compound_type: CompoundType::Or, ..c }.into(),
            other => other,
        };
        assert!(!f.is_compatible_with_design(&or_box));
    }

    #[test]
    fn test_compound_compatibility_single_source_any_count() {
        let picked: FilterDesign = CompoundFilterDesign::new(
            CompoundType::Or,
            vec![simple_design("tb", "f", "=", 1), simple_design("tb", "f", "=", 2), simple_design("tb", "f", "=", 3)],
        )
        .into();
        let f = filter(&picked);
        let template: FilterDesign = CompoundFilterDesign::new(
            CompoundType::Or,
            vec![SimpleFilterDesign::new("ds", "db", "tb", "f", "=", None).into()],
        )
        .into();
        assert!(f.is_compatible_with_design(&template));
        assert!(!f.is_compatible_with_design(&simple_design("tb", "f", "=", 1)));
    }

    #[test]
    fn test_equivalence_ignores_ids_but_not_order() {
        let a = filter(&simple_design("tb", "f", "=", 1));
        let b = filter(&simple_design("tb", "f", "=", 1));
        assert_ne!(a.id(), b.id());
        assert!(a.is_equivalent_to_filter(&b));
        assert!(!a.is_equivalent_to_filter(&filter(&simple_design("tb", "f", "=", 2))));

        let ab: FilterDesign =
            CompoundFilterDesign::new(CompoundType::Or, vec![simple_design("tb", "f", "=", 1), simple_design("tb", "f", "=", 2)]).into();
        let ba: FilterDesign =
            CompoundFilterDesign::new(CompoundType::Or, vec![simple_design("tb", "f", "=", 2), simple_design("tb", "f", "=", 1)]).into();
        assert!(filter(&ab).is_equivalent_to_filter(&filter(&ab)));
        assert!(!filter(&ab).is_equivalent_to_filter(&filter(&ba)));
        assert!(!filter(&ab).is_equivalent_to_filter(&a));
    }

    #[test]
    fn test_simple_relation_filter() {
        let f = filter(
            &SimpleFilterDesign::new("x", "d1", "t1", "f1", "=", Some(7.into()))
                .with_root(CompoundType::Or)
                .into(),
        );
        let equivalent = vec![SingleField::new("x", "d1", "t1", "f1")];
        let substitute = vec![SingleField::new("x", "d2", "t2", "f2")];
        let relation = f.create_relation_filter(&equivalent, &substitute, &DefaultClauseBuilder).unwrap();
        match &relation {
            Filter::Simple(s) => {
                assert_eq!((s.database.as_str(), s.table.as_str(), s.field.as_str()), ("d2", "t2", "f2"));
                assert_eq!(s.operator, "=");
                assert_eq!(s.value, FilterValue::Int(7));
                assert_eq!(s.root, CompoundType::Or);
            }
            _ => panic!("Expected simple relation filter"),
        }
        assert_ne!(relation.id(), f.id());

        let unrelated = vec![SingleField::new("x", "d9", "t9", "f9")];
        assert!(f.create_relation_filter(&unrelated, &substitute, &DefaultClauseBuilder).is_none());
        assert!(f.create_relation_filter(&equivalent, &[], &DefaultClauseBuilder).is_none());
    }

    #[test]
    fn test_compound_relation_filter_substitutes_matching_nested() {
        let design: FilterDesign = CompoundFilterDesign::new(
            CompoundType::And,
            vec![simple_design("t1", "lat", ">", 1), simple_design("t1", "lon", ">", 2), simple_design("t1", "z", "=", 3)],
        )
        .into();
        let f = filter(&design);
        let equivalent = vec![SingleField::new("ds", "db", "t1", "lat"), SingleField::new("ds", "db", "t1", "lon")];
        let substitute = vec![SingleField::new("ds", "db", "t2", "latitude"), SingleField::new("ds", "db", "t2", "longitude")];
        let relation = f.create_relation_filter(&equivalent, &substitute, &DefaultClauseBuilder).unwrap();
        let fields: Vec<(String, String)> = relation
            .data_sources(true)
            .into_iter()
            .map(|s| (s.table, s.field))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("t2".to_string(), "latitude".to_string()),
                ("t2".to_string(), "longitude".to_string()),
                ("t1".to_string(), "z".to_string()),
            ]
        );

        let unrelated = vec![SingleField::new("ds", "db", "t9", "a"), SingleField::new("ds", "db", "t9", "b")];
        assert!(f.create_relation_filter(&unrelated, &substitute, &DefaultClauseBuilder).is_none());
    }
}
