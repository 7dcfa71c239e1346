//! Design module: serializable descriptions of what a filter should be.
//!
//! A FilterDesign is independent of runtime objects. Widgets build designs,
//! the service turns them into filters, and filters turn back into designs
//! for change notifications.

use crate::datasource::{DataSourceList, FilterDataSource};
use crate::types::{CompoundType, FilterValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleFilterDesign {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub root: CompoundType,
    #[serde(default)]
    pub datastore: String,
    pub database: String,
    pub table: String,
    pub field: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FilterValue>,
}

impl SimpleFilterDesign {
    pub fn new(
        datastore: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: Option<FilterValue>,
    ) -> Self {
        Self {
            id: None,
            name: None,
            root: CompoundType::And,
            datastore: datastore.into(),
            database: database.into(),
            table: table.into(),
            field: field.into(),
            operator: operator.into(),
            value,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_root(mut self, root: CompoundType) -> Self {
        self.root = root;
        self
    }

    /// The column this design filters on, if database/table/field are all set.
    pub fn data_source(&self, ignore_operator: bool) -> Option<FilterDataSource> {
        if self.database.is_empty() || self.table.is_empty() || self.field.is_empty() {
            return None;
        }
        let source = FilterDataSource::new(&self.datastore, &self.database, &self.table, &self.field);
        Some(if ignore_operator { source } else { source.with_operator(&self.operator) })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundFilterDesign {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub root: CompoundType,
    #[serde(rename = "type")]
    pub compound_type: CompoundType,
    pub filters: Vec<FilterDesign>,
}

impl CompoundFilterDesign {
    pub fn new(compound_type: CompoundType, filters: Vec<FilterDesign>) -> Self {
        Self {
            id: None,
            name: None,
            root: CompoundType::And,
            compound_type,
            filters,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_root(mut self, root: CompoundType) -> Self {
        self.root = root;
        self
    }
}

/// A filter design: one field condition, or an AND/OR of nested designs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterDesign {
    // Tried first: `type` + `filters` is the stricter shape.
    Compound(CompoundFilterDesign),
    Simple(SimpleFilterDesign),
}

impl FilterDesign {
    pub fn id(&self) -> Option<&str> {
        match self {
            FilterDesign::Simple(s) => s.id.as_deref(),
            FilterDesign::Compound(c) => c.id.as_deref(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            FilterDesign::Simple(s) => s.name.as_deref(),
            FilterDesign::Compound(c) => c.name.as_deref(),
        }
    }

    pub fn root(&self) -> CompoundType {
        match self {
            FilterDesign::Simple(s) => s.root,
            FilterDesign::Compound(c) => c.root,
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, FilterDesign::Simple(_))
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, FilterDesign::Compound(_))
    }

    /// Every column this design touches, de-duplicated by equivalence.
    ///
    /// Simple designs missing a database, table or field contribute nothing.
    pub fn data_sources(&self, ignore_operator: bool) -> Vec<FilterDataSource> {
        match self {
            FilterDesign::Simple(s) => s.data_source(ignore_operator).into_iter().collect(),
            FilterDesign::Compound(c) => {
                let mut sources: Vec<FilterDataSource> = Vec::new();
                for nested in &c.filters {
                    for source in nested.data_sources(ignore_operator) {
                        if !sources.iter().any(|s| s.is_equivalent_to(&source, ignore_operator)) {
                            sources.push(source);
                        }
                    }
                }
                sources
            }
        }
    }

    pub fn data_source_list(&self, ignore_operator: bool) -> DataSourceList {
        DataSourceList::new(self.data_sources(ignore_operator))
    }
}

impl From<SimpleFilterDesign> for FilterDesign {
    fn from(design: SimpleFilterDesign) -> Self {
        FilterDesign::Simple(design)
    }
}

impl From<CompoundFilterDesign> for FilterDesign {
    fn from(design: CompoundFilterDesign) -> Self {
        FilterDesign::Compound(design)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(field: &str, operator: &str, value: i64) -> FilterDesign {
        SimpleFilterDesign::new("ds", "db", "tb", field, operator, Some(FilterValue::from(value))).into()
    }

    #[test]
    fn test_simple_design_data_source() {
        let sources = simple("f", "=", 1).data_sources(false);
        assert_eq!(sources, vec![FilterDataSource::new("ds", "db", "tb", "f").with_operator("=")]);
        let sources = simple("f", "=", 1).data_sources(true);
        assert_eq!(sources[0].operator, None);
    }

    #[test]
    fn test_incomplete_design_has_no_data_sources() {
        let design: FilterDesign = SimpleFilterDesign::new("ds", "db", "", "f", "=", None).into();
        assert!(design.data_sources(false).is_empty());
    }

    #[test]
    fn test_compound_design_unions_nested_sources() {
        let design: FilterDesign = CompoundFilterDesign::new(
            CompoundType::And,
            vec![
                simple("x", ">=", 0),
                simple("x", "<=", 10),
                simple("y", ">=", 0),
                simple("y", "<=", 10),
                simple("x", ">=", 5),
            ],
        )
        .into();
        assert_eq!(design.data_sources(false).len(), 4);
        assert_eq!(design.data_sources(true).len(), 2);
    }

    #[test]
    fn test_nested_compound_sources() {
        let inner: FilterDesign = CompoundFilterDesign::new(CompoundType::Or, vec![simple("a", "=", 1), simple("a", "=", 2)]).into();
        let outer: FilterDesign = CompoundFilterDesign::new(CompoundType::And, vec![inner, simple("b", "=", 3)]).into();
        let names: Vec<_> = outer.data_sources(false).into_iter().map(|s| s.field).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_variant_discrimination() {
        assert!(simple("f", "=", 1).is_simple());
        let compound: FilterDesign = CompoundFilterDesign::new(CompoundType::Or, vec![]).into();
        assert!(compound.is_compound());
        assert!(!compound.is_simple());
    }

    #[test]
    fn test_serialization_deserialization() {
        let design: FilterDesign = CompoundFilterDesign::new(CompoundType::Or, vec![simple("a", "=", 1)])
            .with_name("picked")
            .with_root(CompoundType::Or)
            .into();
        let json = serde_json::to_string(&design).unwrap();
        let deserialized: FilterDesign = serde_json::from_str(&json).unwrap();
        assert_eq!(design, deserialized);
    }
}
