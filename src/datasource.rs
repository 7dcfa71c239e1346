//! Data source module: identifies what a filter is about.
//!
//! A FilterDataSource names one filterable column. A DataSourceList names the
//! full (unordered) set of columns a possibly compound filter touches, and is
//! the key type of the filter collection.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::{Hash, Hasher};

const PART_SEPARATOR: char = '\u{1f}';
const ITEM_SEPARATOR: char = '\u{1e}';

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterDataSource {
    pub datastore: String,
    pub database: String,
    pub table: String,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

impl FilterDataSource {
    pub fn new(
        datastore: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            datastore: datastore.into(),
            database: database.into(),
            table: table.into(),
            field: field.into(),
            operator: None,
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    /// Field-wise equality, optionally ignoring the operator.
    pub fn is_equivalent_to(&self, other: &FilterDataSource, ignore_operator: bool) -> bool {
        self.datastore == other.datastore
            && self.database == other.database
            && self.table == other.table
            && self.field == other.field
            && (ignore_operator || self.operator == other.operator)
    }

    fn canonical_key(&self) -> String {
        // `None` and `Some("")` must not collide.
        let operator = match &self.operator {
            Some(op) => format!("+{}", op),
            None => String::new(),
        };
        format!(
            "{}{sep}{}{sep}{}{sep}{}{sep}{}",
            self.datastore,
            self.database,
            self.table,
            self.field,
            operator,
            sep = PART_SEPARATOR
        )
    }
}

/// True iff both lists have the same length and every item of each list has
/// an equivalent item in the other.
pub fn are_filter_data_source_lists_equivalent(a: &[FilterDataSource], b: &[FilterDataSource]) -> bool {
    a.len() == b.len()
        && a.iter().all(|x| b.iter().any(|y| x.is_equivalent_to(y, false)))
        && b.iter().all(|y| a.iter().any(|x| x.is_equivalent_to(y, false)))
}

/// A set of data sources compared by value.
///
/// Equality and hashing go through a canonical key (item count plus the sorted,
/// de-duplicated item keys), which agrees with
/// [`are_filter_data_source_lists_equivalent`]. Two equivalent lists therefore
/// always land on the same map entry.
#[derive(Debug, Clone)]
pub struct DataSourceList {
    sources: Vec<FilterDataSource>,
    key: String,
}

impl DataSourceList {
    pub fn new(sources: Vec<FilterDataSource>) -> Self {
        let mut keys: Vec<String> = sources.iter().map(FilterDataSource::canonical_key).collect();
        keys.sort();
        keys.dedup();
        let sep = ITEM_SEPARATOR.to_string();
        let key = format!("{}#{}", sources.len(), keys.join(&sep));
        Self { sources, key }
    }

    pub fn sources(&self) -> &[FilterDataSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FilterDataSource> {
        self.sources.iter()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_equivalent_to(&self, other: &DataSourceList) -> bool {
        are_filter_data_source_lists_equivalent(&self.sources, &other.sources)
    }
}

impl PartialEq for DataSourceList {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DataSourceList {}

impl Hash for DataSourceList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl From<Vec<FilterDataSource>> for DataSourceList {
    fn from(sources: Vec<FilterDataSource>) -> Self {
        DataSourceList::new(sources)
    }
}

impl FromIterator<FilterDataSource> for DataSourceList {
    fn from_iter<I: IntoIterator<Item = FilterDataSource>>(iter: I) -> Self {
        DataSourceList::new(iter.into_iter().collect())
    }
}

impl Serialize for DataSourceList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.sources.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataSourceList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<FilterDataSource>::deserialize(deserializer).map(DataSourceList::new)
    }
}

/// One column referenced by relation data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SingleField {
    #[serde(default)]
    pub datastore: String,
    pub database: String,
    pub table: String,
    pub field: String,
}

impl SingleField {
    pub fn new(
        datastore: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            datastore: datastore.into(),
            database: database.into(),
            table: table.into(),
            field: field.into(),
        }
    }

    /// Matches a data source on datastore/database/table/field (operator ignored).
    pub fn matches(&self, source: &FilterDataSource) -> bool {
        self.datastore == source.datastore
            && self.database == source.database
            && self.table == source.table
            && self.field == source.field
    }

    pub fn is_field(&self, datastore: &str, database: &str, table: &str, field: &str) -> bool {
        self.datastore == datastore && self.database == database && self.table == table && self.field == field
    }
}

/// Ordered fields that must appear together.
pub type RelationGroup = Vec<SingleField>;
/// Groups of fields that hold equivalent data across datastores or tables.
pub type Relation = Vec<RelationGroup>;
/// Every relation known to the dashboard.
pub type RelationData = Vec<Relation>;
