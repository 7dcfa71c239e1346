//! Config module: the persisted filter shape and the dataset it refers to.
//!
//! This module provides FilterJson (the on-disk form of a filter), the
//! DatasetLookup seam used to resolve names when loading it, an in-memory
//! Dataset with a builder, and DashboardConfig tying them together.

use crate::datasource::RelationData;
use crate::design::{CompoundFilterDesign, FilterDesign, SimpleFilterDesign};
use crate::types::{CompoundType, FilterValue};
use crate::FilterSyncError;
use serde::{Deserialize, Serialize};

/// A filter as stored in a dashboard config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterJson {
    Compound {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root: Option<CompoundType>,
        #[serde(rename = "type")]
        compound_type: CompoundType,
        filters: Vec<FilterJson>,
    },
    Simple {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root: Option<CompoundType>,
        #[serde(default)]
        datastore: String,
        database: String,
        table: String,
        field: String,
        operator: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<FilterValue>,
    },
}

impl From<&FilterDesign> for FilterJson {
    fn from(design: &FilterDesign) -> Self {
        match design {
            FilterDesign::Simple(s) => FilterJson::Simple {
                name: s.name.clone(),
                root: Some(s.root),
                datastore: s.datastore.clone(),
                database: s.database.clone(),
                table: s.table.clone(),
                field: s.field.clone(),
                operator: s.operator.clone(),
                value: s.value.clone(),
            },
            FilterDesign::Compound(c) => FilterJson::Compound {
                name: c.name.clone(),
                root: Some(c.root),
                compound_type: c.compound_type,
                filters: c.filters.iter().map(FilterJson::from).collect(),
            },
        }
    }
}

impl FilterDesign {
    /// Resolve a persisted filter against the dataset.
    ///
    /// Every database, table and field must exist; the first unknown name
    /// fails the whole filter, nested filters included.
    pub fn from_json(json: &FilterJson, dataset: &impl DatasetLookup) -> Result<FilterDesign, FilterSyncError> {
        match json {
            FilterJson::Simple { name, root, datastore, database, table, field, operator, value } => {
                let database_meta = dataset
                    .get_database_with_name(datastore, database)
                    .ok_or_else(|| FilterSyncError::UnknownDatabase(format!("{}.{}", datastore, database)))?;
                let table_meta = dataset
                    .get_table_with_name(datastore, database, table)
                    .ok_or_else(|| FilterSyncError::UnknownTable(format!("{}.{}.{}", datastore, database, table)))?;
                let field_meta = dataset
                    .get_field_with_name(datastore, database, table, field)
                    .ok_or_else(|| FilterSyncError::UnknownField(format!("{}.{}.{}.{}", datastore, database, table, field)))?;
                Ok(FilterDesign::Simple(SimpleFilterDesign {
                    id: None,
                    name: name.clone(),
                    root: root.unwrap_or_default(),
                    datastore: datastore.clone(),
                    database: database_meta.name.clone(),
                    table: table_meta.name.clone(),
                    field: field_meta.to_string(),
                    operator: operator.clone(),
                    value: value.clone(),
                }))
            }
            FilterJson::Compound { name, root, compound_type, filters } => {
                let filters = filters
                    .iter()
                    .map(|nested| FilterDesign::from_json(nested, dataset))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FilterDesign::Compound(CompoundFilterDesign {
                    id: None,
                    name: name.clone(),
                    root: root.unwrap_or_default(),
                    compound_type: *compound_type,
                    filters,
                }))
            }
        }
    }
}

/// Name resolution against dataset metadata.
pub trait DatasetLookup {
    fn get_database_with_name(&self, datastore: &str, database: &str) -> Option<&DatabaseMetadata>;

    fn get_table_with_name(&self, datastore: &str, database: &str, table: &str) -> Option<&TableMetadata> {
        self.get_database_with_name(datastore, database)?
            .tables
            .iter()
            .find(|t| t.name == table)
    }

    fn get_field_with_name(&self, datastore: &str, database: &str, table: &str, field: &str) -> Option<&str> {
        self.get_table_with_name(datastore, database, table)?
            .fields
            .iter()
            .find(|f| f.as_str() == field)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub datastores: Vec<DatastoreMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatastoreMetadata {
    pub name: String,
    #[serde(default)]
    pub databases: Vec<DatabaseMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl DatasetLookup for Dataset {
    fn get_database_with_name(&self, datastore: &str, database: &str) -> Option<&DatabaseMetadata> {
        self.datastores
            .iter()
            .find(|d| d.name == datastore)?
            .databases
            .iter()
            .find(|d| d.name == database)
    }
}

#[derive(Debug, Default)]
pub struct DatasetBuilder {
    dataset: Dataset,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field, creating its datastore, database and table as needed.
    pub fn field(
        mut self,
        datastore: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        let (datastore, database, table, field) = (datastore.into(), database.into(), table.into(), field.into());
        let datastores = &mut self.dataset.datastores;
        let found = datastores.iter().position(|d| d.name == datastore);
        let store_index = match found {
            Some(i) => i,
            None => {
                datastores.push(DatastoreMetadata { name: datastore, databases: Vec::new() });
                datastores.len() - 1
            }
        };
        let databases = &mut datastores[store_index].databases;
        let found = databases.iter().position(|d| d.name == database);
        let database_index = match found {
            Some(i) => i,
            None => {
                databases.push(DatabaseMetadata { name: database, tables: Vec::new() });
                databases.len() - 1
            }
        };
        let tables = &mut databases[database_index].tables;
        let found = tables.iter().position(|t| t.name == table);
        let table_index = match found {
            Some(i) => i,
            None => {
                tables.push(TableMetadata { name: table, fields: Vec::new() });
                tables.len() - 1
            }
        };
        let fields = &mut tables[table_index].fields;
        if !fields.contains(&field) {
            fields.push(field);
        }
        self
    }

    pub fn build(self) -> Dataset {
        self.dataset
    }
}

/// Everything a dashboard persists about filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub dataset: Dataset,
    #[serde(default)]
    pub filters: Vec<FilterJson>,
    #[serde(default)]
    pub relations: RelationData,
}

impl DashboardConfig {
    pub fn from_json(json: &str) -> Result<Self, FilterSyncError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, FilterSyncError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
