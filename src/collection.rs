//! Collection module: active filters keyed by the data sources they touch.
//!
//! This module provides the FilterCollection type.

use crate::clause::FilterClause;
use crate::datasource::DataSourceList;
use crate::design::FilterDesign;
use crate::filter::Filter;
use indexmap::IndexMap;
use tracing::debug;

/// Maps each distinct data-source set to its ordered list of filters.
///
/// Keys are [`DataSourceList`]s, which compare by value, so every equivalent
/// list resolves to the one key registered first. Read accessors hand out
/// shared slices; the only way to change a list is [`FilterCollection::set_filters`].
#[derive(Debug, Clone)]
pub struct FilterCollection<C = FilterClause> {
    data: IndexMap<DataSourceList, Vec<Filter<C>>>,
}

impl<C> Default for FilterCollection<C> {
    fn default() -> Self {
        Self { data: IndexMap::new() }
    }
}

impl<C: Clone> FilterCollection<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical key for the design's data sources, registering it with
    /// an empty filter list if it is new.
    pub fn find_filter_data_sources(&mut self, design: &FilterDesign) -> DataSourceList {
        self.canonicalize(&design.data_source_list(false))
    }

    /// The filters stored under `key` (or an equivalent key). Unknown keys are
    /// registered with an empty list, so this always returns a list.
    pub fn get_filters(&mut self, key: &DataSourceList) -> &[Filter<C>] {
        let key = self.canonicalize(key);
        self.data.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Store `filters` under the canonical key for `key` and return that key.
    pub fn set_filters(&mut self, key: &DataSourceList, filters: Vec<Filter<C>>) -> DataSourceList {
        let key = self.canonicalize(key);
        self.data.insert(key.clone(), filters);
        key
    }

    /// Like [`FilterCollection::get_filters`] but never registers a key.
    pub fn lookup(&self, key: &DataSourceList) -> Option<&[Filter<C>]> {
        self.data.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, key: &DataSourceList) -> bool {
        self.data.contains_key(key)
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &DataSourceList> {
        self.data.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DataSourceList, &[Filter<C>])> {
        self.data.iter().map(|(key, filters)| (key, filters.as_slice()))
    }

    /// Every filter, in key order.
    pub fn all_filters(&self) -> impl Iterator<Item = &Filter<C>> {
        self.data.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// With a design: whether any filter is compatible with it. Without: whether
    /// any filter exists at all.
    pub fn is_filtered(&self, design: Option<&FilterDesign>) -> bool {
        match design {
            Some(design) => self.all_filters().any(|f| f.is_compatible_with_design(design)),
            None => self.data.values().any(|filters| !filters.is_empty()),
        }
    }

    fn canonicalize(&mut self, key: &DataSourceList) -> DataSourceList {
        if let Some((existing, _)) = self.data.get_key_value(key) {
            return existing.clone();
        }
        debug!(key = key.key(), sources = key.len(), "registering filter data sources");
        self.data.insert(key.clone(), Vec::new());
        key.clone()
    }
}
