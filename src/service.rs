//! Service module: coordinates filters across every widget of a dashboard.
//!
//! This module provides the FilterService type. It owns the global filter
//! collection, turns widget designs into filters (plus their relation
//! siblings), and publishes one FILTERS_CHANGED event per effective change.

use crate::clause::{ClauseBuilder, FilterClause};
use crate::collection::FilterCollection;
use crate::config::{DatasetLookup, FilterJson};
use crate::datasource::{DataSourceList, Relation};
use crate::design::FilterDesign;
use crate::filter::Filter;
use crate::messenger::{EventBus, FilterChange, FiltersChanged, Messenger, FILTERS_CHANGED};
use crate::types::CompoundType;
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{debug, info, trace, warn};

type PendingFilters<C> = IndexMap<DataSourceList, Vec<Filter<C>>>;

/// A widget's interest in a filter shape, with the callback to run when the
/// matching global filters change.
pub struct FilterBehavior<C = FilterClause> {
    pub design: FilterDesign,
    pub redraw: Box<dyn FnMut(&[Filter<C>])>,
}

impl<C> FilterBehavior<C> {
    pub fn new(design: FilterDesign, redraw: impl FnMut(&[Filter<C>]) + 'static) -> Self {
        Self { design, redraw: Box::new(redraw) }
    }
}

pub struct FilterService<C = FilterClause, M = EventBus> {
    collection: FilterCollection<C>,
    messenger: M,
}

impl<C: Clone, M: Messenger> FilterService<C, M> {
    pub fn new(messenger: M) -> Self {
        Self { collection: FilterCollection::new(), messenger }
    }

    pub fn messenger(&self) -> &M {
        &self.messenger
    }

    pub fn collection(&self) -> &FilterCollection<C> {
        &self.collection
    }

    /// Replace the filters on the data sources of `designs` with exactly the
    /// filters built from them (and their relation siblings).
    ///
    /// Filters matching `designs_to_delete` are removed too. Any filter whose
    /// id appears in the relations of a replaced or deleted filter is removed
    /// wherever it lives.
    pub fn exchange_filters<B>(
        &mut self,
        caller_id: &str,
        designs: &[FilterDesign],
        relations: &[Relation],
        builder: &B,
        designs_to_delete: &[FilterDesign],
    ) -> FilterChange
    where
        B: ClauseBuilder<Clause = C>,
    {
        let mut pending: PendingFilters<C> = IndexMap::new();
        for design in designs {
            let Some(filter) = Filter::from_design(design, builder) else {
                debug!(caller = caller_id, "skipping invalid filter design");
                continue;
            };
            for f in with_relation_filters(filter, relations, builder) {
                pending.entry(f.data_source_list(false)).or_default().push(f);
            }
        }

        let mut delete_ids = HashSet::new();
        for key in pending.keys() {
            if let Some(existing) = self.collection.lookup(key) {
                existing.iter().for_each(|f| mark_deleted(f, &mut delete_ids));
            }
        }
        for design in designs_to_delete {
            self.matching_filters(design)
                .into_iter()
                .for_each(|f| mark_deleted(f, &mut delete_ids));
        }
        // A design may carry the id of the filter it replaces.
        for f in pending.values().flatten() {
            delete_ids.remove(f.id());
        }

        self.commit(caller_id, pending, &delete_ids)
    }

    /// Add each design's filter, or remove every existing equivalent filter
    /// (with its relation siblings) if there are any.
    pub fn toggle_filters<B>(
        &mut self,
        caller_id: &str,
        designs: &[FilterDesign],
        relations: &[Relation],
        builder: &B,
    ) -> FilterChange
    where
        B: ClauseBuilder<Clause = C>,
    {
        let mut pending: PendingFilters<C> = IndexMap::new();
        let mut delete_ids = HashSet::new();
        for design in designs {
            let Some(filter) = Filter::from_design(design, builder) else {
                debug!(caller = caller_id, "skipping invalid filter design");
                continue;
            };
            let key = filter.data_source_list(false);
            let current = self.pending_entry(&mut pending, key);
            let before = current.len();
            current.retain(|existing| {
                let equivalent = filter.is_equivalent_to_filter(existing);
                if equivalent {
                    mark_deleted(existing, &mut delete_ids);
                }
                !equivalent
            });
            if current.len() == before {
                for f in with_relation_filters(filter, relations, builder) {
                    let key = f.data_source_list(false);
                    self.pending_entry(&mut pending, key).push(f);
                }
            }
        }
        self.commit(caller_id, pending, &delete_ids)
    }

    /// Remove the first filter matching `design`, plus its relation siblings.
    pub fn delete_filter(&mut self, caller_id: &str, design: &FilterDesign) -> FilterChange {
        let mut delete_ids = HashSet::new();
        if let Some(filter) = self.matching_filters(design).into_iter().next() {
            mark_deleted(filter, &mut delete_ids);
        }
        self.commit(caller_id, IndexMap::new(), &delete_ids)
    }

    /// Remove every filter matching any of `designs`, plus relation siblings.
    /// With no designs, remove every filter.
    pub fn delete_filters(&mut self, caller_id: &str, designs: &[FilterDesign]) -> FilterChange {
        let mut delete_ids = HashSet::new();
        if designs.is_empty() {
            self.collection
                .all_filters()
                .for_each(|f| mark_deleted(f, &mut delete_ids));
        }
        for design in designs {
            self.matching_filters(design)
                .into_iter()
                .for_each(|f| mark_deleted(f, &mut delete_ids));
        }
        self.commit(caller_id, IndexMap::new(), &delete_ids)
    }

    /// Designs of the filters on `data_sources`, or of every filter.
    pub fn get_filters(&self, data_sources: Option<&DataSourceList>) -> Vec<FilterDesign> {
        self.get_raw_filters(data_sources).iter().map(Filter::to_design).collect()
    }

    pub fn get_raw_filters(&self, data_sources: Option<&DataSourceList>) -> Vec<Filter<C>> {
        match data_sources {
            Some(key) => self.collection.lookup(key).map(<[_]>::to_vec).unwrap_or_default(),
            None => self.collection.all_filters().cloned().collect(),
        }
    }

    /// Global filters compatible with `design`.
    pub fn get_compatible_filters(&self, design: &FilterDesign) -> Vec<Filter<C>> {
        self.collection
            .lookup(&design.data_source_list(false))
            .unwrap_or(&[])
            .iter()
            .filter(|f| f.is_compatible_with_design(design))
            .cloned()
            .collect()
    }

    /// The clauses a search on the given table must apply.
    ///
    /// For each data source not covered by `designs_to_ignore`, the filters
    /// affecting the table are split by root; each non-empty bucket yields one
    /// clause (compound when it holds more than one filter).
    pub fn get_filters_to_search<B>(
        &self,
        datastore: &str,
        database: &str,
        table: &str,
        builder: &B,
        designs_to_ignore: &[FilterDesign],
    ) -> Vec<C>
    where
        B: ClauseBuilder<Clause = C>,
    {
        let ignored: HashSet<DataSourceList> = designs_to_ignore.iter().map(|d| d.data_source_list(false)).collect();
        let mut clauses = Vec::new();
        for (key, filters) in self.collection.iter() {
            if ignored.contains(key) {
                continue;
            }
            let (and_clauses, or_clauses): (Vec<&Filter<C>>, Vec<&Filter<C>>) = filters
                .iter()
                .filter(|f| f.does_affect_search(datastore, database, table))
                .partition(|f| f.root() == CompoundType::And);
            for (bucket, compound_type) in [
                (and_clauses, CompoundType::And),
                (or_clauses, CompoundType::Or),
            ] {
                let mut bucket: Vec<C> = bucket.into_iter().map(|f| f.clause().clone()).collect();
                match bucket.len() {
                    0 => {}
                    1 => clauses.extend(bucket.pop()),
                    _ => clauses.push(builder.build_compound_filter_clause(bucket, compound_type)),
                }
            }
        }
        clauses
    }

    pub fn is_filtered(&self, design: Option<&FilterDesign>) -> bool {
        self.collection.is_filtered(design)
    }

    /// Sync a widget's local collection with the global filters each behavior
    /// cares about, running a behavior's callback only when its list changed.
    pub fn update_collection_with_global_compatible_filters(
        &self,
        behaviors: &mut [FilterBehavior<C>],
        local: &mut FilterCollection<C>,
    ) {
        for behavior in behaviors.iter_mut() {
            let key = local.find_filter_data_sources(&behavior.design);
            let global = self.get_compatible_filters(&behavior.design);
            if same_filters(local.get_filters(&key), &global) {
                continue;
            }
            local.set_filters(&key, global.clone());
            (behavior.redraw)(global.as_slice());
        }
    }

    /// Replace every filter with the persisted ones. Entries that do not
    /// resolve against the dataset or do not form a valid filter are skipped.
    pub fn set_filters_from_config<B, D>(&mut self, filters: &[FilterJson], dataset: &D, builder: &B)
    where
        B: ClauseBuilder<Clause = C>,
        D: DatasetLookup,
    {
        let mut collection = FilterCollection::new();
        for json in filters {
            let design = match FilterDesign::from_json(json, dataset) {
                Ok(design) => design,
                Err(e) => {
                    warn!(error = %e, "skipping persisted filter");
                    continue;
                }
            };
            let Some(filter) = Filter::from_design(&design, builder) else {
                warn!("skipping persisted filter with an incomplete design");
                continue;
            };
            let key = filter.data_source_list(false);
            let mut list = collection.get_filters(&key).to_vec();
            list.push(filter);
            collection.set_filters(&key, list);
        }
        info!(data_sources = collection.len(), "loaded filters from config");
        self.collection = collection;
    }

    /// The persisted form of every active filter.
    pub fn filters_to_save_in_config(&self) -> Vec<FilterJson> {
        self.collection
            .all_filters()
            .map(|f| FilterJson::from(&f.to_design()))
            .collect()
    }

    fn matching_filters(&self, design: &FilterDesign) -> Vec<&Filter<C>> {
        let Some(filters) = self.collection.lookup(&design.data_source_list(false)) else {
            return Vec::new();
        };
        filters
            .iter()
            .filter(|f| match design.id() {
                Some(id) => f.id() == id,
                None => f.is_compatible_with_design(design),
            })
            .collect()
    }

    fn pending_entry<'a>(&self, pending: &'a mut PendingFilters<C>, key: DataSourceList) -> &'a mut Vec<Filter<C>> {
        let existing = self.collection.lookup(&key).map(<[_]>::to_vec).unwrap_or_default();
        pending.entry(key).or_insert(existing)
    }

    /// Apply pending lists and deletions to the collection, then publish.
    ///
    /// Pending lists replace their data source's filters; every other data
    /// source keeps its filters minus `delete_ids`. Only data sources whose
    /// filters actually changed are stored and reported.
    fn commit(&mut self, caller_id: &str, mut pending: PendingFilters<C>, delete_ids: &HashSet<String>) -> FilterChange {
        let mut keys: Vec<DataSourceList> = self.collection.data_sources().cloned().collect();
        keys.extend(pending.keys().filter(|k| !self.collection.contains(k)).cloned());

        let mut change = FilterChange::new();
        for key in keys {
            let current = self.collection.lookup(&key).unwrap_or(&[]);
            let next: Vec<Filter<C>> = match pending.swap_remove(&key) {
                Some(list) => list,
                None => current.to_vec(),
            }
            .into_iter()
            .filter(|f| !delete_ids.contains(f.id()))
            .collect();
            if same_filters(current, &next) {
                continue;
            }
            let designs = next.iter().map(Filter::to_design).collect();
            let key = self.collection.set_filters(&key, next);
            change.insert(key, designs);
        }

        if change.is_empty() {
            debug!(caller = caller_id, "filter operation changed nothing");
        } else {
            info!(caller = caller_id, data_sources = change.len(), "publishing filter change");
            let payload = FiltersChanged { change: change.clone(), caller: caller_id.to_string() };
            self.messenger.publish(FILTERS_CHANGED, &payload);
        }
        change
    }
}

impl<C: Clone> Default for FilterService<C, EventBus> {
    fn default() -> Self {
        Self::new(EventBus::new())
    }
}

fn mark_deleted<C: Clone>(filter: &Filter<C>, delete_ids: &mut HashSet<String>) {
    delete_ids.insert(filter.id().to_string());
    delete_ids.extend(filter.relations().iter().cloned());
}

fn same_filters<C: Clone>(a: &[Filter<C>], b: &[Filter<C>]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.id() == y.id() && x.relations() == y.relations() && x.is_equivalent_to_filter(y)
        })
}

/// `filter` followed by its relation filters, all cross-linked by id.
fn with_relation_filters<C, B>(filter: Filter<C>, relations: &[Relation], builder: &B) -> Vec<Filter<C>>
where
    C: Clone,
    B: ClauseBuilder<Clause = C>,
{
    let mut group = vec![filter];
    group.extend(create_relation_filter_list(&group[0], relations, builder));
    if group.len() > 1 {
        let ids: Vec<String> = group.iter().map(|f| f.id().to_string()).collect();
        for f in group.iter_mut() {
            let siblings = ids.iter().filter(|id| id.as_str() != f.id()).cloned().collect();
            f.set_relations(siblings);
        }
    }
    group
}

/// For every relation group whose fields are exactly the filter's fields,
/// build the filter's counterpart on each other group of that relation.
fn create_relation_filter_list<C, B>(filter: &Filter<C>, relations: &[Relation], builder: &B) -> Vec<Filter<C>>
where
    C: Clone,
    B: ClauseBuilder<Clause = C>,
{
    let sources = filter.data_sources(true);
    let mut relation_filters = Vec::new();
    for relation in relations {
        for (index, group) in relation.iter().enumerate() {
            let equivalent =
                sources.len() == group.len() && group.iter().all(|field| sources.iter().any(|s| field.matches(s)));
            if !equivalent {
                continue;
            }
            for (other_index, substitute) in relation.iter().enumerate() {
                if other_index == index {
                    continue;
                }
                if let Some(relation_filter) = filter.create_relation_filter(group, substitute, builder) {
                    trace!(source = filter.id(), relation = relation_filter.id(), "created relation filter");
                    relation_filters.push(relation_filter);
                }
            }
        }
    }
    relation_filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::DefaultClauseBuilder;
    use crate::datasource::SingleField;
    use crate::design::{CompoundFilterDesign, SimpleFilterDesign};
    use crate::types::FilterValue;

    fn design(table: &str, field: &str, value: i64) -> FilterDesign {
        SimpleFilterDesign::new("ds", "db", table, field, "=", Some(FilterValue::from(value))).into()
    }

    #[test]
    fn test_relation_filters_are_cross_linked() {
        let relations: Vec<Relation> = vec![vec![
            vec![SingleField::new("ds", "db", "a", "f")],
            vec![SingleField::new("ds", "db", "b", "f")],
            vec![SingleField::new("ds", "db", "c", "f")],
        ]];
        let filter = Filter::from_design(&design("a", "f", 1), &DefaultClauseBuilder).unwrap();
        let group = with_relation_filters(filter, &relations, &DefaultClauseBuilder);
        assert_eq!(group.len(), 3);
        for f in &group {
            assert_eq!(f.relations().len(), 2);
            assert!(!f.relations().iter().any(|id| id == f.id()));
        }
    }

    #[test]
    fn test_relation_group_must_match_all_fields() {
        let relations: Vec<Relation> = vec![vec![
            vec![SingleField::new("ds", "db", "a", "x"), SingleField::new("ds", "db", "a", "y")],
            vec![SingleField::new("ds", "db", "b", "x"), SingleField::new("ds", "db", "b", "y")],
        ]];
        let single = Filter::from_design(&design("a", "x", 1), &DefaultClauseBuilder).unwrap();
        assert!(create_relation_filter_list(&single, &relations, &DefaultClauseBuilder).is_empty());

        let pair: FilterDesign =
            CompoundFilterDesign::new(CompoundType::And, vec![design("a", "x", 1), design("a", "y", 2)]).into();
        let pair = Filter::from_design(&pair, &DefaultClauseBuilder).unwrap();
        let created = create_relation_filter_list(&pair, &relations, &DefaultClauseBuilder);
        assert_eq!(created.len(), 1);
        assert!(created[0].does_affect_search("ds", "db", "b"));
        assert!(!created[0].does_affect_search("ds", "db", "a"));
    }

    #[test]
    fn test_invalid_designs_are_a_no_op() {
        let mut service: FilterService = FilterService::default();
        let invalid: FilterDesign = SimpleFilterDesign::new("ds", "db", "tb", "f", "=", None).into();
        let change = service.exchange_filters("w", &[invalid], &[], &DefaultClauseBuilder, &[]);
        assert!(change.is_empty());
        assert!(!service.is_filtered(None));
    }

    #[test]
    fn test_exchange_replaces_filters_on_same_source() {
        let mut service: FilterService = FilterService::default();
        service.exchange_filters("w", &[design("tb", "f", 1)], &[], &DefaultClauseBuilder, &[]);
        service.exchange_filters("w", &[design("tb", "f", 2)], &[], &DefaultClauseBuilder, &[]);
        let filters = service.get_raw_filters(None);
        assert_eq!(filters.len(), 1);
        match &filters[0] {
            Filter::Simple(s) => assert_eq!(s.value, FilterValue::Int(2)),
            _ => panic!("Expected simple filter"),
        }
    }

    #[test]
    fn test_delete_by_compatible_design_without_id() {
        let mut service: FilterService = FilterService::default();
        service.toggle_filters("w", &[design("tb", "f", 1), design("tb", "f", 2)], &[], &DefaultClauseBuilder);
        assert_eq!(service.get_filters(None).len(), 2);
        let any_value: FilterDesign = SimpleFilterDesign::new("ds", "db", "tb", "f", "=", None).into();
        service.delete_filter("w", &any_value);
        assert_eq!(service.get_filters(None).len(), 1);
        service.delete_filters("w", &[any_value]);
        assert!(service.get_filters(None).is_empty());
    }

    #[test]
    fn test_toggle_removes_every_equivalent_filter() {
        let mut service: FilterService = FilterService::default();
        let d = design("tb", "f", 1);
        service.exchange_filters("w", &[d.clone(), d.clone()], &[], &DefaultClauseBuilder, &[]);
        assert_eq!(service.get_filters(None).len(), 2);

        let change = service.toggle_filters("w", &[d], &[], &DefaultClauseBuilder);
        assert_eq!(change.len(), 1);
        assert!(change.values().all(|designs| designs.is_empty()));
        assert!(!service.is_filtered(None));
    }

    #[test]
    fn test_delete_filters_without_designs_clears_everything() {
        let mut service: FilterService = FilterService::default();
        service.exchange_filters("w", &[design("a", "f", 1), design("b", "g", 2)], &[], &DefaultClauseBuilder, &[]);
        let change = service.delete_filters("w", &[]);
        assert_eq!(change.len(), 2);
        assert!(change.values().all(|designs| designs.is_empty()));
        assert!(!service.is_filtered(None));
    }
}
