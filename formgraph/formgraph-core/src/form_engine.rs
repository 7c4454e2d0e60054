//! The submission engine: drives the asynchronous, multi-step write
//! operations against the graph store and tracks each dispatch's lifecycle.
//!
//! Scheduling is cooperative: all compilation and diffing is synchronous, and
//! the only suspension points are the store calls. Dependent steps
//! (delete-then-create, create-then-commit-ids) are strictly sequenced;
//! independent steps (per-set partial replace, per-group deletes) are joined
//! with an all-or-error policy. Cancellation is not supported — a dispatched
//! operation runs to completion and a caller that stopped caring must ignore
//! the eventual status.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use serde_json::Value;
use tracing::{debug, trace};

use formgraph_runtime::{
    EntityKeyId, EntityRef, EntitySetId, Fqn, OrganizationId,
    edm::EdmResolver,
    payload::{
        AssociationTuple, DataGraph, EntityDataPayload, EntityDeleteGroup, EntityIndexToIdMap,
        PropertyMap, UpdateMode,
    },
};

use crate::{
    Config,
    compile::{CompileContext, CompileMode, CompiledForm, PlaceholderResolution, compile_form,
        compile_association_data},
    form_error::{FormError, FormResult, join_all_or_error},
    graph_store::{ArcGraphStore, CreatedGraphIds, NeighborFilter},
    request::{OperationKind, RequestId, RequestState, RequestStateTable},
};

/// Input to the association replace operation: an optional delete phase,
/// applied strictly before the create phase.
#[derive(Clone, Debug)]
pub struct AssociationReplace {
    pub org: OrganizationId,
    /// Existing association instances to remove, by identifier.
    pub delete: Vec<EntityDeleteGroup>,
    /// Edges to create afterwards; every endpoint must resolve to an EKID.
    pub create: Vec<AssociationTuple>,
}

pub struct FormEngine {
    store: ArcGraphStore,
    resolver: Arc<EdmResolver>,
    config: Config,
    requests: Mutex<RequestStateTable>,
    index_map: Mutex<EntityIndexToIdMap>,
    requests_mutated: tokio::sync::watch::Sender<()>,
}

pub struct FormEngineBuilder {
    resolver: Arc<EdmResolver>,
    config: Config,
}

impl FormEngineBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self, store: ArcGraphStore) -> FormEngine {
        let (requests_mutated, _) = tokio::sync::watch::channel(());

        FormEngine {
            store,
            resolver: self.resolver,
            config: self.config,
            requests: Mutex::new(RequestStateTable::default()),
            index_map: Mutex::new(EntityIndexToIdMap::default()),
            requests_mutated,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FormEngine {
    pub fn builder(resolver: Arc<EdmResolver>) -> FormEngineBuilder {
        FormEngineBuilder {
            resolver,
            config: Config::default(),
        }
    }

    pub fn resolver(&self) -> &EdmResolver {
        &self.resolver
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compile a form data tree with the engine's resolver and a snapshot of
    /// its index-to-id map.
    pub fn compile(
        &self,
        tree: &Value,
        associations: &[AssociationTuple],
        mode: CompileMode,
        org: OrganizationId,
    ) -> FormResult<CompiledForm> {
        let index_map = lock(&self.index_map).clone();
        let ctx = CompileContext {
            resolver: &self.resolver,
            org,
            index_map: &index_map,
            cleared_value_policy: self.config.cleared_value_policy,
        };
        compile_form(tree, associations, mode, &ctx)
    }

    /// A snapshot of the placeholder-to-EKID entries resolved so far in this
    /// session.
    pub fn index_map(&self) -> EntityIndexToIdMap {
        lock(&self.index_map).clone()
    }

    /// Seed an entry from an already-loaded entity (edit flows).
    pub fn insert_resolved(&self, entity_type: Fqn, index: i64, key: EntityKeyId) {
        lock(&self.index_map).insert(entity_type, index, key);
    }

    pub fn request_state(&self, kind: OperationKind, request_id: RequestId) -> RequestState {
        lock(&self.requests).state_of(kind, request_id)
    }

    /// Delete the tracking entry for a finished request. Observers see the
    /// state fall back to `Standby`; terminal states are transient signals,
    /// not persisted facts.
    pub fn clean_up_request(&self, kind: OperationKind, request_id: RequestId) {
        lock(&self.requests).clean_up(kind, request_id);
        self.requests_mutated.send(()).ok();
    }

    /// Subscribe to request table transitions.
    pub fn watch_requests(&self) -> tokio::sync::watch::Receiver<()> {
        self.requests_mutated.subscribe()
    }

    /// First-time graph write: one call carrying both payloads. On success
    /// the generated EKIDs are committed to the index-to-id map before this
    /// returns, so association compilation referencing the same placeholders
    /// can proceed afterwards — ordering by sequencing, not locking.
    pub async fn submit_data_graph(
        &self,
        request_id: RequestId,
        graph: DataGraph,
    ) -> FormResult<CreatedGraphIds> {
        self.begin(OperationKind::SubmitDataGraph, request_id)?;
        let result = self.submit_data_graph_inner(graph).await;
        self.finish(OperationKind::SubmitDataGraph, request_id, result)
    }

    async fn submit_data_graph_inner(&self, graph: DataGraph) -> FormResult<CreatedGraphIds> {
        debug!(
            entities = graph.entities.entity_count(),
            associations = graph.associations.record_count(),
            "submit data graph"
        );

        // Remember where each placeholder sits in its set's submission order;
        // the store returns generated ids in that order.
        let expectations = graph
            .entities
            .iter()
            .map(|(entity_set_id, entities)| {
                let placeholders = entities
                    .keys()
                    .enumerate()
                    .filter_map(|(position, entity_ref)| match entity_ref {
                        EntityRef::Placeholder(index) if *index >= 0 => Some((position, *index)),
                        _ => None,
                    })
                    .collect_vec();
                (entity_set_id, entities.len(), placeholders)
            })
            .collect_vec();

        let created = self.store.create_entity_and_association_data(graph).await?;

        // Validate every set before committing anything to the shared map.
        let mut resolved: Vec<(Fqn, i64, EntityKeyId)> = Vec::new();
        for (entity_set_id, submitted, placeholders) in expectations {
            let ids = created
                .entity_key_ids
                .get(&entity_set_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            if ids.len() != submitted {
                return Err(FormError::CreatedIdMismatch {
                    entity_set_id,
                    expected: submitted,
                    returned: ids.len(),
                });
            }

            let fqn = self.resolver.entity_set_fqn(entity_set_id)?;
            for (position, index) in placeholders {
                resolved.push((fqn.clone(), index, ids[position]));
            }
        }

        let mut index_map = lock(&self.index_map);
        for (fqn, index, key) in resolved {
            trace!("resolved ({fqn}, {index}) -> {key}");
            index_map.insert(fqn, index, key);
        }

        Ok(created)
    }

    /// Partial replace: one store call per entity set in the diffed payload,
    /// issued concurrently and joined all-or-error. Sub-calls that succeeded
    /// are not rolled back; on failure, callers must re-fetch truth.
    pub async fn submit_partial_replace(
        &self,
        request_id: RequestId,
        diff: EntityDataPayload,
    ) -> FormResult<()> {
        self.begin(OperationKind::PartialReplace, request_id)?;
        let result = self.submit_partial_replace_inner(diff).await;
        self.finish(OperationKind::PartialReplace, request_id, result)
    }

    async fn submit_partial_replace_inner(&self, diff: EntityDataPayload) -> FormResult<()> {
        if diff.is_empty() {
            debug!("empty diff, nothing to submit");
            return Ok(());
        }

        // Precondition pass: every entity must already be keyed by EKID.
        // Violations abort before any network call.
        let mut batches: Vec<(EntitySetId, FnvHashMap<EntityKeyId, PropertyMap>)> = Vec::new();
        for (entity_set_id, entities) in diff.into_sets() {
            let mut batch = FnvHashMap::default();
            for (entity_ref, properties) in entities {
                let Some(key) = entity_ref.as_key() else {
                    return Err(FormError::UnresolvedPlaceholder {
                        entity_type: self.resolver.entity_set_fqn(entity_set_id)?.clone(),
                        index: entity_ref.as_placeholder().unwrap_or_default(),
                    });
                };
                batch.insert(key, properties);
            }
            batches.push((entity_set_id, batch));
        }

        debug!("partial replace across {} entity set(s)", batches.len());

        let calls = batches
            .into_iter()
            .map(|(entity_set_id, batch)| {
                let store = self.store.clone();
                async move {
                    store
                        .update_entity_data(entity_set_id, batch, UpdateMode::PartialReplace)
                        .await
                }
            })
            .collect_vec();

        join_all_or_error(futures_util::future::join_all(calls).await)
    }

    /// Association replace: compile the create phase first (precondition
    /// violations must abort before any network call), then delete strictly
    /// before create. If any delete fails, the create phase is never issued —
    /// the new edge may target the same conceptual slot as the deleted one.
    pub async fn create_or_replace_association(
        &self,
        request_id: RequestId,
        replace: AssociationReplace,
    ) -> FormResult<FnvHashMap<EntitySetId, Vec<EntityKeyId>>> {
        self.begin(OperationKind::ReplaceAssociation, request_id)?;
        let result = self.create_or_replace_association_inner(replace).await;
        self.finish(OperationKind::ReplaceAssociation, request_id, result)
    }

    async fn create_or_replace_association_inner(
        &self,
        replace: AssociationReplace,
    ) -> FormResult<FnvHashMap<EntitySetId, Vec<EntityKeyId>>> {
        let payload = {
            let index_map = lock(&self.index_map);
            compile_association_data(
                &replace.create,
                &self.resolver,
                &index_map,
                replace.org,
                PlaceholderResolution::Require,
            )?
        };

        for group in replace.delete {
            debug!(
                "deleting {} association instance(s) from {}",
                group.entity_key_ids.len(),
                group.entity_set_id
            );
            self.store
                .delete_entity_data(group.entity_set_id, group.entity_key_ids)
                .await?;
        }

        if payload.is_empty() {
            return Ok(FnvHashMap::default());
        }

        self.store.create_associations(payload).await
    }

    /// Delete entities: one store call per group, concurrent, all-or-error.
    pub async fn delete_entities(
        &self,
        request_id: RequestId,
        groups: Vec<EntityDeleteGroup>,
    ) -> FormResult<()> {
        self.begin(OperationKind::DeleteEntities, request_id)?;
        let result = self.delete_entities_inner(groups).await;
        self.finish(OperationKind::DeleteEntities, request_id, result)
    }

    async fn delete_entities_inner(&self, groups: Vec<EntityDeleteGroup>) -> FormResult<()> {
        let calls = groups
            .into_iter()
            .map(|group| {
                let store = self.store.clone();
                async move {
                    store
                        .delete_entity_data(group.entity_set_id, group.entity_key_ids)
                        .await
                }
            })
            .collect_vec();

        join_all_or_error(futures_util::future::join_all(calls).await)
    }

    /// Hydrate the index-to-id map from existing neighbors of an entity
    /// being edited. Neighbors are indexed per type in retrieval order.
    pub async fn hydrate_index_map(
        &self,
        entity_set_id: EntitySetId,
        filter: NeighborFilter,
    ) -> FormResult<EntityIndexToIdMap> {
        let neighbors = self.store.search_entity_neighbors(entity_set_id, filter).await?;

        let mut hydrated = EntityIndexToIdMap::default();
        let mut counters: FnvHashMap<Fqn, i64> = FnvHashMap::default();
        let mut seen: FnvHashSet<EntityKeyId> = FnvHashSet::default();

        for records in neighbors.values() {
            for record in records {
                // a neighbor reachable from several origins gets one index
                if !seen.insert(record.neighbor_entity_key_id) {
                    continue;
                }
                let fqn = self
                    .resolver
                    .entity_set_fqn(record.neighbor_entity_set_id)?
                    .clone();
                let counter = counters.entry(fqn.clone()).or_default();
                hydrated.insert(fqn, *counter, record.neighbor_entity_key_id);
                *counter += 1;
            }
        }

        lock(&self.index_map).extend(hydrated.clone());
        Ok(hydrated)
    }

    fn begin(&self, kind: OperationKind, request_id: RequestId) -> FormResult<()> {
        lock(&self.requests).begin(kind, request_id)?;
        self.requests_mutated.send(()).ok();
        Ok(())
    }

    /// Record the terminal state. The failure value is shared with the
    /// request state table, so the table and the returned error agree.
    fn finish<T>(
        &self,
        kind: OperationKind,
        request_id: RequestId,
        result: FormResult<T>,
    ) -> FormResult<T> {
        let result = match result {
            Ok(value) => {
                lock(&self.requests).finish(kind, request_id, RequestState::Success);
                Ok(value)
            }
            Err(error) => {
                let shared = Arc::new(error);
                lock(&self.requests).finish(
                    kind,
                    request_id,
                    RequestState::Failure(shared.clone()),
                );
                Err(FormError::Tracked(shared))
            }
        };
        self.requests_mutated.send(()).ok();
        result
    }
}
