use std::sync::Arc;

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use serde_json::json;

use formgraph_core::{
    AssociationReplace, Config, FormEngine, FormError, UuidGenerator,
    compile::CompileMode,
    graph_store::NeighborFilter,
    request::{OperationKind, RequestId},
};
use formgraph_runtime::{
    EntityKeyId, EntityRef, EntitySetId,
    address::{AddressKey, page_section_key},
    payload::{
        AssociationTuple, DataGraph, EntityDataPayload, EntityDeleteGroup, TupleEndpoint,
    },
};
use formgraph_store_inmemory::InMemoryGraphStore;

use crate::test_util::{FlakyStore, TestEdm, fqn, init_tracing, test_edm};

fn key(index: i64, entity_type: &str, property_type: &str) -> String {
    AddressKey::new(index, fqn(entity_type), fqn(property_type)).encode()
}

fn person_contact_tree() -> serde_json::Value {
    json!({
        page_section_key(1, 1): {
            key(0, "app.person", "app.first.name"): "Jane",
            key(0, "app.contactinfo", "app.phone.number"): "555-1234",
        },
    })
}

fn contacted_via_tuple() -> AssociationTuple {
    AssociationTuple {
        association_type: fqn("app.contactedvia"),
        src: TupleEndpoint::placeholder(fqn("app.person"), 0),
        dst: TupleEndpoint::placeholder(fqn("app.contactinfo"), 0),
        properties: IndexMap::from([(fqn("app.date.logged"), json!("2020-06-01"))]),
    }
}

async fn submit_person_and_contact(
    engine: &FormEngine,
    edm: &TestEdm,
) -> (EntityKeyId, EntityKeyId) {
    let compiled = engine
        .compile(&person_contact_tree(), &[], CompileMode::Create, edm.org)
        .unwrap();
    let created = engine
        .submit_data_graph(
            RequestId::random(),
            DataGraph {
                entities: compiled.entities,
                associations: compiled.associations,
            },
        )
        .await
        .unwrap();

    (
        created.entity_key_ids[&edm.persons][0],
        created.entity_key_ids[&edm.contacts][0],
    )
}

#[tokio::test]
async fn first_submission_resolves_placeholders_for_follow_up_associations() {
    init_tracing();
    let edm = test_edm();
    let store = Arc::new(InMemoryGraphStore::new());
    let engine = FormEngine::builder(edm.resolver.clone()).build(store.clone());

    let tuples = vec![contacted_via_tuple()];
    let compiled = engine
        .compile(&person_contact_tree(), &tuples, CompileMode::Create, edm.org)
        .unwrap();

    let created = engine
        .submit_data_graph(
            RequestId::random(),
            DataGraph {
                entities: compiled.entities,
                associations: compiled.associations,
            },
        )
        .await
        .unwrap();

    assert_eq!(created.entity_key_ids[&edm.persons].len(), 1);
    assert_eq!(created.entity_key_ids[&edm.contacts].len(), 1);
    assert_eq!(created.association_key_ids[&edm.contacted_via].len(), 1);
    assert_eq!(store.edge_count().await, 1);

    // the generated EKIDs were committed, so the same placeholders now
    // compile under strict resolution
    let index_map = engine.index_map();
    assert_eq!(
        index_map.get(&fqn("app.person"), 0),
        Some(created.entity_key_ids[&edm.persons][0])
    );
    assert_eq!(
        index_map.get(&fqn("app.contactinfo"), 0),
        Some(created.entity_key_ids[&edm.contacts][0])
    );

    engine
        .create_or_replace_association(
            RequestId::random(),
            AssociationReplace {
                org: edm.org,
                delete: vec![],
                create: vec![contacted_via_tuple()],
            },
        )
        .await
        .unwrap();
    assert_eq!(store.edge_count().await, 2);
}

#[tokio::test]
async fn short_created_id_list_commits_nothing_to_the_index_map() {
    init_tracing();
    let edm = test_edm();
    let flaky = Arc::new(FlakyStore {
        truncate_created_ids_for: Some(edm.contacts),
        ..FlakyStore::over(Arc::new(InMemoryGraphStore::new()))
    });
    let engine = FormEngine::builder(edm.resolver.clone()).build(flaky.clone());

    let compiled = engine
        .compile(&person_contact_tree(), &[], CompileMode::Create, edm.org)
        .unwrap();
    let error = engine
        .submit_data_graph(
            RequestId::random(),
            DataGraph {
                entities: compiled.entities,
                associations: compiled.associations,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        error.root(),
        FormError::CreatedIdMismatch {
            expected: 1,
            returned: 0,
            ..
        }
    ));
    // even though the person set zipped cleanly, no entry was committed
    assert!(engine.index_map().is_empty());
}

#[tokio::test]
async fn configured_uuid_generator_controls_created_ids() {
    init_tracing();
    let edm = test_edm();
    let config = Config {
        uuid_generator: UuidGenerator::V4,
        ..Config::default()
    };
    let store = Arc::new(InMemoryGraphStore::with_uuid_generator(config.uuid_generator));
    let engine = FormEngine::builder(edm.resolver.clone())
        .config(config)
        .build(store.clone());

    let (person, contact) = submit_person_and_contact(&engine, &edm).await;
    assert_eq!(person.0.get_version_num(), 4);
    assert_eq!(contact.0.get_version_num(), 4);
}

#[tokio::test]
async fn partial_replace_applies_minimal_edit() {
    init_tracing();
    let edm = test_edm();
    let store = Arc::new(InMemoryGraphStore::new());
    let engine = FormEngine::builder(edm.resolver.clone()).build(store.clone());

    let (person, contact) = submit_person_and_contact(&engine, &edm).await;

    let original = person_contact_tree();
    let edited = json!({
        page_section_key(1, 1): {
            key(0, "app.person", "app.first.name"): "Janet",
            key(0, "app.contactinfo", "app.phone.number"): "555-1234",
        },
    });

    let compiled = engine
        .compile(
            &edited,
            &[],
            CompileMode::Update {
                original_tree: &original,
            },
            edm.org,
        )
        .unwrap();
    let diff = compiled.diff.unwrap();

    // only the edited property, keyed by EKID
    assert_eq!(diff.entity_count(), 1);
    assert_eq!(
        diff.values(edm.persons, EntityRef::Key(person), edm.first_name),
        Some([json!("Janet")].as_slice())
    );

    engine
        .submit_partial_replace(RequestId::random(), diff)
        .await
        .unwrap();

    let properties = store.entity(edm.persons, person).await.unwrap();
    assert_eq!(properties[&edm.first_name], vec![json!("Janet")]);
    let properties = store.entity(edm.contacts, contact).await.unwrap();
    assert_eq!(properties[&edm.phone], vec![json!("555-1234")]);
}

#[tokio::test]
async fn partial_replace_is_all_or_error_without_rollback() {
    init_tracing();
    let edm = test_edm();
    let inner = Arc::new(InMemoryGraphStore::new());
    let setup_engine = FormEngine::builder(edm.resolver.clone()).build(inner.clone());
    let (person, contact) = submit_person_and_contact(&setup_engine, &edm).await;

    let flaky = Arc::new(FlakyStore {
        fail_update_for: Some(edm.contacts),
        ..FlakyStore::over(inner.clone())
    });
    let engine = FormEngine::builder(edm.resolver.clone()).build(flaky.clone());

    let mut diff = EntityDataPayload::default();
    diff.append(
        edm.persons,
        EntityRef::Key(person),
        edm.first_name,
        [json!("Janet")],
    );
    diff.append(
        edm.contacts,
        EntityRef::Key(contact),
        edm.phone,
        [json!("555-0000")],
    );

    let request_id = RequestId::random();
    let error = engine
        .submit_partial_replace(request_id, diff)
        .await
        .unwrap_err();
    assert!(matches!(error.root(), FormError::Join(_)));

    // the failure is visible through the request table too
    let state = engine.request_state(OperationKind::PartialReplace, request_id);
    assert!(matches!(state.failure(), Some(FormError::Join(_))));

    // both sub-calls were issued; the surviving one is not rolled back
    assert_eq!(flaky.update_calls(), 2);
    let properties = inner.entity(edm.persons, person).await.unwrap();
    assert_eq!(properties[&edm.first_name], vec![json!("Janet")]);
    let properties = inner.entity(edm.contacts, contact).await.unwrap();
    assert_eq!(properties[&edm.phone], vec![json!("555-1234")]);
}

#[tokio::test]
async fn partial_replace_rejects_unresolved_placeholder_before_any_call() {
    init_tracing();
    let edm = test_edm();
    let flaky = Arc::new(FlakyStore::over(Arc::new(InMemoryGraphStore::new())));
    let engine = FormEngine::builder(edm.resolver.clone()).build(flaky.clone());

    let mut diff = EntityDataPayload::default();
    diff.append(
        edm.persons,
        EntityRef::Placeholder(0),
        edm.first_name,
        [json!("Jane")],
    );

    let error = engine
        .submit_partial_replace(RequestId::random(), diff)
        .await
        .unwrap_err();
    assert!(matches!(
        error.root(),
        FormError::UnresolvedPlaceholder { index: 0, .. }
    ));
    assert_eq!(flaky.update_calls(), 0);
}

#[tokio::test]
async fn association_replace_deletes_strictly_before_create() {
    init_tracing();
    let edm = test_edm();
    let inner = Arc::new(InMemoryGraphStore::new());
    let flaky = Arc::new(FlakyStore::over(inner.clone()));
    let engine = FormEngine::builder(edm.resolver.clone()).build(flaky.clone());

    let tuples = vec![contacted_via_tuple()];
    let compiled = engine
        .compile(&person_contact_tree(), &tuples, CompileMode::Create, edm.org)
        .unwrap();
    let created = engine
        .submit_data_graph(
            RequestId::random(),
            DataGraph {
                entities: compiled.entities,
                associations: compiled.associations,
            },
        )
        .await
        .unwrap();
    assert_eq!(inner.edge_count().await, 1);

    let stale_edge = created.association_key_ids[&edm.contacted_via][0];
    engine
        .create_or_replace_association(
            RequestId::random(),
            AssociationReplace {
                org: edm.org,
                delete: vec![EntityDeleteGroup {
                    entity_set_id: edm.contacted_via,
                    entity_key_ids: vec![stale_edge],
                }],
                create: vec![contacted_via_tuple()],
            },
        )
        .await
        .unwrap();

    // the stale edge was removed before its replacement was written
    assert_eq!(inner.edge_count().await, 1);
    assert_eq!(flaky.delete_calls(), 1);
    assert_eq!(flaky.create_association_calls(), 1);
}

#[tokio::test]
async fn failed_delete_suppresses_association_create() {
    init_tracing();
    let edm = test_edm();
    let flaky = Arc::new(FlakyStore {
        fail_deletes: true,
        ..FlakyStore::over(Arc::new(InMemoryGraphStore::new()))
    });
    let engine = FormEngine::builder(edm.resolver.clone()).build(flaky.clone());

    let error = engine
        .create_or_replace_association(
            RequestId::random(),
            AssociationReplace {
                org: edm.org,
                delete: vec![EntityDeleteGroup {
                    entity_set_id: edm.contacted_via,
                    entity_key_ids: vec![EntityKeyId::random()],
                }],
                create: vec![AssociationTuple {
                    association_type: fqn("app.contactedvia"),
                    src: TupleEndpoint::key(fqn("app.person"), EntityKeyId::random()),
                    dst: TupleEndpoint::key(fqn("app.contactinfo"), EntityKeyId::random()),
                    properties: IndexMap::new(),
                }],
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(error.root(), FormError::Store(_)));
    assert_eq!(flaky.delete_calls(), 1);
    assert_eq!(flaky.create_association_calls(), 0);
}

#[tokio::test]
async fn delete_entities_joins_all_groups() {
    init_tracing();
    let edm = test_edm();
    let store = Arc::new(InMemoryGraphStore::new());
    let engine = FormEngine::builder(edm.resolver.clone()).build(store.clone());

    let (person, contact) = submit_person_and_contact(&engine, &edm).await;

    let error = engine
        .delete_entities(
            RequestId::random(),
            vec![
                EntityDeleteGroup {
                    entity_set_id: edm.persons,
                    entity_key_ids: vec![person],
                },
                EntityDeleteGroup {
                    entity_set_id: edm.contacts,
                    entity_key_ids: vec![contact],
                },
                EntityDeleteGroup {
                    entity_set_id: EntitySetId::random(),
                    entity_key_ids: vec![EntityKeyId::random()],
                },
            ],
        )
        .await
        .unwrap_err();

    // the unknown group failed, but the other deletes were applied
    assert!(matches!(error.root(), FormError::Join(_)));
    assert_eq!(store.entity_count(edm.persons).await, 0);
    assert_eq!(store.entity_count(edm.contacts).await, 0);
}

#[tokio::test]
async fn request_lifecycle_is_at_most_once_until_cleaned_up() {
    init_tracing();
    let edm = test_edm();
    let store = Arc::new(InMemoryGraphStore::new());
    let engine = FormEngine::builder(edm.resolver.clone()).build(store.clone());
    let mut watcher = engine.watch_requests();

    let request_id = RequestId::random();
    submit_tagged(&engine, &edm, request_id).await.unwrap();
    assert!(
        engine
            .request_state(OperationKind::SubmitDataGraph, request_id)
            .is_success()
    );
    assert!(watcher.has_changed().unwrap());

    // same id again is a duplicate, and the recorded state is untouched
    let error = submit_tagged(&engine, &edm, request_id).await.unwrap_err();
    assert!(matches!(error.root(), FormError::DuplicateRequest { .. }));
    assert!(
        engine
            .request_state(OperationKind::SubmitDataGraph, request_id)
            .is_success()
    );

    engine.clean_up_request(OperationKind::SubmitDataGraph, request_id);
    assert!(
        engine
            .request_state(OperationKind::SubmitDataGraph, request_id)
            .is_standby()
    );
}

async fn submit_tagged(
    engine: &FormEngine,
    edm: &TestEdm,
    request_id: RequestId,
) -> formgraph_core::FormResult<()> {
    let compiled = engine
        .compile(&person_contact_tree(), &[], CompileMode::Create, edm.org)
        .unwrap();
    engine
        .submit_data_graph(
            request_id,
            DataGraph {
                entities: compiled.entities,
                associations: compiled.associations,
            },
        )
        .await
        .map(|_| ())
}

#[tokio::test]
async fn hydrate_index_map_indexes_neighbors_in_retrieval_order() {
    init_tracing();
    let edm = test_edm();
    let store = Arc::new(InMemoryGraphStore::new());
    let setup_engine = FormEngine::builder(edm.resolver.clone()).build(store.clone());

    let tree = json!({
        page_section_key(1, 1): {
            key(0, "app.person", "app.first.name"): "Jane",
            key(0, "app.contactinfo", "app.phone.number"): "555-1234",
            key(1, "app.contactinfo", "app.phone.number"): "555-5678",
        },
    });
    let tuples = vec![
        AssociationTuple {
            association_type: fqn("app.contactedvia"),
            src: TupleEndpoint::placeholder(fqn("app.person"), 0),
            dst: TupleEndpoint::placeholder(fqn("app.contactinfo"), 0),
            properties: IndexMap::new(),
        },
        AssociationTuple {
            association_type: fqn("app.contactedvia"),
            src: TupleEndpoint::placeholder(fqn("app.person"), 0),
            dst: TupleEndpoint::placeholder(fqn("app.contactinfo"), 1),
            properties: IndexMap::new(),
        },
    ];
    let compiled = setup_engine
        .compile(&tree, &tuples, CompileMode::Create, edm.org)
        .unwrap();
    let created = setup_engine
        .submit_data_graph(
            RequestId::random(),
            DataGraph {
                entities: compiled.entities,
                associations: compiled.associations,
            },
        )
        .await
        .unwrap();
    let person = created.entity_key_ids[&edm.persons][0];
    let contacts = &created.entity_key_ids[&edm.contacts];

    // a fresh engine over the same store, as a new editing session would be
    let engine = FormEngine::builder(edm.resolver.clone()).build(store.clone());
    let hydrated = engine
        .hydrate_index_map(
            edm.persons,
            NeighborFilter {
                entity_key_ids: vec![person],
                source_entity_set_ids: None,
                destination_entity_set_ids: Some(vec![edm.contacts]),
            },
        )
        .await
        .unwrap();

    assert_eq!(hydrated.len(), 2);
    assert_eq!(hydrated.get(&fqn("app.contactinfo"), 0), Some(contacts[0]));
    assert_eq!(hydrated.get(&fqn("app.contactinfo"), 1), Some(contacts[1]));

    // and the shared map now serves strict association compilation
    engine
        .create_or_replace_association(
            RequestId::random(),
            AssociationReplace {
                org: edm.org,
                delete: vec![],
                create: vec![AssociationTuple {
                    association_type: fqn("app.contactedvia"),
                    src: TupleEndpoint::key(fqn("app.person"), person),
                    dst: TupleEndpoint::placeholder(fqn("app.contactinfo"), 1),
                    properties: IndexMap::new(),
                }],
            },
        )
        .await
        .unwrap();
    assert_eq!(store.edge_count().await, 3);
}

#[tokio::test]
async fn hydrate_index_map_assigns_one_index_per_shared_neighbor() {
    init_tracing();
    let edm = test_edm();
    let store = Arc::new(InMemoryGraphStore::new());
    let setup_engine = FormEngine::builder(edm.resolver.clone()).build(store.clone());

    // two persons both linked to the same contact
    let tree = json!({
        page_section_key(1, 1): {
            key(0, "app.person", "app.first.name"): "Jane",
            key(1, "app.person", "app.first.name"): "John",
            key(0, "app.contactinfo", "app.phone.number"): "555-1234",
        },
    });
    let tuples = vec![
        AssociationTuple {
            association_type: fqn("app.contactedvia"),
            src: TupleEndpoint::placeholder(fqn("app.person"), 0),
            dst: TupleEndpoint::placeholder(fqn("app.contactinfo"), 0),
            properties: IndexMap::new(),
        },
        AssociationTuple {
            association_type: fqn("app.contactedvia"),
            src: TupleEndpoint::placeholder(fqn("app.person"), 1),
            dst: TupleEndpoint::placeholder(fqn("app.contactinfo"), 0),
            properties: IndexMap::new(),
        },
    ];
    let compiled = setup_engine
        .compile(&tree, &tuples, CompileMode::Create, edm.org)
        .unwrap();
    let created = setup_engine
        .submit_data_graph(
            RequestId::random(),
            DataGraph {
                entities: compiled.entities,
                associations: compiled.associations,
            },
        )
        .await
        .unwrap();
    let persons = &created.entity_key_ids[&edm.persons];
    let contact = created.entity_key_ids[&edm.contacts][0];

    let engine = FormEngine::builder(edm.resolver.clone()).build(store.clone());
    let hydrated = engine
        .hydrate_index_map(
            edm.persons,
            NeighborFilter {
                entity_key_ids: persons.clone(),
                source_entity_set_ids: None,
                destination_entity_set_ids: Some(vec![edm.contacts]),
            },
        )
        .await
        .unwrap();

    // the contact is reachable from both persons but gets a single index
    assert_eq!(hydrated.len(), 1);
    assert_eq!(hydrated.get(&fqn("app.contactinfo"), 0), Some(contact));
}
