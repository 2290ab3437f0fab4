//! Tests for collaborator registration and the ordering it declares

use serde_json::json;

use super::fixtures::{attach_remote, make_probe, next_document, register_probe};
use crate::RegistrationError;
use crate::endpoint::Endpoint;
use crate::host::{CollaboratorId, TickGraph, TickId};
use crate::schedule::Schedule;

#[test]
fn test_register_declares_both_orderings() {
    let mut graph = TickGraph::new();
    let mut endpoint = Endpoint::new("Owen", Schedule::default());
    graph.add_endpoint(endpoint.id());
    let probe = make_probe();

    let id = register_probe(&mut endpoint, &mut graph, &probe, "probe");

    assert!(graph.has_ordering(TickId::EndpointPre(endpoint.id()), TickId::Collaborator(id)));
    assert!(graph.has_ordering(TickId::Collaborator(id), TickId::EndpointPost(endpoint.id())));
    assert_eq!(
        graph.order().unwrap(),
        vec![
            TickId::EndpointPre(endpoint.id()),
            TickId::Collaborator(id),
            TickId::EndpointPost(endpoint.id()),
        ]
    );
}

#[test]
fn test_duplicate_tree_name_leaves_state_unchanged() {
    let mut graph = TickGraph::new();
    let mut endpoint = Endpoint::new("Owen", Schedule::default());
    let first = make_probe();
    let second = make_probe();
    register_probe(&mut endpoint, &mut graph, &first, "joints");
    let constraints = graph.constraint_count();

    let err = endpoint
        .register_collaborator(&mut graph, &second, "joints", None, None)
        .unwrap_err();

    assert_eq!(
        err,
        RegistrationError::DuplicateTreeName {
            endpoint: "Owen".to_string(),
            tree_name: "joints".to_string(),
        }
    );
    assert_eq!(endpoint.collaborator_count(), 1);
    assert_eq!(graph.constraint_count(), constraints);
    assert!(!endpoint.is_registered(CollaboratorId::of(&second)));
}

#[test]
fn test_duplicate_collaborator_rejected() {
    let mut graph = TickGraph::new();
    let mut endpoint = Endpoint::new("Owen", Schedule::default());
    let probe = make_probe();
    register_probe(&mut endpoint, &mut graph, &probe, "a");

    let err = endpoint
        .register_collaborator(&mut graph, &probe, "b", None, None)
        .unwrap_err();

    assert!(matches!(err, RegistrationError::DuplicateCollaborator { .. }));
    assert_eq!(endpoint.tree_names(), vec!["a"]);
}

#[test]
fn test_invalid_tree_name_rejected() {
    let mut graph = TickGraph::new();
    let mut endpoint = Endpoint::new("Owen", Schedule::default());
    let probe = make_probe();

    let err = endpoint
        .register_collaborator(&mut graph, &probe, "left arm", None, None)
        .unwrap_err();

    assert_eq!(err, RegistrationError::InvalidTreeName("left arm".to_string()));
    assert_eq!(graph.constraint_count(), 0);
}

#[test]
fn test_unregister_retracts_orderings() {
    let mut graph = TickGraph::new();
    let mut endpoint = Endpoint::new("Owen", Schedule::default());
    let probe = make_probe();
    register_probe(&mut endpoint, &mut graph, &probe, "probe");

    endpoint.unregister_collaborator(&mut graph, &probe).unwrap();

    assert_eq!(endpoint.collaborator_count(), 0);
    assert_eq!(graph.constraint_count(), 0);

    let err = endpoint.unregister_collaborator(&mut graph, &probe).unwrap_err();
    assert!(matches!(err, RegistrationError::NotRegistered { .. }));
}

#[test]
fn test_tree_name_reusable_after_unregister() {
    let mut graph = TickGraph::new();
    let mut endpoint = Endpoint::new("Owen", Schedule::default());
    let first = make_probe();
    let second = make_probe();
    register_probe(&mut endpoint, &mut graph, &first, "probe");
    endpoint.unregister_collaborator(&mut graph, &first).unwrap();

    register_probe(&mut endpoint, &mut graph, &second, "probe");
    assert_eq!(endpoint.collaborator_count(), 1);
}

#[test]
fn test_dropped_collaborator_is_pruned_on_send() {
    let mut graph = TickGraph::new();
    let mut endpoint = Endpoint::new("Owen", Schedule::new(vec![crate::ScheduleOp::Send], 1));
    let keep = make_probe();
    let gone = make_probe();
    register_probe(&mut endpoint, &mut graph, &keep, "keep");
    register_probe(&mut endpoint, &mut graph, &gone, "gone");
    let mut remote = attach_remote(&mut endpoint);

    drop(gone);
    endpoint.pre_update(0.0);

    assert_eq!(next_document(&mut remote).unwrap(), json!({"keep": {"sends": 1}}));
    assert_eq!(endpoint.tree_names(), vec!["keep"]);

    // Orderings of the pruned registration are still declared until the
    // host syncs.
    assert_eq!(graph.constraint_count(), 4);
    endpoint.sync_ordering(&mut graph);
    assert_eq!(graph.constraint_count(), 2);
}

#[test]
fn test_sync_ordering_prunes_dead_registrations() {
    let mut graph = TickGraph::new();
    let mut endpoint = Endpoint::new("Owen", Schedule::default());
    let probe = make_probe();
    register_probe(&mut endpoint, &mut graph, &probe, "probe");
    drop(probe);

    endpoint.sync_ordering(&mut graph);
    assert_eq!(endpoint.collaborator_count(), 0);
    assert_eq!(graph.constraint_count(), 0);
}

#[test]
fn test_register_while_attached_adds_outbound_subtree() {
    let mut graph = TickGraph::new();
    let mut endpoint = Endpoint::new("Owen", Schedule::default());
    let _remote = attach_remote(&mut endpoint);
    let probe = make_probe();

    register_probe(&mut endpoint, &mut graph, &probe, "late");
    assert_eq!(
        endpoint.socket().unwrap().out_document(),
        &json!({"late": {}})
    );

    endpoint.unregister_collaborator(&mut graph, &probe).unwrap();
    assert_eq!(endpoint.socket().unwrap().out_document(), &json!({}));
}
