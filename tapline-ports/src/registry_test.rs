use assert_matches::assert_matches;
use tokio_stream::StreamExt;

use crate::record::{ForwardTarget, ListenPort, PortType};
use crate::registry::{PortChangeKind, PortError, PortRegistry};

fn record(port: u16) -> ListenPort {
    ListenPort::new(
        port,
        PortType::Forwarder,
        ForwardTarget::new("example.com", 443),
    )
}

#[tokio::test]
async fn create_and_query_round_trip() {
    let (mut registry, _events) = PortRegistry::new();
    let listen = record(8080);
    let id = listen.id;
    registry.create(listen.clone()).unwrap();

    assert_eq!(registry.query(id), Some(&listen));
    assert_eq!(registry.query_all(), vec![listen]);
}

#[tokio::test]
async fn enabled_port_numbers_must_be_unique() {
    let (mut registry, _events) = PortRegistry::new();
    registry.create(record(8080)).unwrap();

    assert_matches!(registry.create(record(8080)), Err(PortError::PortInUse(8080)));
}

#[tokio::test]
async fn disabled_records_do_not_reserve_their_port() {
    let (mut registry, _events) = PortRegistry::new();
    let mut disabled = record(8080);
    disabled.enabled = false;
    registry.create(disabled).unwrap();

    registry.create(record(8080)).unwrap();
}

#[tokio::test]
async fn update_rejects_unknown_records() {
    let (mut registry, _events) = PortRegistry::new();
    let ghost = record(9000);
    let id = ghost.id;

    assert_matches!(registry.update(ghost), Err(PortError::UnknownRecord(found)) if found == id);
}

#[tokio::test]
async fn update_refreshes_the_timestamp() {
    let (mut registry, _events) = PortRegistry::new();
    let listen = record(8080);
    let id = listen.id;
    registry.create(listen.clone()).unwrap();

    let mut edited = listen;
    edited.forward = ForwardTarget::new("internal.example.com", 8443);
    registry.update(edited).unwrap();

    let stored = registry.query(id).unwrap();
    assert_eq!(stored.forward.to_string(), "internal.example.com:8443");
    assert!(stored.updated_at >= stored.created_at);
}

#[tokio::test]
async fn mutations_are_published_in_order() {
    let (mut registry, mut events) = PortRegistry::new();
    let listen = record(8080);
    let id = listen.id;
    registry.create(listen.clone()).unwrap();

    let mut edited = listen;
    edited.enabled = false;
    registry.update(edited).unwrap();
    registry.delete(id).unwrap();

    let created = events.next().await.unwrap();
    assert_eq!(created.kind, PortChangeKind::Created);
    assert_eq!(created.record.id, id);

    let updated = events.next().await.unwrap();
    assert_eq!(updated.kind, PortChangeKind::Updated);
    assert!(!updated.record.enabled);

    let deleted = events.next().await.unwrap();
    assert_eq!(deleted.kind, PortChangeKind::Deleted);
    assert_eq!(deleted.record.id, id);
}

#[tokio::test]
async fn query_enabled_filters_and_sorts() {
    let (mut registry, _events) = PortRegistry::new();
    registry.create(record(9001)).unwrap();
    registry.create(record(8080)).unwrap();
    let mut disabled = record(7000);
    disabled.enabled = false;
    registry.create(disabled).unwrap();

    let enabled = registry.query_enabled();
    let ports: Vec<u16> = enabled.iter().map(|record| record.port).collect();
    assert_eq!(ports, vec![8080, 9001]);
    assert_eq!(registry.query_all().len(), 3);
}
