//! Tests for the coordinator's JSON-RPC dispatcher
//!
//! Socket-level scenarios live in `tests/server_integration.rs`; these
//! exercise method semantics against a seeded registry.

use super::*;
use crate::jsonrpc::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};

const MAC: &str = "00:11:22:33:44:55";

fn server() -> Arc<StreamServer> {
    let mut settings = Settings::default();
    settings.stream.port = 0;
    settings.control.port = 0;

    let registry = Arc::new(ClientRegistry::in_memory());
    registry.get_or_insert(MAC);

    StreamServer::new(&settings, registry).unwrap()
}

fn rpc(server: &StreamServer, line: &str) -> std::result::Result<RpcOutcome, RpcError> {
    server.dispatch_rpc(&RpcRequest::parse(line).unwrap())
}

// ============================================================================
// System.GetStatus
// ============================================================================

#[test]
fn test_get_status_lists_all_clients() {
    let server = server();
    server.registry.get_or_insert("aa:aa:aa:aa:aa:aa");

    let outcome = rpc(
        &server,
        r#"{"jsonrpc":"2.0","method":"System.GetStatus","id":1}"#,
    )
    .unwrap();

    assert!(outcome.updated.is_none());
    let clients = outcome.result["clients"].as_array().unwrap();
    assert_eq!(clients.len(), 2);
    assert!(outcome.result["server"]["version"].is_string());
}

#[test]
fn test_get_status_single_client() {
    let server = server();
    let outcome = rpc(
        &server,
        &format!(
            r#"{{"jsonrpc":"2.0","method":"System.GetStatus","params":{{"client":"{MAC}"}},"id":1}}"#
        ),
    )
    .unwrap();

    let clients = outcome.result["clients"].as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["mac"], json!(MAC));
}

#[test]
fn test_get_status_unknown_client_is_empty() {
    let server = server();
    let outcome = rpc(
        &server,
        r#"{"jsonrpc":"2.0","method":"System.GetStatus","params":{"client":"ff:ff:ff:ff:ff:ff"},"id":1}"#,
    )
    .unwrap();

    assert!(outcome.result["clients"].as_array().unwrap().is_empty());
}

// ============================================================================
// Client.Set*
// ============================================================================

#[test]
fn test_set_volume() {
    let server = server();
    let outcome = rpc(
        &server,
        &format!(
            r#"{{"jsonrpc":"2.0","method":"Client.SetVolume","params":{{"client":"{MAC}","volume":42}},"id":1}}"#
        ),
    )
    .unwrap();

    assert_eq!(outcome.result, json!(42));
    assert_eq!(outcome.updated.unwrap().volume.percent, 42);
    assert_eq!(server.registry.get(MAC).unwrap().volume.percent, 42);
}

#[test]
fn test_set_mute() {
    let server = server();
    let outcome = rpc(
        &server,
        &format!(
            r#"{{"jsonrpc":"2.0","method":"Client.SetMute","params":{{"client":"{MAC}","mute":true}},"id":1}}"#
        ),
    )
    .unwrap();

    assert_eq!(outcome.result, json!(true));
    assert!(server.registry.get(MAC).unwrap().volume.muted);
}

#[test]
fn test_set_name() {
    let server = server();
    let outcome = rpc(
        &server,
        &format!(
            r#"{{"jsonrpc":"2.0","method":"Client.SetName","params":{{"client":"{MAC}","name":"living room"}},"id":1}}"#
        ),
    )
    .unwrap();

    assert_eq!(outcome.result, json!("living room"));
    assert_eq!(server.registry.get(MAC).unwrap().name, "living room");
}

#[test]
fn test_set_latency_within_bounds() {
    let server = server();

    // buffer_ms is the upper bound, inclusive.
    let outcome = rpc(
        &server,
        &format!(
            r#"{{"jsonrpc":"2.0","method":"Client.SetLatency","params":{{"client":"{MAC}","latency":1000}},"id":1}}"#
        ),
    )
    .unwrap();
    assert_eq!(outcome.result, json!(1000));

    let outcome = rpc(
        &server,
        &format!(
            r#"{{"jsonrpc":"2.0","method":"Client.SetLatency","params":{{"client":"{MAC}","latency":-10000}},"id":2}}"#
        ),
    )
    .unwrap();
    assert_eq!(outcome.result, json!(-10000));
}

#[test]
fn test_set_latency_above_buffer_rejected() {
    let server = server();
    server.registry.update(MAC, |c| c.latency = 7);

    let err = rpc(
        &server,
        &format!(
            r#"{{"jsonrpc":"2.0","method":"Client.SetLatency","params":{{"client":"{MAC}","latency":1001}},"id":1}}"#
        ),
    )
    .unwrap_err();

    assert_eq!(err.code, INVALID_PARAMS);
    // Rejected before any mutation.
    assert_eq!(server.registry.get(MAC).unwrap().latency, 7);
}

#[test]
fn test_set_latency_below_floor_rejected() {
    let server = server();
    let err = rpc(
        &server,
        &format!(
            r#"{{"jsonrpc":"2.0","method":"Client.SetLatency","params":{{"client":"{MAC}","latency":-10001}},"id":1}}"#
        ),
    )
    .unwrap_err();
    assert_eq!(err.code, INVALID_PARAMS);
}

#[test]
fn test_set_volume_out_of_range_leaves_state() {
    let server = server();
    let err = rpc(
        &server,
        &format!(
            r#"{{"jsonrpc":"2.0","method":"Client.SetVolume","params":{{"client":"{MAC}","volume":101}},"id":1}}"#
        ),
    )
    .unwrap_err();

    assert_eq!(err.code, INVALID_PARAMS);
    assert_eq!(server.registry.get(MAC).unwrap().volume.percent, 100);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_unknown_client_is_internal_error() {
    let server = server();
    let err = rpc(
        &server,
        r#"{"jsonrpc":"2.0","method":"Client.SetMute","params":{"client":"aa:aa:aa:aa:aa:aa","mute":true},"id":1}"#,
    )
    .unwrap_err();

    assert_eq!(err.code, INTERNAL_ERROR);
    assert_eq!(err.message, "Client not found");
}

#[test]
fn test_unknown_method() {
    let server = server();
    let err = rpc(&server, r#"{"jsonrpc":"2.0","method":"Foo.Bar","id":1}"#).unwrap_err();
    assert_eq!(err.code, METHOD_NOT_FOUND);

    let err = rpc(
        &server,
        &format!(
            r#"{{"jsonrpc":"2.0","method":"Client.SetTimbre","params":{{"client":"{MAC}"}},"id":1}}"#
        ),
    )
    .unwrap_err();
    assert_eq!(err.code, METHOD_NOT_FOUND);
}
