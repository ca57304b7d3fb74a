mod common;

use common::{Harness, AUTH, HOSTNAME};
use webflow_core::{BoardInfo, ServerConfig};

const UPGRADE: &str = "Upgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\n";

#[test]
fn test_version_json_fixed_keys() {
    let board = BoardInfo {
        version: "9.0.0".to_string(),
        build_date: "2024-01-01".to_string(),
        board_name: "Feather ESP32-S3".to_string(),
        mcu_name: "ESP32S3".to_string(),
        board_id: "feather_esp32s3".to_string(),
        creator_id: 0x239A,
        creation_id: 0x8000,
    };
    let mut h = Harness::with_config(ServerConfig::new().board(board));

    let reply = h.send("GET /cp/version.json HTTP/1.1\r\n\r\n");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("Transfer-Encoding"), Some("chunked"));

    let doc = reply.json();
    let object = doc.as_object().unwrap();
    for key in ["web_api_version", "version", "board_name", "hostname", "port", "ip"] {
        assert!(object.contains_key(key), "missing {key}");
    }
    assert_eq!(doc["web_api_version"], 1);
    assert_eq!(doc["version"], "9.0.0");
    assert_eq!(doc["board_name"], "Feather ESP32-S3");
    assert_eq!(doc["board_id"], "feather_esp32s3");
    assert_eq!(doc["creator_id"], 0x239A);
    assert_eq!(doc["creation_id"], 0x8000);
    assert_eq!(doc["build_date"], "2024-01-01");
    assert_eq!(doc["mcu_name"], "ESP32S3");
    assert!(!object.contains_key("board"));
    assert_eq!(object.len(), 11);
    assert_eq!(doc["hostname"], HOSTNAME);
    assert_eq!(doc["port"], 80);
    assert_eq!(doc["ip"], "192.168.1.42");
}

#[test]
fn test_version_json_needs_no_credentials() {
    let mut h = Harness::new();
    assert_eq!(h.send("GET /cp/version.json HTTP/1.1\r\n\r\n").status, 200);
}

#[test]
fn test_devices_json_lists_peers() {
    let mut h = Harness::new();
    let doc = h.send("GET /cp/devices.json HTTP/1.1\r\n\r\n").json();
    assert_eq!(doc["total"], 2);
    let devices = doc["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0]["hostname"], "cpy-aaaaaa");
    assert_eq!(devices[0]["instance_name"], "Feather");
    assert_eq!(devices[1]["port"], 8080);
    assert_eq!(devices[1]["ip"], "192.168.1.51");
}

#[test]
fn test_devices_json_caps_the_list_but_not_the_total() {
    let mut h = Harness::with_config(ServerConfig::new().max_peers(1));
    let doc = h.send("GET /cp/devices.json HTTP/1.1\r\n\r\n").json();
    assert_eq!(doc["total"], 2);
    assert_eq!(doc["devices"].as_array().unwrap().len(), 1);
}

#[test]
fn test_control_plane_is_get_only() {
    let mut h = Harness::new();
    assert_eq!(h.send("PUT /cp/version.json HTTP/1.1\r\n\r\n").status, 405);
    assert_eq!(h.send("GET /cp/nothing.json HTTP/1.1\r\n\r\n").status, 404);
}

#[test]
fn test_websocket_upgrade_accept_key() {
    let mut h = Harness::new();
    let conn = h.connect();
    conn.push(
        format!(
            "GET /cp/serial/ HTTP/1.1\r\nHost: {HOSTNAME}.local\r\n{AUTH}{UPGRADE}Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        )
        .as_bytes(),
    );
    h.tick();

    let replies = common::parse_replies(&conn.output());
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].status, 101);
    assert_eq!(
        replies[0].header("Sec-WebSocket-Accept"),
        Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
    );
    assert_eq!(replies[0].header("Upgrade"), Some("websocket"));

    // The socket now belongs to the sink, open and untouched
    let handed = h.sink.0.borrow();
    assert_eq!(handed.len(), 1);
    assert!(handed[0].same_wire(&conn));
    assert!(!conn.is_closed());
    assert!(!h.server.has_active_connection());
}

#[test]
fn test_upgrade_without_key_is_400() {
    let mut h = Harness::new();
    let reply = h.send(&format!(
        "GET /cp/serial/ HTTP/1.1\r\n{AUTH}{UPGRADE}Sec-WebSocket-Key: tooshort\r\n\r\n"
    ));
    assert_eq!(reply.status, 400);
    assert!(h.sink.0.borrow().is_empty());
}

#[test]
fn test_serial_page_without_upgrade() {
    let mut h = Harness::new();
    let reply = h.send(&format!("GET /cp/serial/ HTTP/1.1\r\n{AUTH}\r\n"));
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body_text(), "<h1>serial</h1>");
}

#[test]
fn test_serial_requires_credentials() {
    let mut h = Harness::new();
    let reply = h.send(&format!(
        "GET /cp/serial/ HTTP/1.1\r\n{UPGRADE}Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
    ));
    assert_eq!(reply.status, 401);
    assert!(h.sink.0.borrow().is_empty());
}
