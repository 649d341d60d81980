//! Edge case integration tests for face-auth-mcp.
//!
//! Security, UX, concurrency and boundary cases driven through the protocol handler.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio::sync::Mutex;

use face_auth::EngineConfig;
use face_auth_mcp::protocol::ProtocolHandler;
use face_auth_mcp::session::AuthSessionManager;
use face_auth_mcp::transport::{framing, StdioTransport};
use face_auth_mcp::types::*;

// ─────────────────────── helpers ───────────────────────

/// Simulated-mode manager storing under the temp dir.
fn temp_manager(dir: &tempfile::TempDir) -> AuthSessionManager {
    let config = EngineConfig {
        data_dir: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    AuthSessionManager::open(&config).unwrap()
}

fn temp_handler(dir: &tempfile::TempDir) -> ProtocolHandler {
    ProtocolHandler::new(Arc::new(Mutex::new(temp_manager(dir))))
}

fn mcp_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

fn init_request() -> Value {
    mcp_request(
        0,
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }),
    )
}

async fn send(handler: &ProtocolHandler, msg: Value) -> Option<Value> {
    let parsed: JsonRpcMessage = serde_json::from_value(msg).unwrap();
    handler.handle_message(parsed).await
}

async fn send_unwrap(handler: &ProtocolHandler, msg: Value) -> Value {
    send(handler, msg).await.expect("expected response")
}

fn make_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::new_rgb8(width, height);
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    img.write_with_encoder(encoder).unwrap();
    buf
}

fn b64_image(bytes: &[u8]) -> Value {
    let data = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes);
    json!({ "type": "base64", "data": format!("data:image/png;base64,{data}") })
}

async fn call_tool(handler: &ProtocolHandler, name: &str, arguments: Value) -> Value {
    let msg = mcp_request(10, "tools/call", json!({ "name": name, "arguments": arguments }));
    send_unwrap(handler, msg).await
}

/// The JSON payload of a successful tool call.
fn tool_json(resp: &Value) -> Value {
    let text = resp["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("expected tool result, got: {resp}"));
    serde_json::from_str(text).unwrap()
}

async fn enroll(handler: &ProtocolHandler, user_id: &str, image: &[u8]) -> Value {
    call_tool(
        handler,
        "face_enroll",
        json!({ "user_id": user_id, "image": b64_image(image) }),
    )
    .await
}

// ═══════════════════════════════════════════════════════
// SECURITY TESTS
// ═══════════════════════════════════════════════════════

/// Test 1: Path traversal in the user id never reaches the filesystem.
#[tokio::test]
async fn test_01_path_traversal_user_id() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    send_unwrap(&handler, init_request()).await;

    for user in ["../evil", "a/b", "..", "", "name with spaces"] {
        let resp = enroll(&handler, user, &make_png(4, 4)).await;
        assert_eq!(resp["error"]["code"], -32602, "user {user:?}: {resp}");
    }
    assert!(!dir.path().parent().unwrap().join("evil.json").exists());
    println!("TEST 01 — Path Traversal: PASS");
}

/// Test 2: Malformed JSON.
#[tokio::test]
async fn test_02_malformed_json() {
    let result = framing::parse_message(r#"{"broken":"#);
    assert_eq!(result.unwrap_err().code(), -32700);
    assert!(framing::parse_message("").is_err());
    assert!(framing::parse_message(r#"{"jsonrpc":"2.0","id":1,"method":"#).is_err());
    println!("TEST 02 — Malformed JSON: PASS");
}

/// Test 3: Undecodable base64 is an invalid-params error, not a crash.
#[tokio::test]
async fn test_03_bad_base64() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let resp = call_tool(
        &handler,
        "face_verify",
        json!({ "user_id": "amy", "image": { "type": "base64", "data": "%%%not base64%%%" } }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602, "got: {resp}");
    println!("TEST 03 — Bad Base64: PASS");
}

/// Test 4: Missing or malformed image arguments.
#[tokio::test]
async fn test_04_invalid_params() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    send_unwrap(&handler, init_request()).await;

    let resp = call_tool(&handler, "face_enroll", json!({ "user_id": "amy" })).await;
    assert_eq!(resp["error"]["code"], -32602);

    let resp = call_tool(
        &handler,
        "face_enroll",
        json!({ "user_id": "amy", "image": { "type": "file" } }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602);

    let resp = call_tool(
        &handler,
        "face_enroll",
        json!({ "user_id": "amy", "image": { "type": "webcam", "data": "x" } }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602);

    let resp = call_tool(
        &handler,
        "face_enroll",
        json!({ "user_id": "amy", "image": b64_image(&make_png(2, 2)), "expression": "smug" }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32602);
    println!("TEST 04 — Invalid Params: PASS");
}

// ═══════════════════════════════════════════════════════
// USER EXPERIENCE TESTS
// ═══════════════════════════════════════════════════════

/// Test 5: Verifying an unknown user reports not-enrolled distinctly.
#[tokio::test]
async fn test_05_not_enrolled_code() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let resp = call_tool(
        &handler,
        "face_verify",
        json!({ "user_id": "ghost", "image": b64_image(&make_png(4, 4)) }),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32850, "got: {resp}");
    println!("TEST 05 — Not Enrolled: PASS");
}

/// Test 6: Enroll then verify with the same capture.
#[tokio::test]
async fn test_06_enroll_and_verify() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let png = make_png(16, 16);

    let receipt = tool_json(&enroll(&handler, "amy", &png).await);
    assert_eq!(receipt["user_id"], "amy");
    assert_eq!(receipt["replaced"], false);
    let image_ref = receipt["image_ref"].as_str().unwrap();
    assert!(dir.path().join(image_ref).exists());

    let outcome = tool_json(
        &call_tool(
            &handler,
            "face_verify",
            json!({ "user_id": "amy", "image": b64_image(&png) }),
        )
        .await,
    );
    assert_eq!(outcome["matched"], true);
    assert_eq!(outcome["stored_expression"], outcome["detected_expression"]);
    println!("TEST 06 — Enroll and Verify: PASS");
}

/// Test 7: Image from a file path.
#[tokio::test]
async fn test_07_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let path = dir.path().join("capture.png");
    std::fs::write(&path, make_png(8, 8)).unwrap();

    let resp = call_tool(
        &handler,
        "face_enroll",
        json!({ "user_id": "bo", "image": { "type": "file", "path": path.to_str().unwrap() } }),
    )
    .await;
    assert_eq!(tool_json(&resp)["user_id"], "bo");

    let missing = call_tool(
        &handler,
        "face_enroll",
        json!({ "user_id": "bo", "image": { "type": "file", "path": "/nonexistent/capture.png" } }),
    )
    .await;
    assert_eq!(missing["error"]["code"], -32602);
    println!("TEST 07 — File Source: PASS");
}

/// Test 8: Two-step login through the tools.
#[tokio::test]
async fn test_08_login_flow() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let png = make_png(12, 12);
    enroll(&handler, "cy", &png).await;

    let start = tool_json(
        &call_tool(&handler, "login_start", json!({ "user_id": "cy", "password_ok": true })).await,
    );
    assert_eq!(start["state"]["state"], "facial_challenge_issued");
    let session_id = start["session_id"].as_str().unwrap().to_string();

    let done = tool_json(
        &call_tool(
            &handler,
            "login_facial",
            json!({ "session_id": session_id, "image": b64_image(&png) }),
        )
        .await,
    );
    assert_eq!(done["state"]["state"], "authenticated");
    assert_eq!(done["verification"]["matched"], true);

    let again = call_tool(
        &handler,
        "login_facial",
        json!({ "session_id": session_id, "image": b64_image(&png) }),
    )
    .await;
    assert_eq!(again["error"]["code"], -32851);

    let wrong_password = tool_json(
        &call_tool(&handler, "login_start", json!({ "user_id": "cy", "password_ok": false })).await,
    );
    assert_eq!(wrong_password["state"]["state"], "rejected");
    println!("TEST 08 — Login Flow: PASS");
}

/// Test 9: Future protocol version still initializes.
#[tokio::test]
async fn test_09_future_protocol_version() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let msg = mcp_request(
        1,
        "initialize",
        json!({
            "protocolVersion": "2025-11-25",
            "capabilities": {},
            "clientInfo": { "name": "future-client", "version": "9.0" }
        }),
    );
    let resp = send_unwrap(&handler, msg).await;
    assert_eq!(resp["result"]["protocolVersion"], MCP_VERSION);
    println!("TEST 09 — Future Protocol Version: PASS");
}

// ═══════════════════════════════════════════════════════
// CONCURRENCY TESTS
// ═══════════════════════════════════════════════════════

/// Test 10: Graceful shutdown.
#[tokio::test]
async fn test_10_graceful_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    send_unwrap(&handler, init_request()).await;
    let resp = send_unwrap(&handler, mcp_request(5, "shutdown", json!({}))).await;
    assert!(resp.get("result").is_some(), "got: {resp}");
    println!("TEST 10 — Graceful Shutdown: PASS");
}

/// Test 11: Enrollments survive a restart.
#[tokio::test]
async fn test_11_restart_keeps_templates() {
    let dir = tempfile::tempdir().unwrap();
    let png = make_png(10, 10);
    {
        let handler = temp_handler(&dir);
        enroll(&handler, "di", &png).await;
    }
    let handler = temp_handler(&dir);
    let status = tool_json(&call_tool(&handler, "face_status", json!({ "user_id": "di" })).await);
    assert_eq!(status["enrolled"], true);
    println!("TEST 11 — Restart Keeps Templates: PASS");
}

/// Test 12: Concurrent verifications against one handler.
#[tokio::test]
async fn test_12_concurrent_verifications() {
    let dir = tempfile::tempdir().unwrap();
    let handler = Arc::new(temp_handler(&dir));
    let png = make_png(6, 6);
    enroll(&handler, "ed", &png).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let handler = handler.clone();
        let png = png.clone();
        tasks.push(tokio::spawn(async move {
            let resp = call_tool(
                &handler,
                "face_verify",
                json!({ "user_id": "ed", "image": b64_image(&png) }),
            )
            .await;
            tool_json(&resp)["matched"].as_bool().unwrap()
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }
    println!("TEST 12 — Concurrent Verifications: PASS");
}

// ═══════════════════════════════════════════════════════
// BOUNDARY VALUE TESTS
// ═══════════════════════════════════════════════════════

/// Test 13: Identify and match only return users at or above the threshold.
#[tokio::test]
async fn test_13_identify_and_match() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let a = make_png(20, 20);
    let b = make_png(21, 21);
    enroll(&handler, "fay", &a).await;
    enroll(&handler, "gus", &b).await;

    let found = tool_json(
        &call_tool(
            &handler,
            "face_identify",
            json!({ "image": b64_image(&a), "threshold": 0.99 }),
        )
        .await,
    );
    assert_eq!(found["count"], 1);
    assert_eq!(found["matches"][0]["identity"], "fay");

    let limited = tool_json(
        &call_tool(
            &handler,
            "face_match",
            json!({ "image": b64_image(&a), "candidates": ["gus"], "threshold": 0.99 }),
        )
        .await,
    );
    assert_eq!(limited["count"], 0);

    let bad = call_tool(
        &handler,
        "face_match",
        json!({ "image": b64_image(&a), "candidates": [], "threshold": 2.0 }),
    )
    .await;
    assert_eq!(bad["error"]["code"], -32602);
    println!("TEST 13 — Identify and Match: PASS");
}

/// Test 14: Stream frames accumulate until the minimum, then analyse.
#[tokio::test]
async fn test_14_stream_frames() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let frame = b64_image(&make_png(5, 5));

    let first = tool_json(&call_tool(&handler, "stream_frame", json!({ "image": frame })).await);
    let stream_id = first["stream_id"].as_str().unwrap().to_string();
    assert_eq!(first["status"], "accumulating");
    let required = first["required"].as_u64().unwrap();

    let mut last = first;
    for _ in 1..required {
        last = tool_json(
            &call_tool(
                &handler,
                "stream_frame",
                json!({ "stream_id": stream_id, "image": frame }),
            )
            .await,
        );
    }
    assert_eq!(last["status"], "analyzed");
    assert!(last["analysis"]["expression"].is_string());

    let closed = tool_json(
        &call_tool(&handler, "stream_frame", json!({ "stream_id": stream_id, "end": true })).await,
    );
    assert_eq!(closed["closed"], true);
    println!("TEST 14 — Stream Frames: PASS");
}

/// Test 15: Remove, then the user is gone.
#[tokio::test]
async fn test_15_remove() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    enroll(&handler, "hal", &make_png(3, 3)).await;

    let removed = tool_json(&call_tool(&handler, "face_remove", json!({ "user_id": "hal" })).await);
    assert_eq!(removed["removed"], true);
    let again = tool_json(&call_tool(&handler, "face_remove", json!({ "user_id": "hal" })).await);
    assert_eq!(again["removed"], false);
    let status = tool_json(&call_tool(&handler, "face_status", json!({ "user_id": "hal" })).await);
    assert_eq!(status["enrolled"], false);
    println!("TEST 15 — Remove: PASS");
}

/// Test 16: Many enrollments, listed in user order.
#[tokio::test]
async fn test_16_rapid_enrollments() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    for i in 0..40u32 {
        let resp = enroll(&handler, &format!("user-{i:02}"), &make_png(i + 1, 1)).await;
        assert!(resp.get("result").is_some(), "enroll {i}: {resp}");
    }
    let listing = tool_json(&call_tool(&handler, "face_status", json!({})).await);
    assert_eq!(listing["count"], 40);
    assert_eq!(listing["users"][0]["user_id"], "user-00");
    println!("TEST 16 — Rapid Enrollments: PASS");
}

// ═══════════════════════════════════════════════════════
// ADDITIONAL EDGE CASES (bonus coverage)
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_bonus_unknown_tool() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let resp = call_tool(&handler, "face_teleport", json!({})).await;
    assert_eq!(resp["error"]["code"], -32803);
}

#[tokio::test]
async fn test_bonus_capability_reports_simulation() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let report = tool_json(&call_tool(&handler, "face_capability", json!({})).await);
    assert_eq!(report["capability"]["kind"], "simulated");
    assert_eq!(report["capability"]["degraded"], true);
    assert_eq!(report["policy"]["mode"], "blended");
}

#[tokio::test]
async fn test_bonus_tools_list() {
    let dir = tempfile::tempdir().unwrap();
    let handler = temp_handler(&dir);
    let resp = send_unwrap(&handler, mcp_request(1, "tools/list", json!({}))).await;
    let names: Vec<&str> = resp["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    for expected in ["face_enroll", "face_verify", "face_match", "login_start", "stream_frame"] {
        assert!(names.contains(&expected), "missing {expected}");
    }
}

#[tokio::test]
async fn test_bonus_stdio_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let transport = StdioTransport::new(temp_handler(&dir));
    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","method":"initialized"}"#,
        "\n",
        "{garbage\n",
    );
    let mut output = Vec::new();
    transport
        .serve(BufReader::new(input.as_bytes()), &mut output)
        .await
        .unwrap();

    let lines: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[1]["error"]["code"], -32700);
}
