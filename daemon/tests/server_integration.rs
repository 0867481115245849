//! End-to-end tests: a live socket served by the real accept loop over a
//! seeded store file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use warmchatd::{server, DaemonState, QueryService, StoreService};

const HOUR_NS: i64 = 3_600_000_000_000;

fn seed_store(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE message (
             ROWID INTEGER PRIMARY KEY,
             text TEXT,
             attributedBody BLOB,
             date INTEGER,
             is_from_me INTEGER DEFAULT 0,
             is_read INTEGER DEFAULT 1,
             is_finished INTEGER DEFAULT 1,
             is_system_message INTEGER DEFAULT 0,
             item_type INTEGER DEFAULT 0,
             associated_message_type INTEGER DEFAULT 0,
             handle_id INTEGER DEFAULT 0,
             cache_roomnames TEXT
         );
         CREATE TABLE handle (ROWID INTEGER PRIMARY KEY, id TEXT);
         CREATE TABLE chat (ROWID INTEGER PRIMARY KEY, chat_identifier TEXT, display_name TEXT);
         CREATE TABLE chat_message_join (chat_id INTEGER, message_id INTEGER);

         INSERT INTO handle (ROWID, id) VALUES (1, '+14155551234');
         INSERT INTO handle (ROWID, id) VALUES (2, 'friend@example.com');",
    )
    .unwrap();

    let mut insert = |id: i64, text: &str, date_ns: i64, is_from_me: bool, is_read: bool| {
        conn.execute(
            "INSERT INTO message (ROWID, text, date, is_from_me, is_read, handle_id)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            rusqlite::params![id, text, date_ns, is_from_me, is_read],
        )
        .unwrap();
    };

    insert(1, "seen already", HOUR_NS, false, true);
    insert(2, "dinner plans tonight?", 2 * HOUR_NS, false, false);
    insert(3, "on my way", 3 * HOUR_NS, true, true);
}

async fn start_daemon(dir: &tempfile::TempDir) -> PathBuf {
    let store_path = dir.path().join("chat.db");
    seed_store(&store_path);

    let socket_path = dir.path().join("daemon.sock");
    let pid_path = dir.path().join("daemon.pid");
    let listener = UnixListener::bind(&socket_path).unwrap();

    let service = Arc::new(StoreService::new(store_path, socket_path.clone()));
    let state = Arc::new(DaemonState::new(socket_path.clone(), pid_path, service));
    tokio::spawn(async move {
        let _ = server::run(listener, state).await;
    });

    socket_path
}

async fn call(socket: &Path, line: &str) -> Value {
    let mut stream = UnixStream::connect(socket).await.unwrap();
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response).await.unwrap();
    serde_json::from_str(&response).unwrap()
}

#[tokio::test]
async fn health_over_live_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = start_daemon(&dir).await;

    let resp = call(&socket, r#"{"id":"h1","method":"health"}"#).await;
    assert_eq!(resp["ok"], true);
    assert_eq!(resp["id"], "h1");
    assert_eq!(resp["result"]["pid"], std::process::id());
    assert_eq!(resp["result"]["can_read_store"], true);
    assert_eq!(resp["meta"]["protocol_v"], 1);
}

#[tokio::test]
async fn invalid_json_gets_error_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let socket = start_daemon(&dir).await;

    let resp = call(&socket, "{truncated").await;
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["id"], Value::Null);
    assert_eq!(resp["error"]["code"], "INVALID_JSON");
    assert_eq!(resp["result"], Value::Null);
}

#[tokio::test]
async fn unknown_method_is_reported_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let socket = start_daemon(&dir).await;

    let resp = call(&socket, r#"{"id":1,"method":"frobnicate"}"#).await;
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "UNKNOWN_METHOD");
    assert_eq!(resp["error"]["message"], "frobnicate");
}

#[tokio::test]
async fn search_requires_query() {
    let dir = tempfile::tempdir().unwrap();
    let socket = start_daemon(&dir).await;

    let resp = call(&socket, r#"{"id":1,"method":"text_search","params":{}}"#).await;
    assert_eq!(resp["error"]["code"], "ERROR");
    assert_eq!(resp["error"]["message"], "query is required");
}

#[tokio::test]
async fn queries_return_seeded_rows() {
    let dir = tempfile::tempdir().unwrap();
    let socket = start_daemon(&dir).await;

    let resp = call(&socket, r#"{"id":1,"method":"unread_count"}"#).await;
    assert_eq!(resp["result"]["count"], 1);

    let resp = call(&socket, r#"{"id":2,"method":"unread_messages"}"#).await;
    let messages = resp["result"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["text"], "dinner plans tonight?");

    let resp = call(
        &socket,
        r#"{"id":3,"method":"text_search","params":{"query":"dinner"}}"#,
    )
    .await;
    let results = resp["result"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0]["match_snippet"].as_str().unwrap().contains("dinner"));

    let resp = call(
        &socket,
        r#"{"id":4,"method":"messages_by_phone","params":{"phone":"+14155551234"}}"#,
    )
    .await;
    let messages = resp["result"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
}

#[tokio::test]
async fn shaping_params_apply_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let socket = start_daemon(&dir).await;

    let resp = call(
        &socket,
        r#"{"id":1,"method":"recent","params":{"fields":"date,text","limit":2}}"#,
    )
    .await;
    let messages = resp["result"]["messages"].as_array().unwrap();
    assert!(!messages.is_empty());
    for row in messages {
        let keys: Vec<&String> = row.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["date", "text"]);
    }
}

#[tokio::test]
async fn bundle_include_narrows_sections() {
    let dir = tempfile::tempdir().unwrap();
    let socket = start_daemon(&dir).await;

    let resp = call(
        &socket,
        r#"{"id":1,"method":"bundle","params":{"include":"unread_count"}}"#,
    )
    .await;
    let result = &resp["result"];
    assert!(result.get("meta").is_some());
    assert_eq!(result["unread"]["count"], 1);
    assert!(result["unread"].get("messages").is_none());
    assert!(result.get("recent").is_none());
}

#[tokio::test]
async fn connection_closes_after_one_response() {
    let dir = tempfile::tempdir().unwrap();
    let socket = start_daemon(&dir).await;

    let mut stream = UnixStream::connect(&socket).await.unwrap();
    stream
        .write_all(b"{\"id\":1,\"method\":\"health\"}\n")
        .await
        .unwrap();

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert!(!line.is_empty());

    // A second read sees EOF: the server serves one request per connection.
    line.clear();
    let n = reader.read_line(&mut line).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn eof_without_request_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let socket = start_daemon(&dir).await;

    let stream = UnixStream::connect(&socket).await.unwrap();
    drop(stream);

    // The server must still answer the next connection.
    let resp = call(&socket, r#"{"id":1,"method":"health"}"#).await;
    assert_eq!(resp["ok"], true);
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_requests() {
    // Service slow enough that shutdown arrives while it is executing.
    struct SlowService;

    impl QueryService for SlowService {
        fn health(&self) -> Value {
            std::thread::sleep(Duration::from_millis(300));
            json!({ "pid": std::process::id(), "can_read_store": true })
        }

        fn unread_count(&self) -> u64 {
            0
        }

        fn unread_messages(&self, _limit: usize) -> Vec<Value> {
            Vec::new()
        }

        fn recent(&self, _limit: usize) -> Vec<Value> {
            Vec::new()
        }

        fn text_search(
            &self,
            _query: &str,
            _limit: usize,
            _since: Option<DateTime<Utc>>,
        ) -> Vec<Value> {
            Vec::new()
        }

        fn messages_by_phone(&self, _phone: &str, _limit: usize) -> Vec<Value> {
            Vec::new()
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("daemon.sock");
    let pid_path = dir.path().join("daemon.pid");
    let listener = UnixListener::bind(&socket_path).unwrap();

    let state = Arc::new(DaemonState::new(
        socket_path.clone(),
        pid_path,
        Arc::new(SlowService),
    ));
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(server::serve(listener, state, async {
        let _ = rx.await;
    }));

    let mut stream = UnixStream::connect(&socket_path).await.unwrap();
    stream
        .write_all(b"{\"id\":\"s1\",\"method\":\"health\"}\n")
        .await
        .unwrap();

    // Let the request reach dispatch, then order shutdown mid-flight.
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(()).unwrap();

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let resp: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(resp["ok"], true);
    assert_eq!(resp["id"], "s1");

    server.await.unwrap().unwrap();
    // Lifecycle files are removed only after the drain.
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn concurrent_requests_all_answered() {
    let dir = tempfile::tempdir().unwrap();
    let socket = start_daemon(&dir).await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let socket = socket.clone();
        handles.push(tokio::spawn(async move {
            let line = format!("{{\"id\":{i},\"method\":\"health\"}}");
            call(&socket, &line).await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let resp = handle.await.unwrap();
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["id"], i);
        assert_eq!(resp["result"]["pid"], std::process::id());
    }
}
