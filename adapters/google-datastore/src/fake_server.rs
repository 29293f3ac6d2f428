//! In-process stand-in for the Datastore REST API, used by the adapter tests.
//!
//! Implements just enough of `allocateIds`, `lookup`, `commit`, and
//! `runQuery` for a single project, plus failure injection.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Default)]
struct FakeState {
    entities: BTreeMap<String, Value>,
    next_id: i64,
    page_size: Option<usize>,
    defer_lookups: usize,
    failures: VecDeque<(u16, String)>,
    calls: HashMap<String, usize>,
}

type Shared = Arc<Mutex<FakeState>>;

pub struct FakeDatastore {
    pub addr: SocketAddr,
    state: Shared,
}

impl FakeDatastore {
    /// Serve on an ephemeral port from a background thread.
    pub fn start() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let state: Shared = Arc::new(Mutex::new(FakeState {
            next_id: 1000,
            ..Default::default()
        }));
        let app = Router::new()
            .route("/v1/projects/:target", post(dispatch))
            .with_state(state.clone());

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });
        Self { addr, state }
    }

    pub fn set_page_size(&self, n: usize) {
        self.state.lock().unwrap().page_size = Some(n);
    }

    /// Make the next request fail with `status` and gRPC `grpc_status`.
    pub fn fail_next(&self, status: u16, grpc_status: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push_back((status, grpc_status.to_string()));
    }

    /// Report the keys of the next lookup as `deferred`.
    pub fn defer_next_lookup(&self) {
        self.state.lock().unwrap().defer_lookups += 1;
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().unwrap().calls.get(method).copied().unwrap_or(0)
    }

    pub fn insert_raw(&self, entity: Value) {
        let slot = slot_of(&entity["key"]).unwrap();
        self.state.lock().unwrap().entities.insert(slot, entity);
    }

    pub fn stored(&self, id: i64) -> Option<Value> {
        self.state.lock().unwrap().entities.get(&id_slot(id)).cloned()
    }
}

fn id_slot(id: i64) -> String {
    format!("id:{id:020}")
}

fn slot_of(key: &Value) -> Option<String> {
    let leaf = key["path"].as_array()?.last()?;
    if let Some(id) = leaf["id"].as_str() {
        return id.parse().ok().map(id_slot);
    }
    leaf["name"].as_str().map(|n| format!("name:{n}"))
}

fn grpc_error(status: u16, grpc_status: &str, message: &str) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({ "error": { "code": status, "message": message, "status": grpc_status } });
    (code, Json(body)).into_response()
}

async fn dispatch(
    State(state): State<Shared>,
    Path(target): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some((_project, method)) = target.split_once(':') else {
        return grpc_error(404, "NOT_FOUND", "unknown method");
    };
    let mut st = state.lock().unwrap();
    *st.calls.entry(method.to_string()).or_default() += 1;
    if let Some((status, grpc_status)) = st.failures.pop_front() {
        return grpc_error(status, &grpc_status, "injected failure");
    }

    match method {
        "allocateIds" => {
            let mut keys = Vec::new();
            for key in body["keys"].as_array().cloned().unwrap_or_default() {
                let mut key = key;
                st.next_id += 1;
                key["path"][0]["id"] = json!(st.next_id.to_string());
                keys.push(key);
            }
            Json(json!({ "keys": keys })).into_response()
        }
        "lookup" if st.defer_lookups > 0 => {
            st.defer_lookups -= 1;
            let keys = body["keys"].as_array().cloned().unwrap_or_default();
            Json(json!({ "deferred": keys })).into_response()
        }
        "lookup" => {
            let mut found = Vec::new();
            let mut missing = Vec::new();
            for key in body["keys"].as_array().cloned().unwrap_or_default() {
                match slot_of(&key).and_then(|s| st.entities.get(&s)) {
                    Some(entity) => found.push(json!({ "entity": entity, "version": "1" })),
                    None => missing.push(json!({ "entity": { "key": key }, "version": "1" })),
                }
            }
            Json(json!({ "found": found, "missing": missing })).into_response()
        }
        "commit" => {
            if body["mode"] != "NON_TRANSACTIONAL" {
                return grpc_error(400, "INVALID_ARGUMENT", "unsupported mode");
            }
            for m in body["mutations"].as_array().cloned().unwrap_or_default() {
                if let Some(entity) = m.get("upsert") {
                    let Some(slot) = slot_of(&entity["key"]) else {
                        return grpc_error(400, "INVALID_ARGUMENT", "incomplete key");
                    };
                    st.entities.insert(slot, entity.clone());
                } else if let Some(key) = m.get("delete") {
                    if let Some(slot) = slot_of(key) {
                        st.entities.remove(&slot);
                    }
                }
            }
            Json(json!({ "mutationResults": [], "indexUpdates": 0 })).into_response()
        }
        "runQuery" => {
            let kind = body["query"]["kind"][0]["name"].as_str().unwrap_or_default().to_string();
            let start: usize = body["query"]["startCursor"]
                .as_str()
                .and_then(|c| c.parse().ok())
                .unwrap_or(0);
            let all: Vec<&Value> = st
                .entities
                .values()
                .filter(|e| e["key"]["path"][0]["kind"] == kind.as_str())
                .collect();
            let page = st.page_size.unwrap_or(usize::MAX);
            let end = start.saturating_add(page).min(all.len());
            let results: Vec<Value> = all[start.min(end)..end]
                .iter()
                .map(|e| json!({ "entity": e, "cursor": "c" }))
                .collect();
            let more = if end < all.len() { "NOT_FINISHED" } else { "NO_MORE_RESULTS" };
            Json(json!({
                "batch": {
                    "entityResultType": "FULL",
                    "entityResults": results,
                    "endCursor": end.to_string(),
                    "moreResults": more,
                }
            }))
            .into_response()
        }
        _ => grpc_error(404, "NOT_FOUND", "unknown method"),
    }
}
