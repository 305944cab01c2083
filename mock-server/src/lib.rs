//! In-memory stand-in for the FileMaker Data API.
//!
//! Serves the `/fmi/data/vLatest` routes a client needs, answering every
//! call with the `{response, messages}` envelope. Failures use the vendor
//! codes of [`Fault`] and loose HTTP statuses, like the real service.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

pub mod fault;
pub mod store;
pub mod upload;

pub use fault::Fault;
use store::{FieldDef, LayoutStore, SortRule};

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";
pub const DATABASE: &str = "Contacts";
pub const LAYOUT: &str = "People";
/// A second layout on the same table that starts out empty.
pub const EMPTY_LAYOUT: &str = "Summary";
pub const GLOBAL_FIELD: &str = "Globals::gCurrentUser";

const FOLDERS: &[(&str, &[&str])] = &[("Reports", &[EMPTY_LAYOUT])];

pub struct MockState {
    sessions: HashSet<String>,
    layouts: BTreeMap<String, LayoutStore>,
    globals: BTreeMap<String, Value>,
}

impl MockState {
    fn seeded() -> Self {
        let fields = || {
            vec![
                FieldDef { name: "name", container: false, value_list: None },
                FieldDef { name: "city", container: false, value_list: Some("Cities") },
                FieldDef { name: "notes", container: false, value_list: None },
                FieldDef { name: "photo", container: true, value_list: None },
            ]
        };
        let mut layouts = BTreeMap::new();
        layouts.insert(LAYOUT.to_string(), LayoutStore::new("People", fields()));
        layouts.insert(EMPTY_LAYOUT.to_string(), LayoutStore::new("People", fields()));

        let mut globals = BTreeMap::new();
        globals.insert(GLOBAL_FIELD.to_string(), Value::String(String::new()));

        Self {
            sessions: HashSet::new(),
            layouts,
            globals,
        }
    }

    fn layout(&self, name: &str) -> Result<&LayoutStore, Fault> {
        self.layouts.get(name).ok_or(Fault::LayoutMissing)
    }

    fn layout_mut(&mut self, name: &str) -> Result<&mut LayoutStore, Fault> {
        self.layouts.get_mut(name).ok_or(Fault::LayoutMissing)
    }

    /// Token first, then database, as the service checks them.
    fn authorize(&self, headers: &HeaderMap, db: &str) -> Result<(), Fault> {
        match bearer(headers) {
            Some(token) if self.sessions.contains(token) => {}
            _ => return Err(Fault::InvalidToken),
        }
        check_database(db)
    }
}

pub type Db = Arc<RwLock<MockState>>;

type Reply = Result<Response, Fault>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(MockState::seeded()));
    let api = Router::new()
        .route("/productInfo", get(product_info))
        .route("/databases", get(list_databases))
        .route("/validateSession", get(validate_session))
        .route("/databases/{db}/sessions", post(create_session))
        .route("/databases/{db}/sessions/{token}", delete(delete_session))
        .route("/databases/{db}/layouts", get(list_layouts))
        .route("/databases/{db}/layouts/{layout}", get(layout_metadata))
        .route("/databases/{db}/scripts", get(list_scripts))
        .route("/databases/{db}/globals", patch(set_globals))
        .route("/databases/{db}/layouts/{layout}/_find", post(find))
        .route("/databases/{db}/layouts/{layout}/records", get(get_records).post(create_record))
        .route("/databases/{db}/layouts/{layout}/records/", get(get_records).post(create_record))
        .route(
            "/databases/{db}/layouts/{layout}/records/{id}",
            get(get_record)
                .post(duplicate_record)
                .patch(edit_record)
                .delete(delete_record),
        )
        .route(
            "/databases/{db}/layouts/{layout}/records/{id}/containers/{field}",
            post(upload_container),
        )
        .route("/databases/{db}/layouts/{layout}/script/{script}", get(run_script));

    Router::new().nest("/fmi/data/vLatest", api).with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn envelope(response: Value) -> Response {
    let body = json!({
        "response": response,
        "messages": [{"code": "0", "message": "OK"}]
    });
    (StatusCode::OK, Json(body)).into_response()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers.get(AUTHORIZATION)?.to_str().ok()?.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn check_database(db: &str) -> Result<(), Fault> {
    if db == DATABASE {
        Ok(())
    } else {
        Err(Fault::DatabaseMissing)
    }
}

fn record_id(raw: &str) -> Result<u64, Fault> {
    raw.parse().map_err(|_| Fault::RecordMissing)
}

fn json_object(body: &Bytes) -> Result<Map<String, Value>, Fault> {
    if body.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(Fault::InvalidParameter),
    }
}

fn object_field(body: &Map<String, Value>, key: &str) -> Result<Map<String, Value>, Fault> {
    match body.get(key) {
        None => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(Fault::InvalidParameter),
    }
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn count(value: Option<&Value>) -> Result<Option<usize>, Fault> {
    match value {
        None => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(|n| Some(n as usize)).ok_or(Fault::InvalidParameter),
        Some(Value::String(s)) => s.parse().map(Some).map_err(|_| Fault::InvalidParameter),
        Some(_) => Err(Fault::InvalidParameter),
    }
}

/// `offset` is 1-based.
fn page(ids: &[u64], offset: usize, limit: usize) -> &[u64] {
    let start = offset.saturating_sub(1).min(ids.len());
    let end = start.saturating_add(limit).min(ids.len());
    &ids[start..end]
}

fn found_set(layout: &str, store: &LayoutStore, found: &[u64], returned: &[u64]) -> Value {
    let data: Vec<Value> = returned.iter().map(|id| store.record_json(*id)).collect();
    json!({
        "dataInfo": {
            "database": DATABASE,
            "layout": layout,
            "table": store.table,
            "totalRecordCount": store.len(),
            "foundCount": found.len(),
            "returnedCount": returned.len()
        },
        "data": data
    })
}

// ---------------------------------------------------------------------------
// Host and session handlers
// ---------------------------------------------------------------------------

async fn product_info() -> Response {
    envelope(json!({
        "productInfo": {
            "name": "FileMaker Data API Engine",
            "buildDate": "07/05/2023",
            "version": "20.2.1.19",
            "dateFormat": "MM/dd/yyyy",
            "timeFormat": "HH:mm:ss",
            "timeStampFormat": "MM/dd/yyyy HH:mm:ss"
        }
    }))
}

async fn list_databases() -> Response {
    envelope(json!({"databases": [{"name": DATABASE}]}))
}

async fn create_session(State(db): State<Db>, Path(database): Path<String>, headers: HeaderMap) -> Reply {
    check_database(&database)?;
    match basic_credentials(&headers) {
        Some((user, pass)) if user == USERNAME && pass == PASSWORD => {}
        _ => return Err(Fault::InvalidAccount),
    }
    let token = uuid::Uuid::new_v4().simple().to_string();
    db.write().await.sessions.insert(token.clone());
    tracing::info!("session opened");

    let header = [(HeaderName::from_static("x-fm-data-access-token"), token.clone())];
    Ok((header, envelope(json!({"token": token}))).into_response())
}

async fn validate_session(State(db): State<Db>, headers: HeaderMap) -> Reply {
    let state = db.read().await;
    match bearer(&headers) {
        Some(token) if state.sessions.contains(token) => Ok(envelope(json!({}))),
        _ => Err(Fault::InvalidToken),
    }
}

async fn delete_session(State(db): State<Db>, Path((database, token)): Path<(String, String)>) -> Reply {
    check_database(&database)?;
    if db.write().await.sessions.remove(&token) {
        tracing::info!("session closed");
        Ok(envelope(json!({})))
    } else {
        Err(Fault::InvalidToken)
    }
}

// ---------------------------------------------------------------------------
// Metadata handlers
// ---------------------------------------------------------------------------

async fn list_layouts(State(db): State<Db>, Path(database): Path<String>, headers: HeaderMap) -> Reply {
    let state = db.read().await;
    state.authorize(&headers, &database)?;

    let in_folder = |name: &str| FOLDERS.iter().any(|(_, members)| members.contains(&name));
    let mut layouts: Vec<Value> = state
        .layouts
        .iter()
        .filter(|(name, _)| !in_folder(name.as_str()))
        .map(|(name, store)| json!({"name": name, "table": store.table}))
        .collect();
    for (folder, members) in FOLDERS {
        let children: Vec<Value> = members
            .iter()
            .filter_map(|m| state.layouts.get(*m).map(|s| json!({"name": m, "table": s.table})))
            .collect();
        layouts.push(json!({"name": folder, "isFolder": true, "folderLayoutNames": children}));
    }
    Ok(envelope(json!({"layouts": layouts})))
}

async fn layout_metadata(
    State(db): State<Db>,
    Path((database, layout)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    let state = db.read().await;
    state.authorize(&headers, &database)?;
    let store = state.layout(&layout)?;

    let fields: Vec<Value> = store
        .fields
        .iter()
        .map(|f| {
            let (kind, display) = if f.container { ("container", "container") } else { ("text", "editText") };
            let mut meta = json!({
                "name": f.name,
                "type": "normal",
                "displayType": display,
                "result": kind,
                "global": false,
                "autoEnter": false,
                "fourDigitYear": false,
                "maxRepeat": 1,
                "maxCharacters": 0,
                "notEmpty": false,
                "numeric": false,
                "timeOfDay": false,
                "repetitionStart": 1,
                "repetitionEnd": 1
            });
            if let Some(list) = f.value_list {
                meta["valueList"] = json!(list);
            }
            meta
        })
        .collect();

    let cities: Vec<Value> = ["Austin", "Dallas", "London"]
        .iter()
        .map(|c| json!({"displayValue": c, "value": c}))
        .collect();

    Ok(envelope(json!({
        "fieldMetaData": fields,
        "portalMetaData": {},
        "valueLists": [{"name": "Cities", "type": "customList", "values": cities}]
    })))
}

async fn list_scripts(State(db): State<Db>, Path(database): Path<String>, headers: HeaderMap) -> Reply {
    db.read().await.authorize(&headers, &database)?;
    Ok(envelope(json!({
        "scripts": [
            {"name": "Greet", "isFolder": false},
            {"name": "Utilities", "isFolder": true, "folderScriptNames": [
                {"name": "Fail", "isFolder": false}
            ]}
        ]
    })))
}

// ---------------------------------------------------------------------------
// Record handlers
// ---------------------------------------------------------------------------

async fn find(
    State(db): State<Db>,
    Path((database, layout)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    let state = db.read().await;
    state.authorize(&headers, &database)?;
    let store = state.layout(&layout)?;

    let body = json_object(&body)?;
    let groups: Vec<Map<String, Value>> = match body.get("query") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|g| g.as_object().cloned().ok_or(Fault::InvalidParameter))
            .collect::<Result<_, _>>()?,
        _ => return Err(Fault::InvalidParameter),
    };
    let rules: Vec<SortRule> = match body.get("sort") {
        Some(sort) => serde_json::from_value(sort.clone()).map_err(|_| Fault::InvalidParameter)?,
        None => Vec::new(),
    };
    let offset = count(body.get("offset"))?.unwrap_or(1);
    let limit = count(body.get("limit"))?.unwrap_or(100);

    let mut ids = store.find(&groups)?;
    if ids.is_empty() {
        return Err(Fault::NoRecordsMatch);
    }
    store.sort(&mut ids, &rules)?;
    Ok(envelope(found_set(&layout, store, &ids, page(&ids, offset, limit))))
}

async fn get_records(
    State(db): State<Db>,
    Path((database, layout)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Reply {
    let state = db.read().await;
    state.authorize(&headers, &database)?;
    let store = state.layout(&layout)?;

    let number = |key: &str, default: usize| match params.get(key) {
        Some(raw) => raw.parse::<usize>().map_err(|_| Fault::InvalidParameter),
        None => Ok(default),
    };
    let limit = number("_limit", 100)?;
    let offset = number("_offset", 1)?;
    let rules: Vec<SortRule> = match params.get("_sort") {
        Some(raw) => serde_json::from_str(raw).map_err(|_| Fault::InvalidParameter)?,
        None => Vec::new(),
    };
    if let Some(raw) = params.get("portal") {
        serde_json::from_str::<Vec<String>>(raw).map_err(|_| Fault::InvalidParameter)?;
    }

    if store.is_empty() {
        return Err(Fault::NoRecordsMatch);
    }
    let mut ids = store.ids();
    store.sort(&mut ids, &rules)?;
    Ok(envelope(found_set(&layout, store, &ids, page(&ids, offset, limit))))
}

async fn get_record(
    State(db): State<Db>,
    Path((database, layout, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Reply {
    let state = db.read().await;
    state.authorize(&headers, &database)?;
    let store = state.layout(&layout)?;
    let id = record_id(&id)?;
    store.get(id).ok_or(Fault::RecordMissing)?;
    Ok(envelope(found_set(&layout, store, &[id], &[id])))
}

async fn create_record(
    State(db): State<Db>,
    Path((database, layout)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    let mut state = db.write().await;
    state.authorize(&headers, &database)?;
    let field_data = object_field(&json_object(&body)?, "fieldData")?;
    let id = state.layout_mut(&layout)?.create(field_data)?;
    Ok(envelope(json!({"recordId": id.to_string(), "modId": "0"})))
}

async fn duplicate_record(
    State(db): State<Db>,
    Path((database, layout, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Reply {
    let mut state = db.write().await;
    state.authorize(&headers, &database)?;
    let new_id = state.layout_mut(&layout)?.duplicate(record_id(&id)?)?;
    Ok(envelope(json!({"recordId": new_id.to_string(), "modId": "0"})))
}

async fn edit_record(
    State(db): State<Db>,
    Path((database, layout, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    let mut state = db.write().await;
    state.authorize(&headers, &database)?;
    let body = json_object(&body)?;
    let field_data = object_field(&body, "fieldData")?;
    let expected = match body.get("modId") {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(_) => return Err(Fault::InvalidParameter),
    };
    let mod_id = state
        .layout_mut(&layout)?
        .edit(record_id(&id)?, field_data, expected.as_deref())?;
    Ok(envelope(json!({"modId": mod_id.to_string()})))
}

async fn delete_record(
    State(db): State<Db>,
    Path((database, layout, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Reply {
    let mut state = db.write().await;
    state.authorize(&headers, &database)?;
    state.layout_mut(&layout)?.delete(record_id(&id)?)?;
    Ok(envelope(json!({})))
}

async fn upload_container(
    State(db): State<Db>,
    Path((database, layout, id, field)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    let mut state = db.write().await;
    state.authorize(&headers, &database)?;
    let store = state.layout_mut(&layout)?;
    if !store.field(&field).is_some_and(|f| f.container) {
        return Err(Fault::FieldMissing);
    }

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or_default();
    let upload = upload::parse(content_type, &body).ok_or(Fault::InvalidParameter)?;
    let stored = format!(
        "/Streaming/MainDB/{}?type={}&size={}",
        upload.file_name,
        upload.mime_type,
        upload.bytes.len()
    );
    store.set_field(record_id(&id)?, &field, Value::String(stored))?;
    Ok(envelope(json!({})))
}

// ---------------------------------------------------------------------------
// Globals and scripts
// ---------------------------------------------------------------------------

async fn set_globals(State(db): State<Db>, Path(database): Path<String>, headers: HeaderMap, body: Bytes) -> Reply {
    let mut state = db.write().await;
    state.authorize(&headers, &database)?;
    let fields = object_field(&json_object(&body)?, "globalFields")?;
    if fields.is_empty() {
        return Err(Fault::InvalidParameter);
    }
    if !fields.keys().all(|k| state.globals.contains_key(k)) {
        return Err(Fault::FieldMissing);
    }
    state.globals.extend(fields);
    Ok(envelope(json!({})))
}

async fn run_script(
    State(db): State<Db>,
    Path((database, layout, script)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Reply {
    let state = db.read().await;
    state.authorize(&headers, &database)?;
    state.layout(&layout)?;

    let param = params.get("script.param").map(String::as_str).unwrap_or_default();
    match script.as_str() {
        "Greet" => Ok(envelope(json!({"scriptResult": format!("Hello, {param}"), "scriptError": "0"}))),
        "Fail" => Ok(envelope(json!({"scriptError": "3"}))),
        _ => Err(Fault::ScriptMissing),
    }
}
