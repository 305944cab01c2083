//! Session and record lifecycle against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port and drives the sans-IO
//! [`DataApiClient`] over real HTTP with ureq. Every request is built by the
//! core, executed here, and the raw response handed back for parsing.

use fmdata_core::{
    ApiError, ConnectionConfig, DataApiClient, FindRequest, GetRecords, HttpMethod, HttpRequest, HttpResponse,
    QueryGroup, Session, SessionError, SessionState,
};
use serde_json::json;

fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, headers: &[(String, String)]) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        // ureq derives the length from the body itself.
        if !name.eq_ignore_ascii_case("content-length") {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder
}

/// Execute an `HttpRequest` with ureq, returning error statuses as data so
/// the core decides what they mean.
fn execute(req: HttpRequest) -> HttpResponse {
    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent();

    let body = req.body.unwrap_or_default();
    let mut response = match req.method {
        HttpMethod::Get => with_headers(agent.get(&req.url), &req.headers).call(),
        HttpMethod::Delete => with_headers(agent.delete(&req.url), &req.headers).call(),
        HttpMethod::Post => with_headers(agent.post(&req.url), &req.headers).send(body.as_slice()),
        HttpMethod::Patch => with_headers(agent.patch(&req.url), &req.headers).send(body.as_slice()),
    }
    .expect("HTTP transport error");

    let status = response.status().as_u16();
    let body = response.body_mut().read_to_string().unwrap_or_default();
    HttpResponse::new(status, body)
}

fn start_mock() -> std::net::SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            fm_mock_server::run(listener).await
        })
        .unwrap();
    });
    addr
}

fn client(addr: std::net::SocketAddr, password: &str) -> DataApiClient {
    let config = ConnectionConfig::new(addr.to_string(), fm_mock_server::DATABASE)
        .with_scheme("http")
        .with_credentials(fm_mock_server::USERNAME, password);
    DataApiClient::new(config)
}

#[test]
fn session_and_record_lifecycle() {
    let addr = start_mock();
    let client = client(addr, fm_mock_server::PASSWORD);
    let layout = fm_mock_server::LAYOUT;

    // Step 1: log in.
    let mut session = Session::new();
    session.begin_acquire().unwrap();
    let outcome = client.parse_acquire_session(execute(client.build_acquire_session().unwrap()));
    let token = session.complete_acquire(outcome).unwrap().clone();
    assert_eq!(session.state(), SessionState::Active);

    let valid = client
        .parse_validate_session(execute(client.build_validate_session(&token).unwrap()))
        .is_ok();
    session.record_validation(valid);
    assert_eq!(session.state(), SessionState::Active);

    // Step 2: metadata.
    let layouts = client
        .parse_list_layouts(execute(client.build_list_layouts(&token).unwrap()))
        .unwrap();
    assert!(layouts.iter().any(|l| l.name == layout));
    let meta = client
        .parse_layout_metadata(execute(client.build_layout_metadata(layout, &token).unwrap()))
        .unwrap();
    assert!(meta.field("city").is_some());

    // Step 3: create, then read back.
    let fields = json!({"name": "Grace", "city": "Austin"});
    let req = client.build_create_record(layout, Some(&fields), &token).unwrap();
    let id = client.parse_create_record(execute(req)).unwrap();

    let req = client.build_get_record(layout, &id, &token).unwrap();
    let (record, info) = client.parse_get_record(execute(req)).unwrap();
    assert_eq!(record.record_id, id);
    assert_eq!(record.field("name"), Some(&json!("Grace")));
    assert_eq!(info.found_count, 1);

    // Step 4: edit with the current modId, then with the stale one.
    let req = client
        .build_edit_record(layout, &id, &json!({"city": "Dallas"}), Some(&record.mod_id), &token)
        .unwrap();
    let new_mod = client.parse_edit_record(execute(req)).unwrap();
    assert_ne!(new_mod, record.mod_id);

    let req = client
        .build_edit_record(layout, &id, &json!({"city": "London"}), Some(&record.mod_id), &token)
        .unwrap();
    let err = client.parse_edit_record(execute(req)).unwrap_err();
    assert_eq!(err.service_code(), Some("306"));

    // Step 5: find and range fetch.
    let find = FindRequest::new(vec![QueryGroup::new().field("city", "==Dallas")]);
    let found = client
        .parse_find(layout, execute(client.build_find(layout, &find, &token).unwrap()))
        .unwrap();
    assert_eq!(found.records.len(), 1);

    let req = client.build_get_records(layout, &GetRecords::new(10), &token).unwrap();
    let range = client.parse_get_records(layout, execute(req)).unwrap();
    assert_eq!(range.data_info.returned_count, 1);

    // Step 6: delete, after which the record is gone.
    let req = client.build_delete_record(layout, &id, &token).unwrap();
    client.parse_delete_record(execute(req)).unwrap();
    let req = client.build_get_record(layout, &id, &token).unwrap();
    let err = client.parse_get_record(execute(req)).unwrap_err();
    assert_eq!(err.service_code(), Some("101"));

    // Step 7: log out; the token no longer validates.
    let outcome = client.parse_revoke_session(execute(client.build_revoke_session(&token).unwrap()));
    session.record_revoke(&outcome);
    assert_eq!(session.state(), SessionState::Revoked);
    let err = client
        .parse_validate_session(execute(client.build_validate_session(&token).unwrap()))
        .unwrap_err();
    assert_eq!(err.service_code(), Some("952"));
}

#[test]
fn wrong_password_is_a_rejected_session() {
    let addr = start_mock();
    let client = client(addr, "wrong");

    let mut session = Session::new();
    session.begin_acquire().unwrap();
    let outcome = client.parse_acquire_session(execute(client.build_acquire_session().unwrap()));
    let err = session.complete_acquire(outcome).unwrap_err();
    assert!(matches!(err, SessionError::Api(ApiError::SessionRejected { ref code, .. }) if code == "212"));
    assert_eq!(session.state(), SessionState::NoSession);
    assert!(session.token().is_none());
}
