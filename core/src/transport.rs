//! Async execution of the request/response pairs built by
//! [`DataApiClient`].
//!
//! # Design
//! A [`Transport`] turns one [`HttpRequest`] into one [`HttpResponse`];
//! [`Connection`] pairs it with a client and exposes each operation as a
//! single awaited exchange. There are no retries and no caching. Dropping
//! a returned future cancels the exchange. The only detached operation is
//! [`Connection::revoke_detached`], which reports through a callback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::client::DataApiClient;
use crate::config::ConnectionConfig;
use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::session::SessionToken;
use crate::types::{
    DataInfo, Database, FindRequest, FoundSet, GetRecords, Layout, LayoutMetadata, ProductInfo, Record,
    ScriptOutcome, Script,
};

/// Executes one HTTP exchange.
///
/// Implementations must return `Err(ApiError::Transport)` only when no
/// response was obtained; any status code with a body is a response.
pub trait Transport: Send + Sync + 'static {
    fn execute(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.text().await.map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(HttpResponse { status, headers, body })
    }
}

/// Holds a completion callback and fires it on drop if nobody else did.
struct Completion<F: FnOnce(Result<()>)> {
    on_complete: Option<F>,
}

impl<F: FnOnce(Result<()>)> Completion<F> {
    fn new(on_complete: F) -> Self {
        Self {
            on_complete: Some(on_complete),
        }
    }

    fn finish(mut self, outcome: Result<()>) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(outcome);
        }
    }
}

impl<F: FnOnce(Result<()>)> Drop for Completion<F> {
    fn drop(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            tracing::warn!("session revoke cancelled");
            on_complete(Err(ApiError::Transport("revoke cancelled".to_string())));
        }
    }
}

/// An async Data API client: one request per call, tokens passed in.
///
/// # Examples
///
/// ```rust,no_run
/// use fmdata_core::{Connection, ConnectionConfig};
///
/// # async fn example() -> fmdata_core::Result<()> {
/// let config = ConnectionConfig::new("fm.example.com", "Contacts").with_credentials("admin", "secret");
/// let conn = Connection::new(config);
///
/// let token = conn.acquire().await?;
/// let layouts = conn.list_layouts(&token).await?;
/// println!("{} layouts", layouts.len());
/// conn.revoke_detached(token, |outcome| {
///     if let Err(e) = outcome {
///         eprintln!("logout failed: {e}");
///     }
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Connection<T = ReqwestTransport> {
    client: DataApiClient,
    transport: Arc<T>,
    timeout: Option<Duration>,
}

impl<T> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            transport: Arc::clone(&self.transport),
            timeout: self.timeout,
        }
    }
}

impl Connection<ReqwestTransport> {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_transport(config, ReqwestTransport::new())
    }
}

impl<T: Transport> Connection<T> {
    pub fn with_transport(config: ConnectionConfig, transport: T) -> Self {
        Self {
            client: DataApiClient::new(config),
            transport: Arc::new(transport),
            timeout: None,
        }
    }

    /// A handle whose calls give up after `timeout`. The original handle is
    /// unaffected, so this works per call: `conn.with_timeout(d).find(..)`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self.clone()
        }
    }

    pub fn client(&self) -> &DataApiClient {
        &self.client
    }

    async fn send(&self, operation: &'static str, mut request: HttpRequest) -> Result<HttpResponse> {
        if request.timeout.is_none() {
            request.timeout = self.timeout;
        }
        tracing::debug!(operation, method = request.method.as_str(), "sending request");
        let response = self.transport.execute(request).await;
        match &response {
            Ok(r) => tracing::debug!(operation, status = r.status, "response received"),
            Err(e) => tracing::debug!(operation, error = %e, "no response"),
        }
        response
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Open a session with the configured credentials.
    pub async fn acquire(&self) -> Result<SessionToken> {
        let request = self.client.build_acquire_session()?;
        let response = self.send("acquire_session", request).await?;
        self.client.parse_acquire_session(response)
    }

    /// True only if the service confirms the token; every failure is false.
    pub async fn validate(&self, token: &SessionToken) -> bool {
        self.validate_detailed(token).await.is_ok()
    }

    /// [`validate`](Self::validate) with the reason for a negative answer.
    pub async fn validate_detailed(&self, token: &SessionToken) -> Result<()> {
        let request = self.client.build_validate_session(token)?;
        let response = self.send("validate_session", request).await?;
        self.client.parse_validate_session(response)
    }

    pub async fn revoke(&self, token: &SessionToken) -> Result<()> {
        let request = self.client.build_revoke_session(token)?;
        let response = self.send("revoke_session", request).await?;
        self.client.parse_revoke_session(response)
    }

    /// Revoke on a spawned task and hand the outcome to `on_complete`.
    ///
    /// `on_complete` runs exactly once. Without a current Tokio runtime it
    /// runs immediately with a transport error and `None` is returned; if
    /// the task is dropped before the revoke finishes (runtime shutdown,
    /// abort) it runs with `ApiError::Transport("revoke cancelled")`. The
    /// caller does not have to await the returned handle.
    pub fn revoke_detached<F>(&self, token: SessionToken, on_complete: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "session revoke not started");
                on_complete(Err(ApiError::Transport(format!("no async runtime: {e}"))));
                return None;
            }
        };

        let conn = self.clone();
        let guard = Completion::new(on_complete);
        Some(handle.spawn(async move {
            let outcome = conn.revoke(&token).await;
            if let Err(e) = &outcome {
                tracing::warn!(error = %e, "session revoke failed");
            }
            guard.finish(outcome);
        }))
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub async fn list_databases(&self) -> Result<Vec<Database>> {
        let request = self.client.build_list_databases()?;
        let response = self.send("list_databases", request).await?;
        self.client.parse_list_databases(response)
    }

    pub async fn product_info(&self) -> Result<ProductInfo> {
        let request = self.client.build_product_info()?;
        let response = self.send("product_info", request).await?;
        self.client.parse_product_info(response)
    }

    pub async fn list_layouts(&self, token: &SessionToken) -> Result<Vec<Layout>> {
        let request = self.client.build_list_layouts(token)?;
        let response = self.send("list_layouts", request).await?;
        self.client.parse_list_layouts(response)
    }

    pub async fn list_scripts(&self, token: &SessionToken) -> Result<Vec<Script>> {
        let request = self.client.build_list_scripts(token)?;
        let response = self.send("list_scripts", request).await?;
        self.client.parse_list_scripts(response)
    }

    pub async fn layout_metadata(&self, layout: &str, token: &SessionToken) -> Result<LayoutMetadata> {
        let request = self.client.build_layout_metadata(layout, token)?;
        let response = self.send("layout_metadata", request).await?;
        self.client.parse_layout_metadata(response)
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    pub async fn find(&self, layout: &str, request: &FindRequest, token: &SessionToken) -> Result<FoundSet> {
        let http = self.client.build_find(layout, request, token)?;
        let response = self.send("find", http).await?;
        self.client.parse_find(layout, response)
    }

    pub async fn find_raw<P: Serialize + ?Sized>(
        &self,
        layout: &str,
        payload: &P,
        token: &SessionToken,
    ) -> Result<FoundSet> {
        let http = self.client.build_find_raw(layout, payload, token)?;
        let response = self.send("find", http).await?;
        self.client.parse_find(layout, response)
    }

    pub async fn get_records(&self, layout: &str, params: &GetRecords, token: &SessionToken) -> Result<FoundSet> {
        let request = self.client.build_get_records(layout, params, token)?;
        let response = self.send("get_records", request).await?;
        self.client.parse_get_records(layout, response)
    }

    pub async fn get_record(&self, layout: &str, record_id: &str, token: &SessionToken) -> Result<(Record, DataInfo)> {
        let request = self.client.build_get_record(layout, record_id, token)?;
        let response = self.send("get_record", request).await?;
        self.client.parse_get_record(response)
    }

    pub async fn create_record<P: Serialize + ?Sized>(
        &self,
        layout: &str,
        field_data: Option<&P>,
        token: &SessionToken,
    ) -> Result<String> {
        let request = self.client.build_create_record(layout, field_data, token)?;
        let response = self.send("create_record", request).await?;
        self.client.parse_create_record(response)
    }

    pub async fn duplicate_record(&self, layout: &str, record_id: &str, token: &SessionToken) -> Result<String> {
        let request = self.client.build_duplicate_record(layout, record_id, token)?;
        let response = self.send("duplicate_record", request).await?;
        self.client.parse_duplicate_record(response)
    }

    pub async fn edit_record<P: Serialize + ?Sized>(
        &self,
        layout: &str,
        record_id: &str,
        field_data: &P,
        mod_id: Option<&str>,
        token: &SessionToken,
    ) -> Result<String> {
        let request = self.client.build_edit_record(layout, record_id, field_data, mod_id, token)?;
        let response = self.send("edit_record", request).await?;
        self.client.parse_edit_record(response)
    }

    pub async fn delete_record(&self, layout: &str, record_id: &str, token: &SessionToken) -> Result<()> {
        let request = self.client.build_delete_record(layout, record_id, token)?;
        let response = self.send("delete_record", request).await?;
        self.client.parse_delete_record(response)
    }

    // -----------------------------------------------------------------------
    // Globals, scripts, containers
    // -----------------------------------------------------------------------

    pub async fn set_globals<P: Serialize + ?Sized>(&self, global_fields: &P, token: &SessionToken) -> Result<()> {
        let request = self.client.build_set_globals(global_fields, token)?;
        let response = self.send("set_globals", request).await?;
        self.client.parse_set_globals(response)
    }

    pub async fn execute_script(
        &self,
        layout: &str,
        script: &str,
        parameter: Option<&str>,
        token: &SessionToken,
    ) -> Result<ScriptOutcome> {
        let request = self.client.build_execute_script(layout, script, parameter, token)?;
        let response = self.send("execute_script", request).await?;
        self.client.parse_execute_script(response)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_container(
        &self,
        layout: &str,
        record_id: &str,
        field: &str,
        bytes: &[u8],
        file_name: &str,
        infer_mime_type: bool,
        token: &SessionToken,
    ) -> Result<String> {
        let request = self
            .client
            .build_set_container(layout, record_id, field, bytes, file_name, infer_mime_type, token)?;
        let response = self.send("set_container", request).await?;
        self.client.parse_set_container(file_name, response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};

    use super::*;

    /// Replays canned responses and records what was sent.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<Vec<Result<HttpResponse>>>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn replying(replies: Vec<Result<HttpResponse>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                sent: Mutex::default(),
            }
        }
    }

    impl Transport for Scripted {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.sent.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ApiError::Transport("no scripted reply".into())))
        }
    }

    /// Accepts every request and never answers.
    #[derive(Default)]
    struct Stalled {
        sent: AtomicUsize,
    }

    impl Stalled {
        fn sent(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    impl Transport for Stalled {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn ok(body: &str) -> Result<HttpResponse> {
        Ok(HttpResponse::new(
            200,
            format!(r#"{{"response":{body},"messages":[{{"code":"0","message":"OK"}}]}}"#),
        ))
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("fm.example.com", "Contacts").with_credentials("admin", "secret")
    }

    #[tokio::test]
    async fn validate_is_false_on_transport_failure() {
        let conn = Connection::with_transport(config(), Scripted::replying(vec![Err(ApiError::Transport("down".into()))]));
        assert!(!conn.validate(&SessionToken::new("t")).await);
    }

    #[tokio::test]
    async fn acquire_transport_failure_is_not_a_rejection() {
        let conn = Connection::with_transport(config(), Scripted::replying(vec![Err(ApiError::Transport("down".into()))]));
        let err = conn.acquire().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn exactly_one_request_per_call() {
        let transport = Scripted::replying(vec![ok(r#"{"databases":[]}"#)]);
        let conn = Connection::with_transport(config(), transport);
        conn.list_databases().await.unwrap();
        assert_eq!(conn.transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn per_call_timeout_is_attached() {
        let conn = Connection::with_transport(config(), Scripted::replying(vec![ok("{}"), ok("{}")]));
        let token = SessionToken::new("t");

        conn.with_timeout(Duration::from_millis(250)).validate(&token).await;
        conn.validate(&token).await;

        let sent = conn.transport.sent.lock().unwrap();
        assert_eq!(sent[0].timeout, Some(Duration::from_millis(250)));
        assert_eq!(sent[1].timeout, None);
    }

    #[tokio::test]
    async fn missing_configuration_sends_nothing() {
        let conn = Connection::with_transport(ConnectionConfig::new("fm.example.com", ""), Scripted::default());
        let err = conn.list_layouts(&SessionToken::new("t")).await.unwrap_err();
        assert_eq!(err, ApiError::MissingConfiguration("database"));
        assert!(conn.transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn detached_revoke_reports_failure() {
        let conn = Connection::with_transport(
            config(),
            Scripted::replying(vec![Ok(HttpResponse::new(
                401,
                r#"{"response":{},"messages":[{"code":"952","message":"Invalid FileMaker Data API token (*)"}]}"#,
            ))]),
        );
        let (tx, rx) = tokio::sync::oneshot::channel();
        conn.revoke_detached(SessionToken::new("t"), move |outcome| {
            let _ = tx.send(outcome);
        });
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap_err().service_code(), Some("952"));
    }

    #[test]
    fn detached_revoke_without_runtime_reports_immediately() {
        let conn = Connection::with_transport(config(), Scripted::default());
        let (tx, rx) = mpsc::channel();
        let handle = conn.revoke_detached(SessionToken::new("t"), move |outcome| {
            let _ = tx.send(outcome);
        });
        assert!(handle.is_none());
        assert!(matches!(rx.try_recv().unwrap(), Err(ApiError::Transport(_))));
        assert!(conn.transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn detached_revoke_reports_when_runtime_shuts_down() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let conn = Connection::with_transport(config(), Stalled::default());
        let (tx, rx) = mpsc::channel();

        rt.block_on(async {
            let handle = conn.revoke_detached(SessionToken::new("t"), move |outcome| {
                let _ = tx.send(outcome);
            });
            assert!(handle.is_some());
            while conn.transport.sent() == 0 {
                tokio::task::yield_now().await;
            }
        });
        rt.shutdown_timeout(Duration::from_millis(200));

        let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(outcome, Err(ApiError::Transport("revoke cancelled".to_string())));
    }

    #[tokio::test]
    async fn aborted_detached_revoke_still_reports() {
        let conn = Connection::with_transport(config(), Stalled::default());
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = conn
            .revoke_detached(SessionToken::new("t"), move |outcome| {
                let _ = tx.send(outcome);
            })
            .unwrap();
        while conn.transport.sent() == 0 {
            tokio::task::yield_now().await;
        }
        handle.abort();
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, Err(ApiError::Transport(ref m)) if m == "revoke cancelled"));
    }

    #[tokio::test]
    async fn dropped_call_is_sent_once_and_not_retried() {
        let conn = Connection::with_transport(config(), Stalled::default());
        let outcome = tokio::time::timeout(Duration::from_millis(50), conn.list_databases()).await;
        assert!(outcome.is_err());

        tokio::task::yield_now().await;
        assert_eq!(conn.transport.sent(), 1);
    }
}
