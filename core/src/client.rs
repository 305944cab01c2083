//! Stateless request builder and response parser for the Data API.
//!
//! # Design
//! `DataApiClient` holds only the connection settings. Each operation is a
//! `build_*` method producing an [`HttpRequest`] and a `parse_*` method
//! consuming the matching [`HttpResponse`]; whoever owns the socket runs the
//! exchange in between. Every parse goes through [`crate::envelope`] so all
//! operations agree on what success and failure mean.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::{encode_component, ConnectionConfig};
use crate::container;
use crate::envelope::{self, codes};
use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::session::SessionToken;
use crate::types::{
    DataInfo, Database, FindRequest, FoundSet, GetRecords, Layout, LayoutMetadata, ProductInfo, Record,
    ScriptOutcome, Script,
};

/// Request builder and response parser bound to one database.
#[derive(Debug, Clone)]
pub struct DataApiClient {
    config: ConnectionConfig,
}

#[derive(Deserialize)]
struct DatabasesResponse {
    databases: Vec<Database>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductInfoResponse {
    product_info: ProductInfo,
}

#[derive(Deserialize)]
struct LayoutsResponse {
    layouts: Vec<Layout>,
}

#[derive(Deserialize)]
struct ScriptsResponse {
    scripts: Vec<Script>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordIdResponse {
    record_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModIdResponse {
    mod_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EditBody<'a> {
    field_data: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mod_id: Option<&'a str>,
}

/// Serialize a caller payload and require a JSON object.
fn to_object<T: Serialize + ?Sized>(payload: &T, what: &str) -> Result<Map<String, Value>> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ApiError::Encoding(format!("{what} must be a JSON object, got {other}"))),
        Err(e) => Err(ApiError::Encoding(format!("{what}: {e}"))),
    }
}

fn to_body<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    serde_json::to_string(payload).map_err(|e| ApiError::Encoding(e.to_string()))
}

impl DataApiClient {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn layout_url(&self, layout: &str, rest: &[&str]) -> Result<String> {
        let mut segments = vec!["layouts", layout];
        segments.extend_from_slice(rest);
        self.config.database_endpoint(&segments)
    }

    // -----------------------------------------------------------------------
    // Host metadata (no token)
    // -----------------------------------------------------------------------

    pub fn build_list_databases(&self) -> Result<HttpRequest> {
        Ok(HttpRequest::new(HttpMethod::Get, self.config.endpoint("databases")?))
    }

    pub fn parse_list_databases(&self, response: HttpResponse) -> Result<Vec<Database>> {
        envelope::decode::<DatabasesResponse>(&response.body).map(|r| r.databases)
    }

    pub fn build_product_info(&self) -> Result<HttpRequest> {
        Ok(HttpRequest::new(HttpMethod::Get, self.config.endpoint("productInfo")?))
    }

    pub fn parse_product_info(&self, response: HttpResponse) -> Result<ProductInfo> {
        envelope::decode::<ProductInfoResponse>(&response.body).map(|r| r.product_info)
    }

    // -----------------------------------------------------------------------
    // Database metadata
    // -----------------------------------------------------------------------

    pub fn build_list_layouts(&self, token: &SessionToken) -> Result<HttpRequest> {
        let url = self.config.database_endpoint(&["layouts"])?;
        Ok(HttpRequest::new(HttpMethod::Get, url).bearer(token.as_str()))
    }

    pub fn parse_list_layouts(&self, response: HttpResponse) -> Result<Vec<Layout>> {
        envelope::decode::<LayoutsResponse>(&response.body).map(|r| r.layouts)
    }

    pub fn build_list_scripts(&self, token: &SessionToken) -> Result<HttpRequest> {
        let url = self.config.database_endpoint(&["scripts"])?;
        Ok(HttpRequest::new(HttpMethod::Get, url).bearer(token.as_str()))
    }

    pub fn parse_list_scripts(&self, response: HttpResponse) -> Result<Vec<Script>> {
        envelope::decode::<ScriptsResponse>(&response.body).map(|r| r.scripts)
    }

    pub fn build_layout_metadata(&self, layout: &str, token: &SessionToken) -> Result<HttpRequest> {
        let url = self.layout_url(layout, &[])?;
        Ok(HttpRequest::new(HttpMethod::Get, url).bearer(token.as_str()))
    }

    pub fn parse_layout_metadata(&self, response: HttpResponse) -> Result<LayoutMetadata> {
        envelope::decode(&response.body)
    }

    // -----------------------------------------------------------------------
    // Finding and reading records
    // -----------------------------------------------------------------------

    pub fn build_find(&self, layout: &str, request: &FindRequest, token: &SessionToken) -> Result<HttpRequest> {
        if request.query.is_empty() {
            return Err(ApiError::Encoding("find needs at least one query group".to_string()));
        }
        let url = self.layout_url(layout, &["_find"])?;
        Ok(HttpRequest::new(HttpMethod::Post, url)
            .bearer(token.as_str())
            .json_body(to_body(request)?))
    }

    /// Like [`build_find`](Self::build_find) for a hand-built payload. The
    /// payload must be an object whose `query` is an array.
    pub fn build_find_raw<T: Serialize + ?Sized>(
        &self,
        layout: &str,
        payload: &T,
        token: &SessionToken,
    ) -> Result<HttpRequest> {
        let body = to_object(payload, "find payload")?;
        if !body.get("query").is_some_and(Value::is_array) {
            return Err(ApiError::Encoding("find payload needs a `query` array".to_string()));
        }
        let url = self.layout_url(layout, &["_find"])?;
        Ok(HttpRequest::new(HttpMethod::Post, url)
            .bearer(token.as_str())
            .json_body(to_body(&body)?))
    }

    /// "No records match" is an empty found set, not an error. `layout` is
    /// the one the find ran against and fills the empty set's counts.
    pub fn parse_find(&self, layout: &str, response: HttpResponse) -> Result<FoundSet> {
        self.parse_found_set(layout, response)
    }

    fn parse_found_set(&self, layout: &str, response: HttpResponse) -> Result<FoundSet> {
        let envelope = envelope::parse(&response.body)?;
        if envelope.status().code == codes::NO_RECORDS_MATCH {
            return Ok(FoundSet {
                records: Vec::new(),
                data_info: DataInfo::empty(self.config.database(), layout),
            });
        }
        envelope.into_success()?.decode()
    }

    /// `GET records/?_limit=..&_sort=..&portal=..`; `_sort` is left out when
    /// no sort field is set and `portal` is `[]` when none are requested.
    pub fn build_get_records(&self, layout: &str, params: &GetRecords, token: &SessionToken) -> Result<HttpRequest> {
        let mut url = self.layout_url(layout, &["records"])?;
        url.push_str(&format!("/?_limit={}", params.limit));
        if let Some(offset) = params.offset {
            url.push_str(&format!("&_offset={offset}"));
        }
        if let Some(sort) = &params.sort {
            url.push_str(&format!("&_sort={}", encode_component(&to_body(&[sort])?)));
        }
        url.push_str(&format!("&portal={}", encode_component(&to_body(&params.portals)?)));
        Ok(HttpRequest::new(HttpMethod::Get, url).bearer(token.as_str()))
    }

    /// An empty layout answers "no records match"; like a find, that is an
    /// empty found set.
    pub fn parse_get_records(&self, layout: &str, response: HttpResponse) -> Result<FoundSet> {
        self.parse_found_set(layout, response)
    }

    pub fn build_get_record(&self, layout: &str, record_id: &str, token: &SessionToken) -> Result<HttpRequest> {
        let url = self.layout_url(layout, &["records", record_id])?;
        Ok(HttpRequest::new(HttpMethod::Get, url).bearer(token.as_str()))
    }

    pub fn parse_get_record(&self, response: HttpResponse) -> Result<(Record, DataInfo)> {
        let found: FoundSet = envelope::decode(&response.body)?;
        let record = found
            .records
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::MalformedResponse("record fetch returned no data".to_string()))?;
        Ok((record, found.data_info))
    }

    // -----------------------------------------------------------------------
    // Writing records
    // -----------------------------------------------------------------------

    /// `None` creates an empty record: the body is `{"fieldData":{}}`.
    pub fn build_create_record<T: Serialize + ?Sized>(
        &self,
        layout: &str,
        field_data: Option<&T>,
        token: &SessionToken,
    ) -> Result<HttpRequest> {
        let field_data = match field_data {
            Some(payload) => to_object(payload, "fieldData")?,
            None => Map::new(),
        };
        let url = self.layout_url(layout, &["records"])?;
        Ok(HttpRequest::new(HttpMethod::Post, url)
            .bearer(token.as_str())
            .json_body(to_body(&json!({ "fieldData": field_data }))?))
    }

    /// Returns the new record id.
    pub fn parse_create_record(&self, response: HttpResponse) -> Result<String> {
        envelope::decode::<RecordIdResponse>(&response.body).map(|r| r.record_id)
    }

    pub fn build_duplicate_record(&self, layout: &str, record_id: &str, token: &SessionToken) -> Result<HttpRequest> {
        let url = self.layout_url(layout, &["records", record_id])?;
        Ok(HttpRequest::new(HttpMethod::Post, url).bearer(token.as_str()))
    }

    /// Returns the id of the copy.
    pub fn parse_duplicate_record(&self, response: HttpResponse) -> Result<String> {
        envelope::decode::<RecordIdResponse>(&response.body).map(|r| r.record_id)
    }

    /// With `mod_id` set the service rejects the edit if the record changed
    /// since that version was read.
    pub fn build_edit_record<T: Serialize + ?Sized>(
        &self,
        layout: &str,
        record_id: &str,
        field_data: &T,
        mod_id: Option<&str>,
        token: &SessionToken,
    ) -> Result<HttpRequest> {
        let field_data = to_object(field_data, "fieldData")?;
        let url = self.layout_url(layout, &["records", record_id])?;
        let body = EditBody {
            field_data: &field_data,
            mod_id,
        };
        Ok(HttpRequest::new(HttpMethod::Patch, url)
            .bearer(token.as_str())
            .json_body(to_body(&body)?))
    }

    /// Returns the record's new modId.
    pub fn parse_edit_record(&self, response: HttpResponse) -> Result<String> {
        envelope::decode::<ModIdResponse>(&response.body).map(|r| r.mod_id)
    }

    pub fn build_delete_record(&self, layout: &str, record_id: &str, token: &SessionToken) -> Result<HttpRequest> {
        let url = self.layout_url(layout, &["records", record_id])?;
        Ok(HttpRequest::new(HttpMethod::Delete, url).bearer(token.as_str()))
    }

    pub fn parse_delete_record(&self, response: HttpResponse) -> Result<()> {
        envelope::expect_success(&response.body)
    }

    // -----------------------------------------------------------------------
    // Globals, scripts, containers
    // -----------------------------------------------------------------------

    /// Every key must be fully qualified as `table::field`.
    pub fn build_set_globals<T: Serialize + ?Sized>(&self, global_fields: &T, token: &SessionToken) -> Result<HttpRequest> {
        let global_fields = to_object(global_fields, "globalFields")?;
        if let Some(name) = global_fields.keys().find(|k| !is_qualified(k)) {
            return Err(ApiError::Encoding(format!("global field `{name}` is not table::field")));
        }
        let url = self.config.database_endpoint(&["globals"])?;
        Ok(HttpRequest::new(HttpMethod::Patch, url)
            .bearer(token.as_str())
            .json_body(to_body(&json!({ "globalFields": global_fields }))?))
    }

    pub fn parse_set_globals(&self, response: HttpResponse) -> Result<()> {
        envelope::expect_success(&response.body)
    }

    /// A missing parameter is sent as an empty `script.param`.
    pub fn build_execute_script(
        &self,
        layout: &str,
        script: &str,
        parameter: Option<&str>,
        token: &SessionToken,
    ) -> Result<HttpRequest> {
        let mut url = self.layout_url(layout, &["script", script])?;
        url.push_str("?script.param=");
        url.push_str(&encode_component(parameter.unwrap_or("")));
        Ok(HttpRequest::new(HttpMethod::Get, url).bearer(token.as_str()))
    }

    pub fn parse_execute_script(&self, response: HttpResponse) -> Result<ScriptOutcome> {
        envelope::decode(&response.body)
    }

    /// Multipart upload of one file into a container field. The boundary is
    /// a fresh UUID per request.
    #[allow(clippy::too_many_arguments)]
    pub fn build_set_container(
        &self,
        layout: &str,
        record_id: &str,
        field: &str,
        bytes: &[u8],
        file_name: &str,
        infer_mime_type: bool,
        token: &SessionToken,
    ) -> Result<HttpRequest> {
        if file_name.contains(['\r', '\n']) {
            return Err(ApiError::Encoding("file name must not contain CR or LF".to_string()));
        }
        let url = self.layout_url(layout, &["records", record_id, "containers", field])?;
        let boundary = uuid::Uuid::new_v4().to_string();
        let mime_type = container::mime_type_for(bytes, infer_mime_type);
        let body = container::multipart_body(&boundary, file_name, mime_type, bytes);

        let mut req = HttpRequest::new(HttpMethod::Post, url)
            .bearer(token.as_str())
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .header("content-length", body.len().to_string());
        req.body = Some(body);
        Ok(req)
    }

    /// Returns `file_name` once the service confirms the upload.
    pub fn parse_set_container(&self, file_name: &str, response: HttpResponse) -> Result<String> {
        envelope::expect_success(&response.body)?;
        Ok(file_name.to_string())
    }
}

fn is_qualified(name: &str) -> bool {
    name.split_once("::")
        .is_some_and(|(table, field)| !table.is_empty() && !field.is_empty())
}
