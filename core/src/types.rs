//! Typed shapes of Data API payloads.
//!
//! # Design
//! These types are defined independently from the mock server's schema;
//! the integration tests catch drift between the two. Field names follow
//! the service's camelCase on the wire. Record contents stay as JSON maps
//! because the layout decides what fields exist; callers who want a typed
//! model use [`Record::field_data_as`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{ApiError, Result};

/// Field name to value, as stored in a record's `fieldData`.
pub type FieldData = Map<String, Value>;

/// A hosted database file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
}

/// A layout, or a folder of layouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_folder: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_layout_names: Option<Vec<Layout>>,
}

impl Layout {
    pub fn is_folder(&self) -> bool {
        self.is_folder.unwrap_or(false)
    }

    /// Entries inside a folder; empty for plain layouts.
    pub fn children(&self) -> &[Layout] {
        match (&self.folder_layout_names, self.is_folder()) {
            (Some(children), true) => children,
            _ => &[],
        }
    }
}

/// A script, or a folder of scripts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub name: String,
    #[serde(default)]
    pub is_folder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_script_names: Option<Vec<Script>>,
}

/// Schema description of a layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutMetadata {
    #[serde(default)]
    pub field_meta_data: Vec<FieldMeta>,
    /// Portal object name to the fields shown in that portal.
    #[serde(default)]
    pub portal_meta_data: BTreeMap<String, Vec<FieldMeta>>,
    #[serde(default)]
    pub value_lists: Vec<ValueList>,
}

impl LayoutMetadata {
    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.field_meta_data.iter().find(|f| f.name == name)
    }

    pub fn value_list(&self, name: &str) -> Option<&ValueList> {
        self.value_lists.iter().find(|v| v.name == name)
    }
}

/// One field as described by layout metadata.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub display_type: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub auto_enter: bool,
    #[serde(default)]
    pub four_digit_year: bool,
    #[serde(default)]
    pub max_repeat: u32,
    #[serde(default)]
    pub max_characters: u32,
    #[serde(default)]
    pub not_empty: bool,
    #[serde(default)]
    pub numeric: bool,
    #[serde(default)]
    pub time_of_day: bool,
    #[serde(default)]
    pub repetition_start: u32,
    #[serde(default)]
    pub repetition_end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_list: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueList {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub values: Vec<ValueListEntry>,
}

/// Ordered by display value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueListEntry {
    pub display_value: String,
    pub value: String,
}

/// Counts describing a find or record fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataInfo {
    pub database: String,
    pub layout: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub total_record_count: u64,
    pub found_count: u64,
    pub returned_count: u64,
}

impl DataInfo {
    /// Counts for a find that matched nothing.
    pub fn empty(database: &str, layout: &str) -> Self {
        Self {
            database: database.to_string(),
            layout: layout.to_string(),
            table: String::new(),
            total_record_count: 0,
            found_count: 0,
            returned_count: 0,
        }
    }
}

/// Counts for one portal inside a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalDataInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_object_name: Option<String>,
    pub database: String,
    pub table: String,
    pub found_count: u64,
    pub returned_count: u64,
}

/// One result row.
///
/// `record_id` and `mod_id` together identify a version of the record;
/// pass `mod_id` back to an edit to have the service reject stale writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub record_id: String,
    pub mod_id: String,
    #[serde(default)]
    pub field_data: FieldData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_data_info: Option<Vec<PortalDataInfo>>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.field_data.get(name)
    }

    /// Decode `fieldData` into an application model.
    pub fn field_data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.field_data.clone()))
            .map_err(|e| ApiError::MalformedResponse(format!("fieldData does not fit model: {e}")))
    }
}

/// Server name, version and locale formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub name: String,
    pub build_date: String,
    pub version: String,
    pub date_format: String,
    pub time_format: String,
    pub time_stamp_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascend,
    Descend,
}

impl SortOrder {
    pub fn from_ascending(ascending: bool) -> Self {
        if ascending {
            SortOrder::Ascend
        } else {
            SortOrder::Descend
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub field_name: String,
    pub sort_order: SortOrder,
}

impl SortSpec {
    pub fn new(field_name: impl Into<String>, sort_order: SortOrder) -> Self {
        Self {
            field_name: field_name.into(),
            sort_order,
        }
    }
}

/// One find request. Criteria inside a group are AND-ed; groups are OR-ed,
/// and an omitting group removes its matches from the found set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryGroup {
    pub criteria: Map<String, Value>,
    pub omit: bool,
}

impl QueryGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, criterion: impl Into<Value>) -> Self {
        self.criteria.insert(name.into(), criterion.into());
        self
    }

    pub fn omit(mut self) -> Self {
        self.omit = true;
        self
    }
}

impl Serialize for QueryGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = self.criteria.len() + usize::from(self.omit);
        let mut map = serializer.serialize_map(Some(len))?;
        for (name, criterion) in &self.criteria {
            map.serialize_entry(name, criterion)?;
        }
        if self.omit {
            map.serialize_entry("omit", "true")?;
        }
        map.end()
    }
}

/// Body of a `_find` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FindRequest {
    pub query: Vec<QueryGroup>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portal: Option<Vec<String>>,
}

impl FindRequest {
    pub fn new(query: Vec<QueryGroup>) -> Self {
        Self {
            query,
            ..Self::default()
        }
    }

    pub fn sort(mut self, spec: SortSpec) -> Self {
        self.sort.push(spec);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn portals(mut self, names: Vec<String>) -> Self {
        self.portal = Some(names);
        self
    }
}

/// Parameters of a `records` range fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRecords {
    pub limit: u32,
    /// 1-based start of the range; left to the service when `None`.
    pub offset: Option<u32>,
    pub sort: Option<SortSpec>,
    pub portals: Vec<String>,
}

impl GetRecords {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            offset: None,
            sort: None,
            portals: Vec::new(),
        }
    }

    pub fn sort_by(mut self, field_name: impl Into<String>, ascending: bool) -> Self {
        self.sort = Some(SortSpec::new(field_name, SortOrder::from_ascending(ascending)));
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn portal(mut self, name: impl Into<String>) -> Self {
        self.portals.push(name.into());
        self
    }
}

/// Records returned by a find or range fetch, with their counts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundSet {
    #[serde(rename = "data", default)]
    pub records: Vec<Record>,
    pub data_info: DataInfo,
}

impl FoundSet {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// What a script run reported back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScriptOutcome {
    #[serde(rename = "scriptResult", default)]
    pub result: Option<String>,
    #[serde(rename = "scriptError", default)]
    pub error: Option<String>,
}
