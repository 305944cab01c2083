//! In-memory records for one layout.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::fault::Fault;

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub container: bool,
    pub value_list: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub mod_id: u64,
    pub field_data: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortRule {
    pub field_name: String,
    #[serde(default = "ascend")]
    pub sort_order: String,
}

fn ascend() -> String {
    "ascend".to_string()
}

/// Records of a layout, keyed by record id.
#[derive(Debug, Clone)]
pub struct LayoutStore {
    pub table: String,
    pub fields: Vec<FieldDef>,
    records: BTreeMap<u64, StoredRecord>,
    next_id: u64,
}

impl LayoutStore {
    pub fn new(table: &str, fields: Vec<FieldDef>) -> Self {
        Self {
            table: table.to_string(),
            fields,
            records: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_fields(&self, data: &Map<String, Value>) -> Result<(), Fault> {
        if data.keys().all(|k| self.has_field(k)) {
            Ok(())
        } else {
            Err(Fault::FieldMissing)
        }
    }

    pub fn create(&mut self, data: Map<String, Value>) -> Result<u64, Fault> {
        self.check_fields(&data)?;
        let mut field_data: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.to_string(), Value::String(String::new())))
            .collect();
        field_data.extend(data);

        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(id, StoredRecord { mod_id: 0, field_data });
        Ok(id)
    }

    pub fn duplicate(&mut self, id: u64) -> Result<u64, Fault> {
        let source = self.records.get(&id).ok_or(Fault::RecordMissing)?;
        let copy = StoredRecord {
            mod_id: 0,
            field_data: source.field_data.clone(),
        };
        let new_id = self.next_id;
        self.next_id += 1;
        self.records.insert(new_id, copy);
        Ok(new_id)
    }

    /// Apply an edit, refusing it if `expected_mod_id` is stale.
    pub fn edit(&mut self, id: u64, data: Map<String, Value>, expected_mod_id: Option<&str>) -> Result<u64, Fault> {
        self.check_fields(&data)?;
        let record = self.records.get_mut(&id).ok_or(Fault::RecordMissing)?;
        if let Some(expected) = expected_mod_id {
            if expected != record.mod_id.to_string() {
                return Err(Fault::ModIdMismatch);
            }
        }
        record.field_data.extend(data);
        record.mod_id += 1;
        Ok(record.mod_id)
    }

    pub fn set_field(&mut self, id: u64, name: &str, value: Value) -> Result<(), Fault> {
        if !self.has_field(name) {
            return Err(Fault::FieldMissing);
        }
        let record = self.records.get_mut(&id).ok_or(Fault::RecordMissing)?;
        record.field_data.insert(name.to_string(), value);
        record.mod_id += 1;
        Ok(())
    }

    pub fn delete(&mut self, id: u64) -> Result<(), Fault> {
        self.records.remove(&id).map(|_| ()).ok_or(Fault::RecordMissing)
    }

    pub fn get(&self, id: u64) -> Option<&StoredRecord> {
        self.records.get(&id)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.records.keys().copied().collect()
    }

    /// Run find requests: non-omit groups are OR-ed, omit groups subtract.
    pub fn find(&self, groups: &[Map<String, Value>]) -> Result<Vec<u64>, Fault> {
        if groups.is_empty() {
            return Err(Fault::InvalidParameter);
        }
        let mut finds = Vec::new();
        let mut omits = Vec::new();
        for group in groups {
            let omit = group.get("omit").is_some_and(|v| as_text(v).eq_ignore_ascii_case("true"));
            let criteria: Vec<(&String, &Value)> = group.iter().filter(|(k, _)| k.as_str() != "omit").collect();
            if let Some((name, _)) = criteria.iter().find(|(k, _)| !self.has_field(k)) {
                tracing::debug!(field = %name, "find on unknown field");
                return Err(Fault::FieldMissing);
            }
            if omit {
                omits.push(criteria);
            } else {
                finds.push(criteria);
            }
        }

        let matches_group = |record: &StoredRecord, criteria: &[(&String, &Value)]| {
            criteria.iter().all(|(name, criterion)| {
                let stored = record.field_data.get(name.as_str()).map(as_text).unwrap_or_default();
                matches(&stored, &as_text(criterion))
            })
        };

        Ok(self
            .records
            .iter()
            .filter(|(_, r)| finds.is_empty() || finds.iter().any(|c| matches_group(*r, c.as_slice())))
            .filter(|(_, r)| !omits.iter().any(|c| matches_group(*r, c.as_slice())))
            .map(|(id, _)| *id)
            .collect())
    }

    pub fn sort(&self, ids: &mut [u64], rules: &[SortRule]) -> Result<(), Fault> {
        if rules.iter().any(|r| !self.has_field(&r.field_name)) {
            return Err(Fault::FieldMissing);
        }
        ids.sort_by(|a, b| {
            let (ra, rb) = (&self.records[a], &self.records[b]);
            rules
                .iter()
                .map(|rule| {
                    let ord = compare(ra.field_data.get(&rule.field_name), rb.field_data.get(&rule.field_name));
                    if rule.sort_order == "descend" {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(())
    }

    pub fn record_json(&self, id: u64) -> Value {
        let record = &self.records[&id];
        json!({
            "recordId": id.to_string(),
            "modId": record.mod_id.to_string(),
            "fieldData": record.field_data,
            "portalData": {}
        })
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `==x` is an exact match; anything else matches by prefix. Both ignore case.
fn matches(stored: &str, criterion: &str) -> bool {
    let stored = stored.to_lowercase();
    match criterion.strip_prefix("==") {
        Some(exact) => stored == exact.to_lowercase(),
        None => stored.starts_with(&criterion.to_lowercase()),
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (a, b) => {
            let a = a.map(as_text).unwrap_or_default().to_lowercase();
            let b = b.map(as_text).unwrap_or_default().to_lowercase();
            a.cmp(&b)
        }
    }
}
