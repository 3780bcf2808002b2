//! Item kinds and their payload shapes.
//!
//! Each variant carries exactly the data its handler needs, so dispatch in the
//! Executor is an exhaustive `match` and malformed payloads are rejected at
//! enqueue time instead of surfacing inside a handler.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// What a queued item does when it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    ApiCall(ApiCallPayload),
    DataSync(DataSyncPayload),
    FileUpload(FileUploadPayload),
}

impl ItemKind {
    pub const TYPE_NAMES: [&'static str; 3] = ["api_call", "data_sync", "file_upload"];

    /// Stable name used for statistics, log fields and the store's `kind` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            ItemKind::ApiCall(_) => "api_call",
            ItemKind::DataSync(_) => "data_sync",
            ItemKind::FileUpload(_) => "file_upload",
        }
    }

    pub fn validate(&self) -> Result<(), InvalidPayload> {
        match self {
            ItemKind::ApiCall(p) => p.validate(),
            ItemKind::DataSync(p) => p.validate(),
            ItemKind::FileUpload(p) => p.validate(),
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} payload: {reason}")]
pub struct InvalidPayload {
    pub kind: &'static str,
    pub reason: String,
}

impl InvalidPayload {
    fn new(kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// A plain HTTP request against the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallPayload {
    /// Absolute URL, or a path joined onto the API handler's base URL.
    pub endpoint: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl ApiCallPayload {
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), InvalidPayload> {
        if self.endpoint.trim().is_empty() {
            return Err(InvalidPayload::new("api_call", "endpoint is empty"));
        }
        let method = self.method.trim().to_ascii_uppercase();
        if method.is_empty() {
            return Err(InvalidPayload::new("api_call", "method is empty"));
        }
        if !HTTP_METHODS.contains(&method.as_str()) {
            return Err(InvalidPayload::new(
                "api_call",
                format!("unsupported method '{}'", self.method),
            ));
        }
        Ok(())
    }
}

/// Kind of write a [`DataSyncPayload`] reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Upsert,
    Delete,
}

impl SyncOperation {
    pub fn requires_record_id(self) -> bool {
        matches!(self, SyncOperation::Update | SyncOperation::Delete)
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Upsert => "upsert",
            SyncOperation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A domain record write (e.g. a shift row) that must eventually reach the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSyncPayload {
    /// Collection or table name, e.g. `shifts`.
    pub entity: String,
    pub operation: SyncOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl DataSyncPayload {
    pub fn new(entity: impl Into<String>, operation: SyncOperation) -> Self {
        Self {
            entity: entity.into(),
            operation,
            record_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn validate(&self) -> Result<(), InvalidPayload> {
        if self.entity.trim().is_empty() {
            return Err(InvalidPayload::new("data_sync", "entity is empty"));
        }
        let has_id = self
            .record_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty());
        if self.operation.requires_record_id() && !has_id {
            return Err(InvalidPayload::new(
                "data_sync",
                format!("{} requires a record_id", self.operation),
            ));
        }
        Ok(())
    }
}

/// A local file to be sent as a multipart upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUploadPayload {
    pub file_path: PathBuf,
    /// Absolute URL, or a path joined onto the upload handler's base URL.
    pub destination: String,
    #[serde(default = "default_field_name")]
    pub field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Extra text fields sent alongside the file part.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

fn default_field_name() -> String {
    "file".to_string()
}

impl FileUploadPayload {
    pub fn new(file_path: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            destination: destination.into(),
            field_name: default_field_name(),
            content_type: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), InvalidPayload> {
        if self.file_path.as_os_str().is_empty() {
            return Err(InvalidPayload::new("file_upload", "file_path is empty"));
        }
        if self.destination.trim().is_empty() {
            return Err(InvalidPayload::new("file_upload", "destination is empty"));
        }
        if self.field_name.trim().is_empty() {
            return Err(InvalidPayload::new("file_upload", "field_name is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn type_names_are_stable() {
        let kinds = [
            ItemKind::ApiCall(ApiCallPayload::new("POST", "/shifts")),
            ItemKind::DataSync(DataSyncPayload::new("shifts", SyncOperation::Create)),
            ItemKind::FileUpload(FileUploadPayload::new("/tmp/a.pdf", "/uploads")),
        ];
        let names: Vec<_> = kinds.iter().map(ItemKind::type_name).collect();
        assert_eq!(names, ItemKind::TYPE_NAMES);
    }

    #[test]
    fn serialized_form_is_tagged() {
        let kind = ItemKind::ApiCall(
            ApiCallPayload::new("post", "/shifts").with_body(json!({ "hours": 8 })),
        );
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], "api_call");
        assert_eq!(value["endpoint"], "/shifts");
        assert_eq!(value["body"]["hours"], 8);

        let back: ItemKind = serde_json::from_value(value).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn file_upload_field_name_defaults_when_missing() {
        let kind: ItemKind = serde_json::from_value(json!({
            "type": "file_upload",
            "file_path": "/tmp/payslip.pdf",
            "destination": "/documents",
        }))
        .unwrap();
        match kind {
            ItemKind::FileUpload(p) => assert_eq!(p.field_name, "file"),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[rstest]
    #[case::empty_endpoint(ApiCallPayload::new("GET", "  "))]
    #[case::empty_method(ApiCallPayload::new("", "/shifts"))]
    #[case::unknown_method(ApiCallPayload::new("FETCH", "/shifts"))]
    fn rejects_malformed_api_calls(#[case] payload: ApiCallPayload) {
        assert!(ItemKind::ApiCall(payload).validate().is_err());
    }

    #[test]
    fn method_check_is_case_insensitive() {
        assert!(ApiCallPayload::new("patch", "/shifts/1").validate().is_ok());
    }

    #[rstest]
    #[case::create_without_id(SyncOperation::Create, None, true)]
    #[case::upsert_without_id(SyncOperation::Upsert, None, true)]
    #[case::update_without_id(SyncOperation::Update, None, false)]
    #[case::delete_blank_id(SyncOperation::Delete, Some(" "), false)]
    #[case::delete_with_id(SyncOperation::Delete, Some("shift-7"), true)]
    fn data_sync_record_id_rules(
        #[case] op: SyncOperation,
        #[case] record_id: Option<&str>,
        #[case] valid: bool,
    ) {
        let mut payload = DataSyncPayload::new("shifts", op);
        payload.record_id = record_id.map(str::to_string);
        assert_eq!(payload.validate().is_ok(), valid);
    }

    #[test]
    fn file_upload_requires_path_and_destination() {
        assert!(FileUploadPayload::new("", "/uploads").validate().is_err());
        assert!(FileUploadPayload::new("/tmp/a.pdf", "").validate().is_err());
        assert!(FileUploadPayload::new("/tmp/a.pdf", "/uploads").validate().is_ok());
    }
}
