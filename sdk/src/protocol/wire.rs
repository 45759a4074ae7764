//! Wire types for the signing protocol.
//!
//! The request side is built by the validator from untyped JSON, so
//! these are plain typed records rather than serde-derived inputs;
//! the validator owns the field-by-field rules and error labels.
//! Content sources and object groups are tagged sums carrying only
//! the fields meaningful to their mode; nothing downstream of the
//! resolver ever inspects a mode again.
//!
//! The response side and the three HTTP callback payloads serialize
//! with serde, camelCase on the wire.

use {
    super::error::ErrorCode,
    serde::Serialize,
    serde_json::Value,
    std::collections::BTreeMap,
};

/// HTTP headers attached by the caller to downloads, uploads or
/// callbacks. BTreeMap keeps serialization order deterministic.
pub type Headers = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    Text,
    Xml,
    Json,
    Pdf,
    Binary,
}

impl DataType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(DataType::Text),
            "xml" => Some(DataType::Xml),
            "json" => Some(DataType::Json),
            "pdf" => Some(DataType::Pdf),
            "binary" => Some(DataType::Binary),
            _ => None,
        }
    }

    /// pdf and binary objects must be sourced remotely.
    pub fn remote_only(self) -> bool {
        matches!(self, DataType::Pdf | DataType::Binary)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Xml => "xml",
            DataType::Json => "json",
            DataType::Pdf => "pdf",
            DataType::Binary => "binary",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignedContentType {
    String,
    Pdf,
    Xml,
    Binary,
}

impl SignedContentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(SignedContentType::String),
            "pdf" => Some(SignedContentType::Pdf),
            "xml" => Some(SignedContentType::Xml),
            "binary" => Some(SignedContentType::Binary),
            _ => None,
        }
    }

    /// The `Content-Type` header the upload is sent with.
    pub fn mime(self) -> &'static str {
        match self {
            SignedContentType::String => "text/plain",
            SignedContentType::Pdf => "application/pdf",
            SignedContentType::Xml => "application/xml",
            SignedContentType::Binary => "application/octet-stream",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CertSelector {
    /// Hex serial, SHA-1 thumbprint, or a serial substring.
    pub cert_id: String,
    pub label: Option<String>,
}

/// Where an object's content comes from. Exactly one mode.
#[derive(Clone, Debug)]
pub enum ContentSource {
    Inline {
        content: String,
    },
    Remote {
        download_url: String,
        http_method: String,
        headers: Headers,
    },
}

#[derive(Clone, Debug)]
pub struct PdfOptions {
    /// Name of the signature form field to reuse or append.
    pub label: String,
}

#[derive(Clone, Debug)]
pub struct XmlOptions {
    pub xpath: String,
    /// Attribute name used for reference-URI resolution.
    pub id_attribute: Option<String>,
}

#[derive(Clone, Debug)]
pub struct UploadTarget {
    pub upload_url: String,
    pub http_method: String,
    pub headers: Headers,
    pub signed_content_type: SignedContentType,
}

#[derive(Clone, Debug)]
pub struct CallbackTargets {
    pub on_success: String,
    pub on_error: String,
    pub progress: Option<String>,
    pub headers: Headers,
}

/// A fully self-describing entry of the top-level `objects` list.
#[derive(Clone, Debug)]
pub struct SignObject {
    pub id: String,
    pub data_type: DataType,
    pub content: ContentSource,
    pub upload: UploadTarget,
    pub callbacks: CallbackTargets,
    pub pdf_options: Option<PdfOptions>,
    pub xml_options: Option<XmlOptions>,
}

/// Inner object of an inline group: id plus its content value.
#[derive(Clone, Debug)]
pub struct GroupInlineObject {
    pub id: String,
    pub value: String,
}

/// Inner object of a remote group: id only, URLs come from templates.
#[derive(Clone, Debug)]
pub struct GroupRemoteObject {
    pub id: String,
}

/// The members of a group, tagged by the group's sourcing mode.
#[derive(Clone, Debug)]
pub enum GroupObjects {
    Inline(Vec<GroupInlineObject>),
    Remote {
        /// Template containing the literal `<objectId>` placeholder.
        download_url: String,
        download_headers: Headers,
        objects: Vec<GroupRemoteObject>,
    },
}

/// An `objectGroups` entry: shared fields factored over its members.
#[derive(Clone, Debug)]
pub struct ObjectGroup {
    pub data_type: DataType,
    pub upload: UploadTarget,
    pub callbacks: CallbackTargets,
    pub pdf_options: Option<PdfOptions>,
    pub xml_options: Option<XmlOptions>,
    pub objects: GroupObjects,
}

/// The two mutually exclusive work-list shapes.
#[derive(Clone, Debug)]
pub enum WorkList {
    Objects(Vec<SignObject>),
    Groups(Vec<ObjectGroup>),
}

/// A validated signing request.
#[derive(Clone, Debug)]
pub struct SignRequest {
    pub protocol_version: String,
    /// Client-chosen correlation key, treated as opaque.
    pub request_id: String,
    pub app_id: String,
    pub correlation_id: Option<String>,
    /// Echoed unchanged on every callback and in the response.
    pub metadata: Value,
    pub cert: CertSelector,
    pub work: WorkList,
}

// == Response envelope ==

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Partial,
    Error,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub status_code: u16,
    /// Upload endpoint response body, truncated to 4 KiB.
    pub response_body: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResult {
    pub status: &'static str,
    pub endpoint: &'static str,
    pub timestamp: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResult {
    pub id: String,
    pub status: &'static str,
    pub upload_result: UploadResult,
    pub callback_result: CallbackResult,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectError {
    /// Absent on request-level errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Wall time of the pipeline, measured monotonically.
    pub total_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    pub protocol_version: &'static str,
    pub request_id: String,
    pub status: ResponseStatus,
    pub results: Vec<ObjectResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ObjectError>,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

// == Callback payloads ==

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload<'a> {
    pub object_id: &'a str,
    pub request_id: &'a str,
    /// `"signing"` or `"uploading"`.
    pub status: &'static str,
    pub percent_complete: u8,
    pub message: &'a str,
    pub metadata: &'a Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessPayload<'a> {
    pub object_id: &'a str,
    pub request_id: &'a str,
    pub status: &'static str,
    pub upload_result: &'a UploadResult,
    /// ISO 8601 UTC with a `Z` suffix.
    pub timestamp: &'a str,
    pub metadata: &'a Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackErrorBody<'a> {
    pub code: ErrorCode,
    pub message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload<'a> {
    pub object_id: &'a str,
    pub request_id: &'a str,
    pub status: &'static str,
    pub error: CallbackErrorBody<'a>,
    pub timestamp: &'a str,
    pub metadata: &'a Value,
}
