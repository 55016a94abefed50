use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use comfy_table::{presets::UTF8_FULL, Cell, ColumnConstraint, ContentArrangement, Table, Width};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_TITLE: &str = "SIRE 2.0 Inspection Report";
pub const METADATA_HEADING: &str = "Vessel Information";
pub const COMMENTS_HEADING: &str = "Comments and Observations";
pub const METADATA_HEADERS: [&str; 2] = ["Field", "Value"];
pub const COMMENT_HEADERS: [&str; 4] = ["Question", "Inspector Comment", "Operator Comment", "Date"];
pub const METADATA_WIDTHS: [f32; 2] = [1.0, 1.0];
pub const COMMENT_WIDTHS: [f32; 4] = [1.0, 3.0, 3.0, 1.5];

static CELL_NEWLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n").unwrap());

/// Result of turning an uploaded payload into a JSON tree.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Parsed after the prefix repair and NUL/CR stripping alone.
    Clean(Value),
    /// Parsed only after dropping control characters and leading garbage.
    RecoveredWithCleanup(Value),
    /// Both attempts failed; carries the parser's error text.
    Failed(String),
}

impl IngestOutcome {
    pub fn document(&self) -> Option<&Value> {
        match self {
            IngestOutcome::Clean(doc) | IngestOutcome::RecoveredWithCleanup(doc) => Some(doc),
            IngestOutcome::Failed(_) => None,
        }
    }

    pub fn into_document(self) -> Option<Value> {
        match self {
            IngestOutcome::Clean(doc) | IngestOutcome::RecoveredWithCleanup(doc) => Some(doc),
            IngestOutcome::Failed(_) => None,
        }
    }
}

/// Fix the known export corruptions at the very start of the payload.
/// At most one rule applies:
/// - `{",` becomes `{`
/// - `{"` is left alone
/// - `{,` becomes `{`
pub fn repair_prefix(text: &str) -> String {
    if let Some(rest) = text.strip_prefix("{\",") {
        format!("{{{}", rest)
    } else if text.starts_with("{\"") {
        text.to_string()
    } else if let Some(rest) = text.strip_prefix("{,") {
        format!("{{{}", rest)
    } else {
        text.to_string()
    }
}

/// Remove embedded NUL and carriage-return characters anywhere in the text.
pub fn strip_control_noise(text: &str) -> String {
    text.chars().filter(|c| *c != '\0' && *c != '\r').collect()
}

/// Second-chance cleanup: drop control characters other than newline/tab and
/// discard anything before the first `{`. Returns None when no `{` exists.
pub fn aggressive_cleanup(text: &str) -> Option<String> {
    let cleaned: String = text
        .chars()
        .filter(|c| (*c as u32) >= 32 || *c == '\n' || *c == '\t')
        .collect();
    if cleaned.starts_with('{') {
        return Some(cleaned);
    }
    let start = cleaned.find('{')?;
    Some(cleaned[start..].to_string())
}

/// Decode, repair and parse an uploaded inspection export.
/// Never panics and never fails on decoding; invalid UTF-8 is replaced.
pub fn normalize_payload(bytes: &[u8]) -> IngestOutcome {
    let decoded = String::from_utf8_lossy(bytes);
    let repaired = repair_prefix(&decoded);
    let text = strip_control_noise(repaired.trim());

    let first_err = match serde_json::from_str::<Value>(&text) {
        Ok(doc) => {
            debug!(tool = "normalize_payload", status = "clean", bytes = bytes.len());
            return IngestOutcome::Clean(doc);
        }
        Err(e) => e,
    };
    debug!(tool = "normalize_payload", error = %first_err, "strict parse failed, retrying with cleanup");

    let Some(cleaned) = aggressive_cleanup(&text) else {
        warn!(tool = "normalize_payload", error = %first_err, "no object start found");
        return IngestOutcome::Failed(first_err.to_string());
    };
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(doc) => {
            info!(tool = "normalize_payload", status = "recovered_with_cleanup", bytes = bytes.len());
            IngestOutcome::RecoveredWithCleanup(doc)
        }
        Err(e) => {
            warn!(tool = "normalize_payload", error = %e, "parse failed after cleanup");
            IngestOutcome::Failed(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionDocument {
    #[serde(default)]
    pub meta_data: Vec<MetaDataEntry>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaDataEntry {
    pub key: String,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Any JSON value; a missing id, `null`, `"42"` and `42` are all distinct.
    #[serde(default = "missing_question_id")]
    pub template_question_id: Value,
    #[serde(default)]
    pub complex_responses: Vec<ComplexResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComplexResponse {
    #[serde(default)]
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default)]
    pub comments: Option<Value>,
    #[serde(default)]
    pub initial_operator_comments: Vec<OperatorComment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorComment {
    #[serde(default, deserialize_with = "lenient_text")]
    pub comments: Option<String>,
    #[serde(default)]
    pub comment_date: Option<Value>,
}

fn missing_question_id() -> Value {
    Value::String(String::new())
}

/// Render a scalar for display: strings as-is, null as empty, anything else
/// as its JSON text.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accept a string, number, boolean or null where text is expected.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.map(|v| scalar_text(&v)))
}

/// Dates are reformatted only when they arrive as strings.
fn date_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => format_date(s),
        Some(other) => scalar_text(other),
        None => String::new(),
    }
}

/// Metadata rows in first-seen order. Re-inserting a field overwrites its
/// value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataTable {
    rows: Vec<(String, String)>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        match self.index.get(&field) {
            Some(&pos) => self.rows[pos].1 = value,
            None => {
                self.index.insert(field.clone(), self.rows.len());
                self.rows.push((field, value));
            }
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.index.get(field).map(|&pos| self.rows[pos].1.as_str())
    }

    pub fn rows(&self) -> &[(String, String)] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub question_label: String,
    pub inspector_comment: String,
    pub operator_comment: String,
    pub date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedReport {
    pub metadata: MetadataTable,
    pub comments: Vec<CommentRecord>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("{0}")]
    Traversal(String),
}

/// Reformat `YYYY-MM-DDTHH:MM:SS[.fff...]` as `YYYY-MM-DD HH:MM`.
/// Anything without a `T`, or that fails to parse, comes back unchanged.
pub fn format_date(raw: &str) -> String {
    if raw.is_empty() || !raw.contains('T') {
        return raw.to_string();
    }
    let head = raw.split('.').next().unwrap_or(raw);
    match NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S") {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => raw.to_string(),
    }
}

/// True for metadata keys whose values hold timestamps.
pub fn is_date_field(key: &str) -> bool {
    key.contains("DATE")
}

/// Memoized `group.sequence` labels keyed by raw question identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionNumbers {
    labels: HashMap<String, String>,
    order: Vec<String>,
}

impl QuestionNumbers {
    pub fn label(&self, id: &str) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    /// Labelled identifiers in the order they were first seen.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(move |id| (id.as_str(), self.labels[id].as_str()))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Assign display labels to question identifiers, one entry per comment row.
///
/// A previously unseen identifier that differs from the last labelled one opens
/// a new group. The sequence counter advances once when a label is assigned and
/// once more for every row processed, labelled or not. Existing exports depend
/// on these exact numbers, so the per-row advance is kept.
pub fn assign_question_numbers<'a, I>(ids: I) -> QuestionNumbers
where
    I: IntoIterator<Item = &'a str>,
{
    let mut numbers = QuestionNumbers::default();
    let mut group: u32 = 0;
    let mut sequence: u32 = 0;
    let mut last_seen: Option<&str> = None;

    for id in ids {
        if !numbers.labels.contains_key(id) {
            if last_seen != Some(id) {
                group += 1;
                sequence = 0;
            }
            sequence += 1;
            numbers.labels.insert(id.to_string(), format!("{}.{}", group, sequence));
            numbers.order.push(id.to_string());
            last_seen = Some(id);
        }
        sequence += 1;
    }
    numbers
}

struct RawComment {
    id: String,
    inspector: String,
    operator: String,
    date: String,
}

impl InspectionDocument {
    pub fn metadata_table(&self) -> MetadataTable {
        let mut table = MetadataTable::new();
        for entry in &self.meta_data {
            let value = if is_date_field(&entry.key) {
                date_text(entry.value.as_ref())
            } else {
                entry.value.as_ref().map(scalar_text).unwrap_or_default()
            };
            table.insert(entry.key.clone(), value);
        }
        table
    }

    fn raw_comments(&self) -> Vec<RawComment> {
        let mut out = Vec::new();
        for question in &self.questions {
            // JSON text keeps `""`, `null`, `"42"` and `42` apart
            let id = question.template_question_id.to_string();
            for response in &question.complex_responses {
                for observation in &response.observations {
                    let inspector = match &observation.comments {
                        Some(c) if !is_empty_document(c) => scalar_text(c),
                        _ => continue,
                    };
                    for op in &observation.initial_operator_comments {
                        out.push(RawComment {
                            id: id.clone(),
                            inspector: inspector.clone(),
                            operator: op.comments.clone().unwrap_or_default(),
                            date: date_text(op.comment_date.as_ref()),
                        });
                    }
                }
            }
        }
        out
    }

    pub fn comment_records(&self) -> Vec<CommentRecord> {
        let raw = self.raw_comments();
        let numbers = assign_question_numbers(raw.iter().map(|c| c.id.as_str()));
        raw.into_iter()
            .map(|c| CommentRecord {
                question_label: numbers.label(&c.id).unwrap_or_default().to_string(),
                inspector_comment: c.inspector,
                operator_comment: c.operator,
                date: c.date,
            })
            .collect()
    }
}

fn is_empty_document(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Build the metadata and comment tables from a parsed export.
/// Returns `Ok(None)` for an empty or absent document.
pub fn extract_report(value: &Value) -> Result<Option<ExtractedReport>, ExtractError> {
    if is_empty_document(value) {
        debug!(tool = "extract_report", "empty document");
        return Ok(None);
    }
    if !value.is_object() {
        return Err(ExtractError::Traversal(format!(
            "expected an object at the document root, found {}",
            json_kind(value)
        )));
    }
    let doc = InspectionDocument::deserialize(value).map_err(|e| ExtractError::Traversal(e.to_string()))?;
    let report = ExtractedReport { metadata: doc.metadata_table(), comments: doc.comment_records() };
    info!(
        tool = "extract_report",
        metadata_rows = report.metadata.len(),
        comment_rows = report.comments.len()
    );
    Ok(Some(report))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SessionStatus {
    Loaded,
    LoadedWithCleanup,
    ParseFailed(String),
    TraversalFailed(String),
    MissingUpload,
}

impl SessionStatus {
    pub fn message(&self) -> String {
        match self {
            SessionStatus::Loaded => "File loaded successfully!".to_string(),
            SessionStatus::LoadedWithCleanup => "File loaded successfully with cleanup!".to_string(),
            SessionStatus::ParseFailed(detail) => format!("Invalid JSON format: {}", detail),
            SessionStatus::TraversalFailed(detail) => format!("Error processing data: {}", detail),
            SessionStatus::MissingUpload => "Please upload a JSON file first".to_string(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SessionStatus::Loaded | SessionStatus::LoadedWithCleanup => Severity::Success,
            SessionStatus::MissingUpload => Severity::Warning,
            SessionStatus::ParseFailed(_) | SessionStatus::TraversalFailed(_) => Severity::Error,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Please upload and process a JSON file first")]
    NothingLoaded,
    #[error(transparent)]
    Emit(#[from] EmitError),
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub title: String,
    pub emit: EmitOptions,
}

/// Per-user working state: the last parsed export and the tables derived
/// from it. Every successful load replaces the tables wholesale.
#[derive(Debug, Clone, Default)]
pub struct ReportSession {
    document: Option<Value>,
    metadata: Option<MetadataTable>,
    comments: Option<Vec<CommentRecord>>,
    status: Option<SessionStatus>,
    source_sha256: Option<String>,
}

impl ReportSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the ingest and extraction pipeline for one uploaded payload.
    pub fn process(&mut self, upload: Option<&[u8]>) -> SessionStatus {
        let Some(bytes) = upload else {
            warn!(tool = "process", "no upload");
            return self.set_status(SessionStatus::MissingUpload);
        };

        let (document, loaded) = match normalize_payload(bytes) {
            IngestOutcome::Clean(doc) => (doc, SessionStatus::Loaded),
            IngestOutcome::RecoveredWithCleanup(doc) => (doc, SessionStatus::LoadedWithCleanup),
            IngestOutcome::Failed(detail) => return self.set_status(SessionStatus::ParseFailed(detail)),
        };

        let extracted = extract_report(&document);
        self.document = Some(document);
        self.source_sha256 = Some(sha256_hex(bytes));
        match extracted {
            Ok(Some(report)) => {
                self.metadata = Some(report.metadata);
                self.comments = Some(report.comments);
                self.set_status(loaded)
            }
            Ok(None) => {
                self.metadata = None;
                self.comments = None;
                self.set_status(loaded)
            }
            Err(ExtractError::Traversal(detail)) => {
                warn!(tool = "extract_report", error = %detail);
                self.metadata = None;
                self.comments = None;
                self.set_status(SessionStatus::TraversalFailed(detail))
            }
        }
    }

    fn set_status(&mut self, status: SessionStatus) -> SessionStatus {
        self.status = Some(status.clone());
        status
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn status(&self) -> Option<&SessionStatus> {
        self.status.as_ref()
    }

    pub fn document(&self) -> Option<&Value> {
        self.document.as_ref()
    }

    pub fn metadata(&self) -> Option<&MetadataTable> {
        self.metadata.as_ref()
    }

    pub fn comments(&self) -> Option<&[CommentRecord]> {
        self.comments.as_deref()
    }

    pub fn source_sha256(&self) -> Option<&str> {
        self.source_sha256.as_deref()
    }

    /// The exportable document, available once both tables exist.
    pub fn report(&self, title: &str) -> Option<ReportDocument> {
        match (&self.metadata, &self.comments) {
            (Some(metadata), Some(comments)) => Some(build_report_document(title, metadata, comments)),
            _ => None,
        }
    }

    pub fn export(&self, request: &ExportRequest) -> Result<EmitPaths, ExportError> {
        let doc = self.report(&request.title).ok_or(ExportError::NothingLoaded)?;
        let meta = serde_json::json!({
            "title": doc.title,
            "status": self.status,
            "metadata_rows": self.metadata.as_ref().map(MetadataTable::len).unwrap_or(0),
            "comment_rows": self.comments.as_ref().map(Vec::len).unwrap_or(0),
            "source_sha256": self.source_sha256,
            "formats": request.emit.formats,
            "generated_at": chrono::Utc::now().to_rfc3339(),
        });
        Ok(emit_report(&doc, &request.emit, &meta)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTable {
    pub headers: Vec<String>,
    /// Relative column widths, one per header.
    pub widths: Vec<f32>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    /// Column widths as percentages of the full table width.
    pub fn width_percentages(&self) -> Vec<f32> {
        let total: f32 = self.widths.iter().sum();
        if total <= 0.0 {
            let n = self.widths.len().max(1) as f32;
            return vec![100.0 / n; self.widths.len()];
        }
        self.widths.iter().map(|w| w / total * 100.0).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSection {
    pub heading: String,
    pub table: ReportTable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDocument {
    pub title: String,
    pub sections: Vec<ReportSection>,
}

impl ReportDocument {
    pub fn section(&self, heading: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.heading == heading)
    }
}

/// Lay out the two tables as an exportable document.
pub fn build_report_document(title: &str, metadata: &MetadataTable, comments: &[CommentRecord]) -> ReportDocument {
    let metadata_table = ReportTable {
        headers: METADATA_HEADERS.iter().map(|h| h.to_string()).collect(),
        widths: METADATA_WIDTHS.to_vec(),
        rows: metadata.rows().iter().map(|(k, v)| vec![k.clone(), v.clone()]).collect(),
    };
    let comments_table = ReportTable {
        headers: COMMENT_HEADERS.iter().map(|h| h.to_string()).collect(),
        widths: COMMENT_WIDTHS.to_vec(),
        rows: comments
            .iter()
            .map(|c| {
                vec![
                    c.question_label.clone(),
                    c.inspector_comment.clone(),
                    c.operator_comment.clone(),
                    c.date.clone(),
                ]
            })
            .collect(),
    };
    ReportDocument {
        title: title.to_string(),
        sections: vec![
            ReportSection { heading: METADATA_HEADING.to_string(), table: metadata_table },
            ReportSection { heading: COMMENTS_HEADING.to_string(), table: comments_table },
        ],
    }
}

fn markdown_cell(text: &str) -> String {
    let escaped = text.replace('|', "\\|");
    CELL_NEWLINE_RE.replace_all(&escaped, "<br>").into_owned()
}

/// Render the document as Markdown with pipe tables.
pub fn render_markdown(doc: &ReportDocument) -> String {
    let mut out = Vec::new();
    out.push(format!("# {}", doc.title));
    for section in &doc.sections {
        out.push(String::new());
        out.push(format!("## {}", section.heading));
        out.push(String::new());
        let table = &section.table;
        let header: Vec<String> = table.headers.iter().map(|h| markdown_cell(h)).collect();
        out.push(format!("| {} |", header.join(" | ")));
        out.push(format!("|{}", " --- |".repeat(table.headers.len())));
        for row in &table.rows {
            let cells: Vec<String> = row.iter().map(|c| markdown_cell(c)).collect();
            out.push(format!("| {} |", cells.join(" | ")));
        }
    }
    out.push(String::new());
    out.join("\n")
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render the document as a standalone HTML page.
pub fn render_html(doc: &ReportDocument) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{}</title>\n", html_escape(&doc.title)));
    out.push_str(
        "<style>\n\
         body { font-family: sans-serif; background: #f0f0f0; margin: 1rem 2rem; }\n\
         h1 { background: #5c7cba; color: white; padding: 20px; border-radius: 5px; }\n\
         h2 { color: #5c7cba; }\n\
         table { width: 100%; border-collapse: collapse; background: white; }\n\
         th { background: #5c7cba; color: white; text-align: left; }\n\
         th, td { border: 1px solid #ddd; padding: 8px; vertical-align: top; }\n\
         </style>\n",
    );
    out.push_str("</head>\n<body>\n");
    out.push_str(&format!("<h1>{}</h1>\n", html_escape(&doc.title)));
    for section in &doc.sections {
        let table = &section.table;
        out.push_str(&format!("<h2>{}</h2>\n<table>\n<colgroup>\n", html_escape(&section.heading)));
        for pct in table.width_percentages() {
            out.push_str(&format!("<col style=\"width: {:.2}%\">\n", pct));
        }
        out.push_str("</colgroup>\n<tr>");
        for h in &table.headers {
            out.push_str(&format!("<th>{}</th>", html_escape(h)));
        }
        out.push_str("</tr>\n");
        for row in &table.rows {
            out.push_str("<tr>");
            for cell in row {
                out.push_str(&format!("<td>{}</td>", html_escape(cell)));
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</table>\n");
    }
    out.push_str("</body>\n</html>\n");
    out
}

/// Render the document for terminal review, wrapping cells to `width`.
pub fn render_terminal(doc: &ReportDocument, width: u16) -> String {
    let mut out = String::new();
    out.push_str(&doc.title);
    out.push('\n');
    for section in &doc.sections {
        out.push('\n');
        out.push_str(&section.heading);
        out.push('\n');

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_width(width)
            .set_header(section.table.headers.iter().map(Cell::new));
        for row in &section.table.rows {
            table.add_row(row.iter().map(Cell::new));
        }
        for (i, pct) in section.table.width_percentages().into_iter().enumerate() {
            if let Some(column) = table.column_mut(i) {
                column.set_constraint(ColumnConstraint::UpperBoundary(Width::Percentage(pct.round() as u16)));
            }
        }
        out.push_str(&table.to_string());
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Html,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Html => "html",
        }
    }

    pub fn render(self, doc: &ReportDocument) -> String {
        match self {
            ExportFormat::Markdown => render_markdown(doc),
            ExportFormat::Html => render_html(doc),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitOptions {
    pub out_dir: PathBuf,
    pub file_stem: String,
    pub formats: Vec<ExportFormat>,
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("WriteFailed: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitPaths {
    pub documents: Vec<PathBuf>,
    pub meta_path: PathBuf,
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EmitError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    tmp.write_all(bytes).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    tmp.persist(path).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    Ok(())
}

/// Atomically write each requested format plus a `<stem>.meta.json` sidecar.
pub fn emit_report(doc: &ReportDocument, opts: &EmitOptions, meta: &Value) -> Result<EmitPaths, EmitError> {
    std::fs::create_dir_all(&opts.out_dir).map_err(|e| EmitError::WriteFailed(e.to_string()))?;

    let mut documents = Vec::with_capacity(opts.formats.len());
    for format in &opts.formats {
        let path = opts.out_dir.join(format!("{}.{}", opts.file_stem, format.extension()));
        write_atomic(&path, format.render(doc).as_bytes())?;
        documents.push(path);
    }

    let meta_path = opts.out_dir.join(format!("{}.meta.json", opts.file_stem));
    let meta_bytes = serde_json::to_vec_pretty(meta).map_err(|e| EmitError::WriteFailed(e.to_string()))?;
    write_atomic(&meta_path, &meta_bytes)?;

    info!(tool = "emit_report", documents = documents.len(), meta_path = %meta_path.display());
    Ok(EmitPaths { documents, meta_path })
}

/// Lowercase hex SHA-256 digest, used to fingerprint the source payload.
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    out.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,
    pub output: OutputConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
    pub file_stem: String,
    pub formats: Vec<ExportFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u16,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { title: DEFAULT_TITLE.to_string(), output: OutputConfig::default(), display: DisplayConfig::default() }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "./output".to_string(),
            file_stem: "SIRE_Report".to_string(),
            formats: vec![ExportFormat::Markdown, ExportFormat::Html],
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { width: 120 }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ReportConfig {
    pub fn emit_options(&self) -> EmitOptions {
        EmitOptions {
            out_dir: PathBuf::from(&self.output.dir),
            file_stem: self.output.file_stem.clone(),
            formats: self.output.formats.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.title.trim().is_empty() {
            return Err(ConfigError::Invalid("empty title".into()));
        }
        if self.output.dir.trim().is_empty() {
            return Err(ConfigError::Invalid("empty output.dir".into()));
        }
        let stem = self.output.file_stem.trim();
        if stem.is_empty() || stem == "." || stem == ".." || stem.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!("bad output.file_stem: {:?}", self.output.file_stem)));
        }
        if self.output.formats.is_empty() {
            return Err(ConfigError::Invalid("output.formats is empty".into()));
        }
        if self.display.width < 20 {
            return Err(ConfigError::Invalid(format!("display.width too small: {}", self.display.width)));
        }
        Ok(())
    }
}

/// Parse and validate a YAML report config.
pub fn parse_config(raw: &str) -> Result<ReportConfig, ConfigError> {
    let cfg: ReportConfig = serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Read, parse and validate the YAML report config at `path`.
pub fn load_config(path: &Path) -> Result<ReportConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let cfg = parse_config(&raw)?;
    info!(tool = "load_config", file = %path.display(), title = %cfg.title);
    Ok(cfg)
}
