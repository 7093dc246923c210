//! Location records and request validation.
//!
//! A [`LocationRecord`] is one line of the location log. Incoming POST bodies
//! are validated into a [`NewLocation`], PATCH bodies into a [`RecordPatch`].

use std::sync::OnceLock;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Reason assumed for records that do not carry one.
pub const DEFAULT_REASON: &str = "upload";

/// Maximum length of a label, in characters.
pub const MAX_LABEL_CHARS: usize = 60;

/// Maximum length of a note, in characters.
pub const MAX_NOTE_CHARS: usize = 500;

/// Maximum length of a category, in characters.
pub const MAX_CATEGORY_CHARS: usize = 60;

/// Current UTC time in the log's timestamp format (`2024-05-01T12:00:00+00:00`).
#[must_use]
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn uuid_regex() -> &'static Regex {
    static UUID: OnceLock<Regex> = OnceLock::new();
    UUID.get_or_init(|| {
        Regex::new(
            r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$",
        )
        .expect("Invalid uuid pattern")
    })
}

/// Check whether `id` is a canonical RFC 4122 UUID (versions 1 to 5), ignoring case.
#[must_use]
pub fn is_valid_uuid(id: &str) -> bool {
    uuid_regex().is_match(id)
}

/// A request body that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The body is not a JSON object.
    #[error("request body is not a JSON object")]
    InvalidJson,
    /// Latitude missing, not numeric or outside [-90, 90].
    #[error("latitude must be a number between -90 and 90")]
    BadLat,
    /// Longitude missing, not numeric or outside [-180, 180].
    #[error("longitude must be a number between -180 and 180")]
    BadLon,
    /// Identifier missing or not a UUID.
    #[error("id must be a UUID")]
    BadId,
    /// Timestamp present but not a string.
    #[error("timestamp must be a string")]
    BadTimestamp,
    /// Label not a string or too long.
    #[error("label must be a string of at most 60 characters")]
    BadLabel,
    /// Note not a string or too long.
    #[error("note must be a string of at most 500 characters")]
    BadNote,
    /// Category not a string or too long.
    #[error("category must be a string of at most 60 characters")]
    BadCategory,
}

impl ValidationError {
    /// The error code reported to HTTP clients.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::BadLat => "bad_lat",
            Self::BadLon => "bad_lon",
            Self::BadId => "bad_id",
            Self::BadTimestamp => "bad_timestamp",
            Self::BadLabel => "bad_label",
            Self::BadNote => "bad_note",
            Self::BadCategory => "bad_category",
        }
    }
}

/// The free-text metadata fields a client may set and patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    /// Short user-facing name.
    Label,
    /// Longer free-form text.
    Note,
    /// Grouping tag.
    Category,
}

impl TextField {
    /// All patchable fields, in storage order.
    pub const ALL: [TextField; 3] = [Self::Label, Self::Note, Self::Category];

    /// JSON key of the field.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Note => "note",
            Self::Category => "category",
        }
    }

    /// Maximum length in characters.
    #[must_use]
    pub fn max_chars(self) -> usize {
        match self {
            Self::Label => MAX_LABEL_CHARS,
            Self::Note => MAX_NOTE_CHARS,
            Self::Category => MAX_CATEGORY_CHARS,
        }
    }

    fn error(self) -> ValidationError {
        match self {
            Self::Label => ValidationError::BadLabel,
            Self::Note => ValidationError::BadNote,
            Self::Category => ValidationError::BadCategory,
        }
    }

    /// Read this field from a request object.
    ///
    /// The key being absent leaves the field unchanged, `null` clears it and a
    /// string is trimmed and length-checked. An empty string clears.
    ///
    /// # Errors
    ///
    /// Returns the field's validation error for non-string values or values
    /// longer than [`TextField::max_chars`].
    pub fn parse(self, body: &Map<String, Value>) -> Result<FieldUpdate, ValidationError> {
        match body.get(self.key()) {
            None => Ok(FieldUpdate::Unchanged),
            Some(Value::Null) => Ok(FieldUpdate::Clear),
            Some(Value::String(raw)) => {
                let trimmed = raw.trim();
                if trimmed.chars().count() > self.max_chars() {
                    Err(self.error())
                } else if trimmed.is_empty() {
                    Ok(FieldUpdate::Clear)
                } else {
                    Ok(FieldUpdate::Set(trimmed.to_string()))
                }
            }
            Some(_) => Err(self.error()),
        }
    }
}

/// What a request does to one text field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate {
    /// The key was not sent.
    #[default]
    Unchanged,
    /// The key was sent as `null` or an empty string.
    Clear,
    /// The key was sent with a value.
    Set(String),
}

impl FieldUpdate {
    /// The stored value after applying this update to nothing.
    #[must_use]
    pub fn into_option(self) -> Option<String> {
        match self {
            Self::Set(value) => Some(value),
            Self::Unchanged | Self::Clear => None,
        }
    }

    fn to_json(&self) -> Option<Value> {
        match self {
            Self::Unchanged => None,
            Self::Clear => Some(Value::Null),
            Self::Set(value) => Some(Value::String(value.clone())),
        }
    }
}

/// One line of the location log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    /// Lowercase UUID chosen by the client.
    pub id: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Client-supplied time of the fix, stored verbatim.
    pub timestamp: String,
    /// Horizontal accuracy in metres.
    pub accuracy: Option<f64>,
    /// Short user-facing name.
    pub label: Option<String>,
    /// Free-form note.
    pub note: Option<String>,
    /// Grouping tag.
    pub category: Option<String>,
    /// Why the sample was sent; `None` counts as an upload.
    pub reason: Option<String>,
    /// When the server appended the record.
    pub received_at: String,
    /// When the record was last patched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// User-Agent of the uploading client.
    pub ua: Option<String>,
}

impl LocationRecord {
    /// Serialize as one JSON Lines entry, newline included.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// A validated POST body.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLocation {
    /// Lowercased identifier.
    pub id: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Client time, if one was sent and non-empty.
    pub timestamp: Option<String>,
    /// Accuracy, if numeric.
    pub accuracy: Option<f64>,
    /// Trimmed label.
    pub label: Option<String>,
    /// Trimmed note.
    pub note: Option<String>,
    /// Trimmed category.
    pub category: Option<String>,
    /// Reason tag, if a string.
    pub reason: Option<String>,
}

impl NewLocation {
    /// Validate a POST body. The first failing field wins.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] of the first invalid field.
    pub fn from_json(body: &Value) -> Result<Self, ValidationError> {
        let body = body.as_object().ok_or(ValidationError::InvalidJson)?;

        let lat = numeric(body.get("lat"))
            .filter(|lat| (-90.0..=90.0).contains(lat))
            .ok_or(ValidationError::BadLat)?;
        let lon = numeric(body.get("lon"))
            .filter(|lon| (-180.0..=180.0).contains(lon))
            .ok_or(ValidationError::BadLon)?;
        let id = parse_id(body)?;

        let timestamp = match body.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(Value::String(ts)) if ts.is_empty() => None,
            Some(Value::String(ts)) => Some(ts.clone()),
            Some(_) => return Err(ValidationError::BadTimestamp),
        };

        let label = TextField::Label.parse(body)?.into_option();
        let note = TextField::Note.parse(body)?.into_option();
        let category = TextField::Category.parse(body)?.into_option();

        Ok(Self {
            id,
            lat,
            lon,
            timestamp,
            accuracy: numeric(body.get("accuracy")),
            label,
            note,
            category,
            reason: body
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Build the record to append, stamping it with `received_at`.
    #[must_use]
    pub fn into_record(self, user_agent: Option<String>, received_at: &str) -> LocationRecord {
        LocationRecord {
            id: self.id,
            lat: self.lat,
            lon: self.lon,
            timestamp: self.timestamp.unwrap_or_else(|| received_at.to_string()),
            accuracy: self.accuracy,
            label: self.label,
            note: self.note,
            category: self.category,
            reason: self.reason,
            received_at: received_at.to_string(),
            updated_at: None,
            ua: user_agent,
        }
    }
}

/// A validated PATCH body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPatch {
    /// Lowercased identifier of the target record.
    pub id: String,
    /// Label update.
    pub label: FieldUpdate,
    /// Note update.
    pub note: FieldUpdate,
    /// Category update.
    pub category: FieldUpdate,
}

impl RecordPatch {
    /// Validate a PATCH body.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] of the first invalid field.
    pub fn from_json(body: &Value) -> Result<Self, ValidationError> {
        let body = body.as_object().ok_or(ValidationError::InvalidJson)?;
        let id = parse_id(body)?;

        Ok(Self {
            id,
            label: TextField::Label.parse(body)?,
            note: TextField::Note.parse(body)?,
            category: TextField::Category.parse(body)?,
        })
    }

    /// True when no patchable field was sent.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.updates().all(|(_, update)| *update == FieldUpdate::Unchanged)
    }

    fn updates(&self) -> impl Iterator<Item = (TextField, &FieldUpdate)> {
        TextField::ALL.into_iter().zip([&self.label, &self.note, &self.category])
    }

    /// Whether a stored entry carries this patch's identifier.
    #[must_use]
    pub fn matches(&self, entry: &Map<String, Value>) -> bool {
        entry
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| id.eq_ignore_ascii_case(&self.id))
    }

    /// Apply the sent fields to a stored entry and stamp `updatedAt`.
    ///
    /// Fields that were not sent and every other key are left as they are.
    pub fn apply(&self, entry: &mut Map<String, Value>, updated_at: &str) {
        for (field, update) in self.updates() {
            if let Some(value) = update.to_json() {
                entry.insert(field.key().to_string(), value);
            }
        }
        entry.insert(
            "updatedAt".to_string(),
            Value::String(updated_at.to_string()),
        );
    }
}

fn parse_id(body: &Map<String, Value>) -> Result<String, ValidationError> {
    body.get("id")
        .and_then(Value::as_str)
        .filter(|id| is_valid_uuid(id))
        .map(str::to_ascii_lowercase)
        .ok_or(ValidationError::BadId)
}

/// A JSON number, or a string holding a finite decimal number.
fn numeric(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}
