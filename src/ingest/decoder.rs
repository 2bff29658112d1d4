//! Access-log line decoding and event assembly
//!
//! Each line is one JSON object with the keys `time`, `uri`, `method`,
//! `status`, `remote`, `agent` and `host`. Decoding only checks that the
//! line is such an object; field conversion happens during assembly so
//! that every failure can be reported with the offending payload.

use chrono::{DateTime, NaiveDateTime, Utc};
use http::Uri;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::analytics::{classify, GeoResolver};
use crate::models::Event;

#[derive(Debug, Error)]
#[error("malformed log line: {source}")]
pub struct DecodeError {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}

/// Reason a decoded record could not become an [`Event`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
    #[error("invalid status {0:?}")]
    Status(String),
    #[error("invalid uri {0:?}")]
    Uri(String),
}

#[derive(Debug, Error)]
#[error("{kind} in record {payload}")]
pub struct AssembleError {
    pub kind: FieldError,
    /// Raw line the record was decoded from
    pub payload: String,
}

/// `status` is written as either a JSON number or a string by common log formats
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StatusField {
    Code(i64),
    Text(String),
}

/// Fields of one decoded log line, not yet converted
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedFields {
    pub time: Option<String>,
    pub uri: Option<String>,
    pub method: Option<String>,
    pub status: Option<StatusField>,
    pub remote: Option<String>,
    pub agent: Option<String>,
    pub host: Option<String>,
    #[serde(skip)]
    pub raw: String,
}

/// Decode one raw line
pub fn decode(line: &str) -> Result<ParsedFields, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields: ParsedFields = serde_json::from_str(line).map_err(|source| DecodeError {
        line: line.to_string(),
        source,
    })?;
    fields.raw = line.to_string();
    Ok(fields)
}

/// Parse a request time and normalize it to UTC
///
/// Accepts RFC 3339, ISO-8601 without an offset (taken as UTC) and the
/// common-log `01/May/2023:00:00:00 +0000` form.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%d/%b/%Y:%H:%M:%S %z"] {
        if let Ok(time) = DateTime::parse_from_str(value, format) {
            return Some(time.with_timezone(&Utc));
        }
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Path component of a request URI; query and fragment are discarded
///
/// Only the part before the first `?` or `#` is validated, so raw quotes
/// or braces in a query string do not reject an otherwise usable path.
pub fn parse_path(value: &str) -> Option<String> {
    let end = value.find(['?', '#']).unwrap_or(value.len());
    let uri = value[..end].parse::<Uri>().ok()?;
    Some(uri.path().to_string())
}

fn parse_status(status: &StatusField) -> Option<i64> {
    match status {
        StatusField::Code(code) => Some(*code),
        StatusField::Text(text) => text.trim().parse().ok(),
    }
}

/// Builds canonical events from decoded fields
#[derive(Clone)]
pub struct EventAssembler {
    geo: Arc<GeoResolver>,
}

impl EventAssembler {
    pub fn new(geo: Arc<GeoResolver>) -> Self {
        Self { geo }
    }

    pub fn assemble(&self, fields: &ParsedFields) -> Result<Event, AssembleError> {
        let fail = |kind: FieldError| AssembleError {
            kind,
            payload: fields.raw.clone(),
        };

        let time = required(&fields.time, "time").map_err(fail)?;
        let uri = required(&fields.uri, "uri").map_err(fail)?;
        let method = required(&fields.method, "method").map_err(fail)?;
        let remote = required(&fields.remote, "remote").map_err(fail)?;
        let agent = required(&fields.agent, "agent").map_err(fail)?;
        let host = required(&fields.host, "host").map_err(fail)?;
        let status = fields
            .status
            .as_ref()
            .ok_or(FieldError::Missing("status"))
            .map_err(fail)?;

        let timestamp =
            parse_timestamp(time).ok_or_else(|| fail(FieldError::Timestamp(time.to_string())))?;
        let path = parse_path(uri).ok_or_else(|| fail(FieldError::Uri(uri.to_string())))?;
        let status = parse_status(status).ok_or_else(|| {
            let text = match status {
                StatusField::Code(code) => code.to_string(),
                StatusField::Text(text) => text.clone(),
            };
            fail(FieldError::Status(text))
        })?;

        let geo = self.geo.lookup(remote);

        Ok(Event {
            timestamp,
            host: host.to_string(),
            path,
            method: method.to_string(),
            status,
            region: geo.region,
            network: geo.network,
            agent: classify(agent),
        })
    }

    /// Decode and assemble in one step
    pub fn assemble_line(&self, line: &str) -> Result<Event, LineError> {
        let fields = decode(line)?;
        Ok(self.assemble(&fields)?)
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, FieldError> {
    value.as_deref().ok_or(FieldError::Missing(name))
}

/// Either stage of per-line processing failing
#[derive(Debug, Error)]
pub enum LineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
}
