//! Form checkpoint worker
//!
//! Handles the three body shapes a request can carry:
//!
//! - `multipart/form-data`: upload extensions first, then part content, then
//!   the field loop over text parts and query fields
//! - `application/json`: every string leaf in document order
//! - anything else: url-encoded body fields followed by query fields
//!
//! Malformed bodies never fail the request. They yield no match and a
//! diagnostic.

use super::engine::Scan;
use super::error::{WafError, WafResult};
use super::payload::PayloadData;
use super::snapshot::{unescape_value, InspectedRequest, RequestSnapshot};
use mime::Mime;
use multipart::server::Multipart;
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;
use tracing::warn;

/// A field name with every value it was sent with
type Field = (String, Vec<String>);

struct Part {
    name: String,
    filename: Option<String>,
    data: Vec<u8>,
}

pub(crate) struct FormInspector<'a> {
    form: &'a [PayloadData],
    upload: &'a [PayloadData],
    scan: &'a Scan<'a>,
}

impl<'a> FormInspector<'a> {
    pub(crate) fn new(
        form: &'a [PayloadData],
        upload: &'a [PayloadData],
        scan: &'a Scan<'a>,
    ) -> Self {
        Self { form, upload, scan }
    }

    /// First matching form or upload payload
    pub(crate) fn inspect(&self, request: &InspectedRequest) -> Option<&'a PayloadData> {
        let snapshot = request.snapshot();
        let content_type = snapshot.content_type();

        if content_type.is_empty() {
            return self.inspect_urlencoded(snapshot, request.raw_query());
        }

        let mime: Mime = match content_type.parse() {
            Ok(mime) => mime,
            Err(e) => {
                return malformed(WafError::InvalidContentType {
                    content_type: content_type.to_string(),
                    message: e.to_string(),
                })
            },
        };

        if mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA {
            self.inspect_multipart(&mime, snapshot, request.raw_query())
        } else if mime.type_() == mime::APPLICATION
            && (mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON))
        {
            self.inspect_json(snapshot)
        } else {
            self.inspect_urlencoded(snapshot, request.raw_query())
        }
    }

    fn inspect_multipart(
        &self,
        mime: &Mime,
        snapshot: &RequestSnapshot,
        query: &str,
    ) -> Option<&'a PayloadData> {
        let Some(boundary) = mime.get_param(mime::BOUNDARY) else {
            return malformed(WafError::Multipart("missing boundary".to_string()));
        };
        let parts = self.read_parts(snapshot, boundary.as_str());

        for part in &parts {
            let Some(filename) = part.filename.as_deref() else {
                continue;
            };
            if let Some(payload) = self.scan.first_match(self.upload, file_extension(filename)) {
                return Some(payload);
            }
        }

        for part in &parts {
            let content = String::from_utf8_lossy(&part.data);
            if let Some(payload) = self.scan.first_match(self.form, &unescape_value(&content)) {
                return Some(payload);
            }
        }

        let mut fields = Vec::new();
        for part in parts.iter().filter(|p| p.filename.is_none()) {
            push_field(
                &mut fields,
                part.name.clone(),
                String::from_utf8_lossy(&part.data).into_owned(),
            );
        }
        extend_fields(&mut fields, query_pairs(query));
        self.inspect_fields(&fields)
    }

    /// Read every part up front. A read error ends the stream; parts read
    /// before it are still inspected.
    fn read_parts(&self, snapshot: &RequestSnapshot, boundary: &str) -> Vec<Part> {
        let mut multipart = Multipart::with_body(snapshot.body().as_ref(), boundary);
        let mut parts = Vec::new();

        loop {
            if self.scan.cancelled() {
                break;
            }
            match multipart.read_entry() {
                Ok(Some(mut entry)) => {
                    let mut data = Vec::new();
                    if let Err(e) = entry.data.read_to_end(&mut data) {
                        let error = WafError::Multipart(e.to_string());
                        warn!(error = %error, parts = parts.len(), "multipart body truncated");
                        break;
                    }
                    parts.push(Part {
                        name: entry.headers.name.to_string(),
                        filename: entry.headers.filename.clone(),
                        data,
                    });
                },
                Ok(None) => break,
                Err(e) => {
                    let error = WafError::Multipart(e.to_string());
                    warn!(error = %error, parts = parts.len(), "multipart body truncated");
                    break;
                },
            }
        }

        parts
    }

    fn inspect_json(&self, snapshot: &RequestSnapshot) -> Option<&'a PayloadData> {
        if snapshot.is_empty() {
            return None;
        }
        let document = match parse_json(snapshot.body()) {
            Ok(document) => document,
            Err(e) => return malformed(e),
        };
        let found = self.visit(&document);
        dismantle(document);
        found
    }

    /// Depth-first over the document in document order, with an explicit
    /// stack. Only string leaves are matched.
    fn visit(&self, document: &Value) -> Option<&'a PayloadData> {
        let mut stack = vec![document];
        while let Some(value) = stack.pop() {
            if self.scan.cancelled() {
                return None;
            }
            match value {
                Value::String(s) => {
                    if let Some(payload) = self.scan.first_match(self.form, &unescape_value(s)) {
                        return Some(payload);
                    }
                },
                Value::Array(items) => stack.extend(items.iter().rev()),
                Value::Object(map) => stack.extend(map.values().rev()),
                Value::Null | Value::Bool(_) | Value::Number(_) => {},
            }
        }
        None
    }

    fn inspect_urlencoded(
        &self,
        snapshot: &RequestSnapshot,
        query: &str,
    ) -> Option<&'a PayloadData> {
        let mut fields = Vec::new();
        if !snapshot.is_empty() {
            match serde_html_form::from_bytes::<Vec<(String, String)>>(snapshot.body()) {
                Ok(pairs) => extend_fields(&mut fields, pairs),
                Err(e) => {
                    let error = WafError::InvalidForm(e.to_string());
                    warn!(error = %error, "malformed form body, body fields skipped");
                },
            }
        }
        extend_fields(&mut fields, query_pairs(query));
        self.inspect_fields(&fields)
    }

    /// Field loop: the name first, then each value. Short numeric values are
    /// skipped.
    fn inspect_fields(&self, fields: &[Field]) -> Option<&'a PayloadData> {
        for (name, values) in fields {
            if self.scan.cancelled() {
                return None;
            }
            if let Some(payload) = self.scan.first_match(self.form, name) {
                return Some(payload);
            }
            for value in values.iter().filter(|v| !is_short_number(v)) {
                if let Some(payload) = self.scan.first_match(self.form, value) {
                    return Some(payload);
                }
            }
        }
        None
    }
}

fn query_pairs(query: &str) -> Vec<(String, String)> {
    if query.is_empty() {
        return Vec::new();
    }
    serde_html_form::from_str(query).unwrap_or_else(|e| {
        let error = WafError::InvalidForm(e.to_string());
        warn!(error = %error, "malformed query string, query fields skipped");
        Vec::new()
    })
}

/// Log unreadable input and report no match
fn malformed<T>(error: WafError) -> Option<T> {
    warn!(error = %error, "malformed request input");
    None
}

/// Parse a JSON body of any nesting depth. The parser grows its stack on
/// demand instead of stopping at serde_json's recursion limit.
fn parse_json(body: &[u8]) -> WafResult<Value> {
    let mut de = serde_json::Deserializer::from_slice(body);
    de.disable_recursion_limit();
    let document = Value::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    if let Err(e) = de.end() {
        dismantle(document);
        return Err(e.into());
    }
    Ok(document)
}

/// Drop a document without recursing into it
fn dismantle(document: Value) {
    let mut stack = vec![document];
    while let Some(value) = stack.pop() {
        match value {
            Value::Array(items) => stack.extend(items),
            Value::Object(map) => stack.extend(map.into_iter().map(|(_, v)| v)),
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {},
        }
    }
}

fn push_field(fields: &mut Vec<Field>, name: String, value: String) {
    match fields.iter_mut().find(|(n, _)| *n == name) {
        Some((_, values)) => values.push(value),
        None => fields.push((name, vec![value])),
    }
}

fn extend_fields(fields: &mut Vec<Field>, pairs: Vec<(String, String)>) {
    for (name, value) in pairs {
        push_field(fields, name, value);
    }
}

/// One to five ASCII digits
fn is_short_number(value: &str) -> bool {
    (1..=5).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_digit())
}

/// Extension of the last path element including the dot, empty when there
/// is none
fn file_extension(filename: &str) -> &str {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    base.rfind('.').map(|i| &base[i..]).unwrap_or_default()
}
