//! Three-way conflict resolution.
//!
//! Field-level structural comparison between the local version, the server
//! version, and (when available) their last common base. Only domain fields
//! participate; ids, timestamps and sync bookkeeping never conflict.
//!
//! Resolution rules for a genuine conflict (both sides changed, differently):
//! free-text fields take the longer string, everything else takes the local
//! value. The field name is recorded either way so a reviewer can audit the
//! choice.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::RecordKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    /// Free text; longer content is assumed more complete.
    Text,
    /// Anything else; the capturing device is the field of record.
    Other,
}

const ASSESSMENT_FIELDS: &[(&str, FieldClass)] = &[
    ("title", FieldClass::Text),
    ("notes", FieldClass::Text),
    ("inspector", FieldClass::Text),
    ("condition_rating", FieldClass::Other),
    ("asset_id", FieldClass::Other),
    ("component_code", FieldClass::Other),
];

const DEFICIENCY_FIELDS: &[(&str, FieldClass)] = &[
    ("description", FieldClass::Text),
    ("recommendation", FieldClass::Text),
    ("severity", FieldClass::Other),
    ("estimated_cost", FieldClass::Other),
];

/// Result of a three-way merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Local version with every comparable field replaced by its winner.
    pub merged: Value,
    /// Fields where both sides changed and a heuristic had to decide.
    pub conflicts: Vec<String>,
}

impl MergeOutcome {
    /// True when no field needed a heuristic decision.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

fn comparable_fields(kind: RecordKind) -> Result<&'static [(&'static str, FieldClass)]> {
    match kind {
        RecordKind::Assessment => Ok(ASSESSMENT_FIELDS),
        RecordKind::Deficiency => Ok(DEFICIENCY_FIELDS),
        RecordKind::Photo => Err(Error::Validation(
            "photo records carry binary payloads and are not mergeable".to_string(),
        )),
    }
}

fn field(record: &Value, name: &str) -> Value {
    record.get(name).cloned().unwrap_or(Value::Null)
}

fn text_len(value: &Value) -> usize {
    value.as_str().map_or(0, str::len)
}

fn resolve_conflict(class: FieldClass, local: Value, server: Value) -> Value {
    match class {
        FieldClass::Text => {
            if text_len(&server) > text_len(&local) {
                server
            } else {
                local
            }
        }
        FieldClass::Other => local,
    }
}

/// Merge the local and server versions of a record, field by field.
///
/// Without a base, any divergence counts as a conflict and falls through to
/// the heuristics. Comparison is structural on the JSON values, so key order
/// and formatting never produce false positives.
pub fn merge_records(
    kind: RecordKind,
    base: Option<&Value>,
    local: &Value,
    server: &Value,
) -> Result<MergeOutcome> {
    let fields = comparable_fields(kind)?;

    let mut merged = local
        .as_object()
        .cloned()
        .ok_or_else(|| Error::Validation("local version must be a JSON object".to_string()))?;
    if !server.is_object() {
        return Err(Error::Validation(
            "server version must be a JSON object".to_string(),
        ));
    }

    let mut conflicts = Vec::new();
    for (name, class) in fields {
        let local_value = field(local, name);
        let server_value = field(server, name);
        if local_value == server_value {
            continue;
        }

        let winner = if let Some(base_record) = base {
            let base_value = field(base_record, name);
            if local_value == base_value {
                server_value
            } else if server_value == base_value {
                local_value
            } else {
                conflicts.push((*name).to_string());
                resolve_conflict(*class, local_value, server_value)
            }
        } else {
            conflicts.push((*name).to_string());
            resolve_conflict(*class, local_value, server_value)
        };

        merged.insert((*name).to_string(), winner);
    }

    Ok(MergeOutcome {
        merged: Value::Object(merged),
        conflicts,
    })
}
