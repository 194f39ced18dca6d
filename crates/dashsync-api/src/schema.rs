//! Response schema validation with graceful degradation.
//!
//! A [`Schema`] lists the top-level fields a response is expected to carry.
//! [`validate`] checks each one independently: a missing, renamed, or
//! mistyped field is repaired (alias lookup, coercion, or the field kind's
//! documented default) and reported as a [`FieldIssue`] instead of failing
//! the whole payload. A repaired value the target type still refuses is
//! isolated field by field and replaced by its default. Only a payload that
//! is not a JSON object, or that fails with every field at its default, is
//! rejected outright.
//!
//! Documented defaults per [`FieldKind`]:
//!
//! | kind | default |
//! |------|---------|
//! | `String` | `""` |
//! | `Integer` | `0` |
//! | `Float` | `0.0` |
//! | `Bool` | `false` |
//! | `Array` | `[]` |
//! | `Object` | `{}` |
//! | `Any` / nullable | `null` |

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

// ── Field description ───────────────────────────────────────────────

/// Expected JSON type of a top-level field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Bool,
    Array,
    Object,
    Any,
}

impl FieldKind {
    fn default_value(self) -> Value {
        match self {
            Self::String => Value::String(String::new()),
            Self::Integer => Value::from(0),
            Self::Float => Value::from(0.0),
            Self::Bool => Value::Bool(false),
            Self::Array => Value::Array(Vec::new()),
            Self::Object => Value::Object(Map::new()),
            Self::Any => Value::Null,
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    /// Best-effort conversion of a mistyped value.
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions, clippy::float_cmp)]
    fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::Integer, Value::Number(n)) => {
                let f = n.as_f64()?;
                (f.fract() == 0.0 && f.abs() < 9.0e15).then(|| Value::from(f as i64))
            }
            (Self::Integer, Value::String(s)) => {
                let s = s.trim();
                s.parse::<i64>().ok().map(Value::from).or_else(|| {
                    let f = s.parse::<f64>().ok()?;
                    (f.fract() == 0.0 && f.abs() < 9.0e15).then(|| Value::from(f as i64))
                })
            }
            (Self::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from),
            (Self::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (Self::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (Self::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            (Self::Bool, Value::Number(n)) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// One expected top-level field.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    /// Older or alternative names the server may still send.
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
    /// `null` is a legitimate value (maps to `Option<_>`).
    pub nullable: bool,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            aliases: &[],
            kind,
            nullable: false,
        }
    }

    pub const fn aliases(self, aliases: &'static [&'static str]) -> Self {
        Self { aliases, ..self }
    }

    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    pub fn default_value(&self) -> Value {
        if self.nullable {
            Value::Null
        } else {
            self.kind.default_value()
        }
    }
}

/// A typed record with a field-level description of its wire shape.
pub trait Schema: DeserializeOwned {
    /// Name used in diagnostics.
    const NAME: &'static str;

    fn fields() -> &'static [Field];
}

// ── Results ─────────────────────────────────────────────────────────

/// What was wrong with one field and how it was repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    /// Absent; the documented default was substituted.
    Missing,
    /// Found under an alias instead of the canonical name.
    Renamed { from: String },
    /// Wrong JSON type, converted successfully.
    Coerced { from: &'static str },
    /// Wrong JSON type, not convertible; the documented default was substituted.
    Mistyped { found: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: &'static str,
    pub kind: IssueKind,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IssueKind::Missing => write!(f, "{}: missing, default used", self.field),
            IssueKind::Renamed { from } => write!(f, "{}: read from '{from}'", self.field),
            IssueKind::Coerced { from } => write!(f, "{}: coerced from {from}", self.field),
            IssueKind::Mistyped { found } => {
                write!(f, "{}: unexpected {found}, default used", self.field)
            }
        }
    }
}

/// Outcome of a validation that produced a usable record.
///
/// `Degraded` is usable-but-flagged data, not a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation<T> {
    Validated(T),
    Degraded { record: T, issues: Vec<FieldIssue> },
}

impl<T> Validation<T> {
    pub fn record(&self) -> &T {
        match self {
            Self::Validated(record) | Self::Degraded { record, .. } => record,
        }
    }

    pub fn into_record(self) -> T {
        match self {
            Self::Validated(record) | Self::Degraded { record, .. } => record,
        }
    }

    pub fn issues(&self) -> &[FieldIssue] {
        match self {
            Self::Validated(_) => &[],
            Self::Degraded { issues, .. } => issues,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Nothing usable could be recovered.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{schema}: expected a JSON object, found {found}")]
    NotAnObject {
        schema: &'static str,
        found: &'static str,
    },

    #[error("{schema}: record rejected after repair: {message}")]
    Rejected {
        schema: &'static str,
        message: String,
        issues: Vec<FieldIssue>,
    },
}

// ── Validation ──────────────────────────────────────────────────────

/// Validate and normalize `raw` against `T`'s schema.
///
/// Unknown extra fields are passed through untouched. Every issue is
/// logged with the offending field names.
pub fn validate<T: Schema>(raw: &Value) -> Result<Validation<T>, SchemaError> {
    let Some(object) = raw.as_object() else {
        let found = json_type(raw);
        tracing::error!(schema = T::NAME, found, "response is not a JSON object");
        return Err(SchemaError::NotAnObject {
            schema: T::NAME,
            found,
        });
    };

    let mut normalized = object.clone();
    let mut issues = Vec::new();

    for field in T::fields() {
        let (value, source) = lookup(object, field);
        if let Some(alias) = source {
            normalized.remove(alias);
            issues.push(FieldIssue {
                field: field.name,
                kind: IssueKind::Renamed {
                    from: alias.to_owned(),
                },
            });
        }

        let repaired = match value {
            None => {
                issues.push(FieldIssue {
                    field: field.name,
                    kind: IssueKind::Missing,
                });
                field.default_value()
            }
            Some(Value::Null) if field.nullable => Value::Null,
            Some(v) if field.kind.matches(v) => v.clone(),
            Some(v) => match field.kind.coerce(v) {
                Some(coerced) => {
                    issues.push(FieldIssue {
                        field: field.name,
                        kind: IssueKind::Coerced { from: json_type(v) },
                    });
                    coerced
                }
                None => {
                    issues.push(FieldIssue {
                        field: field.name,
                        kind: IssueKind::Mistyped { found: json_type(v) },
                    });
                    field.default_value()
                }
            },
        };
        normalized.insert(field.name.to_owned(), repaired);
    }

    let mut candidate = Value::Object(normalized);
    let record = match T::deserialize(&candidate) {
        Ok(record) => Ok(record),
        Err(_) => isolate_failures::<T>(&mut candidate, &mut issues),
    };
    let record: T = match record {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(
                schema = T::NAME,
                fields = ?issue_fields(&issues),
                error = %e,
                "response rejected after field repair"
            );
            return Err(SchemaError::Rejected {
                schema: T::NAME,
                message: e.to_string(),
                issues,
            });
        }
    };

    if issues.is_empty() {
        return Ok(Validation::Validated(record));
    }

    tracing::warn!(
        schema = T::NAME,
        fields = ?issue_fields(&issues),
        issues = issues.len(),
        "degraded response: schema drift repaired"
    );
    Ok(Validation::Degraded { record, issues })
}

/// Find which repaired fields `T` refuses. Starts from every field at its
/// default, then restores repaired values one at a time; a value that
/// breaks deserialization goes back to the default and is reported as
/// mistyped. Fails only when the all-defaults record itself is refused.
fn isolate_failures<T: Schema>(
    candidate: &mut Value,
    issues: &mut Vec<FieldIssue>,
) -> Result<T, serde_json::Error> {
    let mut held = Vec::new();
    for field in T::fields() {
        let default = field.default_value();
        match set_field(candidate, field.name, default.clone()) {
            Some(value) if value != default => held.push((field, value)),
            _ => {}
        }
    }
    T::deserialize(&*candidate)?;

    for (field, value) in held {
        let found = json_type(&value);
        set_field(candidate, field.name, value);
        if T::deserialize(&*candidate).is_ok() {
            continue;
        }
        set_field(candidate, field.name, field.default_value());
        issues.retain(|i| i.field != field.name || matches!(i.kind, IssueKind::Renamed { .. }));
        issues.push(FieldIssue {
            field: field.name,
            kind: IssueKind::Mistyped { found },
        });
    }
    T::deserialize(&*candidate)
}

fn set_field(target: &mut Value, name: &str, value: Value) -> Option<Value> {
    target
        .as_object_mut()
        .and_then(|object| object.insert(name.to_owned(), value))
}

/// Find a field by canonical name, then by alias. The second element names
/// the alias when one was used.
fn lookup<'a>(
    object: &'a Map<String, Value>,
    field: &Field,
) -> (Option<&'a Value>, Option<&'static str>) {
    if let Some(v) = object.get(field.name) {
        return (Some(v), None);
    }
    field
        .aliases
        .iter()
        .find_map(|alias| object.get(*alias).map(|v| (Some(v), Some(*alias))))
        .unwrap_or((None, None))
}

fn issue_fields(issues: &[FieldIssue]) -> Vec<&'static str> {
    issues.iter().map(|i| i.field).collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
