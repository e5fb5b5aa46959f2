//! Conversion of caller input into a graph's declared input shape

use crate::engine::{FieldKind, InputField, Variables};
use crate::entity::FileInfo;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static FILE_NAME_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[?&]x-wf-file_name=([^&#]+)").expect("file name pattern is valid")
});

/// An input that does not fit its declared field
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("required input '{path}' is missing")]
    MissingRequired { path: String },

    #[error("input '{path}' expects {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: String,
    },
}

/// Non-fatal conversion problems; the offending fields were dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionWarnings(pub Vec<ConversionError>);

impl ConversionWarnings {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ConversionWarnings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertOptions {
    /// Stop at the first problem instead of collecting warnings
    pub fail_fast: bool,

    /// Record file fields keyed by URL
    pub collect_files: bool,
}

/// Converted input and what was learned along the way
#[derive(Debug, Clone, Default)]
pub struct ConvertedInput {
    pub values: Variables,
    pub warnings: ConversionWarnings,
    pub files: HashMap<String, FileInfo>,
}

/// Convert `raw` into the shape described by `fields`
///
/// Keys without a declared field are passed through untouched.
pub fn convert_inputs(
    raw: &Variables,
    fields: &[InputField],
    options: ConvertOptions,
) -> Result<ConvertedInput, ConversionError> {
    let mut converter = Converter {
        options,
        warnings: Vec::new(),
        files: HashMap::new(),
    };

    let mut values = Variables::new();
    for (key, value) in raw {
        if !fields.iter().any(|f| &f.name == key) {
            values.insert(key.clone(), value.clone());
        }
    }
    converter.convert_fields(raw, fields, "", &mut values)?;

    Ok(ConvertedInput {
        values,
        warnings: ConversionWarnings(converter.warnings),
        files: converter.files,
    })
}

/// File name carried by an upload URL
///
/// Prefers the `x-wf-file_name` query parameter, then the last path segment.
/// Either is percent-decoded.
pub fn file_name_from_url(url: &str) -> String {
    let raw = match FILE_NAME_PARAM.captures(url) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => {
            let path = url.split(['?', '#']).next().unwrap_or(url);
            path.rsplit('/').next().unwrap_or(path)
        }
    };
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

struct Converter {
    options: ConvertOptions,
    warnings: Vec<ConversionError>,
    files: HashMap<String, FileInfo>,
}

impl Converter {
    fn convert_fields(
        &mut self,
        raw: &Variables,
        fields: &[InputField],
        prefix: &str,
        out: &mut Variables,
    ) -> Result<(), ConversionError> {
        for field in fields {
            let path = if prefix.is_empty() {
                field.name.clone()
            } else {
                format!("{}.{}", prefix, field.name)
            };

            match raw.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        self.report(ConversionError::MissingRequired { path })?;
                    }
                }
                Some(value) => match self.convert_value(value, &field.kind, &path) {
                    Ok(converted) => {
                        out.insert(field.name.clone(), converted);
                    }
                    Err(e) => self.report(e)?,
                },
            }
        }
        Ok(())
    }

    fn report(&mut self, issue: ConversionError) -> Result<(), ConversionError> {
        if self.options.fail_fast {
            return Err(issue);
        }
        self.warnings.push(issue);
        Ok(())
    }

    fn convert_value(
        &mut self,
        value: &Value,
        kind: &FieldKind,
        path: &str,
    ) -> Result<Value, ConversionError> {
        let mismatch = || ConversionError::TypeMismatch {
            path: path.to_string(),
            expected: kind.name(),
            actual: describe(value),
        };

        match kind {
            FieldKind::String => Ok(match value {
                Value::String(_) => value.clone(),
                other => Value::String(other.to_string()),
            }),
            FieldKind::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Value::from(f as i64))
                    }
                    _ => Err(mismatch()),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            FieldKind::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            FieldKind::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.trim() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            FieldKind::File => match value {
                Value::String(url) => {
                    if self.options.collect_files {
                        self.files
                            .insert(url.clone(), FileInfo::new(url.clone(), file_name_from_url(url)));
                    }
                    Ok(value.clone())
                }
                _ => Err(mismatch()),
            },
            FieldKind::Object { fields } => {
                let object = match value {
                    Value::Object(map) => map.clone(),
                    Value::String(s) => match serde_json::from_str::<Value>(s) {
                        Ok(Value::Object(map)) => map,
                        _ => return Err(mismatch()),
                    },
                    _ => return Err(mismatch()),
                };
                if fields.is_empty() {
                    return Ok(Value::Object(object));
                }
                let mut out = Variables::new();
                for (key, v) in &object {
                    if !fields.iter().any(|f| &f.name == key) {
                        out.insert(key.clone(), v.clone());
                    }
                }
                self.convert_fields(&object, fields, path, &mut out)?;
                Ok(Value::Object(out))
            }
            FieldKind::Array { items } => {
                let array = match value {
                    Value::Array(values) => values.clone(),
                    Value::String(s) => match serde_json::from_str::<Value>(s) {
                        Ok(Value::Array(values)) => values,
                        _ => return Err(mismatch()),
                    },
                    _ => return Err(mismatch()),
                };
                let mut out = Vec::with_capacity(array.len());
                for (i, item) in array.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    out.push(self.convert_value(item, items, &item_path)?);
                }
                Ok(Value::Array(out))
            }
        }
    }
}

pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(_) => "boolean".into(),
        Value::Number(_) => "number".into(),
        Value::String(s) => format!("string '{}'", s),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}
