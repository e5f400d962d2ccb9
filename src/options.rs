//! Option schemas and the option normaliser.
//!
//! Each operation declares its options as a list of [`OptionField`]s plus
//! optional [`CrossRule`]s. [`normalize`] turns the caller's raw string map
//! into [`NormalizedOptions`] where every declared field has a typed value.
//!
//! Rules applied, in order:
//!
//! 1. Every raw key must name a declared field or one of its aliases;
//!    anything else is an unknown key. A field given twice (name plus alias)
//!    is a duplicate.
//! 2. Empty or whitespace-only values count as absent.
//! 3. Present values are coerced. Choices match case-insensitively and
//!    normalise to the canonical spelling; integers clamp into range unless
//!    the field rejects out-of-range values.
//! 4. Absent fields take their default; a required field without a value is
//!    an error.
//! 5. Cross-field rules run last, on the typed values.

use crate::error::OptionError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Raw request options. `None` and `""` both mean "not supplied".
pub type RawOptions = BTreeMap<String, Option<String>>;

/// What happens to an integer outside its declared range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounds {
    Clamp,
    Reject,
}

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One of a fixed set of lowercase values.
    Choice(&'static [&'static str]),
    Integer { min: i64, max: i64, bounds: Bounds },
    /// Free text up to `max_len` characters.
    Text { max_len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Default(&'static str),
    /// May stay unset; cross-field rules decide whether that is acceptable.
    Optional,
}

/// One declared option of an operation.
#[derive(Debug, Clone)]
pub struct OptionField {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
    pub presence: Presence,
    /// Never echoed in messages, logs or `Debug` output.
    pub secret: bool,
}

impl OptionField {
    pub fn choice(name: &'static str, allowed: &'static [&'static str]) -> Self {
        Self::new(name, FieldKind::Choice(allowed))
    }

    pub fn integer(name: &'static str, min: i64, max: i64) -> Self {
        Self::new(
            name,
            FieldKind::Integer {
                min,
                max,
                bounds: Bounds::Clamp,
            },
        )
    }

    pub fn text(name: &'static str, max_len: usize) -> Self {
        Self::new(name, FieldKind::Text { max_len })
    }

    fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            aliases: &[],
            kind,
            presence: Presence::Optional,
            secret: false,
        }
    }

    pub fn default_value(mut self, value: &'static str) -> Self {
        self.presence = Presence::Default(value);
        self
    }

    pub fn required(mut self) -> Self {
        self.presence = Presence::Required;
        self
    }

    pub fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    /// Reject out-of-range integers instead of clamping them.
    pub fn reject_out_of_range(mut self) -> Self {
        if let FieldKind::Integer { bounds, .. } = &mut self.kind {
            *bounds = Bounds::Reject;
        }
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    fn answers_to(&self, key: &str) -> bool {
        self.name == key || self.aliases.contains(&key)
    }

    /// Coerce one present, non-empty raw value.
    fn coerce(&self, raw: &str) -> Result<OptionValue, OptionError> {
        match self.kind {
            FieldKind::Choice(allowed) => {
                let wanted = raw.trim();
                allowed
                    .iter()
                    .find(|a| a.eq_ignore_ascii_case(wanted))
                    .map(|a| OptionValue::Choice(a))
                    .ok_or_else(|| OptionError::InvalidChoice {
                        key: self.name.to_string(),
                        value: wanted.to_string(),
                        allowed: allowed.join(", "),
                    })
            }
            FieldKind::Integer { min, max, bounds } => {
                let n: i64 = raw.trim().parse().map_err(|_| OptionError::NotAnInteger {
                    key: self.name.to_string(),
                })?;
                if (min..=max).contains(&n) {
                    return Ok(OptionValue::Integer(n));
                }
                match bounds {
                    Bounds::Clamp => {
                        let clamped = n.clamp(min, max);
                        debug!("Option '{}' clamped from {} to {}", self.name, n, clamped);
                        Ok(OptionValue::Integer(clamped))
                    }
                    Bounds::Reject => Err(OptionError::OutOfRange {
                        key: self.name.to_string(),
                        min,
                        max,
                    }),
                }
            }
            FieldKind::Text { max_len } => {
                if raw.chars().count() > max_len {
                    return Err(OptionError::TooLong {
                        key: self.name.to_string(),
                        max: max_len,
                    });
                }
                Ok(if self.secret {
                    OptionValue::Secret(raw.to_string())
                } else {
                    OptionValue::Text(raw.to_string())
                })
            }
        }
    }

    /// Check that a declared default coerces cleanly.
    pub(crate) fn check_default(&self) -> Result<(), String> {
        match self.presence {
            Presence::Default(v) if is_blank(v) => Err("default is empty".into()),
            Presence::Default(v) => self.coerce(v).map(drop).map_err(|e| e.to_string()),
            _ => Ok(()),
        }
    }

    /// Serialisable summary for introspection.
    pub fn describe(&self) -> FieldDescription {
        let (type_name, allowed, min, max) = match self.kind {
            FieldKind::Choice(allowed) => ("choice", Some(allowed.to_vec()), None, None),
            FieldKind::Integer { min, max, .. } => ("integer", None, Some(min), Some(max)),
            FieldKind::Text { .. } => ("text", None, None, None),
        };
        FieldDescription {
            name: self.name,
            aliases: self.aliases.to_vec(),
            type_name,
            allowed,
            min,
            max,
            default: match self.presence {
                Presence::Default(v) => Some(v),
                _ => None,
            },
            required: self.presence == Presence::Required,
        }
    }
}

/// Schema entry as shown by `pdfops list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescription {
    pub name: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<&'static str>,
    #[serde(rename = "type")]
    pub type_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
    pub required: bool,
}

/// A cross-field constraint, checked after every field is typed.
#[derive(Debug, Clone, Copy)]
pub struct CrossRule {
    pub violated: fn(&NormalizedOptions) -> bool,
    pub message: &'static str,
}

/// A typed option value.
#[derive(Clone, PartialEq, Eq)]
pub enum OptionValue {
    Choice(&'static str),
    Integer(i64),
    Text(String),
    Secret(String),
    Unset,
}

impl fmt::Debug for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Choice(c) => write!(f, "{c:?}"),
            OptionValue::Integer(n) => write!(f, "{n}"),
            OptionValue::Text(t) => write!(f, "{t:?}"),
            OptionValue::Secret(_) => f.write_str("\"***\""),
            OptionValue::Unset => f.write_str("unset"),
        }
    }
}

/// Options resolved against a schema: one entry per declared field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedOptions {
    values: BTreeMap<&'static str, OptionValue>,
}

impl NormalizedOptions {
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    pub fn choice(&self, name: &str) -> Option<&'static str> {
        match self.values.get(name) {
            Some(OptionValue::Choice(c)) => Some(c),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(OptionValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(OptionValue::Text(t)) | Some(OptionValue::Secret(t)) => Some(t),
            _ => None,
        }
    }

    pub fn is_set(&self, name: &str) -> bool {
        !matches!(self.values.get(name), None | Some(OptionValue::Unset))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Normalise `raw` against the fields and rules of `operation`.
pub fn normalize(
    operation: &str,
    fields: &[OptionField],
    rules: &[CrossRule],
    raw: &RawOptions,
) -> Result<NormalizedOptions, OptionError> {
    let mut supplied: BTreeMap<&'static str, &str> = BTreeMap::new();

    for (key, value) in raw {
        let field = fields
            .iter()
            .find(|f| f.answers_to(key))
            .ok_or_else(|| OptionError::UnknownKey {
                operation: operation.to_string(),
                key: key.clone(),
            })?;
        let Some(value) = value.as_deref().filter(|v| !is_blank(v)) else {
            continue;
        };
        if supplied.insert(field.name, value).is_some() {
            return Err(OptionError::DuplicateKey {
                key: field.name.to_string(),
            });
        }
    }

    let mut values = BTreeMap::new();
    for field in fields {
        let value = match (supplied.get(field.name), field.presence) {
            (Some(raw), _) => field.coerce(raw)?,
            (None, Presence::Default(default)) => field.coerce(default)?,
            (None, Presence::Required) => {
                return Err(OptionError::Missing {
                    key: field.name.to_string(),
                })
            }
            (None, Presence::Optional) => OptionValue::Unset,
        };
        values.insert(field.name, value);
    }

    let options = NormalizedOptions { values };
    if let Some(rule) = rules.iter().find(|r| (r.violated)(&options)) {
        return Err(OptionError::Constraint(rule.message.to_string()));
    }
    debug!(operation, options = ?options, "Options normalised");
    Ok(options)
}
