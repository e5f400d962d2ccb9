//! Operation registry: the read-only table of supported operations.
//!
//! The registry is assembled once through [`RegistryBuilder`], checked for
//! consistency, then shared behind an `Arc`. Nothing mutates it afterwards,
//! so concurrent dispatches read it without locking. Adding an operation
//! means registering one more [`OperationSpec`]; the dispatcher does not
//! change.

use crate::error::{OptionError, RegistryError};
use crate::media::MediaKind;
use crate::options::{self, CrossRule, FieldDescription, NormalizedOptions, OptionField, RawOptions};
use crate::routines::{self, Routine};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Static description of one operation.
#[derive(Clone)]
pub struct OperationSpec {
    /// Unique operation name.
    pub name: &'static str,
    /// Alternative names resolving to this operation.
    pub aliases: &'static [&'static str],
    pub summary: &'static str,
    pub input_kind: MediaKind,
    pub fields: Vec<OptionField>,
    pub rules: Vec<CrossRule>,
    /// Output kind for a given set of options.
    pub output_kind: fn(&NormalizedOptions) -> MediaKind,
    /// Every kind `output_kind` can return.
    pub output_kinds: &'static [MediaKind],
    /// Prefix of the display file name, e.g. `compressed_`.
    pub display_prefix: &'static str,
    /// Whether a failed run may be replaced by a marked placeholder.
    pub best_effort: bool,
    /// Whether to report original/result sizes in the response metadata.
    pub report_sizes: bool,
    pub routine: Arc<dyn Routine>,
}

impl fmt::Debug for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSpec")
            .field("name", &self.name)
            .field("input_kind", &self.input_kind)
            .field("fields", &self.fields.len())
            .field("best_effort", &self.best_effort)
            .finish()
    }
}

impl OperationSpec {
    pub fn normalize(&self, raw: &RawOptions) -> Result<NormalizedOptions, OptionError> {
        options::normalize(self.name, &self.fields, &self.rules, raw)
    }

    pub fn describe(&self) -> OperationDescription {
        OperationDescription {
            name: self.name,
            aliases: self.aliases.to_vec(),
            summary: self.summary,
            input_kind: self.input_kind,
            output_kinds: self.output_kinds.to_vec(),
            best_effort: self.best_effort,
            options: self.fields.iter().map(OptionField::describe).collect(),
            constraints: self.rules.iter().map(|r| r.message).collect(),
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            for key in std::iter::once(&field.name).chain(field.aliases) {
                if !seen.insert(*key) {
                    return Err(RegistryError::DuplicateField {
                        operation: self.name.to_string(),
                        field: key.to_string(),
                    });
                }
            }
            field
                .check_default()
                .map_err(|reason| RegistryError::InvalidDefault {
                    operation: self.name.to_string(),
                    field: field.name.to_string(),
                    reason,
                })?;
        }
        Ok(())
    }
}

/// Serialisable registry entry for introspection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescription {
    pub name: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<&'static str>,
    pub summary: &'static str,
    pub input_kind: MediaKind,
    pub output_kinds: Vec<MediaKind>,
    pub best_effort: bool,
    pub options: Vec<FieldDescription>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<&'static str>,
}

/// Collects operations before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    specs: Vec<OperationSpec>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, spec: OperationSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Freeze the registry, rejecting name clashes and bad schemas.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut by_name = HashMap::new();
        for (idx, spec) in self.specs.iter().enumerate() {
            spec.validate()?;
            for name in std::iter::once(&spec.name).chain(spec.aliases) {
                if by_name.insert(*name, idx).is_some() {
                    return Err(RegistryError::DuplicateName(name.to_string()));
                }
            }
        }
        Ok(Registry {
            specs: self.specs.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }
}

/// Frozen operation table.
#[derive(Debug)]
pub struct Registry {
    specs: Vec<Arc<OperationSpec>>,
    by_name: HashMap<&'static str, usize>,
}

impl Registry {
    /// The six built-in operations.
    pub fn builtin() -> Result<Self, RegistryError> {
        RegistryBuilder::new()
            .register(routines::compress::operation())
            .register(routines::convert::operation())
            .register(routines::ocr::operation())
            .register(routines::summarize::operation())
            .register(routines::translate::operation())
            .register(routines::secure::operation())
            .build()
    }

    /// Look up an operation by name or alias.
    pub fn get(&self, name: &str) -> Option<&Arc<OperationSpec>> {
        self.by_name.get(name).map(|&idx| &self.specs[idx])
    }

    /// Canonical names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.specs.iter().map(|s| s.name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn describe(&self) -> Vec<OperationDescription> {
        self.specs.iter().map(|s| s.describe()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_six_operations() {
        let registry = Registry::builtin().unwrap();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            vec!["compress", "convert", "extractText", "summarize", "translate", "secure"]
        );
        assert_eq!(registry.get("ocr").unwrap().name, "extractText");
        assert!(registry.get("rotate").is_none());
    }

    #[test]
    fn declared_defaults_normalise() {
        let registry = Registry::builtin().unwrap();
        let compress = registry.get("compress").unwrap();
        let opts = compress.normalize(&RawOptions::new()).unwrap();
        assert_eq!(opts.choice("mode"), Some("whatsapp"));
        assert_eq!(opts.choice("quality"), Some("medium"));
        assert_eq!((compress.output_kind)(&opts), MediaKind::Pdf);
    }

    #[test]
    fn only_secure_is_strict() {
        let registry = Registry::builtin().unwrap();
        for spec in registry.describe() {
            assert_eq!(spec.best_effort, spec.name != "secure", "{}", spec.name);
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = RegistryBuilder::new()
            .register(routines::compress::operation())
            .register(routines::compress::operation())
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("compress".into()));
    }

    #[test]
    fn bad_defaults_are_rejected() {
        let mut spec = routines::compress::operation();
        spec.fields[0] = OptionField::choice("mode", &["a"]).default_value("b");
        let err = RegistryBuilder::new().register(spec).build().unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefault { .. }));
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let mut spec = routines::compress::operation();
        spec.fields.push(OptionField::choice("mode", &["a"]));
        let err = RegistryBuilder::new().register(spec).build().unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateField { .. }));
    }

    #[test]
    fn description_serialises() {
        let registry = Registry::builtin().unwrap();
        let json = serde_json::to_value(registry.describe()).unwrap();
        let secure = &json[5];
        assert_eq!(secure["name"], "secure");
        assert_eq!(secure["inputKind"], "pdf");
        assert_eq!(secure["bestEffort"], false);
        assert!(secure["options"]
            .as_array()
            .unwrap()
            .iter()
            .any(|o| o["name"] == "watermarkPosition" && o["default"] == "center"));
    }
}
