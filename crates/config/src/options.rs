// SPDX-License-Identifier: MIT

//! Step option declaration and validation, grounded on
//! `abstract_step.py::add_option`/`set_options`.

use crate::error::ConfigurationError;
use indexmap::IndexMap;
use serde_yaml::Value;

/// Engine-reserved option keys. Any other key starting with `_` is fatal
/// (`spec.md` §4.2).
pub const UNDERSCORE_OPTIONS: &[&str] = &[
    "_depends",
    "_volatile",
    "_BREAK",
    "_connect",
    "_cluster_submit_options",
    "_cluster_pre_job_command",
    "_cluster_post_job_command",
    "_cluster_job_quota",
];

/// The dynamic YAML types an option value may take, mirroring the Python
/// `[int, float, str, bool, list, dict]` type tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionType {
    Int,
    Float,
    Str,
    Bool,
    List,
    Dict,
}

impl OptionType {
    fn matches(self, value: &Value) -> bool {
        match self {
            OptionType::Int => value.is_i64() || value.is_u64(),
            OptionType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            OptionType::Str => value.is_string(),
            OptionType::Bool => value.is_bool(),
            OptionType::List => value.is_sequence(),
            OptionType::Dict => value.is_mapping(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            OptionType::Int => "int",
            OptionType::Float => "float",
            OptionType::Str => "str",
            OptionType::Bool => "bool",
            OptionType::List => "list",
            OptionType::Dict => "dict",
        }
    }
}

fn describe_value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "dict",
        Value::Tagged(_) => "tagged",
    }
}

fn type_list_label(types: &[OptionType]) -> String {
    let labels: Vec<&str> = types.iter().map(|t| t.label()).collect();
    format!("[{}]", labels.join(", "))
}

/// The declared shape of a single step option (`add_option`'s accumulated
/// `info` dict).
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub key: String,
    pub types: Vec<OptionType>,
    pub optional: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub choices: Option<Vec<Value>>,
}

impl OptionSpec {
    /// Declare an option. Mirrors `add_option(key, *option_types, **kwargs)`.
    pub fn new(key: impl Into<String>, types: Vec<OptionType>) -> Result<Self, ConfigurationError> {
        let key = key.into();
        if key.starts_with('_') {
            return Err(ConfigurationError::OptionKeyStartsWithUnderscore(key));
        }
        if types.is_empty() {
            return Err(ConfigurationError::NoOptionTypeSpecified(key));
        }
        Ok(Self {
            key,
            types,
            optional: false,
            default: None,
            description: None,
            choices: None,
        })
    }

    pub fn optional(mut self, default: Option<Value>) -> Result<Self, ConfigurationError> {
        if let Some(ref d) = default {
            if !self.types.iter().any(|t| t.matches(d)) {
                return Err(ConfigurationError::DefaultTypeMismatch {
                    step: String::new(),
                    key: self.key.clone(),
                });
            }
        }
        self.optional = true;
        self.default = default;
        Ok(self)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn choices(mut self, choices: Vec<Value>) -> Result<Self, ConfigurationError> {
        if self.types.len() > 1 {
            return Err(ConfigurationError::ChoicesWithMultipleTypes(
                self.key.clone(),
            ));
        }
        self.choices = Some(choices);
        Ok(self)
    }
}

/// Validate and fill in defaults for a step's provided options against its
/// declared [`OptionSpec`]s, following `set_options`'s two passes: validate
/// every provided key, then fill missing required/optional keys.
pub fn resolve_options(
    step_name: &str,
    step_kind: &str,
    defined: &IndexMap<String, OptionSpec>,
    provided: &IndexMap<String, Value>,
) -> Result<IndexMap<String, Value>, ConfigurationError> {
    let mut resolved = IndexMap::new();

    for (key, value) in provided {
        if key.starts_with('_') {
            if !UNDERSCORE_OPTIONS.contains(&key.as_str()) {
                return Err(ConfigurationError::InvalidUnderscoreOption {
                    step: step_name.to_string(),
                    key: key.clone(),
                });
            }
            resolved.insert(key.clone(), value.clone());
            continue;
        }
        let spec = defined.get(key).ok_or_else(|| ConfigurationError::UnknownOption {
            step: step_name.to_string(),
            kind: step_kind.to_string(),
            key: key.clone(),
        })?;
        if !value.is_null() && !spec.types.iter().any(|t| t.matches(value)) {
            return Err(ConfigurationError::InvalidOptionType {
                step: step_name.to_string(),
                key: key.clone(),
                expected: type_list_label(&spec.types),
                actual: describe_value_type(value).to_string(),
            });
        }
        if let Some(choices) = &spec.choices {
            if !choices.contains(value) {
                return Err(ConfigurationError::InvalidChoice {
                    step: step_name.to_string(),
                    key: key.clone(),
                    value: format!("{value:?}"),
                    choices: format!("{choices:?}"),
                });
            }
        }
        resolved.insert(key.clone(), value.clone());
    }

    for (key, spec) in defined {
        if !resolved.contains_key(key) {
            if !spec.optional {
                return Err(ConfigurationError::MissingRequiredOption {
                    step: step_name.to_string(),
                    key: key.clone(),
                });
            }
            if let Some(default) = &spec.default {
                resolved.insert(key.clone(), default.clone());
            } else {
                resolved.insert(key.clone(), Value::Null);
            }
        }
    }

    resolved
        .entry("_volatile".to_string())
        .or_insert(Value::Bool(false));
    for key in [
        "_cluster_submit_options",
        "_cluster_pre_job_command",
        "_cluster_post_job_command",
    ] {
        resolved
            .entry(key.to_string())
            .or_insert_with(|| Value::String(String::new()));
    }
    resolved
        .entry("_cluster_job_quota".to_string())
        .or_insert(Value::Number(0.into()));
    resolved
        .entry("_connect".to_string())
        .or_insert_with(|| Value::Mapping(Default::default()));
    resolved
        .entry("_depends".to_string())
        .or_insert_with(|| Value::Sequence(Vec::new()));

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_option_missing_is_fatal() {
        let mut defined = IndexMap::new();
        defined.insert(
            "width".to_string(),
            OptionSpec::new("width", vec![OptionType::Int]).expect("spec"),
        );
        let provided = IndexMap::new();
        let err = resolve_options("step1", "kind1", &defined, &provided).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingRequiredOption { .. }
        ));
    }

    #[test]
    fn optional_option_falls_back_to_default() {
        let mut defined = IndexMap::new();
        defined.insert(
            "width".to_string(),
            OptionSpec::new("width", vec![OptionType::Int])
                .expect("spec")
                .optional(Some(Value::from(10)))
                .expect("default"),
        );
        let provided = IndexMap::new();
        let resolved = resolve_options("step1", "kind1", &defined, &provided).expect("resolve");
        assert_eq!(resolved.get("width"), Some(&Value::from(10)));
    }

    #[test]
    fn unknown_option_key_is_fatal() {
        let defined: IndexMap<String, OptionSpec> = IndexMap::new();
        let mut provided = IndexMap::new();
        provided.insert("mystery".to_string(), Value::from(1));
        let err = resolve_options("step1", "kind1", &defined, &provided).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownOption { .. }));
    }

    #[test]
    fn unrecognized_underscore_key_is_fatal() {
        let defined: IndexMap<String, OptionSpec> = IndexMap::new();
        let mut provided = IndexMap::new();
        provided.insert("_bogus".to_string(), Value::from(1));
        let err = resolve_options("step1", "kind1", &defined, &provided).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidUnderscoreOption { .. }
        ));
    }

    #[test]
    fn choice_violation_is_fatal() {
        let mut defined = IndexMap::new();
        defined.insert(
            "mode".to_string(),
            OptionSpec::new("mode", vec![OptionType::Str])
                .expect("spec")
                .choices(vec![Value::from("fast"), Value::from("slow")])
                .expect("choices"),
        );
        let mut provided = IndexMap::new();
        provided.insert("mode".to_string(), Value::from("turbo"));
        let err = resolve_options("step1", "kind1", &defined, &provided).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidChoice { .. }));
    }

    #[test]
    fn choices_with_multiple_types_is_rejected_at_declare_time() {
        let err = OptionSpec::new("x", vec![OptionType::Int, OptionType::Str])
            .expect("spec")
            .choices(vec![Value::from(1)])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::ChoicesWithMultipleTypes(_)
        ));
    }
}
