// SPDX-License-Identifier: MIT

//! Top-level configuration file shape (`spec.md` §6): `destination_path`,
//! `tools`, and an ordered `steps` mapping.

use crate::connection::ConnectTarget;
use crate::error::ConfigurationError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// One entry of the `tools` mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub pre_command: Option<String>,
    #[serde(default)]
    pub post_command: Option<String>,
    #[serde(default)]
    pub module_load: Option<String>,
    #[serde(default)]
    pub module_unload: Option<String>,
}

/// One entry of the `steps` mapping: engine-reserved keys plus whatever
/// step-specific options the user provided.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepDef {
    /// Step kind to instantiate; defaults to the step's own name when absent.
    #[serde(rename = "_step", default)]
    pub step_kind: Option<String>,
    #[serde(rename = "_depends", default, deserialize_with = "one_or_many_strings")]
    pub depends: Vec<String>,
    #[serde(rename = "_connect", default)]
    pub connect: IndexMap<String, ConnectTarget>,
    #[serde(rename = "_volatile", default)]
    pub volatile: bool,
    #[serde(rename = "_BREAK", default)]
    pub break_subtree: bool,
    #[serde(rename = "_cluster_submit_options", default)]
    pub cluster_submit_options: String,
    #[serde(rename = "_cluster_pre_job_command", default)]
    pub cluster_pre_job_command: String,
    #[serde(rename = "_cluster_post_job_command", default)]
    pub cluster_post_job_command: String,
    #[serde(rename = "_cluster_job_quota", default)]
    pub cluster_job_quota: u32,
    /// Step-kind-specific options, keyed by option name.
    #[serde(flatten)]
    pub options: IndexMap<String, Value>,
}

impl StepDef {
    /// The step kind this definition instantiates, defaulting to `step_name`.
    pub fn resolved_kind<'a>(&'a self, step_name: &'a str) -> &'a str {
        self.step_kind.as_deref().unwrap_or(step_name)
    }
}

/// Deserialize `_depends` from either a bare string or a list of strings
/// (`abstract_step.py::set_options`: "We cannot use sets here since the
/// order of dependencies matters in rare cases").
fn one_or_many_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use crate::connection::ConnectTarget;
    let target = ConnectTarget::deserialize(deserializer)?;
    Ok(target.as_list().into_iter().map(str::to_string).collect())
}

/// The whole configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub destination_path: PathBuf,
    #[serde(default)]
    pub tools: IndexMap<String, ToolConfig>,
    #[serde(default)]
    pub steps: IndexMap<String, StepDef>,
}

impl Configuration {
    /// Parse a configuration document already read into memory.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigurationError> {
        let config: Configuration = serde_yaml::from_str(text)?;
        config.validate_shape()?;
        Ok(config)
    }

    /// Read and parse a configuration file from disk.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Structural checks independent of any step-kind registry: no duplicate
    /// step names (impossible via a YAML mapping, kept for defense when
    /// callers build a `Configuration` programmatically) and every `tools`
    /// reference used in `require_tool` calls is deferred to the engine,
    /// since that requires the instantiated step's tool list.
    fn validate_shape(&self) -> Result<(), ConfigurationError> {
        let mut seen = std::collections::HashSet::new();
        for name in self.steps.keys() {
            if !seen.insert(name.clone()) {
                return Err(ConfigurationError::DuplicateStepName(name.clone()));
            }
        }
        Ok(())
    }

    pub fn tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
destination_path: /tmp/out
tools:
  samtools:
    path: /usr/bin/samtools
    module_load: "module load samtools/1.9"
steps:
  align:
    _step: bwa_mem
    reference: /ref/genome.fa
  index:
    _depends: align
    _connect:
      in/alignment: align/out_bam
    threads: 4
"#;

    #[test]
    fn parses_sample_configuration() {
        let config = Configuration::from_yaml_str(SAMPLE).expect("parse");
        assert_eq!(config.destination_path, PathBuf::from("/tmp/out"));
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.steps.len(), 2);

        let align = &config.steps["align"];
        assert_eq!(align.resolved_kind("align"), "bwa_mem");
        assert_eq!(
            align.options.get("reference"),
            Some(&Value::from("/ref/genome.fa"))
        );

        let index = &config.steps["index"];
        assert_eq!(index.resolved_kind("index"), "index");
        assert_eq!(
            index.connect["in/alignment"].as_list(),
            vec!["align/out_bam"]
        );
        assert_eq!(index.options.get("threads"), Some(&Value::from(4)));
    }

    #[test]
    fn tool_lookup() {
        let config = Configuration::from_yaml_str(SAMPLE).expect("parse");
        let tool = config.tool("samtools").expect("tool present");
        assert_eq!(tool.path, PathBuf::from("/usr/bin/samtools"));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = Configuration::from_yaml_str("destination_path: [").unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }
}
