// SPDX-License-Identifier: MIT

//! Configuration-time error taxonomy.

use thiserror::Error;

/// Errors raised while loading or validating the configuration file and its
/// step options, grounded on `abstract_step.py::set_options`/`add_option`.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid option in step {step}: {key}")]
    InvalidUnderscoreOption { step: String, key: String },

    #[error("unknown option in step {step} ({kind}): {key}")]
    UnknownOption {
        step: String,
        kind: String,
        key: String,
    },

    #[error(
        "invalid type for option {key} in step {step}: expected one of {expected}, got {actual}"
    )]
    InvalidOptionType {
        step: String,
        key: String,
        expected: String,
        actual: String,
    },

    #[error(
        "invalid value {value} for option {key} in step {step} - possible values are {choices}"
    )]
    InvalidChoice {
        step: String,
        key: String,
        value: String,
        choices: String,
    },

    #[error("required option not set in step {step}: {key}")]
    MissingRequiredOption { step: String, key: String },

    #[error("option key must not start with an underscore: {0}")]
    OptionKeyStartsWithUnderscore(String),

    #[error("option {0} is already defined")]
    OptionAlreadyDefined(String),

    #[error("no option type specified for option {0}")]
    NoOptionTypeSpecified(String),

    #[error("cannot define choices when multiple option types are declared for {0}")]
    ChoicesWithMultipleTypes(String),

    #[error("type of default value for option {key} in step {step} does not match any of the declared types")]
    DefaultTypeMismatch { step: String, key: String },

    #[error("tool {tool} required by step {step} is not declared in configuration")]
    UnknownTool { step: String, tool: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("step {step} references unknown step kind {kind}")]
    UnknownStepKind { step: String, kind: String },

    #[error("duplicate step name in configuration: {0}")]
    DuplicateStepName(String),
}

/// Errors raised while declaring or binding connections, grounded on
/// `abstract_step.py::add_connection`/`get_run_ids_in_connections_input_files`.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("a connection name must start with 'in/' or 'out/': {0}")]
    BadPrefix(String),

    #[error("connection {0} is already declared on this step")]
    DuplicateConnection(String),

    #[error(
        "_connect: unknown input connection \"{connection}\" in step {step}, known inputs are {known}"
    )]
    UnknownInputConnection {
        step: String,
        connection: String,
        known: String,
    },

    #[error("_connect: the required connection {connection} of step {step} is not satisfied")]
    RequiredConnectionUnsatisfied { step: String, connection: String },

    #[error(
        "_connect: output connection(s) {connections} of step {parent} are not recognized by {child}"
    )]
    UnrecognizedOutputConnections {
        parent: String,
        child: String,
        connections: String,
    },

    #[error("step {child} has no binding from parent {parent}")]
    NoBindingFromParent { parent: String, child: String },
}
