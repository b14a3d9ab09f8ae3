use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CredentialError {
    #[error("Access token missing - set HF_TOKEN")]
    Missing,

    #[error("Access token rejected by the hub: {0}")]
    Invalid(String),

    #[error("Could not verify access token: {0}")]
    Check(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Profile {0} needs an adapter reference")]
    MissingAdapter(&'static str),
}
