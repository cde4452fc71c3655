use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
    #[display("missing or empty credential: {name}")]
    MissingCredential { name: String },
}

#[derive(Debug, Display, Error)]
pub enum SignError {
    #[display("signing secret is empty")]
    EmptySecret,
    #[display("public API key is empty")]
    EmptyApiKey,
    #[display("failed to initialize HMAC from secret")]
    Mac,
}

#[derive(Debug, Display, Error)]
pub enum ExchangeError {
    #[display("request to {exchange} failed")]
    Request { exchange: String },
    #[display("failed to parse response from {exchange}")]
    ResponseParse { exchange: String },
    #[display("{exchange} returned an error payload")]
    Api { exchange: String },
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("failed to read log file")]
    ReadFile,
    #[display("failed to write log file")]
    WriteFile,
    #[display("failed to parse log file")]
    Parse,
}
