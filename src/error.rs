use thiserror::Error;

/// Problems with the signal log itself. Fatal for a run.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Failed to read signal log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Malformed row {row}: {message}")]
    MalformedRow { row: usize, message: String },

    #[error("Unparsable timestamp on row {row}: {value}")]
    Timestamp { row: usize, value: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// A single kline page failed. Always recovered by ending pagination.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Binance API error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Bad kline payload: {0}")]
    Payload(String),
}
