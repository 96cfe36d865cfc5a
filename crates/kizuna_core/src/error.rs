use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("malformed payload for '{event}': {source}")]
    MalformedPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
