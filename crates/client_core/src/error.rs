use shared::error::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("server url must start with http:// or https://: {0}")]
    UnsupportedScheme(String),
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Api(#[from] ApiError),
}
