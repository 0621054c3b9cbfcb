use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("channel not configured")]
    NotConfigured,

    /// Never carries the request URL: Telegram puts the bot token in the path.
    #[error("Request failed: {0}")]
    Request(reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<reqwest::Error> for ChannelError {
    fn from(error: reqwest::Error) -> Self {
        ChannelError::Request(error.without_url())
    }
}
