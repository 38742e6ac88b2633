use activity_api::PersistError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Persist(#[from] PersistError),

    #[error("source '{0}' ended unexpectedly")]
    SourceEnded(String),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
