use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid subject id {0:?}")]
    InvalidSubjectId(String),
    #[error("subject {0} has no descriptors")]
    EmptyRecord(String),
    #[error("image encryption: {0}")]
    Crypto(&'static str),
}
