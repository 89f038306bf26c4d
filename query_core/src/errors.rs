use thiserror::Error;

/// Typed error taxonomy for the query core, mirroring `graph_rag::errors::GraphError`
/// in shape (`thiserror` variants, `#[from]` conversions) but with no HTTP mapping —
/// this is a library error, not a web-response error.
#[derive(Error, Debug)]
pub enum QueryCoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type QueryCoreResult<T> = Result<T, QueryCoreError>;
