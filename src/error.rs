use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetmonError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("配置文件解析错误: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("HTTP 请求失败: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL 解析错误: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for NetmonError {
    fn from(err: anyhow::Error) -> Self {
        NetmonError::Other(err.to_string())
    }
}

/// Result type for netmon crate
pub type Result<T> = std::result::Result<T, NetmonError>;
