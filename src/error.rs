use std::fmt;

/// 统一错误类型
#[derive(Debug)]
pub enum RecallError {
    /// LLM 相关错误
    Llm(LlmError),
    /// 日志 / 缓存 / 画像存储错误
    Store(StoreError),
    /// 聊天通道错误
    Transport(TransportError),
    /// 配置错误
    Config(ConfigError),
    /// IO 错误
    Io(std::io::Error),
    /// 其他错误
    Other(String),
}

/// LLM 相关错误
#[derive(Debug)]
pub enum LlmError {
    /// 网络请求失败
    NetworkError(String),
    /// API 返回错误状态码
    ApiError { status: u16, message: String },
    /// 响应格式无效
    InvalidResponse(String),
    /// 没有返回内容
    EmptyResponse,
}

/// 持久化与派生数据错误
#[derive(Debug)]
pub enum StoreError {
    /// 文件读写失败
    IoError(String),
    /// 序列化/反序列化失败
    SerializationError(String),
    /// 该 chat 在日志中没有任何历史
    EmptyHistory(i64),
    /// 样本不足，无法分析
    InsufficientData { needed: usize, available: usize },
}

/// 聊天通道错误
#[derive(Debug)]
pub enum TransportError {
    /// 网络请求失败
    Network(String),
    /// API 返回失败
    Api { status: u16, description: String },
    /// Token 无效或 Bot 被禁用
    Unauthorized(String),
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 缺少必需的配置项
    MissingField(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
}

impl fmt::Display for RecallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecallError::Llm(e) => write!(f, "LLM Error: {}", e),
            RecallError::Store(e) => write!(f, "Store Error: {}", e),
            RecallError::Transport(e) => write!(f, "Transport Error: {}", e),
            RecallError::Config(e) => write!(f, "Config Error: {}", e),
            RecallError::Io(e) => write!(f, "IO Error: {}", e),
            RecallError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            LlmError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            LlmError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            LlmError::EmptyResponse => write!(f, "Empty response from LLM"),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::IoError(msg) => write!(f, "IO error: {}", msg),
            StoreError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            StoreError::EmptyHistory(chat_id) => write!(f, "No history for chat {}", chat_id),
            StoreError::InsufficientData { needed, available } => write!(
                f,
                "Insufficient data: need {} messages, have {}",
                needed, available
            ),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Network(msg) => write!(f, "Network error: {}", msg),
            TransportError::Api {
                status,
                description,
            } => write!(f, "API error (status {}): {}", status, description),
            TransportError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::MissingField(field) => write!(f, "Missing config field: {}", field),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for RecallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecallError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for LlmError {}
impl std::error::Error for StoreError {}
impl std::error::Error for TransportError {}
impl std::error::Error for ConfigError {}

// From 转换实现
impl From<std::io::Error> for RecallError {
    fn from(err: std::io::Error) -> Self {
        RecallError::Io(err)
    }
}

impl From<reqwest::Error> for RecallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RecallError::Llm(LlmError::NetworkError("Request timeout".to_string()))
        } else if err.is_connect() {
            RecallError::Llm(LlmError::NetworkError(format!(
                "Connection failed: {}",
                err
            )))
        } else {
            RecallError::Llm(LlmError::NetworkError(err.to_string()))
        }
    }
}

impl From<serde_json::Error> for RecallError {
    fn from(err: serde_json::Error) -> Self {
        RecallError::Store(StoreError::SerializationError(err.to_string()))
    }
}

impl From<serde_yaml::Error> for RecallError {
    fn from(err: serde_yaml::Error) -> Self {
        RecallError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<LlmError> for RecallError {
    fn from(err: LlmError) -> Self {
        RecallError::Llm(err)
    }
}

impl From<StoreError> for RecallError {
    fn from(err: StoreError) -> Self {
        RecallError::Store(err)
    }
}

impl From<TransportError> for RecallError {
    fn from(err: TransportError) -> Self {
        RecallError::Transport(err)
    }
}

impl From<ConfigError> for RecallError {
    fn from(err: ConfigError) -> Self {
        RecallError::Config(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, RecallError>;
