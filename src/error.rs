use sled::transaction::TransactionError;
use thiserror::Error;

/// 存储层错误 (Persistence)
///
/// sled 本身的 IO 错误，以及 JSON 文档编解码错误。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// 多棵树的事务：中止只会来自文档编解码
impl From<TransactionError<serde_json::Error>> for StoreError {
    fn from(e: TransactionError<serde_json::Error>) -> Self {
        match e {
            TransactionError::Abort(e) => StoreError::Codec(e),
            TransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}

/// 单条证据处理过程中可能出现的错误
///
/// 所有错误都只作用于“当前这一条证据”，批处理不会因此中断。
/// 注意：AI 返回的单个字段类型不对 (MalformedSignal) 不在这里，
/// 那种情况在 `signal::normalize` 中被静默修正为默认值。
#[derive(Debug, Error)]
pub enum Error {
    /// 媒体字节取不到 (下载失败 / 本地文件丢失)
    #[error("media unavailable for evidence {evidence_id}: {reason}")]
    MediaUnavailable { evidence_id: String, reason: String },

    /// AI 协作方调用失败，或者返回内容里找不到可解析的 JSON 对象
    #[error("AI classification failed: {0}")]
    AiClassification(String),

    /// 存储写入/读取失败
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// 放到阻塞线程池里的步骤 (哈希 / 存储) 没能跑完
    #[error("blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    /// 配置非法 (正则表达式编译失败等)
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
