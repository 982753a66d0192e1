/// 库内统一的 Result 类型
pub type Result<T> = std::result::Result<T, IndexError>;

/// 索引构建 / 合并 / 压缩 / 查询过程中的全部错误类型。
///
/// 空匹配区间不是错误，查询直接返回 0。
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// 输入中出现字母表 `{$, A, C, G, N, T}` 以外的字符
    #[error("invalid symbol {symbol:?} at position {pos}")]
    InvalidSymbol { symbol: char, pos: usize },

    /// 位置或编号越界
    #[error("{what} {index} is out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        index: u64,
        limit: u64,
    },

    /// 待合并的索引不兼容或自身已损坏
    #[error("invalid merge input #{source_index}: {reason}")]
    InvalidMergeInput { source_index: usize, reason: String },

    /// 加载时发现 checkpoint / 数组 / DollarID 表之间不一致
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// 在索引加载完成前发起查询
    #[error("index is not loaded")]
    IndexNotLoaded,

    /// 线程池等资源无法分配
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] bincode::Error),
}

impl IndexError {
    pub(crate) fn out_of_range(what: &'static str, index: usize, limit: usize) -> Self {
        IndexError::OutOfRange {
            what,
            index: index as u64,
            limit: limit as u64,
        }
    }

    pub(crate) fn merge_input(source_index: usize, reason: impl Into<String>) -> Self {
        IndexError::InvalidMergeInput {
            source_index,
            reason: reason.into(),
        }
    }
}
