//! # msbwt-rust
//!
//! 面向测序 read 集合的多串 BWT（multi-string BWT）与 FM 索引。
//!
//! 本 crate 提供：
//!
//! - **构建**：从 FASTA / FASTQ read 构建多串 BWT（每条序列独立的终止符 `$`）
//! - **合并**：把多个独立构建的 BWT 合并成一个，DollarID 按输入顺序连续编号
//! - **压缩**：游程编码 + 定长 checkpoint，rank 查询无需解压
//! - **查询**：k-mer 计数、后缀区间、DollarID 定位与序列还原
//!
//! ## 快速示例
//!
//! ```rust,no_run
//! use msbwt_rust::index::{bwt, fm::MsBwt, seqs::SequenceStore};
//! use msbwt_rust::util::{parallel::WorkerPool, progress::NoProgress};
//!
//! let pool = WorkerPool::new(2)?;
//! let reads = SequenceStore::from_sequences(["ACGT", "ACGA"]);
//! let (raw, dollars) = bwt::build_bwt(&reads, &pool, true, &NoProgress)?;
//! let index = MsBwt::from_raw(raw, dollars, 11, &pool)?;
//!
//! assert_eq!(index.count_occurrences(b"ACG")?, 2);
//! assert_eq!(index.recover_sequence(1)?, "ACGA");
//! # Ok::<(), msbwt_rust::IndexError>(())
//! ```
//!
//! ## 模块说明
//!
//! - [`index`]：序列集合、BWT 构建、rank 结构、合并、压缩与查询
//! - [`io`]：read 文件解析、数组存储后端与索引目录布局
//! - [`pipeline`]：命令行子命令对应的批处理任务
//! - [`util`]：字母表编码、线程池与进度汇报

pub mod error;
pub mod index;
pub mod io;
pub mod pipeline;
pub mod util;

pub use error::{IndexError, Result};
pub use index::fm::{MsBwt, QueryEngine};
pub use pipeline::BuildOpt;
