//! 长时间批处理（构建 / 合并 / 压缩）的进度汇报。
//!
//! 核心算法不持有任何全局状态，调用方把 [`Progress`] 实现注入进来，
//! 在轮次与分区边界被回调。

use tracing::{debug, info};

pub trait Progress: Sync {
    /// 进入一个阶段（如 "sort"、"merge"）
    fn stage(&self, _stage: &str, _total: usize) {}

    /// 一轮结束；`changed` 为本轮发生变化的条目数（不适用时为 0）
    fn round(&self, _stage: &str, _round: usize, _changed: usize) {}

    /// 阶段完成
    fn finish(&self, _stage: &str) {}
}

/// 什么也不做
pub struct NoProgress;

impl Progress for NoProgress {}

/// 通过 tracing 输出进度
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn stage(&self, stage: &str, total: usize) {
        info!("{}: starting ({} items)", stage, total);
    }

    fn round(&self, stage: &str, round: usize, changed: usize) {
        debug!("{}: round {} done, {} changed", stage, round, changed);
    }

    fn finish(&self, stage: &str) {
        info!("{}: finished", stage);
    }
}
