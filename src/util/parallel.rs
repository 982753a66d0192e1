use std::ops::Range;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{IndexError, Result};

/// 每个 CPU 最多允许的线程数，超出则降级
const MAX_THREADS_PER_CPU: usize = 4;

/// 固定大小的工作线程池：把位置空间切成连续分区并行处理，
/// `map_partitions` 返回即所有分区完成（轮次屏障）。
///
/// 分区数只由线程数决定；所有调用方的算法对任意分区方式都给出相同结果，
/// 因此 1 线程与 N 线程的输出逐字节一致。
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    /// `requested == 0` 表示使用全部 CPU。
    pub fn new(requested: usize) -> Result<Self> {
        let cpus = num_cpus::get().max(1);
        let mut threads = if requested == 0 { cpus } else { requested };
        let cap = cpus * MAX_THREADS_PER_CPU;
        if threads > cap {
            warn!("requested {} workers but only {} CPUs, using {}", threads, cpus, cap);
            threads = cap;
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("msbwt-worker-{}", i))
            .build()
            .map_err(|e| IndexError::ResourceExhausted(format!("cannot start {} workers: {}", threads, e)))?;
        debug!("worker pool ready with {} threads", threads);
        Ok(Self { pool, threads })
    }

    /// 单线程池，测试与小输入使用
    pub fn single() -> Result<Self> {
        Self::new(1)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// 在池内执行闭包（其中的 rayon 并行迭代器使用本池线程）
    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(f)
    }

    /// 把 [0, len) 切成不超过 `threads` 个连续、非空的区间
    pub fn partitions(&self, len: usize) -> Vec<Range<usize>> {
        split_ranges(len, self.threads)
    }

    /// 每个分区独立计算，按分区顺序返回结果
    pub fn map_partitions<T, F>(&self, len: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize, Range<usize>) -> T + Sync + Send,
    {
        let parts = self.partitions(len);
        if parts.len() <= 1 {
            return parts.into_iter().enumerate().map(|(i, r)| f(i, r)).collect();
        }
        self.pool.install(|| {
            parts
                .into_par_iter()
                .enumerate()
                .map(|(i, r)| f(i, r))
                .collect()
        })
    }

    /// 输出切片按分区切开，每个 worker 只写自己的分片
    pub fn fill_partitions<T, F>(&self, out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        let len = out.len();
        if len == 0 {
            return;
        }
        let chunk = len.div_ceil(self.threads.max(1));
        if self.threads <= 1 {
            f(0, out);
            return;
        }
        self.pool.install(|| {
            out.par_chunks_mut(chunk)
                .enumerate()
                .for_each(|(i, slice)| f(i * chunk, slice));
        });
    }

    /// 同 [`fill_partitions`](Self::fill_partitions)，任一分片出错即返回该错误
    pub fn try_fill_partitions<T, F>(&self, out: &mut [T], f: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync + Send,
    {
        let len = out.len();
        if len == 0 {
            return Ok(());
        }
        if self.threads <= 1 {
            return f(0, out);
        }
        let chunk = len.div_ceil(self.threads);
        self.pool.install(|| {
            out.par_chunks_mut(chunk)
                .enumerate()
                .try_for_each(|(i, slice)| f(i * chunk, slice))
        })
    }
}

/// 近似等分 [0, len)，区间数 = min(parts, len)
pub fn split_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let parts = parts.clamp(1, len);
    let base = len / parts;
    let extra = len % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0usize;
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        out.push(start..start + size);
        start += size;
    }
    out
}
