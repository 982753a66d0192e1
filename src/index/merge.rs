//! 多个独立构建的 BWT 的合并。
//!
//! 维护一个交错向量 `il`：`il[i]` 为合并后第 i 行来自哪个输入。
//! 初始为各输入依次拼接；每一轮按当前顺序对所有行做一次“合并序下的 LF 映射”，
//! 即多看一个字符的上下文重新排位。向量不再变化即收敛，轮数不超过最长序列长度 + 2。

use std::borrow::Cow;
use std::ops::Range;

use rayon::prelude::*;
use tracing::info;

use crate::error::{IndexError, Result};
use crate::index::bwt::DollarMap;
use crate::index::rank::RankIndex;
use crate::util::dna::{SIGMA, TERMINATOR};
use crate::util::parallel::WorkerPool;
use crate::util::progress::Progress;

/// 交错向量用 u8 存来源编号
pub const MAX_MERGE_INPUTS: usize = u8::MAX as usize + 1;

/// 一个待合并的索引
pub struct MergeInput<'a> {
    pub rank: &'a RankIndex,
    pub dollars: &'a DollarMap,
    /// 该索引构建时使用的字母表大小
    pub sigma: usize,
}

struct Source<'a> {
    bwt: Cow<'a, [u8]>,
    rank: &'a RankIndex,
    dollars: &'a DollarMap,
}

fn validate(inputs: &[MergeInput<'_>]) -> Result<()> {
    if inputs.len() > MAX_MERGE_INPUTS {
        return Err(IndexError::merge_input(
            MAX_MERGE_INPUTS,
            format!("at most {} inputs can be merged at once", MAX_MERGE_INPUTS),
        ));
    }
    for (i, inp) in inputs.iter().enumerate() {
        if inp.sigma != SIGMA {
            return Err(IndexError::merge_input(
                i,
                format!("alphabet has {} symbols, expected {}", inp.sigma, SIGMA),
            ));
        }
        inp.dollars
            .check(inp.rank.terminators() as usize)
            .map_err(|reason| IndexError::merge_input(i, reason))?;
        let expect: u64 = inp.dollars.lengths().iter().map(|l| l + 1).sum();
        if expect != inp.rank.len() as u64 {
            return Err(IndexError::merge_input(
                i,
                format!("sequence lengths cover {} symbols but the BWT has {}", expect, inp.rank.len()),
            ));
        }
    }
    Ok(())
}

/// 每个分区起点处各来源已消耗的行数
fn partition_starts(il: &[u8], k: usize, pool: &WorkerPool) -> (Vec<Range<usize>>, Vec<Vec<usize>>) {
    let ranges = pool.partitions(il.len());
    let counts: Vec<Vec<usize>> = pool.map_partitions(il.len(), |_, r| {
        let mut cnt = vec![0usize; k];
        for &j in &il[r] {
            cnt[j as usize] += 1;
        }
        cnt
    });
    let mut starts = Vec::with_capacity(ranges.len());
    let mut acc = vec![0usize; k];
    for cnt in counts {
        starts.push(acc.clone());
        for (a, c) in acc.iter_mut().zip(cnt) {
            *a += c;
        }
    }
    (ranges, starts)
}

/// 一轮细化：返回新的交错向量
fn refine(
    il: &[u8],
    sources: &[Source<'_>],
    bases: &[usize],
    c_total: &[u64; SIGMA],
    pool: &WorkerPool,
) -> Vec<u8> {
    let k = sources.len();
    let (ranges, starts) = partition_starts(il, k, pool);

    // 各分区把行按 BWT 字符分桶，桶内保持行序
    let parts: Vec<Vec<Vec<u8>>> = pool.map_partitions(il.len(), |p, r| {
        debug_assert_eq!(ranges[p], r);
        let mut offs = starts[p].clone();
        let mut buckets: Vec<Vec<u8>> = vec![Vec::new(); SIGMA];
        for &j in &il[r] {
            let j_us = j as usize;
            let c = sources[j_us].bwt[offs[j_us]];
            offs[j_us] += 1;
            if c != TERMINATOR {
                buckets[c as usize].push(j);
            }
        }
        buckets
    });

    let mut next = vec![0u8; il.len()];
    // 每个字符桶是 next 中一段互不相交的区间，可并行填写
    let mut slices: Vec<(usize, &mut [u8])> = Vec::with_capacity(SIGMA);
    let mut rest: &mut [u8] = &mut next;
    for c in 0..SIGMA {
        let size = if c + 1 < SIGMA {
            (c_total[c + 1] - c_total[c]) as usize
        } else {
            rest.len()
        };
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(size);
        slices.push((c, head));
        rest = tail;
    }
    pool.install(|| {
        slices.into_par_iter().for_each(|(c, slice)| {
            if c == TERMINATOR as usize {
                // 终止符行位置固定：按新 DollarID 排列
                for (j, src) in sources.iter().enumerate() {
                    slice[bases[j]..bases[j] + src.dollars.len()].fill(j as u8);
                }
            } else {
                let mut at = 0usize;
                for part in &parts {
                    let b = &part[c];
                    slice[at..at + b.len()].copy_from_slice(b);
                    at += b.len();
                }
            }
        });
    });
    next
}

/// 合并多个 BWT。DollarID 按输入顺序重新连续编号：输入 0 的序列在前。
pub fn merge(
    inputs: &[MergeInput<'_>],
    pool: &WorkerPool,
    progress: &dyn Progress,
) -> Result<(Vec<u8>, DollarMap)> {
    validate(inputs)?;
    let k = inputs.len();

    let mut sources = Vec::with_capacity(k);
    for inp in inputs {
        let bwt = match inp.rank.raw_bwt() {
            Some(b) => Cow::Borrowed(b),
            None => Cow::Owned(inp.rank.to_raw(pool)?),
        };
        sources.push(Source { bwt, rank: inp.rank, dollars: inp.dollars });
    }

    let mut bases = Vec::with_capacity(k);
    let mut n_seqs = 0usize;
    for s in &sources {
        bases.push(n_seqs);
        n_seqs += s.dollars.len();
    }
    let mut c_total = [0u64; SIGMA];
    for s in &sources {
        for (c, slot) in c_total.iter_mut().enumerate() {
            *slot += s.rank.c(c as u8);
        }
    }

    let mut il: Vec<u8> = Vec::new();
    for (j, s) in sources.iter().enumerate() {
        il.extend(std::iter::repeat(j as u8).take(s.bwt.len()));
    }
    let n = il.len();
    let max_len = sources.iter().map(|s| s.dollars.max_len()).max().unwrap_or(0) as usize;
    info!(
        "merging {} inputs: {} sequences, {} symbols, longest sequence {}",
        k, n_seqs, n, max_len
    );

    progress.stage("merge", n);
    let bound = max_len + 2;
    let mut converged = k <= 1;
    let mut round = 0usize;
    while !converged {
        if round == bound {
            return Err(IndexError::CorruptIndex(format!(
                "merge did not converge within {} rounds",
                bound
            )));
        }
        let next = refine(&il, &sources, &bases, &c_total, pool);
        let changed: usize = pool
            .map_partitions(n, |_, r| r.filter(|&i| il[i] != next[i]).count())
            .into_iter()
            .sum();
        round += 1;
        progress.round("merge", round, changed);
        converged = changed == 0;
        il = next;
    }
    info!("interleave converged after {} rounds", round);

    // 按最终交错向量输出 BWT 与终止符表
    let (ranges, starts) = partition_starts(&il, k, pool);
    let parts = pool.map_partitions(n, |p, r| -> Result<(Vec<u8>, Vec<u64>)> {
        debug_assert_eq!(ranges[p], r);
        let mut offs = starts[p].clone();
        let mut dollar_seen = Vec::with_capacity(k);
        for (j, s) in sources.iter().enumerate() {
            dollar_seen.push(s.rank.rank(TERMINATOR, offs[j])? as usize);
        }
        let mut bwt = Vec::with_capacity(r.len());
        let mut ids = Vec::new();
        for &j in &il[r] {
            let j_us = j as usize;
            let c = sources[j_us].bwt[offs[j_us]];
            offs[j_us] += 1;
            if c == TERMINATOR {
                let local = sources[j_us].dollars.id_of_terminator(dollar_seen[j_us])?;
                dollar_seen[j_us] += 1;
                ids.push(bases[j_us] as u64 + local);
            }
            bwt.push(c);
        }
        Ok((bwt, ids))
    });
    let mut bwt = Vec::with_capacity(n);
    let mut ids = Vec::with_capacity(n_seqs);
    for part in parts {
        let (b, i) = part?;
        bwt.extend_from_slice(&b);
        ids.extend_from_slice(&i);
    }
    let lengths: Vec<u64> = sources
        .iter()
        .flat_map(|s| s.dollars.lengths().iter().copied())
        .collect();
    progress.finish("merge");
    Ok((bwt, DollarMap::new(ids, lengths)))
}
