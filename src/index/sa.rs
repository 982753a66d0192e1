use rayon::prelude::*;

use crate::util::dna::{SIGMA, TERMINATOR};
use crate::util::parallel::WorkerPool;
use crate::util::progress::Progress;

/// 文本位置 -> 序列编号 的映射方式。
/// 等长 read 直接按步长整除，否则在 offsets 上二分。
#[derive(Debug, Clone, Copy)]
pub enum Layout<'a> {
    Offsets(&'a [u64]),
    /// 每条序列（含终止符）占 `stride` 个位置
    Stride(usize),
}

impl Layout<'_> {
    #[inline]
    pub fn sequence_of(&self, pos: usize) -> usize {
        match *self {
            Layout::Offsets(offsets) => offsets.partition_point(|&o| o as usize <= pos) - 1,
            Layout::Stride(stride) => pos / stride,
        }
    }
}

/// 构建多串后缀数组（倍增法，O(n log n) 轮次，每轮并行排序）。
///
/// 输入为 `SequenceStore` 的拼接文本（0 为终止符，每条序列后一个）。
/// 每个终止符的初始秩等于其序列编号，因此各终止符互不相同：
/// - 比较在遇到较早的终止符时必然分出胜负，不会越界进入下一条序列；
/// - 两个后缀直到终止符都相同时，序列编号小者在前。
pub fn build_sa(text: &[u8], layout: Layout<'_>, pool: &WorkerPool, progress: &dyn Progress) -> Vec<usize> {
    let n = text.len();
    if n == 0 {
        return Vec::new();
    }

    // 初始秩：$_d -> d；其它字符排在所有 $ 之后
    let n_seqs = text.iter().filter(|&&c| c == TERMINATOR).count();
    let mut rank: Vec<usize> = vec![0; n];
    pool.fill_partitions(&mut rank, |offset, slice| {
        for (k, r) in slice.iter_mut().enumerate() {
            let i = offset + k;
            let c = text[i];
            *r = if c == TERMINATOR {
                layout.sequence_of(i)
            } else {
                n_seqs + c as usize - 1
            };
        }
    });
    debug_assert!(rank.iter().all(|&r| r < n_seqs + SIGMA));

    let mut sa: Vec<usize> = (0..n).collect();
    let mut tmp: Vec<usize> = vec![0; n];
    let mut k = 1usize;
    let mut round = 0usize;
    progress.stage("sort", n);
    loop {
        {
            let rank = &rank;
            let key = |i: usize| (rank[i], if i + k < n { rank[i + k] + 1 } else { 0 });
            pool.install(|| sa.par_sort_unstable_by_key(|&i| key(i)));

            // 各分区独立标记组边界，再顺序前缀和
            let sa_ref = &sa;
            let breaks: Vec<Vec<bool>> = pool.map_partitions(n, |_, r| {
                r.map(|x| x == 0 || key(sa_ref[x]) != key(sa_ref[x - 1])).collect()
            });
            let mut g = 0usize;
            for (x, is_break) in breaks.into_iter().flatten().enumerate() {
                if is_break && x > 0 {
                    g += 1;
                }
                tmp[sa[x]] = g;
            }
        }

        // 复制回 rank
        rank.copy_from_slice(&tmp);
        round += 1;
        let distinct = rank[sa[n - 1]] + 1;
        progress.round("sort", round, distinct);
        if distinct == n {
            break;
        }
        k <<= 1;
    }
    progress.finish("sort");
    sa
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::progress::NoProgress;

    /// 朴素构造：每个字符映射为 (编码, 若为 $ 则为序列号)，直接比较后缀
    fn naive_sa(text: &[u8]) -> Vec<usize> {
        let mut keys = Vec::with_capacity(text.len());
        let mut seq = 0usize;
        for &c in text {
            if c == TERMINATOR {
                keys.push((0u8, seq));
                seq += 1;
            } else {
                keys.push((c, 0));
            }
        }
        let mut sa: Vec<usize> = (0..text.len()).collect();
        sa.sort_by(|&a, &b| keys[a..].cmp(&keys[b..]));
        sa
    }

    fn offsets_of(text: &[u8]) -> Vec<u64> {
        let mut offs = vec![0u64];
        for (i, &c) in text.iter().enumerate() {
            if c == TERMINATOR && i + 1 < text.len() {
                offs.push(i as u64 + 1);
            }
        }
        offs
    }

    fn make_text(n_seqs: usize, max_len: usize, seed: u32) -> Vec<u8> {
        let mut x: u32 = seed;
        let mut v = Vec::new();
        for _ in 0..n_seqs {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let len = (x >> 16) as usize % (max_len + 1);
            for _ in 0..len {
                x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                // 字母表偏小以制造大量重复
                v.push(1 + ((x >> 16) % 3) as u8);
            }
            v.push(TERMINATOR);
        }
        v
    }

    #[test]
    fn sa_basic() {
        // 文本：A C G T $  -> 1 2 3 5 0
        let text = [1u8, 2, 3, 5, 0];
        let offs = offsets_of(&text);
        let sa = build_sa(&text, Layout::Offsets(&offs), &WorkerPool::single().unwrap(), &NoProgress);
        // 期望：$, ACGT$, CGT$, GT$, T$
        assert_eq!(sa, vec![4, 0, 1, 2, 3]);
    }

    #[test]
    fn identical_sequences_tie_by_id() {
        // AC$ AC$ -> 两个 $ 按序列号，AC$ 按序列号
        let text = [1u8, 2, 0, 1, 2, 0];
        let offs = offsets_of(&text);
        let sa = build_sa(&text, Layout::Offsets(&offs), &WorkerPool::single().unwrap(), &NoProgress);
        assert_eq!(sa, vec![2, 5, 0, 3, 1, 4]);
    }

    #[test]
    fn sa_matches_naive_on_small_random_collections() {
        let pool = WorkerPool::new(3).unwrap();
        for seed in 1..=25u32 {
            let text = make_text(1 + seed as usize % 7, 12, seed);
            let offs = offsets_of(&text);
            let fast = build_sa(&text, Layout::Offsets(&offs), &pool, &NoProgress);
            assert_eq!(fast, naive_sa(&text), "mismatch on seed={}", seed);
        }
    }

    #[test]
    fn stride_layout_agrees_with_offsets() {
        let text = [1u8, 1, 0, 1, 1, 0, 2, 1, 0];
        let offs = offsets_of(&text);
        let pool = WorkerPool::new(2).unwrap();
        let a = build_sa(&text, Layout::Offsets(&offs), &pool, &NoProgress);
        let b = build_sa(&text, Layout::Stride(3), &pool, &NoProgress);
        assert_eq!(a, b);
        assert_eq!(a, naive_sa(&text));
    }
}
