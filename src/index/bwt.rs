use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{IndexError, Result};
use crate::index::sa::{self, Layout};
use crate::index::seqs::SequenceStore;
use crate::util::dna::TERMINATOR;
use crate::util::parallel::WorkerPool;
use crate::util::progress::Progress;

/// 终止符与序列的对应关系。
///
/// - `ids[j]`：BWT 中第 j 个 `$` 所终止的序列编号（DollarID）
/// - `lengths[d]`：DollarID 为 d 的序列长度（不含 `$`），即 `$` 在序列内的偏移
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DollarMap {
    ids: Vec<u64>,
    lengths: Vec<u64>,
}

impl DollarMap {
    pub fn new(ids: Vec<u64>, lengths: Vec<u64>) -> Self {
        Self { ids, lengths }
    }

    /// 序列条数
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }

    /// BWT 中第 j 个 `$` 的 DollarID
    pub fn id_of_terminator(&self, j: usize) -> Result<u64> {
        self.ids
            .get(j)
            .copied()
            .ok_or_else(|| IndexError::out_of_range("terminator rank", j, self.ids.len()))
    }

    pub fn seq_len(&self, id: usize) -> Result<u64> {
        self.lengths
            .get(id)
            .copied()
            .ok_or_else(|| IndexError::out_of_range("dollar id", id, self.lengths.len()))
    }

    pub fn max_len(&self) -> u64 {
        self.lengths.iter().copied().max().unwrap_or(0)
    }

    /// 检查 ids 是 [0, n) 的排列，且条数与 BWT 中 `$` 的个数一致
    pub fn check(&self, terminators: usize) -> std::result::Result<(), String> {
        let n = self.lengths.len();
        if self.ids.len() != n {
            return Err(format!("{} terminator ids for {} sequences", self.ids.len(), n));
        }
        if terminators != n {
            return Err(format!("{} terminators in BWT for {} sequences", terminators, n));
        }
        let mut seen = vec![false; n];
        for &id in &self.ids {
            let slot = seen
                .get_mut(id as usize)
                .ok_or_else(|| format!("dollar id {} outside [0, {})", id, n))?;
            if *slot {
                return Err(format!("duplicate dollar id {}", id));
            }
            *slot = true;
        }
        Ok(())
    }
}

/// 由后缀数组导出 BWT 与终止符表。
/// 行 r 的 BWT 字符是后缀 `sa[r]` 在其序列内循环意义下的前一个字符，
/// 序列首位的前驱即该序列自己的 `$`。
pub fn bwt_from_sa(text: &[u8], sa: &[usize], layout: Layout<'_>, pool: &WorkerPool) -> (Vec<u8>, Vec<u64>) {
    let n = text.len();
    let parts = pool.map_partitions(n, |_, r| {
        let mut bwt = Vec::with_capacity(r.len());
        let mut ids = Vec::new();
        for &p in &sa[r] {
            // 拼接文本中 p-1 恰好是上一条序列的 $，与自身 $ 同为终止符
            let prev = if p == 0 { text[n - 1] } else { text[p - 1] };
            if prev == TERMINATOR {
                ids.push(layout.sequence_of(p) as u64);
            }
            bwt.push(prev);
        }
        (bwt, ids)
    });
    let mut bwt = Vec::with_capacity(n);
    let mut ids = Vec::new();
    for (b, i) in parts {
        bwt.extend_from_slice(&b);
        ids.extend_from_slice(&i);
    }
    (bwt, ids)
}

/// 从预处理后的序列集合构建多串 BWT。
///
/// `uniform` 为真时按固定步长定位序列（要求所有序列等长），结果与通用路径逐字节一致。
pub fn build_bwt(
    store: &SequenceStore,
    pool: &WorkerPool,
    uniform: bool,
    progress: &dyn Progress,
) -> Result<(Vec<u8>, DollarMap)> {
    let lengths = store.lengths();
    let layout = if uniform && !lengths.is_empty() {
        let expect = lengths[0];
        if let Some(bad) = lengths.iter().position(|&l| l != expect) {
            return Err(IndexError::OutOfRange {
                what: "length of sequence in a uniform collection, sequence",
                index: bad as u64,
                limit: expect,
            });
        }
        Layout::Stride(expect as usize + 1)
    } else {
        Layout::Offsets(store.offsets())
    };

    info!(
        "building BWT over {} sequences, {} symbols, {} workers{}",
        store.num_sequences(),
        store.total_len(),
        pool.threads(),
        if uniform { ", uniform" } else { "" }
    );
    let sa = sa::build_sa(store.text(), layout, pool, progress);
    let (bwt, ids) = bwt_from_sa(store.text(), &sa, layout, pool);
    let map = DollarMap::new(ids, lengths);
    map.check(map.ids().len())
        .map_err(|e| IndexError::CorruptIndex(format!("construction produced an invalid dollar map: {}", e)))?;
    Ok((bwt, map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::dna;
    use crate::util::progress::testing::Recorder;
    use crate::util::progress::NoProgress;

    /// 暴力：枚举所有序列的所有旋转 s[k..]$，按 (后缀, DollarID) 排序
    fn brute_force(seqs: &[&str]) -> (Vec<u8>, Vec<u64>) {
        let mut rows: Vec<(Vec<u8>, usize, u8)> = Vec::new();
        for (id, s) in seqs.iter().enumerate() {
            let mut codes: Vec<u8> = s.bytes().map(dna::to_alphabet).collect();
            codes.push(TERMINATOR);
            let m = codes.len();
            for k in 0..m {
                let pred = codes[(k + m - 1) % m];
                rows.push((codes[k..].to_vec(), id, pred));
            }
        }
        rows.sort();
        let bwt: Vec<u8> = rows.iter().map(|r| r.2).collect();
        let ids = rows.iter().filter(|r| r.2 == TERMINATOR).map(|r| r.1 as u64).collect();
        (bwt, ids)
    }

    fn build(seqs: &[&str], threads: usize, uniform: bool) -> (Vec<u8>, DollarMap) {
        let store = SequenceStore::from_sequences(seqs);
        let pool = WorkerPool::new(threads).unwrap();
        build_bwt(&store, &pool, uniform, &NoProgress).unwrap()
    }

    #[test]
    fn two_reads_scenario() {
        let (bwt, map) = build(&["ACGT", "ACGA"], 1, true);
        let (expect_bwt, expect_ids) = brute_force(&["ACGT", "ACGA"]);
        assert_eq!(bwt, expect_bwt);
        assert_eq!(map.ids(), expect_ids.as_slice());
        assert_eq!(dna::decode(&bwt), "TAG$$AACCG");
        assert_eq!(map.ids(), &[1, 0]);
        assert_eq!(map.lengths(), &[4, 4]);
    }

    #[test]
    fn matches_brute_force() {
        let cases: Vec<Vec<&str>> = vec![
            vec!["A"],
            vec![""],
            vec!["", "A", ""],
            vec!["ACGTN", "ACG", "TTT", "ACGTN"],
            vec!["AAAA", "AA", "AAA", "A"],
            vec!["GATTACA", "TACAGAT", "CATNAG", "GAT"],
        ];
        for seqs in cases {
            let (bwt, map) = build(&seqs, 2, false);
            let (expect_bwt, expect_ids) = brute_force(&seqs);
            assert_eq!(bwt, expect_bwt, "{:?}", seqs);
            assert_eq!(map.ids(), expect_ids.as_slice(), "{:?}", seqs);
        }
    }

    #[test]
    fn empty_collection() {
        let (bwt, map) = build(&[], 1, false);
        assert!(bwt.is_empty());
        assert!(map.is_empty());
    }

    #[test]
    fn uniform_path_is_identical() {
        let seqs = ["ACGTAC", "GGCATA", "ACGTAC", "NNACGT", "TTTTTT"];
        let general = build(&seqs, 1, false);
        let fast = build(&seqs, 1, true);
        assert_eq!(general, fast);
    }

    #[test]
    fn uniform_hint_rejects_ragged_input() {
        let store = SequenceStore::from_sequences(["ACGT", "ACG"]);
        let pool = WorkerPool::single().unwrap();
        let err = build_bwt(&store, &pool, true, &NoProgress).unwrap_err();
        assert!(matches!(err, IndexError::OutOfRange { index: 1, limit: 4, .. }));
    }

    #[test]
    fn parallelism_does_not_change_output() {
        let seqs = ["GATTACA", "TACAGAT", "CATNAG", "GAT", "ACGTACGT", "A", "GATTACA"];
        let one = build(&seqs, 1, false);
        let four = build(&seqs, 4, false);
        assert_eq!(one, four);
    }

    #[test]
    fn reports_sort_rounds() {
        let store = SequenceStore::from_sequences(["ACGTACGT", "ACGTACGA"]);
        let rec = Recorder::default();
        build_bwt(&store, &WorkerPool::single().unwrap(), false, &rec).unwrap();
        let events = rec.events.lock().unwrap();
        assert_eq!(events.first().map(String::as_str), Some("stage sort 18"));
        assert!(events.iter().any(|e| e.starts_with("round sort")));
        assert_eq!(events.last().map(String::as_str), Some("finish sort"));
    }

    #[test]
    fn dollar_map_check() {
        let good = DollarMap::new(vec![1, 0], vec![3, 4]);
        assert!(good.check(2).is_ok());
        assert!(good.check(3).is_err());
        assert!(DollarMap::new(vec![0, 0], vec![3, 4]).check(2).is_err());
        assert!(DollarMap::new(vec![0, 2], vec![3, 4]).check(2).is_err());
    }
}
