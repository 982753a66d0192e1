use std::ops::Range;
use std::sync::{Arc, RwLock};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::index::bwt::DollarMap;
use crate::index::rank::RankIndex;
use crate::util::dna::{self, SIGMA, TERMINATOR};
use crate::util::parallel::WorkerPool;

/// BWT 的存储格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BwtFormat {
    /// 每字符一字节
    Raw,
    /// 游程编码 + checkpoint
    Compressed,
}

/// 与索引一同保存的元信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub format: BwtFormat,
    pub sigma: u32,
    pub num_sequences: u64,
    pub total_len: u64,
    /// checkpoint 间隔指数，K = 2^stride_bits
    pub stride_bits: u32,
    pub uniform: bool,
    pub build_args: Option<String>,
    pub build_timestamp: Option<String>,
}

impl IndexMeta {
    pub fn describe(format: BwtFormat, dollars: &DollarMap, total_len: usize, stride_bits: u32) -> Self {
        let uniform = dollars
            .lengths()
            .first()
            .map(|&l| dollars.lengths().iter().all(|&x| x == l))
            .unwrap_or(false);
        Self {
            format,
            sigma: SIGMA as u32,
            num_sequences: dollars.len() as u64,
            total_len: total_len as u64,
            stride_bits,
            uniform,
            build_args: None,
            build_timestamp: None,
        }
    }
}

/// 单条 k-mer 的批量查询结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerCount {
    pub kmer: String,
    pub count: u64,
    pub revcomp_count: Option<u64>,
}

/// 多串 BWT 的 FM 索引：
/// - rank 结构（原始或压缩 BWT）及 C 表
/// - 终止符 -> DollarID 表与各序列长度
///
/// 加载后只读，所有查询可并发执行。
#[derive(Debug, Clone)]
pub struct MsBwt {
    rank: RankIndex,
    dollars: DollarMap,
    meta: IndexMeta,
}

impl MsBwt {
    pub fn new(rank: RankIndex, dollars: DollarMap, meta: IndexMeta) -> Result<Self> {
        dollars
            .check(rank.terminators() as usize)
            .map_err(IndexError::CorruptIndex)?;
        let covered: u64 = dollars.lengths().iter().map(|l| l + 1).sum();
        if covered != rank.len() as u64 {
            return Err(IndexError::CorruptIndex(format!(
                "sequence lengths cover {} symbols, BWT has {}",
                covered,
                rank.len()
            )));
        }
        Ok(Self { rank, dollars, meta })
    }

    /// 由刚构建 / 合并出的原始 BWT 建立索引
    pub fn from_raw(bwt: Vec<u8>, dollars: DollarMap, stride_bits: u32, pool: &WorkerPool) -> Result<Self> {
        let n = bwt.len();
        let rank = RankIndex::from_raw(bwt, stride_bits, pool)?;
        let meta = IndexMeta::describe(BwtFormat::Raw, &dollars, n, stride_bits);
        Self::new(rank, dollars, meta)
    }

    pub fn len(&self) -> usize {
        self.rank.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rank.is_empty()
    }

    pub fn num_sequences(&self) -> usize {
        self.dollars.len()
    }

    pub fn rank_index(&self) -> &RankIndex {
        &self.rank
    }

    pub fn dollars(&self) -> &DollarMap {
        &self.dollars
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn set_meta(&mut self, meta: IndexMeta) {
        self.meta = meta;
    }

    pub fn into_parts(self) -> (RankIndex, DollarMap, IndexMeta) {
        (self.rank, self.dollars, self.meta)
    }

    /// 反向搜索，pat 为编码后的字母表（不应包含 0）；空区间即 0 次出现
    pub fn backward_search(&self, pat: &[u8]) -> Result<(usize, usize)> {
        let mut l = 0usize;
        let mut r = self.rank.len();
        for &a in pat.iter().rev() {
            if a == TERMINATOR || a as usize >= SIGMA {
                return Err(IndexError::InvalidSymbol { symbol: dna::from_alphabet(a) as char, pos: 0 });
            }
            let (nl, nr) = self.rank.rank_range(a, l, r)?;
            if nl >= nr {
                return Ok((nl, nl));
            }
            l = nl;
            r = nr;
        }
        Ok((l, r))
    }

    /// 匹配 pat 的后缀区间 [lo, hi)；空模式返回 [0, N)
    pub fn locate_range(&self, pat: &[u8]) -> Result<Range<usize>> {
        let codes = dna::encode_pattern(pat)?;
        let (l, r) = self.backward_search(&codes)?;
        Ok(l..r)
    }

    pub fn count_occurrences(&self, pat: &[u8]) -> Result<u64> {
        Ok(self.locate_range(pat)?.len() as u64)
    }

    /// 从 row 沿 LF 回溯到序列起点，返回 (DollarID, row 所在后缀在序列中的偏移)
    pub fn locate(&self, row: usize) -> Result<(u64, u64)> {
        if row >= self.rank.len() {
            return Err(IndexError::out_of_range("suffix index", row, self.rank.len()));
        }
        let limit = self.dollars.max_len();
        let mut cur = row;
        let mut steps = 0u64;
        loop {
            let c = self.rank.symbol_at(cur)?;
            if c == TERMINATOR {
                let j = self.rank.rank(TERMINATOR, cur)? as usize;
                return Ok((self.dollars.id_of_terminator(j)?, steps));
            }
            if steps > limit {
                return Err(IndexError::CorruptIndex(format!(
                    "no terminator within {} steps of row {}",
                    limit, row
                )));
            }
            cur = (self.rank.c(c) + self.rank.rank(c, cur)?) as usize;
            steps += 1;
        }
    }

    pub fn get_dollar_id(&self, row: usize) -> Result<u64> {
        Ok(self.locate(row)?.0)
    }

    /// 还原 DollarID 对应序列的编码（不含终止符）
    pub fn recover_codes(&self, id: u64) -> Result<Vec<u8>> {
        let len = self.dollars.seq_len(id as usize)? as usize;
        // 终止符行按 DollarID 排在最前
        let mut row = id as usize;
        let mut out = Vec::with_capacity(len);
        loop {
            let (c, next) = self.rank.lf(row)?;
            if c == TERMINATOR {
                break;
            }
            if out.len() == len {
                return Err(IndexError::CorruptIndex(format!(
                    "sequence {} runs past its recorded length {}",
                    id, len
                )));
            }
            out.push(c);
            row = next;
        }
        if out.len() != len {
            return Err(IndexError::CorruptIndex(format!(
                "sequence {} has {} symbols, expected {}",
                id,
                out.len(),
                len
            )));
        }
        out.reverse();
        Ok(out)
    }

    pub fn recover_sequence(&self, id: u64) -> Result<String> {
        Ok(dna::decode(&self.recover_codes(id)?))
    }

    /// 包含 pat 的所有序列：(DollarID, 序列)，按后缀区间顺序
    pub fn find_sequences(&self, pat: &[u8]) -> Result<Vec<(u64, String)>> {
        self.locate_range(pat)?
            .map(|row| {
                let id = self.get_dollar_id(row)?;
                Ok((id, self.recover_sequence(id)?))
            })
            .collect()
    }

    /// 批量计数，可选同时统计反向互补
    pub fn mass_query<S>(&self, kmers: &[S], revcomp: bool) -> Result<Vec<KmerCount>>
    where
        S: AsRef<[u8]> + Sync,
    {
        kmers
            .par_iter()
            .map(|k| {
                let raw = k.as_ref();
                let codes = dna::encode_pattern(raw)?;
                let (l, r) = self.backward_search(&codes)?;
                let revcomp_count = if revcomp {
                    let (rl, rr) = self.backward_search(&dna::revcomp_codes(&codes))?;
                    Some((rr - rl) as u64)
                } else {
                    None
                };
                Ok(KmerCount {
                    kmer: String::from_utf8_lossy(raw).into_owned(),
                    count: (r - l) as u64,
                    revcomp_count,
                })
            })
            .collect()
    }
}

/// 查询入口：持有一个已发布的只读索引。
///
/// 新版本通过 [`QueryEngine::publish`] 整体替换，进行中的查询继续使用旧的 `Arc`。
#[derive(Default)]
pub struct QueryEngine {
    current: RwLock<Option<Arc<MsBwt>>>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(index: MsBwt) -> Self {
        let engine = Self::new();
        engine.publish(index);
        engine
    }

    pub fn publish(&self, index: MsBwt) {
        let mut slot = match self.current.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Arc::new(index));
    }

    pub fn is_loaded(&self) -> bool {
        self.index().is_ok()
    }

    pub fn index(&self) -> Result<Arc<MsBwt>> {
        let slot = match self.current.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().map(Arc::clone).ok_or(IndexError::IndexNotLoaded)
    }

    pub fn count_occurrences(&self, pat: &[u8]) -> Result<u64> {
        self.index()?.count_occurrences(pat)
    }

    pub fn locate_range(&self, pat: &[u8]) -> Result<Range<usize>> {
        self.index()?.locate_range(pat)
    }

    pub fn get_dollar_id(&self, row: usize) -> Result<u64> {
        self.index()?.get_dollar_id(row)
    }

    pub fn recover_sequence(&self, id: u64) -> Result<String> {
        self.index()?.recover_sequence(id)
    }

    pub fn find_sequences(&self, pat: &[u8]) -> Result<Vec<(u64, String)>> {
        self.index()?.find_sequences(pat)
    }

    pub fn mass_query<S>(&self, kmers: &[S], revcomp: bool) -> Result<Vec<KmerCount>>
    where
        S: AsRef<[u8]> + Sync,
    {
        self.index()?.mass_query(kmers, revcomp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::bwt::build_bwt;
    use crate::index::rle;
    use crate::index::seqs::SequenceStore;
    use crate::util::progress::NoProgress;

    fn build_index(seqs: &[&str]) -> MsBwt {
        let pool = WorkerPool::single().unwrap();
        let store = SequenceStore::from_sequences(seqs);
        let (bwt, dollars) = build_bwt(&store, &pool, false, &NoProgress).unwrap();
        MsBwt::from_raw(bwt, dollars, 2, &pool).unwrap()
    }

    fn compressed(idx: &MsBwt) -> MsBwt {
        let pool = WorkerPool::single().unwrap();
        let raw = idx.rank_index().to_raw(&pool).unwrap();
        let rank = RankIndex::from_compressed(rle::compress(&raw, 2, &pool, &NoProgress).unwrap()).unwrap();
        let mut meta = idx.meta().clone();
        meta.format = BwtFormat::Compressed;
        MsBwt::new(rank, idx.dollars().clone(), meta).unwrap()
    }

    #[test]
    fn two_read_scenario() {
        let raw = build_index(&["ACGT", "ACGA"]);
        for idx in [compressed(&raw), raw] {
            assert_eq!(idx.count_occurrences(b"ACG").unwrap(), 2);
            assert_eq!(idx.count_occurrences(b"ACGT").unwrap(), 1);
            assert_eq!(idx.count_occurrences(b"CGA").unwrap(), 1);
            assert_eq!(idx.count_occurrences(b"TTTT").unwrap(), 0);
            assert_eq!(idx.recover_sequence(1).unwrap(), "ACGA");
            assert_eq!(idx.recover_sequence(0).unwrap(), "ACGT");
        }
    }

    #[test]
    fn empty_pattern_spans_everything() {
        let idx = build_index(&["ACGT", "ACGA", "G"]);
        assert_eq!(idx.locate_range(b"").unwrap(), 0..idx.len());
        assert_eq!(idx.count_occurrences(b"").unwrap(), 12);
    }

    #[test]
    fn locate_reports_id_and_offset() {
        let idx = build_index(&["GATTACA", "TACAGAT"]);
        let range = idx.locate_range(b"TACA").unwrap();
        let mut hits: Vec<(u64, u64)> = range.map(|row| idx.locate(row).unwrap()).collect();
        hits.sort_unstable();
        assert_eq!(hits, vec![(0, 3), (1, 0)]);
        // 终止符行：偏移为序列长度
        assert_eq!(idx.locate(1).unwrap(), (1, 7));
    }

    #[test]
    fn find_sequences_lists_each_match() {
        let idx = build_index(&["ACGT", "TTTT", "CACGA"]);
        let mut found = idx.find_sequences(b"ACG").unwrap();
        found.sort();
        assert_eq!(found, vec![(0, "ACGT".to_string()), (2, "CACGA".to_string())]);
    }

    #[test]
    fn mass_query_with_reverse_complement() {
        let idx = build_index(&["ACGT", "AAAC"]);
        let hits = idx.mass_query(&["ACGT", "GTTT", "AAAC"], true).unwrap();
        assert_eq!(hits[0].count, 1);
        assert_eq!(hits[0].revcomp_count, Some(1));
        assert_eq!(hits[1].count, 0);
        assert_eq!(hits[1].revcomp_count, Some(1));
        assert_eq!(hits[2].kmer, "AAAC");
        let plain = idx.mass_query(&["ACGT"], false).unwrap();
        assert_eq!(plain[0].revcomp_count, None);
    }

    #[test]
    fn invalid_symbols_and_ranges() {
        let idx = build_index(&["ACGT"]);
        assert!(matches!(idx.count_occurrences(b"AC-T"), Err(IndexError::InvalidSymbol { .. })));
        assert!(matches!(idx.recover_sequence(1), Err(IndexError::OutOfRange { .. })));
        assert!(matches!(idx.get_dollar_id(5), Err(IndexError::OutOfRange { .. })));
        assert!(idx.mass_query(&["ACGT", "AXC"], false).is_err());
    }

    #[test]
    fn rejects_mismatched_dollar_map() {
        let idx = build_index(&["ACGT", "AC"]);
        let (rank, _, meta) = idx.into_parts();
        let wrong = DollarMap::new(vec![0], vec![6]);
        assert!(matches!(MsBwt::new(rank, wrong, meta), Err(IndexError::CorruptIndex(_))));
    }

    #[test]
    fn engine_requires_loading() {
        let engine = QueryEngine::new();
        assert!(!engine.is_loaded());
        assert!(matches!(engine.count_occurrences(b"ACG"), Err(IndexError::IndexNotLoaded)));
        engine.publish(build_index(&["ACGT", "ACGA"]));
        assert_eq!(engine.count_occurrences(b"ACG").unwrap(), 2);
        let held = engine.index().unwrap();
        engine.publish(build_index(&["TTTT"]));
        // 旧句柄不受替换影响
        assert_eq!(held.count_occurrences(b"ACG").unwrap(), 2);
        assert_eq!(engine.count_occurrences(b"ACG").unwrap(), 0);
    }
}
