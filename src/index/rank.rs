use crate::error::{IndexError, Result};
use crate::index::rle::{self, CompressedBwt};
use crate::util::dna::{SIGMA, TERMINATOR};
use crate::util::parallel::WorkerPool;

/// 原始 BWT 默认 checkpoint 间隔 2^11
pub const DEFAULT_RAW_STRIDE_BITS: u32 = 11;

/// 原始（每字符一字节）BWT 上的 Occ 采样：
/// 每 K 个位置记录一次各字符累计数（行优先展平），块内顺扫补偿。
#[derive(Debug, Clone)]
pub struct RawRank {
    bwt: Vec<u8>,
    stride_bits: u32,
    /// occ[block * SIGMA + c] = bwt[0..block*K) 中 c 的数量
    occ: Vec<u64>,
}

impl RawRank {
    pub fn build(bwt: Vec<u8>, stride_bits: u32, pool: &WorkerPool) -> Result<Self> {
        if let Some(pos) = bwt.iter().position(|&c| c as usize >= SIGMA) {
            return Err(IndexError::CorruptIndex(format!(
                "symbol code {} at BWT position {} is outside the alphabet",
                bwt[pos], pos
            )));
        }
        rle::check_stride_bits(stride_bits)?;
        let block = 1usize << stride_bits;
        let n = bwt.len();
        let num_blocks = n / block + 1;

        // 前 num_blocks - 1 个块都是满块，块内计数可并行，随后顺序前缀和
        let per_block: Vec<Vec<[u64; SIGMA]>> = pool.map_partitions(num_blocks - 1, |_, r| {
            r.map(|bi| {
                let mut cnt = [0u64; SIGMA];
                for &ch in &bwt[bi * block..(bi + 1) * block] {
                    cnt[ch as usize] += 1;
                }
                cnt
            })
            .collect()
        });

        let mut occ = vec![0u64; num_blocks * SIGMA];
        let mut running = [0u64; SIGMA];
        for (bi, cnt) in per_block.into_iter().flatten().enumerate() {
            for a in 0..SIGMA {
                running[a] += cnt[a];
            }
            // 记录到下一块起始位置的累计
            occ[(bi + 1) * SIGMA..(bi + 2) * SIGMA].copy_from_slice(&running);
        }

        Ok(Self { bwt, stride_bits, occ })
    }

    pub fn len(&self) -> usize {
        self.bwt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bwt.is_empty()
    }

    pub fn bwt(&self) -> &[u8] {
        &self.bwt
    }

    #[inline]
    pub fn rank(&self, c: u8, pos: usize) -> Result<u64> {
        // 返回 BWT[0..pos) 中 c 的出现次数
        if pos > self.bwt.len() {
            return Err(IndexError::out_of_range("position", pos, self.bwt.len()));
        }
        let bi = pos >> self.stride_bits;
        let base = self.occ[bi * SIGMA + c as usize];
        let start = bi << self.stride_bits;
        let add = self.bwt[start..pos].iter().filter(|&&ch| ch == c).count() as u64;
        Ok(base + add)
    }

    #[inline]
    pub fn symbol_at(&self, pos: usize) -> Result<u8> {
        self.bwt
            .get(pos)
            .copied()
            .ok_or_else(|| IndexError::out_of_range("position", pos, self.bwt.len()))
    }

    fn totals(&self) -> [u64; SIGMA] {
        let mut t = [0u64; SIGMA];
        for (a, slot) in t.iter_mut().enumerate() {
            // 最后一块从采样值补齐
            let bi = self.bwt.len() >> self.stride_bits;
            let start = bi << self.stride_bits;
            *slot = self.occ[bi * SIGMA + a]
                + self.bwt[start..].iter().filter(|&&ch| ch as usize == a).count() as u64;
        }
        t
    }
}

#[derive(Debug, Clone)]
enum Backing {
    Raw(RawRank),
    Compressed(CompressedBwt),
}

/// BWT 上的 rank 结构，原始或压缩两种后端给出完全相同的结果。
/// 同时缓存 C 表与各字符总数。
#[derive(Debug, Clone)]
pub struct RankIndex {
    backing: Backing,
    /// C[i] = BWT 中字母 < i 的累计数量
    c: [u64; SIGMA],
    totals: [u64; SIGMA],
}

impl RankIndex {
    pub fn from_raw(bwt: Vec<u8>, stride_bits: u32, pool: &WorkerPool) -> Result<Self> {
        let raw = RawRank::build(bwt, stride_bits, pool)?;
        let totals = raw.totals();
        Self::finish(Backing::Raw(raw), totals)
    }

    pub fn from_compressed(comp: CompressedBwt) -> Result<Self> {
        comp.validate()?;
        let totals = comp.totals()?;
        Self::finish(Backing::Compressed(comp), totals)
    }

    fn finish(backing: Backing, totals: [u64; SIGMA]) -> Result<Self> {
        let mut c = [0u64; SIGMA];
        let mut acc = 0u64;
        for i in 0..SIGMA {
            c[i] = acc;
            acc += totals[i];
        }
        let idx = Self { backing, c, totals };
        if acc != idx.len() as u64 {
            return Err(IndexError::CorruptIndex(format!(
                "symbol totals sum to {} but the BWT has {} positions",
                acc,
                idx.len()
            )));
        }
        Ok(idx)
    }

    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::Raw(r) => r.len(),
            Backing::Compressed(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.backing, Backing::Compressed(_))
    }

    #[inline]
    fn check_symbol(c: u8) -> Result<()> {
        if c as usize >= SIGMA {
            return Err(IndexError::InvalidSymbol { symbol: c as char, pos: 0 });
        }
        Ok(())
    }

    /// [0, pos) 中字符 c 的数量
    #[inline]
    pub fn rank(&self, c: u8, pos: usize) -> Result<u64> {
        Self::check_symbol(c)?;
        match &self.backing {
            Backing::Raw(r) => r.rank(c, pos),
            Backing::Compressed(comp) => comp.rank(c, pos as u64),
        }
    }

    #[inline]
    pub fn symbol_at(&self, pos: usize) -> Result<u8> {
        match &self.backing {
            Backing::Raw(r) => r.symbol_at(pos),
            Backing::Compressed(comp) => comp.symbol_at(pos as u64),
        }
    }

    /// BWT 中 c 的总数
    pub fn total_count(&self, c: u8) -> Result<u64> {
        Self::check_symbol(c)?;
        Ok(self.totals[c as usize])
    }

    /// C 表：严格小于 c 的字符总数
    #[inline]
    pub fn c(&self, c: u8) -> u64 {
        self.c[c as usize]
    }

    pub fn c_array(&self) -> [u64; SIGMA] {
        self.c
    }

    /// 终止符个数，即序列条数
    pub fn terminators(&self) -> u64 {
        self.totals[TERMINATOR as usize]
    }

    /// LF 映射：返回 (bwt[pos], C[bwt[pos]] + rank(bwt[pos], pos))
    #[inline]
    pub fn lf(&self, pos: usize) -> Result<(u8, usize)> {
        let c = self.symbol_at(pos)?;
        Ok((c, (self.c[c as usize] + self.rank(c, pos)?) as usize))
    }

    /// 扩展区间 [l, r) 的前一个字符
    #[inline]
    pub fn rank_range(&self, c: u8, l: usize, r: usize) -> Result<(usize, usize)> {
        let c0 = self.c(c);
        let nl = c0 + self.rank(c, l)?;
        let nr = c0 + self.rank(c, r)?;
        Ok((nl as usize, nr as usize))
    }

    /// 原始 BWT；压缩后端需要并行解压
    pub fn to_raw(&self, pool: &WorkerPool) -> Result<Vec<u8>> {
        match &self.backing {
            Backing::Raw(r) => Ok(r.bwt().to_vec()),
            Backing::Compressed(comp) => {
                crate::index::rle::decompress(comp, pool, &crate::util::progress::NoProgress)
            }
        }
    }

    /// 原始后端直接借出字节切片
    pub fn raw_bwt(&self) -> Option<&[u8]> {
        match &self.backing {
            Backing::Raw(r) => Some(r.bwt()),
            Backing::Compressed(_) => None,
        }
    }

    pub fn compressed(&self) -> Option<&CompressedBwt> {
        match &self.backing {
            Backing::Raw(_) => None,
            Backing::Compressed(c) => Some(c),
        }
    }
}
