//! BWT 的游程编码。
//!
//! 每个字节低 3 位为字符编码，高 5 位为游程长度的一个 32 进制数位；
//! 长度为 L 的游程按小端顺序写出 L 的全部数位，每个字节都带同一字符。
//! 游程是极大的，所以相邻且字符相同的字节必属于同一游程。
//!
//! 每隔 K 个解码位置放一个 checkpoint，记录覆盖该位置的游程的字节偏移、
//! 游程起点以及游程之前各字符的计数，rank 查询只需从最近的 checkpoint 起局部解码。

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::util::dna::SIGMA;
use crate::util::parallel::WorkerPool;
use crate::util::progress::Progress;

/// 默认 checkpoint 间隔 2^12
pub const DEFAULT_STRIDE_BITS: u32 = 12;

/// checkpoint 间隔指数的上界（不含）
pub const MAX_STRIDE_BITS: u32 = 48;

const SYM_BITS: u32 = 3;
const SYM_MASK: u8 = (1 << SYM_BITS) - 1;
const DIGIT_BITS: u32 = 8 - SYM_BITS;
const DIGIT_MASK: u64 = (1 << DIGIT_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 覆盖该位置的游程在字节流中的起点
    pub byte: u64,
    /// 该游程在解码序列中的起点
    pub start: u64,
    /// [0, start) 中各字符的数量
    pub counts: [u64; SIGMA],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedBwt {
    len: u64,
    stride_bits: u32,
    data: Vec<u8>,
    checkpoints: Vec<Checkpoint>,
}

/// 从 `byte` 处解码一个游程，返回 (字符, 长度, 下一游程的字节偏移)
#[inline]
fn decode_run(data: &[u8], byte: usize) -> Result<(u8, u64, usize)> {
    let first = *data
        .get(byte)
        .ok_or_else(|| IndexError::CorruptIndex(format!("run at byte {} past end of stream", byte)))?;
    let sym = first & SYM_MASK;
    let mut len = 0u64;
    let mut shift = 0u32;
    let mut i = byte;
    while i < data.len() && data[i] & SYM_MASK == sym {
        if shift >= 64 {
            return Err(IndexError::CorruptIndex(format!("run at byte {} is too long", byte)));
        }
        len |= u64::from(data[i] >> SYM_BITS) << shift;
        shift += DIGIT_BITS;
        i += 1;
    }
    if len == 0 || sym as usize >= SIGMA {
        return Err(IndexError::CorruptIndex(format!("invalid run at byte {}", byte)));
    }
    Ok((sym, len, i))
}

/// 检查 checkpoint 间隔指数，2^bits 必须能放进位置类型
pub(crate) fn check_stride_bits(bits: u32) -> Result<()> {
    if bits >= MAX_STRIDE_BITS {
        return Err(IndexError::out_of_range(
            "checkpoint stride bits",
            bits as usize,
            MAX_STRIDE_BITS as usize,
        ));
    }
    Ok(())
}

fn encode_run(out: &mut Vec<u8>, sym: u8, mut len: u64) {
    while len > 0 {
        out.push(sym | (((len & DIGIT_MASK) as u8) << SYM_BITS));
        len >>= DIGIT_BITS;
    }
}

/// 极大游程列表；各分区独立扫描，边界处相同字符的游程再拼接
fn runs_of(bwt: &[u8], pool: &WorkerPool) -> Vec<(u8, u64)> {
    let parts = pool.map_partitions(bwt.len(), |_, r| {
        let mut runs: Vec<(u8, u64)> = Vec::new();
        for &c in &bwt[r] {
            match runs.last_mut() {
                Some((sym, len)) if *sym == c => *len += 1,
                _ => runs.push((c, 1)),
            }
        }
        runs
    });
    let mut runs: Vec<(u8, u64)> = Vec::new();
    for part in parts {
        for (c, l) in part {
            match runs.last_mut() {
                Some((sym, len)) if *sym == c => *len += l,
                _ => runs.push((c, l)),
            }
        }
    }
    runs
}

/// 压缩原始 BWT；`stride_bits` 决定 checkpoint 间隔 K = 2^stride_bits
pub fn compress(bwt: &[u8], stride_bits: u32, pool: &WorkerPool, progress: &dyn Progress) -> Result<CompressedBwt> {
    if let Some(pos) = bwt.iter().position(|&c| c as usize >= SIGMA) {
        return Err(IndexError::InvalidSymbol { symbol: bwt[pos] as char, pos });
    }
    check_stride_bits(stride_bits)?;
    progress.stage("compress", bwt.len());
    let runs = runs_of(bwt, pool);
    progress.round("compress", 1, runs.len());

    let stride = 1u64 << stride_bits;
    let len = bwt.len() as u64;
    let mut data = Vec::with_capacity(runs.len() * 2);
    let mut checkpoints = Vec::with_capacity((len / stride + 1) as usize);
    let mut counts = [0u64; SIGMA];
    let mut pos = 0u64;
    for (sym, run_len) in runs {
        let byte = data.len() as u64;
        // 本游程覆盖的所有 checkpoint 位置
        while (checkpoints.len() as u64) * stride < pos + run_len {
            checkpoints.push(Checkpoint { byte, start: pos, counts });
        }
        encode_run(&mut data, sym, run_len);
        counts[sym as usize] += run_len;
        pos += run_len;
    }
    if (checkpoints.len() as u64) * stride == len {
        checkpoints.push(Checkpoint { byte: data.len() as u64, start: len, counts });
    }
    debug!(
        "compressed {} symbols into {} bytes ({} checkpoints)",
        len,
        data.len(),
        checkpoints.len()
    );
    progress.finish("compress");
    Ok(CompressedBwt { len, stride_bits, data, checkpoints })
}

/// 解压为原始 BWT，各分区从最近的 checkpoint 独立解码
pub fn decompress(comp: &CompressedBwt, pool: &WorkerPool, progress: &dyn Progress) -> Result<Vec<u8>> {
    progress.stage("decompress", comp.len as usize);
    let mut out = vec![0u8; comp.len as usize];
    pool.try_fill_partitions(&mut out, |offset, slice| comp.decode_into(offset as u64, slice))?;
    progress.finish("decompress");
    Ok(out)
}

impl CompressedBwt {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride_bits(&self) -> u32 {
        self.stride_bits
    }

    /// 压缩字节流（不含 checkpoint）
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    fn checkpoint(&self, pos: u64) -> Result<&Checkpoint> {
        if pos > self.len {
            return Err(IndexError::out_of_range("position", pos as usize, self.len as usize));
        }
        let idx = (pos >> self.stride_bits) as usize;
        self.checkpoints
            .get(idx)
            .ok_or_else(|| IndexError::CorruptIndex(format!("missing checkpoint {}", idx)))
    }

    /// [0, pos) 中字符 c 的数量
    pub fn rank(&self, c: u8, pos: u64) -> Result<u64> {
        let cp = self.checkpoint(pos)?;
        let mut acc = cp.counts[c as usize];
        let mut cur = cp.start;
        let mut byte = cp.byte as usize;
        while cur < pos {
            let (sym, run_len, next) = decode_run(&self.data, byte)?;
            let take = run_len.min(pos - cur);
            if sym == c {
                acc += take;
            }
            cur += take;
            byte = next;
        }
        Ok(acc)
    }

    pub fn symbol_at(&self, pos: u64) -> Result<u8> {
        if pos >= self.len {
            return Err(IndexError::out_of_range("position", pos as usize, self.len as usize));
        }
        let cp = self.checkpoint(pos)?;
        let mut cur = cp.start;
        let mut byte = cp.byte as usize;
        loop {
            let (sym, run_len, next) = decode_run(&self.data, byte)?;
            if pos < cur + run_len {
                return Ok(sym);
            }
            cur += run_len;
            byte = next;
        }
    }

    /// 将 [offset, offset + out.len()) 解码到 out
    fn decode_into(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let end = offset + out.len() as u64;
        let cp = self.checkpoint(offset)?;
        let mut cur = cp.start;
        let mut byte = cp.byte as usize;
        while cur < end {
            let (sym, run_len, next) = decode_run(&self.data, byte)?;
            let lo = cur.max(offset);
            let hi = (cur + run_len).min(end);
            if lo < hi {
                out[(lo - offset) as usize..(hi - offset) as usize].fill(sym);
            }
            cur += run_len;
            byte = next;
        }
        Ok(())
    }

    /// 各字符总数（最后一个 checkpoint 之后顺扫补齐）
    pub fn totals(&self) -> Result<[u64; SIGMA]> {
        let last = self
            .checkpoints
            .last()
            .ok_or_else(|| IndexError::CorruptIndex("no checkpoints".to_string()))?;
        let mut counts = last.counts;
        let mut cur = last.start;
        let mut byte = last.byte as usize;
        while cur < self.len {
            let (sym, run_len, next) = decode_run(&self.data, byte)?;
            counts[sym as usize] += run_len;
            cur += run_len;
            byte = next;
        }
        if cur != self.len || byte != self.data.len() {
            return Err(IndexError::CorruptIndex(format!(
                "stream decodes to {} symbols, header says {}",
                cur, self.len
            )));
        }
        Ok(counts)
    }

    /// 加载后的一致性检查
    pub fn validate(&self) -> Result<()> {
        if self.stride_bits >= MAX_STRIDE_BITS {
            return Err(IndexError::CorruptIndex(format!("checkpoint stride 2^{}", self.stride_bits)));
        }
        let stride = 1u64 << self.stride_bits;
        let expect = (self.len / stride + 1) as usize;
        if self.checkpoints.len() != expect {
            return Err(IndexError::CorruptIndex(format!(
                "{} checkpoints, expected {}",
                self.checkpoints.len(),
                expect
            )));
        }
        for (i, cp) in self.checkpoints.iter().enumerate() {
            let at = i as u64 * stride;
            if cp.counts.iter().sum::<u64>() != cp.start || cp.start > at || cp.byte > self.data.len() as u64 {
                return Err(IndexError::CorruptIndex(format!("checkpoint {} is inconsistent", i)));
            }
        }
        let totals = self.totals()?;
        if totals.iter().sum::<u64>() != self.len {
            return Err(IndexError::CorruptIndex("symbol totals do not sum to the BWT length".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::progress::NoProgress;

    fn roundtrip(bwt: &[u8], bits: u32, threads: usize) -> CompressedBwt {
        let pool = WorkerPool::new(threads).unwrap();
        let comp = compress(bwt, bits, &pool, &NoProgress).unwrap();
        comp.validate().unwrap();
        assert_eq!(decompress(&comp, &pool, &NoProgress).unwrap(), bwt);
        comp
    }

    #[test]
    fn empty_array() {
        let comp = roundtrip(&[], 2, 1);
        assert!(comp.is_empty());
        assert!(comp.data().is_empty());
        assert_eq!(comp.checkpoints().len(), 1);
        assert_eq!(comp.rank(3, 0).unwrap(), 0);
        assert!(comp.symbol_at(0).is_err());
    }

    #[test]
    fn single_run_uses_base32_digits() {
        let bwt = vec![1u8; 1000];
        let comp = roundtrip(&bwt, 4, 2);
        // 1000 = 8 + 31*32 -> 数位 [8, 31]
        assert_eq!(comp.data(), &[1 | (8 << 3), 1 | (31 << 3)]);
        assert_eq!(comp.rank(1, 777).unwrap(), 777);
        assert_eq!(comp.rank(2, 1000).unwrap(), 0);
    }

    #[test]
    fn run_of_exactly_32() {
        let comp = roundtrip(&[5u8; 32], 3, 1);
        assert_eq!(comp.data(), &[5, 5 | (1 << 3)]);
    }

    #[test]
    fn alternating_never_expands() {
        let bwt: Vec<u8> = (0..4099).map(|i| if i % 2 == 0 { 1 } else { 5 }).collect();
        let comp = roundtrip(&bwt, 5, 3);
        assert_eq!(comp.data().len(), bwt.len());
    }

    #[test]
    fn long_runs_across_checkpoints_and_partitions() {
        let mut bwt = Vec::new();
        for (i, sym) in [0u8, 1, 2, 3, 4, 5, 1, 1].iter().enumerate() {
            bwt.extend(std::iter::repeat(*sym).take(37 * (i + 1) + 5));
        }
        bwt.extend([3u8, 3, 0, 5]);
        let comp = roundtrip(&bwt, 3, 4);
        let mut counts = [0u64; SIGMA];
        for (pos, &c) in bwt.iter().enumerate() {
            for s in 0..SIGMA as u8 {
                assert_eq!(comp.rank(s, pos as u64).unwrap(), counts[s as usize], "rank({}, {})", s, pos);
            }
            assert_eq!(comp.symbol_at(pos as u64).unwrap(), c);
            counts[c as usize] += 1;
        }
        assert_eq!(comp.totals().unwrap(), counts);
        assert!(comp.rank(0, bwt.len() as u64 + 1).is_err());
    }

    #[test]
    fn parallelism_does_not_change_stream() {
        let bwt: Vec<u8> = (0..5000u32).map(|i| ((i / 7 + i / 13) % 6) as u8).collect();
        let a = roundtrip(&bwt, 6, 1);
        let b = roundtrip(&bwt, 6, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_out_of_alphabet_codes() {
        let pool = WorkerPool::single().unwrap();
        assert!(matches!(
            compress(&[1, 2, 9], 4, &pool, &NoProgress),
            Err(IndexError::InvalidSymbol { pos: 2, .. })
        ));
    }

    #[test]
    fn detects_truncated_stream() {
        let pool = WorkerPool::single().unwrap();
        let mut comp = compress(&[1, 1, 2, 2, 3, 3], 1, &pool, &NoProgress).unwrap();
        comp.data.pop();
        assert!(matches!(comp.validate(), Err(IndexError::CorruptIndex(_))));
    }

    #[test]
    fn corrupt_stream_fails_decompression() {
        let bwt: Vec<u8> = (0..600u32).map(|i| ((i / 5) % 6) as u8).collect();
        for threads in [1, 4] {
            let pool = WorkerPool::new(threads).unwrap();
            let mut comp = compress(&bwt, 4, &pool, &NoProgress).unwrap();
            // 末尾游程被截断，最后一个分区解码越界
            comp.data.truncate(comp.data.len() - 1);
            assert!(matches!(
                decompress(&comp, &pool, &NoProgress),
                Err(IndexError::CorruptIndex(_))
            ));
        }
    }

    #[test]
    fn rejects_oversized_stride() {
        let pool = WorkerPool::single().unwrap();
        for bits in [MAX_STRIDE_BITS, 64, u32::MAX] {
            assert!(matches!(
                compress(&[1, 2, 0], bits, &pool, &NoProgress),
                Err(IndexError::OutOfRange { limit: 48, .. })
            ));
        }
        let mut comp = compress(&[1, 2, 0], 2, &pool, &NoProgress).unwrap();
        comp.stride_bits = 64;
        assert!(matches!(comp.validate(), Err(IndexError::CorruptIndex(_))));
    }
}
