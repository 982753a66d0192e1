//! 命令行各子命令对应的批处理任务：预处理、构建、合并、压缩 / 解压与查询准备。
//!
//! 每个任务读写一个或多个索引目录（见 [`crate::io::layout`]），失败时整体中止。

use std::io::{BufRead, Write};
use std::path::Path;

use tracing::info;

use crate::error::{IndexError, Result};
use crate::index::bwt::build_bwt;
use crate::index::fm::{BwtFormat, IndexMeta, KmerCount, MsBwt, QueryEngine};
use crate::index::merge::{merge, MergeInput};
use crate::index::rank::{RankIndex, DEFAULT_RAW_STRIDE_BITS};
use crate::index::rle::{self, DEFAULT_STRIDE_BITS};
use crate::index::seqs::SequenceStore;
use crate::io::layout::IndexDir;
use crate::io::reads;
use crate::util::parallel::WorkerPool;
use crate::util::progress::TracingProgress;

/// 批处理任务的公共参数
#[derive(Debug, Clone)]
pub struct BuildOpt {
    /// 工作线程数，0 表示全部 CPU
    pub threads: usize,
    /// 所有序列等长
    pub uniform: bool,
    /// checkpoint 间隔指数；缺省时原始 BWT 用 2^11，压缩 BWT 用 2^12
    pub checkpoint_bits: Option<u32>,
    /// 记录到元信息中的命令行
    pub build_args: Option<String>,
}

impl Default for BuildOpt {
    fn default() -> Self {
        Self { threads: 1, uniform: false, checkpoint_bits: None, build_args: None }
    }
}

impl BuildOpt {
    pub fn pool(&self) -> Result<WorkerPool> {
        WorkerPool::new(self.threads)
    }

    fn raw_bits(&self) -> u32 {
        self.checkpoint_bits.unwrap_or(DEFAULT_RAW_STRIDE_BITS)
    }

    fn compressed_bits(&self) -> u32 {
        self.checkpoint_bits.unwrap_or(DEFAULT_STRIDE_BITS)
    }

    fn stamp(&self, index: &mut MsBwt) {
        let mut meta = index.meta().clone();
        meta.build_args = self.build_args.clone();
        meta.build_timestamp = Some(chrono::Utc::now().to_rfc3339());
        index.set_meta(meta);
    }
}

/// `pp`：读入 read 文件并写出 `seqs.bin` / `offsets.bin`
pub fn preprocess_reads<P: AsRef<Path>>(inputs: &[P], out: &Path, opt: &BuildOpt) -> Result<SequenceStore> {
    let seqs = reads::preprocess(inputs, opt.uniform)?;
    IndexDir::create(out)?.save_sequences(&seqs)?;
    Ok(seqs)
}

fn build_and_save(seqs: &SequenceStore, dir: &IndexDir, opt: &BuildOpt, pool: &WorkerPool) -> Result<MsBwt> {
    let (bwt, dollars) = build_bwt(seqs, pool, opt.uniform, &TracingProgress)?;
    let mut index = MsBwt::from_raw(bwt, dollars, opt.raw_bits(), pool)?;
    opt.stamp(&mut index);
    dir.save_index(&index)?;
    Ok(index)
}

/// `cfpp`：由预处理目录构建原始 BWT，写回同一目录
pub fn construct_from_preprocessed(dir: &Path, opt: &BuildOpt) -> Result<MsBwt> {
    let pool = opt.pool()?;
    let dir = IndexDir::new(dir);
    let seqs = dir.load_sequences()?;
    build_and_save(&seqs, &dir, opt, &pool)
}

/// `cffq`：预处理 + 构建
pub fn construct_from_reads<P: AsRef<Path>>(inputs: &[P], out: &Path, opt: &BuildOpt) -> Result<MsBwt> {
    let pool = opt.pool()?;
    let seqs = preprocess_reads(inputs, out, opt)?;
    build_and_save(&seqs, &IndexDir::new(out), opt, &pool)
}

/// `merge`：合并多个索引目录，DollarID 按输入顺序连续编号
pub fn merge_indexes<P: AsRef<Path>>(inputs: &[P], out: &Path, opt: &BuildOpt) -> Result<MsBwt> {
    let pool = opt.pool()?;
    let mut parts = Vec::with_capacity(inputs.len());
    for path in inputs {
        let path = path.as_ref();
        info!("loading merge input {}", path.display());
        parts.push(IndexDir::new(path).load_parts(&pool)?);
    }
    let merge_inputs: Vec<MergeInput<'_>> = parts
        .iter()
        .map(|(rank, dollars, meta)| MergeInput { rank, dollars, sigma: meta.sigma as usize })
        .collect();
    let (bwt, dollars) = merge(&merge_inputs, &pool, &TracingProgress)?;
    drop(merge_inputs);
    drop(parts);

    let mut index = MsBwt::from_raw(bwt, dollars, opt.raw_bits(), &pool)?;
    opt.stamp(&mut index);
    IndexDir::create(out)?.save_index(&index)?;
    Ok(index)
}

/// 把 `src` 的索引换成 `format` 后写入 `dst`（可与 `src` 相同）
fn convert(src: &Path, dst: &Path, format: BwtFormat, opt: &BuildOpt) -> Result<MsBwt> {
    let pool = opt.pool()?;
    let (rank, dollars, meta) = IndexDir::new(src).load_parts(&pool)?;
    let raw = rank.to_raw(&pool)?;
    drop(rank);
    let (rank, bits) = match format {
        BwtFormat::Compressed => {
            let bits = opt.compressed_bits();
            let comp = rle::compress(&raw, bits, &pool, &TracingProgress)?;
            info!(
                "compressed {} symbols into {} bytes ({} checkpoints)",
                raw.len(),
                comp.data().len(),
                comp.checkpoints().len()
            );
            (RankIndex::from_compressed(comp)?, bits)
        }
        BwtFormat::Raw => {
            let bits = opt.raw_bits();
            (RankIndex::from_raw(raw, bits, &pool)?, bits)
        }
    };
    let meta = IndexMeta { format, stride_bits: bits, ..meta };
    let index = MsBwt::new(rank, dollars, meta)?;
    IndexDir::create(dst)?.save_index(&index)?;
    Ok(index)
}

/// `compress`
pub fn compress_index(src: &Path, dst: &Path, opt: &BuildOpt) -> Result<MsBwt> {
    convert(src, dst, BwtFormat::Compressed, opt)
}

/// `decompress`
pub fn decompress_index(src: &Path, dst: &Path, opt: &BuildOpt) -> Result<MsBwt> {
    convert(src, dst, BwtFormat::Raw, opt)
}

/// 加载索引目录并发布到新的查询引擎
pub fn open_query_engine(dir: &Path, opt: &BuildOpt) -> Result<QueryEngine> {
    let pool = opt.pool()?;
    let index = IndexDir::new(dir).load_index(&pool)?;
    Ok(QueryEngine::with_index(index))
}

/// 每行一个 k-mer，忽略空行
pub fn read_kmers<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut kmers = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let k = line.trim();
        if !k.is_empty() {
            kmers.push(k.to_string());
        }
    }
    Ok(kmers)
}

/// 输出 `k-mer,counts[,revCompCounts]` CSV
pub fn write_mass_query<W: Write>(out: &mut W, hits: &[KmerCount], revcomp: bool) -> Result<()> {
    if revcomp {
        writeln!(out, "k-mer,counts,revCompCounts")?;
    } else {
        writeln!(out, "k-mer,counts")?;
    }
    for hit in hits {
        match (revcomp, hit.revcomp_count) {
            (true, Some(rc)) => writeln!(out, "{},{},{}", hit.kmer, hit.count, rc)?,
            (true, None) => {
                return Err(IndexError::CorruptIndex(format!(
                    "missing reverse-complement count for {}",
                    hit.kmer
                )))
            }
            (false, _) => writeln!(out, "{},{}", hit.kmer, hit.count)?,
        }
    }
    Ok(())
}
