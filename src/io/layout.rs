//! 索引目录布局：
//!
//! | 文件 | 内容 |
//! |------|------|
//! | `seqs.bin` | 预处理后的序列编码（含终止符） |
//! | `offsets.bin` | 每条序列的起始位置，小端 u64 |
//! | `about.bin` | [`IndexMeta`]（bincode） |
//! | `msbwt.bin` | 原始 BWT，每字符一字节 |
//! | `comp_msbwt.bin` | [`CompressedBwt`]（bincode） |
//! | `dollars.bin` | [`DollarMap`]（bincode） |
//!
//! 所有文件先写入 `*.tmp`，成功后再改名，失败的任务不会留下正式文件名。

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{IndexError, Result};
use crate::index::bwt::DollarMap;
use crate::index::fm::{BwtFormat, IndexMeta, MsBwt};
use crate::index::rank::{RankIndex, DEFAULT_RAW_STRIDE_BITS};
use crate::index::rle::{CompressedBwt, MAX_STRIDE_BITS};
use crate::index::seqs::SequenceStore;
use crate::io::store::{ArrayStore, FileStore};
use crate::util::dna::SIGMA;
use crate::util::parallel::WorkerPool;

pub const SEQS_FILE: &str = "seqs.bin";
pub const OFFSETS_FILE: &str = "offsets.bin";
pub const ABOUT_FILE: &str = "about.bin";
pub const RAW_BWT_FILE: &str = "msbwt.bin";
pub const COMP_BWT_FILE: &str = "comp_msbwt.bin";
pub const DOLLARS_FILE: &str = "dollars.bin";

#[derive(Debug, Clone)]
pub struct IndexDir {
    root: PathBuf,
}

impl IndexDir {
    /// 打开已有目录（不检查内容）
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    /// 目录不存在时创建
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self::new(root))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.file(name).is_file()
    }

    fn tmp_file(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.tmp", name))
    }

    fn commit(&self, name: &str) -> Result<()> {
        fs::rename(self.tmp_file(name), self.file(name))?;
        debug!("wrote {}", self.file(name).display());
        Ok(())
    }

    fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut store = FileStore::create(self.tmp_file(name))?;
        store.append(bytes)?;
        store.flush()?;
        drop(store);
        self.commit(name)
    }

    fn write_bincode<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        self.write_bytes(name, &bincode::serialize(value)?)
    }

    fn read_bincode<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let bytes = FileStore::open(self.file(name))?.read_all()?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// 删除文件，不存在视为成功
    pub fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.file(name)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn save_sequences(&self, seqs: &SequenceStore) -> Result<()> {
        {
            let mut text = FileStore::create(self.tmp_file(SEQS_FILE))?;
            let mut offsets = FileStore::create(self.tmp_file(OFFSETS_FILE))?;
            seqs.save(&mut text, &mut offsets)?;
        }
        self.commit(SEQS_FILE)?;
        self.commit(OFFSETS_FILE)
    }

    pub fn load_sequences(&self) -> Result<SequenceStore> {
        let mut text = FileStore::open(self.file(SEQS_FILE))?;
        let mut offsets = FileStore::open(self.file(OFFSETS_FILE))?;
        SequenceStore::load(&mut text, &mut offsets)
    }

    pub fn save_meta(&self, meta: &IndexMeta) -> Result<()> {
        self.write_bincode(ABOUT_FILE, meta)
    }

    pub fn load_meta(&self) -> Result<IndexMeta> {
        self.read_bincode(ABOUT_FILE)
    }

    pub fn save_dollars(&self, dollars: &DollarMap) -> Result<()> {
        self.write_bincode(DOLLARS_FILE, dollars)
    }

    pub fn load_dollars(&self) -> Result<DollarMap> {
        self.read_bincode(DOLLARS_FILE)
    }

    pub fn save_raw_bwt(&self, bwt: &[u8]) -> Result<()> {
        self.write_bytes(RAW_BWT_FILE, bwt)
    }

    pub fn load_raw_bwt(&self) -> Result<Vec<u8>> {
        FileStore::open(self.file(RAW_BWT_FILE))?.read_all()
    }

    pub fn save_compressed(&self, comp: &CompressedBwt) -> Result<()> {
        self.write_bincode(COMP_BWT_FILE, comp)
    }

    pub fn load_compressed(&self) -> Result<CompressedBwt> {
        self.read_bincode(COMP_BWT_FILE)
    }

    /// 按索引当前的后端写出 BWT、终止符表与元信息，并移除另一种格式的旧文件
    pub fn save_index(&self, index: &MsBwt) -> Result<()> {
        let rank = index.rank_index();
        let mut meta = index.meta().clone();
        if let Some(comp) = rank.compressed() {
            self.save_compressed(comp)?;
            meta.format = BwtFormat::Compressed;
            meta.stride_bits = comp.stride_bits();
            self.remove(RAW_BWT_FILE)?;
        } else if let Some(raw) = rank.raw_bwt() {
            self.save_raw_bwt(raw)?;
            meta.format = BwtFormat::Raw;
            self.remove(COMP_BWT_FILE)?;
        }
        self.save_dollars(index.dollars())?;
        self.save_meta(&meta)?;
        info!("index saved to {} ({:?})", self.root.display(), meta.format);
        Ok(())
    }

    /// 读出 rank 结构、终止符表与元信息，只做文件之间的一致性检查；
    /// `comp_msbwt.bin` 存在时优先使用
    pub fn load_parts(&self, pool: &WorkerPool) -> Result<(RankIndex, DollarMap, IndexMeta)> {
        let mut meta = self.load_meta()?;
        let dollars = self.load_dollars()?;
        if dollars.len() as u64 != meta.num_sequences {
            return Err(IndexError::CorruptIndex(format!(
                "metadata lists {} sequences, dollar map has {}",
                meta.num_sequences,
                dollars.len()
            )));
        }
        let rank = if self.contains(COMP_BWT_FILE) {
            let comp = self.load_compressed()?;
            meta.format = BwtFormat::Compressed;
            meta.stride_bits = comp.stride_bits();
            RankIndex::from_compressed(comp)?
        } else {
            let bits = match meta.format {
                BwtFormat::Raw => meta.stride_bits,
                BwtFormat::Compressed => DEFAULT_RAW_STRIDE_BITS,
            };
            if bits >= MAX_STRIDE_BITS {
                return Err(IndexError::CorruptIndex(format!("checkpoint stride 2^{} in metadata", bits)));
            }
            meta.format = BwtFormat::Raw;
            meta.stride_bits = bits;
            RankIndex::from_raw(self.load_raw_bwt()?, bits, pool)?
        };
        if rank.len() as u64 != meta.total_len {
            return Err(IndexError::CorruptIndex(format!(
                "metadata lists {} symbols, BWT has {}",
                meta.total_len,
                rank.len()
            )));
        }
        Ok((rank, dollars, meta))
    }

    /// 加载可供查询的索引
    pub fn load_index(&self, pool: &WorkerPool) -> Result<MsBwt> {
        let (rank, dollars, meta) = self.load_parts(pool)?;
        if meta.sigma as usize != SIGMA {
            return Err(IndexError::CorruptIndex(format!(
                "index alphabet has {} symbols, expected {}",
                meta.sigma, SIGMA
            )));
        }
        info!(
            "loaded {:?} index from {}: {} sequences, {} symbols",
            meta.format,
            self.root.display(),
            meta.num_sequences,
            meta.total_len
        );
        MsBwt::new(rank, dollars, meta)
    }
}
