//! 数值数组的存储后端。
//!
//! 算法本身只处理内存中的切片；落盘通过 [`ArrayStore`] 完成，
//! 测试使用 [`MemStore`]，命令行使用 [`FileStore`]。

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

/// 按字节寻址的可增长数组
pub trait ArrayStore {
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// 读取 [start, end)，越界返回 OutOfRange
    fn read_range(&mut self, range: Range<u64>) -> Result<Vec<u8>>;

    /// 覆盖写入，`start + data.len()` 不得超过当前长度
    fn write_range(&mut self, start: u64, data: &[u8]) -> Result<()>;

    fn append(&mut self, data: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn read_all(&mut self) -> Result<Vec<u8>> {
        let n = self.len()?;
        self.read_range(0..n)
    }
}

fn check_range(range: &Range<u64>, len: u64) -> Result<()> {
    if range.start > range.end || range.end > len {
        return Err(IndexError::OutOfRange {
            what: "array range end",
            index: range.end,
            limit: len,
        });
    }
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct MemStore {
    data: Vec<u8>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for MemStore {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ArrayStore for MemStore {
    fn len(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_range(&mut self, range: Range<u64>) -> Result<Vec<u8>> {
        check_range(&range, self.data.len() as u64)?;
        Ok(self.data[range.start as usize..range.end as usize].to_vec())
    }

    fn write_range(&mut self, start: u64, data: &[u8]) -> Result<()> {
        let end = start + data.len() as u64;
        check_range(&(start..end), self.data.len() as u64)?;
        self.data[start as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 单文件后端
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: File,
    len: u64,
}

impl FileStore {
    /// 新建（截断）文件
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self { path, file, len: 0 })
    }

    /// 打开已存在的文件（可读写）
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self { path, file, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArrayStore for FileStore {
    fn len(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn read_range(&mut self, range: Range<u64>) -> Result<Vec<u8>> {
        check_range(&range, self.len)?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        self.file.seek(SeekFrom::Start(range.start))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_range(&mut self, start: u64, data: &[u8]) -> Result<()> {
        check_range(&(start..start + data.len() as u64), self.len)?;
        self.file.seek(SeekFrom::Start(start))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.len))?;
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// u64 数组按小端序写入
pub fn append_u64s<S: ArrayStore + ?Sized>(store: &mut S, values: &[u64]) -> Result<()> {
    let mut buf = Vec::with_capacity(values.len() * 8);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    store.append(&buf)
}

pub fn read_u64s<S: ArrayStore + ?Sized>(store: &mut S) -> Result<Vec<u64>> {
    let bytes = store.read_all()?;
    if bytes.len() % 8 != 0 {
        return Err(IndexError::CorruptIndex(format!(
            "u64 array has {} bytes, not a multiple of 8",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}
