//! FASTA / FASTQ read 文件解析与预处理。
//!
//! 格式由第一条记录的首字符判断（`>` 为 FASTA，`@` 为 FASTQ），不支持 gzip。

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::info;

use crate::error::{IndexError, Result};
use crate::index::seqs::SequenceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFormat {
    Fasta,
    Fastq,
}

#[derive(Debug, Clone)]
pub struct ReadRecord {
    pub id: String,
    pub seq: Vec<u8>,
}

fn malformed(msg: String) -> IndexError {
    io::Error::new(io::ErrorKind::InvalidData, msg).into()
}

pub struct ReadParser<R: BufRead> {
    reader: R,
    format: ReadFormat,
    buf: String,
    done: bool,
    peek_header: Option<String>,
    line: usize,
}

impl<R: BufRead> ReadParser<R> {
    /// 跳过开头空白后按首字符判断格式；空输入视为没有记录的 FASTQ
    pub fn new(mut reader: R) -> Result<Self> {
        let format = loop {
            let chunk = reader.fill_buf()?;
            let Some(&first) = chunk.first() else {
                break ReadFormat::Fastq;
            };
            match first {
                b'>' => break ReadFormat::Fasta,
                b'@' => break ReadFormat::Fastq,
                b'\n' | b'\r' | b' ' | b'\t' => reader.consume(1),
                other => {
                    return Err(malformed(format!(
                        "cannot detect read format from leading byte {:?}",
                        other as char
                    )))
                }
            }
        };
        Ok(Self { reader, format, buf: String::new(), done: false, peek_header: None, line: 0 })
    }

    pub fn format(&self) -> ReadFormat {
        self.format
    }

    fn read_line(&mut self) -> Result<usize> {
        self.buf.clear();
        let n = self.reader.read_line(&mut self.buf)?;
        if n > 0 {
            self.line += 1;
        }
        Ok(n)
    }

    pub fn next_record(&mut self) -> Result<Option<ReadRecord>> {
        if self.done {
            return Ok(None);
        }
        match self.format {
            ReadFormat::Fasta => self.next_fasta(),
            ReadFormat::Fastq => self.next_fastq(),
        }
    }

    fn header_id(header: &str) -> String {
        header.split_whitespace().next().unwrap_or("").to_string()
    }

    fn next_fasta(&mut self) -> Result<Option<ReadRecord>> {
        let header = if let Some(h) = self.peek_header.take() {
            h
        } else {
            loop {
                if self.read_line()? == 0 {
                    self.done = true;
                    return Ok(None);
                }
                if let Some(h) = self.buf.strip_prefix('>') {
                    break h.trim().to_string();
                }
            }
        };

        let mut seq = Vec::new();
        loop {
            if self.read_line()? == 0 {
                self.done = true;
                break;
            }
            if let Some(h) = self.buf.strip_prefix('>') {
                self.peek_header = Some(h.trim().to_string());
                break;
            }
            seq.extend(self.buf.bytes().filter(|b| !b.is_ascii_whitespace()));
        }
        Ok(Some(ReadRecord { id: Self::header_id(&header), seq }))
    }

    fn next_fastq(&mut self) -> Result<Option<ReadRecord>> {
        // 跳过记录之间的空行
        let header = loop {
            if self.read_line()? == 0 {
                self.done = true;
                return Ok(None);
            }
            if !self.buf.trim().is_empty() {
                break self.buf.trim_end().to_string();
            }
        };
        let Some(header) = header.strip_prefix('@') else {
            return Err(malformed(format!("line {}: FASTQ header not starting with '@'", self.line)));
        };
        let id = Self::header_id(header);

        if self.read_line()? == 0 {
            return Err(malformed(format!("read {}: unexpected EOF after header", id)));
        }
        let seq = self.buf.trim_end().as_bytes().to_vec();

        if self.read_line()? == 0 || !self.buf.starts_with('+') {
            return Err(malformed(format!("read {}: missing '+' line", id)));
        }

        if self.read_line()? == 0 {
            return Err(malformed(format!("read {}: missing quality line", id)));
        }
        let qual_len = self.buf.trim_end().len();
        if qual_len != seq.len() {
            return Err(malformed(format!(
                "read {}: {} bases but {} quality values",
                id,
                seq.len(),
                qual_len
            )));
        }
        Ok(Some(ReadRecord { id, seq }))
    }
}

impl<R: BufRead> Iterator for ReadParser<R> {
    type Item = Result<ReadRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

pub fn open_reads(path: impl AsRef<Path>) -> Result<ReadParser<BufReader<File>>> {
    ReadParser::new(BufReader::new(File::open(path)?))
}

/// 把 read 追加进 `store`。`uniform` 为真时所有 read 必须与第一条等长。
pub fn append_reads<R: BufRead>(store: &mut SequenceStore, parser: ReadParser<R>, uniform: bool) -> Result<usize> {
    let mut added = 0usize;
    // 之前追加的 read 已逐条检查过，取第一条的长度即可
    let mut expect = if uniform && !store.is_empty() { Some(store.seq_len(0)?) } else { None };
    for rec in parser {
        let rec = rec?;
        if uniform {
            match expect {
                Some(len) if rec.seq.len() != len => {
                    return Err(IndexError::OutOfRange {
                        what: "length of read in a uniform collection, read",
                        index: store.num_sequences() as u64,
                        limit: len as u64,
                    });
                }
                Some(_) => {}
                None => expect = Some(rec.seq.len()),
            }
        }
        store.push(&rec.seq);
        added += 1;
    }
    Ok(added)
}

/// 依次读入多个 read 文件，序列编号即出现顺序
pub fn preprocess<P: AsRef<Path>>(paths: &[P], uniform: bool) -> Result<SequenceStore> {
    let mut store = SequenceStore::new();
    for path in paths {
        let path = path.as_ref();
        let parser = open_reads(path)?;
        let format = parser.format();
        let n = append_reads(&mut store, parser, uniform)?;
        info!("{}: {} reads ({:?})", path.display(), n, format);
    }
    info!(
        "preprocessed {} reads, {} symbols",
        store.num_sequences(),
        store.total_len()
    );
    Ok(store)
}
