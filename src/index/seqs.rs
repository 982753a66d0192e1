use crate::error::{IndexError, Result};
use crate::io::store::{append_u64s, read_u64s, ArrayStore};
use crate::util::dna::{self, TERMINATOR};

/// 预处理后的 read 集合：
/// - `text`：所有序列的编码依次拼接，每条后面跟一个终止符 0
/// - `offsets`：每条序列在 `text` 中的起始位置
///
/// 序列编号（DollarID）即加入顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceStore {
    text: Vec<u8>,
    offsets: Vec<u64>,
}

impl SequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sequences<I, S>(seqs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut store = Self::new();
        for s in seqs {
            store.push(s.as_ref());
        }
        store
    }

    /// 追加一条 ASCII 序列（宽松映射，见 [`dna::to_alphabet`]）
    pub fn push(&mut self, seq: &[u8]) {
        self.offsets.push(self.text.len() as u64);
        self.text.extend(seq.iter().map(|&b| match dna::to_alphabet(b) {
            TERMINATOR => 4,
            c => c,
        }));
        self.text.push(TERMINATOR);
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn num_sequences(&self) -> usize {
        self.offsets.len()
    }

    /// 含终止符的总长度
    pub fn total_len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn bounds(&self, id: usize) -> Result<(usize, usize)> {
        if id >= self.offsets.len() {
            return Err(IndexError::out_of_range("sequence id", id, self.offsets.len()));
        }
        let start = self.offsets[id] as usize;
        let end = match self.offsets.get(id + 1) {
            Some(&next) => next as usize,
            None => self.text.len(),
        };
        Ok((start, end - 1))
    }

    /// 第 id 条序列的编码（不含终止符）
    pub fn sequence(&self, id: usize) -> Result<&[u8]> {
        let (start, end) = self.bounds(id)?;
        Ok(&self.text[start..end])
    }

    pub fn seq_len(&self, id: usize) -> Result<usize> {
        let (start, end) = self.bounds(id)?;
        Ok(end - start)
    }

    pub fn lengths(&self) -> Vec<u64> {
        (0..self.offsets.len())
            .map(|i| {
                let end = self.offsets.get(i + 1).copied().unwrap_or(self.text.len() as u64);
                end - self.offsets[i] - 1
            })
            .collect()
    }

    pub fn max_len(&self) -> usize {
        self.lengths().into_iter().max().unwrap_or(0) as usize
    }

    /// 若所有序列等长，返回该长度
    pub fn uniform_len(&self) -> Option<usize> {
        let lens = self.lengths();
        let first = *lens.first()?;
        lens.iter().all(|&l| l == first).then_some(first as usize)
    }

    /// 文本位置所属的序列编号
    pub fn sequence_of(&self, pos: usize) -> usize {
        self.offsets.partition_point(|&o| o as usize <= pos) - 1
    }

    pub fn save<T, O>(&self, text_store: &mut T, offset_store: &mut O) -> Result<()>
    where
        T: ArrayStore + ?Sized,
        O: ArrayStore + ?Sized,
    {
        text_store.append(&self.text)?;
        append_u64s(offset_store, &self.offsets)?;
        text_store.flush()?;
        offset_store.flush()
    }

    /// 从存储读回并校验结构
    pub fn load<T, O>(text_store: &mut T, offset_store: &mut O) -> Result<Self>
    where
        T: ArrayStore + ?Sized,
        O: ArrayStore + ?Sized,
    {
        let text = text_store.read_all()?;
        let offsets = read_u64s(offset_store)?;
        let store = Self { text, offsets };
        store.validate()?;
        Ok(store)
    }

    fn validate(&self) -> Result<()> {
        let corrupt = |msg: String| Err(IndexError::CorruptIndex(msg));
        if self.offsets.is_empty() {
            if !self.text.is_empty() {
                return corrupt(format!("{} symbols but no offsets", self.text.len()));
            }
            return Ok(());
        }
        if self.offsets[0] != 0 {
            return corrupt(format!("first offset is {}", self.offsets[0]));
        }
        if self.text.last() != Some(&TERMINATOR) {
            return corrupt("sequence array does not end with a terminator".to_string());
        }
        if let Some(&bad) = self.text.iter().find(|&&c| c as usize >= dna::SIGMA) {
            return corrupt(format!("symbol code {} outside the alphabet", bad));
        }
        let terminators = self.text.iter().filter(|&&c| c == TERMINATOR).count();
        if terminators != self.offsets.len() {
            return corrupt(format!(
                "{} terminators for {} offsets",
                terminators,
                self.offsets.len()
            ));
        }
        for w in self.offsets.windows(2) {
            if w[1] <= w[0] {
                return corrupt(format!("offsets {} and {} are not increasing", w[0], w[1]));
            }
        }
        // 严格递增后只需检查最后一个，其余都在 text 范围内
        let last = self.offsets[self.offsets.len() - 1];
        if last >= self.text.len() as u64 {
            return corrupt(format!(
                "offset {} past the end of {} symbols",
                last,
                self.text.len()
            ));
        }
        for &next in &self.offsets[1..] {
            if self.text[next as usize - 1] != TERMINATOR {
                return corrupt(format!("offset {} does not follow a terminator", next));
            }
        }
        Ok(())
    }
}
