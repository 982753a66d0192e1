use crate::error::{IndexError, Result};

/// 字母表大小：{0:$, 1:A, 2:C, 3:G, 4:N, 5:T}
///
/// 编码顺序即排序顺序：`$ < A < C < G < N < T`，构建、rank 与合并都依赖这一全序。
pub const SIGMA: usize = 6;

/// 终止符（`$`）的编码
pub const TERMINATOR: u8 = 0;

/// 编码 -> ASCII
pub const SYMBOLS: [u8; SIGMA] = *b"$ACGNT";

/// 将任意碱基字符宽松地映射到编码：小写可接受，U 视为 T，其余字母视为 N。
/// 0 字节保留给终止符。
#[inline]
pub fn to_alphabet(b: u8) -> u8 {
    if b == 0 || b == b'$' { return TERMINATOR; }
    match b.to_ascii_uppercase() {
        b'A' => 1,
        b'C' => 2,
        b'G' => 3,
        b'N' => 4,
        b'T' | b'U' => 5,
        _ => 4, // map others to N
    }
}

#[inline]
pub fn from_alphabet(a: u8) -> u8 {
    SYMBOLS.get(a as usize).copied().unwrap_or(b'N')
}

/// 严格编码查询串：只接受 A/C/G/N/T（大小写均可），其余字符报 InvalidSymbol。
pub fn encode_pattern(pat: &[u8]) -> Result<Vec<u8>> {
    pat.iter()
        .enumerate()
        .map(|(pos, &b)| match b.to_ascii_uppercase() {
            b'A' => Ok(1),
            b'C' => Ok(2),
            b'G' => Ok(3),
            b'N' => Ok(4),
            b'T' => Ok(5),
            _ => Err(IndexError::InvalidSymbol { symbol: b as char, pos }),
        })
        .collect()
}

pub fn decode(codes: &[u8]) -> String {
    codes.iter().map(|&c| from_alphabet(c) as char).collect()
}

/// 编码层面的互补：A<->T, C<->G, N/$ 不变
#[inline]
pub fn complement_code(code: u8) -> u8 {
    match code {
        1 => 5,
        2 => 3,
        3 => 2,
        5 => 1,
        other => other,
    }
}

pub fn revcomp_codes(codes: &[u8]) -> Vec<u8> {
    codes.iter().rev().map(|&c| complement_code(c)).collect()
}
