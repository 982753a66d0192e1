pub mod bwt;
pub mod fm;
pub mod merge;
pub mod rank;
pub mod rle;
pub mod sa;
pub mod seqs;
