pub mod dna;
pub mod parallel;
pub mod progress;
