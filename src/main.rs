use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use msbwt_rust::pipeline::{self, BuildOpt};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "msbwt-rust", author, version, about = "Multi-string BWT construction, merging and queries for read collections", arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Number of worker threads (0 = all CPUs)
    #[arg(short = 'p', long = "threads", default_value_t = 1)]
    threads: usize,
    /// All reads have the same length
    #[arg(short = 'u', long = "uniform")]
    uniform: bool,
    /// Rank checkpoint every 2^N symbols (default 11 raw, 12 compressed)
    #[arg(long = "checkpoint-bits", value_parser = clap::value_parser!(u32).range(1..=31))]
    checkpoint_bits: Option<u32>,
}

impl BuildArgs {
    fn opt(&self) -> BuildOpt {
        BuildOpt {
            threads: self.threads,
            uniform: self.uniform,
            checkpoint_bits: self.checkpoint_bits,
            build_args: Some(std::env::args().collect::<Vec<_>>().join(" ")),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Construct an index directly from FASTQ/FASTA reads
    Cffq {
        /// Output index directory
        out: PathBuf,
        /// Read files (FASTQ or FASTA, detected per file)
        #[arg(required = true)]
        reads: Vec<PathBuf>,
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Preprocess reads into the sequence arrays of an index directory
    Pp {
        out: PathBuf,
        #[arg(required = true)]
        reads: Vec<PathBuf>,
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Construct the BWT of a preprocessed directory
    Cfpp {
        dir: PathBuf,
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Merge several index directories into one
    Merge {
        out: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Run-length compress an index (in place when no destination is given)
    Compress {
        src: PathBuf,
        dst: Option<PathBuf>,
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Decompress an index back to one byte per symbol
    Decompress {
        src: PathBuf,
        dst: Option<PathBuf>,
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Count occurrences of a k-mer
    Query {
        dir: PathBuf,
        kmer: String,
        /// Also print "sequence,dollarID" for every matching suffix
        #[arg(short = 'd', long = "dump-seqs")]
        dump_seqs: bool,
    },
    /// Count many k-mers (one per line) and write CSV
    Massquery {
        dir: PathBuf,
        /// k-mer file, one per line
        kmers: PathBuf,
        /// Output CSV path (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Also count reverse complements
        #[arg(short = 'r', long = "rev-comp")]
        rev_comp: bool,
        #[arg(short = 'p', long = "threads", default_value_t = 1)]
        threads: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Cffq { out, reads, build } => {
            pipeline::construct_from_reads(&reads, &out, &build.opt())
                .with_context(|| format!("cannot build index '{}' from reads", out.display()))?;
        }
        Commands::Pp { out, reads, build } => {
            let seqs = pipeline::preprocess_reads(&reads, &out, &build.opt())
                .with_context(|| format!("cannot preprocess reads into '{}'", out.display()))?;
            println!("sequences: {}", seqs.num_sequences());
            println!("total_len: {}", seqs.total_len());
        }
        Commands::Cfpp { dir, build } => {
            pipeline::construct_from_preprocessed(&dir, &build.opt())
                .with_context(|| format!("cannot build index in '{}'", dir.display()))?;
        }
        Commands::Merge { out, inputs, build } => {
            pipeline::merge_indexes(&inputs, &out, &build.opt())
                .with_context(|| format!("cannot merge into '{}'", out.display()))?;
        }
        Commands::Compress { src, dst, build } => {
            let dst = dst.unwrap_or_else(|| src.clone());
            pipeline::compress_index(&src, &dst, &build.opt())
                .with_context(|| format!("cannot compress '{}'", src.display()))?;
        }
        Commands::Decompress { src, dst, build } => {
            let dst = dst.unwrap_or_else(|| src.clone());
            pipeline::decompress_index(&src, &dst, &build.opt())
                .with_context(|| format!("cannot decompress '{}'", src.display()))?;
        }
        Commands::Query { dir, kmer, dump_seqs } => run_query(&dir, &kmer, dump_seqs)?,
        Commands::Massquery { dir, kmers, out, rev_comp, threads } => {
            run_mass_query(&dir, &kmers, out.as_deref(), rev_comp, threads)?;
        }
    }
    Ok(())
}

fn run_query(dir: &Path, kmer: &str, dump_seqs: bool) -> Result<()> {
    let engine = pipeline::open_query_engine(dir, &BuildOpt::default())
        .with_context(|| format!("cannot load index '{}'", dir.display()))?;
    let count = engine.count_occurrences(kmer.as_bytes())?;
    println!("{}", count);
    if dump_seqs {
        let mut out = BufWriter::new(std::io::stdout());
        for (id, seq) in engine.find_sequences(kmer.as_bytes())? {
            writeln!(out, "{},{}", seq, id)?;
        }
        out.flush()?;
    }
    Ok(())
}

fn run_mass_query(dir: &Path, kmers_path: &Path, out_path: Option<&Path>, rev_comp: bool, threads: usize) -> Result<()> {
    let opt = BuildOpt { threads, ..BuildOpt::default() };
    let pool = opt.pool()?;
    let engine = pipeline::open_query_engine(dir, &opt)
        .with_context(|| format!("cannot load index '{}'", dir.display()))?;
    let fh = File::open(kmers_path)
        .with_context(|| format!("cannot open k-mer file '{}'", kmers_path.display()))?;
    let kmers = pipeline::read_kmers(BufReader::new(fh))?;
    let hits = pool.install(|| engine.mass_query(&kmers, rev_comp))?;

    let mut out: Box<dyn Write> = match out_path {
        Some(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("cannot create '{}'", p.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    pipeline::write_mass_query(&mut out, &hits, rev_comp)?;
    out.flush()?;
    Ok(())
}
