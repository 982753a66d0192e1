use msbwt_rust::index::bwt::build_bwt;
use msbwt_rust::index::fm::MsBwt;
use msbwt_rust::index::merge::{merge, MergeInput};
use msbwt_rust::index::rank::RankIndex;
use msbwt_rust::index::rle;
use msbwt_rust::index::seqs::SequenceStore;
use msbwt_rust::util::dna::SIGMA;
use msbwt_rust::util::parallel::WorkerPool;
use msbwt_rust::util::progress::NoProgress;
use msbwt_rust::IndexError;

/// 确定性的伪随机 read，偶尔混入 N 与重复片段
fn reads(n: usize, seed: u32) -> Vec<String> {
    let mut x = seed;
    let mut next = move || {
        x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (x >> 16) as usize
    };
    (0..n)
        .map(|_| {
            let len = 1 + next() % 24;
            (0..len)
                .map(|_| match next() % 20 {
                    0 => 'N',
                    k => ['A', 'C', 'G', 'T'][k % 4],
                })
                .collect()
        })
        .collect()
}

fn index_of(seqs: &[String], threads: usize) -> MsBwt {
    let pool = WorkerPool::new(threads).unwrap();
    let store = SequenceStore::from_sequences(seqs);
    let (bwt, dollars) = build_bwt(&store, &pool, false, &NoProgress).unwrap();
    MsBwt::from_raw(bwt, dollars, 4, &pool).unwrap()
}

fn naive_count(seqs: &[String], pat: &str) -> u64 {
    seqs.iter()
        .map(|s| (0..s.len()).filter(|&i| s[i..].starts_with(pat)).count() as u64)
        .sum()
}

#[test]
fn counts_match_naive_scan() {
    let seqs = reads(40, 11);
    let idx = index_of(&seqs, 3);
    for s in &seqs {
        for (i, j) in [(0, s.len()), (0, s.len().min(3)), (s.len() / 2, s.len())] {
            let pat = &s[i..j];
            if pat.is_empty() {
                continue;
            }
            let count = idx.count_occurrences(pat.as_bytes()).unwrap();
            assert!(count >= 1);
            assert_eq!(count, naive_count(&seqs, pat), "pattern {}", pat);
            assert_eq!(idx.locate_range(pat.as_bytes()).unwrap().len() as u64, count);
        }
    }
    let absent = "ACGT".repeat(10);
    assert_eq!(idx.count_occurrences(absent.as_bytes()).unwrap(), 0);
    assert_eq!(idx.locate_range(b"").unwrap().len(), idx.len());
}

#[test]
fn every_sequence_is_recovered() {
    let seqs = reads(60, 5);
    let idx = index_of(&seqs, 2);
    for (id, s) in seqs.iter().enumerate() {
        assert_eq!(&idx.recover_sequence(id as u64).unwrap(), s);
    }
    assert!(matches!(idx.recover_sequence(seqs.len() as u64), Err(IndexError::OutOfRange { .. })));
}

#[test]
fn dollar_ids_point_at_containing_sequence() {
    let seqs = reads(30, 99);
    let idx = index_of(&seqs, 1);
    let pat = &seqs[7][..seqs[7].len().min(4)];
    for row in idx.locate_range(pat.as_bytes()).unwrap() {
        let (id, offset) = idx.locate(row).unwrap();
        assert!(seqs[id as usize][offset as usize..].starts_with(pat));
    }
}

#[test]
fn palindrome_counts_equal_reverse_complement() {
    let seqs: Vec<String> = ["ACGTT", "GACGTA", "TTACGT"].iter().map(|s| s.to_string()).collect();
    let idx = index_of(&seqs, 1);
    let hits = idx.mass_query(&["ACGT"], true).unwrap();
    assert_eq!(hits[0].count, 3);
    assert_eq!(hits[0].revcomp_count, Some(hits[0].count));
}

#[test]
fn thread_count_does_not_change_anything() {
    let seqs = reads(80, 3);
    let one = index_of(&seqs, 1);
    let many = index_of(&seqs, 4);
    assert_eq!(one.rank_index().raw_bwt(), many.rank_index().raw_bwt());
    assert_eq!(one.dollars(), many.dollars());

    let raw = one.rank_index().raw_bwt().unwrap();
    let c1 = rle::compress(raw, 5, &WorkerPool::new(1).unwrap(), &NoProgress).unwrap();
    let c4 = rle::compress(raw, 5, &WorkerPool::new(4).unwrap(), &NoProgress).unwrap();
    assert_eq!(c1.data(), c4.data());
    assert_eq!(c1.checkpoints(), c4.checkpoints());
}

#[test]
fn merge_equals_joint_build() {
    let all = reads(90, 21);
    let pool = WorkerPool::new(3).unwrap();
    let parts = [&all[..20], &all[20..21], &all[21..]];
    let built: Vec<MsBwt> = parts.iter().map(|p| index_of(p, 2)).collect();
    let inputs: Vec<MergeInput<'_>> = built
        .iter()
        .map(|b| MergeInput { rank: b.rank_index(), dollars: b.dollars(), sigma: SIGMA })
        .collect();
    let (bwt, dollars) = merge(&inputs, &pool, &NoProgress).unwrap();
    let joint = index_of(&all, 1);
    assert_eq!(Some(bwt.as_slice()), joint.rank_index().raw_bwt());
    assert_eq!(&dollars, joint.dollars());
}

#[test]
fn raw_and_compressed_answer_identically() {
    let seqs = reads(50, 8);
    let raw_idx = index_of(&seqs, 2);
    let pool = WorkerPool::new(2).unwrap();
    let raw = raw_idx.rank_index().raw_bwt().unwrap();
    let comp = rle::compress(raw, 3, &pool, &NoProgress).unwrap();
    assert_eq!(rle::decompress(&comp, &pool, &NoProgress).unwrap(), raw);
    let comp_idx = MsBwt::new(
        RankIndex::from_compressed(comp).unwrap(),
        raw_idx.dollars().clone(),
        raw_idx.meta().clone(),
    )
    .unwrap();
    for pos in 0..=raw.len() {
        for c in 0..SIGMA as u8 {
            assert_eq!(
                raw_idx.rank_index().rank(c, pos).unwrap(),
                comp_idx.rank_index().rank(c, pos).unwrap()
            );
        }
    }
    for id in 0..seqs.len() as u64 {
        assert_eq!(raw_idx.recover_sequence(id).unwrap(), comp_idx.recover_sequence(id).unwrap());
    }
}

#[cfg(feature = "real-data")]
#[test]
fn real_reads_round_trip() {
    // MSBWT_READS 指向本地 FASTQ / FASTA 文件
    let path = match std::env::var("MSBWT_READS") {
        Ok(p) => p,
        Err(_) => return,
    };
    let pool = WorkerPool::new(0).unwrap();
    let store = msbwt_rust::io::reads::preprocess(&[path], false).unwrap();
    let (bwt, dollars) = build_bwt(&store, &pool, false, &NoProgress).unwrap();
    let idx = MsBwt::from_raw(bwt, dollars, 11, &pool).unwrap();
    for id in (0..store.num_sequences()).step_by(997) {
        let expect = msbwt_rust::util::dna::decode(store.sequence(id).unwrap());
        assert_eq!(idx.recover_sequence(id as u64).unwrap(), expect);
    }
}
