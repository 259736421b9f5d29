use std::collections::HashSet;

use kmertax::{
    classify::ReadOutputs,
    kmer::kmer_mask,
    AmbiguityPolicy, BloomFilter, ClassifyConfig, HashStrategy, IndexBuilder, KmerIndex, Matcher,
    MemorySource, Orientation, TaxTree, RNG_SEED, encode,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn kmer(window: &[u8]) -> u64 {
    encode(window, Orientation::Forward).unwrap()
}

fn small_index() -> KmerIndex {
    let mut index = KmerIndex::new(4, 16).unwrap();
    assert!(index.put(kmer(b"ACGT"), "taxonA").unwrap());
    assert!(index.put(kmer(b"TTTT"), "taxonB").unwrap());
    index.optimize();
    index
}

#[test]
fn test_two_contigs_in_one_read() {
    let index = small_index();
    let matcher = Matcher::new(&index).with_config(ClassifyConfig::default().consumers(0));
    let mut reads = MemorySource::new().with_read("read1", b"ACGTTTTT");
    let result = matcher.classify(&mut reads).unwrap();

    assert_eq!(result.total_reads, 1);
    assert_eq!(result.total_kmers, 5);
    assert_eq!(result.matched_reads, 1);
    // both taxa hit, so the default policy leaves the read unclassified
    assert_eq!(result.classified_reads, 0);

    let a = result.taxon("taxonA").unwrap();
    assert_eq!((a.reads, a.kmers, a.contigs, a.max_contig_len), (1, 1, 1, 1));
    let b = result.taxon("taxonB").unwrap();
    assert_eq!((b.reads, b.kmers, b.contigs, b.max_contig_len), (1, 2, 1, 2));
    assert_eq!(b.max_contig_descriptor.as_deref(), Some("read1"));
}

#[test]
fn test_two_contigs_annotation() {
    let index = small_index();
    let matcher = Matcher::new(&index).with_config(
        ClassifyConfig::default()
            .consumers(1)
            .ambiguity(AmbiguityPolicy::FirstHit),
    );
    let mut annotations = Vec::new();
    let mut filtered = Vec::new();
    let mut reads = MemorySource::new()
        .with_read("read1", b"ACGTTTTT")
        .with_read("read2", b"CCCCCC");
    let result = matcher
        .classify_with_outputs(
            &mut reads,
            ReadOutputs::new()
                .annotations(&mut annotations)
                .filtered(&mut filtered),
        )
        .unwrap();

    assert_eq!(result.classified_reads, 1);
    assert_eq!(result.taxon("taxonA").unwrap().classified_reads, 1);
    assert_eq!(
        String::from_utf8(annotations).unwrap(),
        "taxonA:1 0:2 taxonB:2\n"
    );
    assert_eq!(String::from_utf8(filtered).unwrap(), "@read1\nACGTTTTT\n+\n????????\n");
}

#[test]
fn test_conflicting_put_is_rejected() {
    let mut index = KmerIndex::new(4, 16).unwrap();
    let shared = kmer(b"GATC");
    assert!(index.put(shared, "taxonA").unwrap());
    assert_eq!(index.len(), 1);

    assert!(!index.put(shared, "taxonB").unwrap());
    assert_eq!(index.len(), 1);
    assert_eq!(index.get(shared).as_deref(), Some("taxonA"));

    // re-inserting the same pair is accepted without growing
    assert!(index.put(shared, "taxonA").unwrap());
    assert_eq!(index.len(), 1);
}

#[test]
fn test_builder_merges_conflicts_to_ancestor() {
    let mut tree = TaxTree::new();
    tree.insert("1", "1", "no rank", "root");
    tree.insert("2", "1", "genus", "Escherichia");
    tree.insert("562", "2", "species", "E. coli");
    tree.insert("564", "2", "species", "E. fergusonii");

    let mut builder = IndexBuilder::new(4, 16, &tree).unwrap();
    builder.add_kmer(kmer(b"GATC"), 4, "562").unwrap();
    builder.add_kmer(kmer(b"GATC"), 4, "564").unwrap();
    builder.add_kmer(kmer(b"CCGG"), 4, "564").unwrap();
    assert_eq!(builder.num_conflicts(), 1);

    let index = builder.finish().unwrap();
    assert!(index.is_optimized());
    assert_eq!(index.len(), 2);
    assert_eq!(index.get(kmer(b"GATC")).as_deref(), Some("2"));
    assert_eq!(index.get(kmer(b"CCGG")).as_deref(), Some("564"));
}

#[test]
fn test_prefilter_false_positive_rate() {
    const INSERTED: usize = 100_000;
    const QUERIES: usize = 1_000_000;

    let mask = kmer_mask(31);
    let filter = BloomFilter::new(INSERTED as u64, 0.0001, HashStrategy::Murmur).unwrap();
    let mut rng = StdRng::seed_from_u64(RNG_SEED);
    let mut inserted = HashSet::with_capacity(INSERTED);
    while inserted.len() < INSERTED {
        let kmer = rng.random::<u64>() & mask;
        if inserted.insert(kmer) {
            filter.put(kmer);
        }
    }
    assert!(inserted.iter().all(|&kmer| filter.contains(kmer)));

    let mut queried = 0;
    let mut false_positives = 0;
    while queried < QUERIES {
        let kmer = rng.random::<u64>() & mask;
        if inserted.contains(&kmer) {
            continue;
        }
        queried += 1;
        if filter.contains(kmer) {
            false_positives += 1;
        }
    }
    // expected 100, standard deviation near 10
    assert!(
        (40..=200).contains(&false_positives),
        "false positives: {false_positives}"
    );
}

fn random_sequence(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| b"ACGT"[rng.random_range(0..4)]).collect()
}

#[test]
fn test_parallel_totals_match_single_threaded() {
    const K: usize = 15;
    const READS: usize = 100_000;
    const READ_LEN: usize = 60;

    let mut rng = StdRng::seed_from_u64(RNG_SEED);
    let genomes: Vec<(String, Vec<u8>)> = (0..4)
        .map(|i| (format!("taxon{i}"), random_sequence(&mut rng, 3_000)))
        .collect();

    let mut tree = TaxTree::new();
    tree.insert("root", "root", "no rank", "root");
    for (tax_id, _) in &genomes {
        tree.insert(tax_id, "root", "species", tax_id);
    }
    let capacity = genomes.iter().map(|(_, g)| g.len()).sum();
    let mut builder = IndexBuilder::new(K, capacity, &tree).unwrap();
    for (tax_id, genome) in &genomes {
        builder.add_sequence(genome, tax_id).unwrap();
    }
    let index = builder.finish().unwrap();

    let mut reads = MemorySource::new();
    for i in 0..READS {
        let mut read = if i % 5 == 0 {
            random_sequence(&mut rng, READ_LEN)
        } else {
            let (_, genome) = &genomes[rng.random_range(0..genomes.len())];
            let start = rng.random_range(0..genome.len() - READ_LEN);
            genome[start..start + READ_LEN].to_vec()
        };
        if i % 7 == 0 {
            read[READ_LEN / 2] = b'N';
        }
        if i % 11 == 0 {
            // chimeric read spanning two taxa
            let (_, other) = &genomes[i % genomes.len()];
            read[..READ_LEN / 2].copy_from_slice(&other[..READ_LEN / 2]);
        }
        reads.push(format!("read{i}").as_bytes(), &read, None);
    }

    let run = |consumers| {
        let config = ClassifyConfig::default()
            .consumers(consumers)
            .queue_capacity(10)
            .count_unique_kmers(true)
            .ambiguity(AmbiguityPolicy::LowestCommonAncestor);
        Matcher::new(&index)
            .with_config(config)
            .with_taxonomy(&tree)
            .classify(&mut reads.clone())
            .unwrap()
    };
    let single = run(0);
    let parallel = run(4);

    assert_eq!(single.total_reads, READS as u64);
    assert_eq!(parallel.total_reads, single.total_reads);
    assert_eq!(parallel.total_kmers, single.total_kmers);
    assert_eq!(parallel.matched_reads, single.matched_reads);
    assert_eq!(parallel.classified_reads, single.classified_reads);
    assert!(single.taxon("root").is_some_and(|t| t.classified_reads > 0));

    // ties on the longest contig may keep a different descriptor
    let totals = |result: &kmertax::MatchResult| {
        result
            .iter()
            .map(|(id, t)| {
                (
                    id.to_string(),
                    t.reads,
                    t.classified_reads,
                    t.kmers,
                    t.unique_kmers,
                    t.contigs,
                    t.max_contig_len,
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(totals(&parallel), totals(&single));
}
