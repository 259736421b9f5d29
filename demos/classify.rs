use std::{fs::File, io::BufWriter, path::PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use kmertax::{
    AmbiguityPolicy, AnnotationFormat, ClassifyConfig, FastqSource, IndexBuilder, KmerIndex,
    Matcher, MemorySource, ReadOutputs, TaxTree, Thresholds, RNG_SEED,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxedWriter = Box<dyn std::io::Write + Send>;

#[derive(Parser)]
struct Args {
    /// Input FASTQ to classify (plain or compressed)
    ///
    /// Synthetic reads are sampled from the reference genomes when omitted
    reads: Option<PathBuf>,

    /// Previously saved index; a synthetic reference is indexed otherwise
    #[clap(short = 'i', long)]
    index: Option<PathBuf>,

    /// Save the built index to this path
    #[clap(short = 's', long)]
    save: Option<PathBuf>,

    /// K-mer length of the synthetic reference index
    #[clap(short = 'k', long, default_value_t = 31)]
    k: usize,

    /// Number of synthetic genomes
    #[clap(long, default_value_t = 8)]
    genomes: usize,

    /// Length of each synthetic genome
    #[clap(long, default_value_t = 20_000)]
    genome_len: usize,

    /// Number of synthetic reads
    #[clap(long, default_value_t = 100_000)]
    num_reads: usize,

    /// Annotation output path
    #[clap(short = 'a', long)]
    annotations: Option<PathBuf>,

    /// Write annotations in the kraken-style layout
    #[clap(long)]
    kraken: bool,

    /// Filtered FASTQ output path (matched reads)
    #[clap(short = 'f', long)]
    filtered: Option<PathBuf>,

    /// Assign ambiguous reads to their lowest common ancestor
    #[clap(long)]
    lca: bool,

    /// Minimum reads for a taxon to be reported
    #[clap(long, default_value_t = 1)]
    min_reads: u64,

    /// Consumer threads [0: classify on the main thread]
    #[clap(short = 'T', long)]
    threads: Option<usize>,
}

fn random_sequence(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| b"ACGT"[rng.random_range(0..4)]).collect()
}

/// Synthetic genomes under a two-genus tree
fn reference(args: &Args, rng: &mut StdRng) -> (TaxTree, Vec<(String, Vec<u8>)>) {
    let mut tree = TaxTree::new();
    tree.insert("1", "1", "no rank", "root");
    tree.insert("10", "1", "genus", "genus A");
    tree.insert("20", "1", "genus", "genus B");

    let genomes = (0..args.genomes)
        .map(|i| {
            let tax_id = format!("{}", 100 + i);
            let genus = if i % 2 == 0 { "10" } else { "20" };
            tree.insert(&tax_id, genus, "species", &format!("species {i}"));
            (tax_id, random_sequence(rng, args.genome_len))
        })
        .collect();
    (tree, genomes)
}

fn build_index(args: &Args, tree: &TaxTree, genomes: &[(String, Vec<u8>)]) -> Result<KmerIndex> {
    let capacity = genomes.iter().map(|(_, g)| g.len()).sum();
    let mut builder = IndexBuilder::new(args.k, capacity, tree)?;
    for (tax_id, genome) in genomes {
        builder.add_sequence(genome, tax_id)?;
    }
    Ok(builder.finish()?)
}

fn synthetic_reads(args: &Args, genomes: &[(String, Vec<u8>)], rng: &mut StdRng) -> MemorySource {
    const READ_LEN: usize = 150;
    let mut reads = MemorySource::new();
    for i in 0..args.num_reads {
        let read = if i % 10 == 0 || args.genome_len <= READ_LEN {
            random_sequence(rng, READ_LEN)
        } else {
            let (_, genome) = &genomes[rng.random_range(0..genomes.len())];
            let start = rng.random_range(0..genome.len() - READ_LEN);
            genome[start..start + READ_LEN].to_vec()
        };
        reads.push(format!("read.{i}").as_bytes(), &read, None);
    }
    reads
}

fn match_output(path: Option<&PathBuf>) -> Result<Option<BoxedWriter>> {
    Ok(match path {
        Some(path) => Some(Box::new(BufWriter::new(File::create(path)?))),
        None => None,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kmertax=info")))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();

    let args = Args::parse();
    if args.genomes == 0 {
        bail!("at least one genome is required");
    }
    let mut rng = StdRng::seed_from_u64(RNG_SEED);
    let (tree, genomes) = reference(&args, &mut rng);

    let index = match &args.index {
        Some(path) => KmerIndex::open(path)?,
        None => build_index(&args, &tree, &genomes)?,
    };
    if let Some(path) = &args.save {
        index.save_compressed(path, 3)?;
    }

    let mut config = ClassifyConfig::default().count_unique_kmers(true);
    if let Some(threads) = args.threads {
        config = config.consumers(threads);
    }
    if args.lca {
        config = config.ambiguity(AmbiguityPolicy::LowestCommonAncestor);
    }
    if args.kraken {
        config = config.annotation_format(AnnotationFormat::Kraken);
    }
    let matcher = Matcher::new(&index).with_config(config).with_taxonomy(&tree);

    let mut outputs = ReadOutputs::new();
    if let Some(writer) = match_output(args.annotations.as_ref())? {
        outputs = outputs.annotations(writer);
    }
    if let Some(writer) = match_output(args.filtered.as_ref())? {
        outputs = outputs.filtered(writer);
    }

    let result = match &args.reads {
        Some(path) => matcher.classify_with_outputs(&mut FastqSource::from_path(path)?, outputs)?,
        None => {
            let mut reads = synthetic_reads(&args, &genomes, &mut rng);
            matcher.classify_with_outputs(&mut reads, outputs)?
        }
    };

    println!(
        "reads: {}\tmatched: {}\tclassified: {}\tk-mers: {}",
        result.total_reads, result.matched_reads, result.classified_reads, result.total_kmers
    );
    println!("taxon\treads\tclassified\tkmers\tunique\tcontigs\tmax_contig\tread");
    let reported = result.filter(&Thresholds::default().min_reads(args.min_reads));
    for (tax_id, stats) in reported.iter() {
        println!(
            "{tax_id}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            stats.reads,
            stats.classified_reads,
            stats.kmers,
            stats.unique_kmers,
            stats.contigs,
            stats.max_contig_len,
            stats.max_contig_descriptor.as_deref().unwrap_or("*"),
        );
    }
    Ok(())
}
