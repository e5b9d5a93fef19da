use rarerep::parse::{parse_separator, read_group_list, read_sample_order};
use rarerep::process::{build_col_index, write_done_sentinel, GtError};
use rarerep::rarity::{
    build_meta_index, display_irr_entries, finalize_irr, score_reference_cohort,
    write_irr_table, CoverageBasis,
};
use rarerep::stats::{load_allele_table, summarize_coverage};

use std::collections::HashSet;
use std::path::PathBuf;
use clap::Parser;
use colored::Colorize;
use env_logger::Builder;
use log::{info, LevelFilter};
use rayon::ThreadPoolBuilder;

#[derive(Parser, Debug)]
#[command(author, version, about = "Coverage summaries and per-individual rarity (IRR) scores", long_about = None)]
struct Args {
    /// Allele table produced by allele_count
    #[arg(long = "allele_table")]
    allele_table: PathBuf,

    /// Genotype table (%CHROM %POS %REF %ALT [GT x N]); may be gzipped
    #[arg(long = "gt_tsv")]
    gt_tsv: PathBuf,

    /// Sample ordering of the genotype columns, one ID per line
    #[arg(long = "samples_order")]
    samples_order: PathBuf,

    /// Ancient cohort member list (the IRR reference cohort)
    #[arg(long = "ancients")]
    ancients: PathBuf,

    /// Optional sub-lineage list used only to label IRR rows: natural relicts
    #[arg(long = "anc_nat")]
    anc_nat: Option<PathBuf>,

    /// Optional sub-lineage list used only to label IRR rows: historically cultivated
    #[arg(long = "anc_cult")]
    anc_cult: Option<PathBuf>,

    /// Epsilon clamp for the -log10(freq) information weights
    #[arg(long = "epsilon", default_value = "1e-3")]
    epsilon: f64,

    /// Ancient carrier-count ceiling defining rare-in-ancients
    #[arg(long = "max_occ", default_value = "2")]
    max_occ: u32,

    /// Coverage basis for the IRR numerator
    #[arg(long = "irr_coverage", value_enum, default_value = "cult")]
    irr_coverage: CoverageBasis,

    /// Rows per chunk for the genotype-table pass
    #[arg(long = "chunk_size", default_value = "200000")]
    chunk_size: usize,

    /// Input field separator ("\t" or "tab" for a tab)
    #[arg(long = "sep", default_value = "\t")]
    sep: String,

    /// Output prefix for the summary, by-bin, and IRR tables
    #[arg(long = "out_prefix", default_value = "acwac")]
    out_prefix: String,
}

fn main() -> Result<(), GtError> {
    Builder::new().filter_level(LevelFilter::Info).init();
    let args = Args::parse();

    ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()
        .ok();

    println!("{}", "Starting coverage/IRR analysis...".green());
    let sep = parse_separator(&args.sep)?;

    // The required-column check is fatal here, before any pass-two output
    // file is created.
    let table = load_allele_table(&args.allele_table, args.epsilon)?;
    info!(
        "Loaded {} alleles from {}",
        table.records.len(),
        args.allele_table.display()
    );
    if !table.sublineages.is_empty() {
        info!(
            "Discovered sub-lineage targets: {}",
            table.sublineages.join(", ")
        );
    }

    let n_combos = summarize_coverage(&table, &args.out_prefix)?;
    info!("Wrote {} target x coverage combinations", n_combos);

    let samples_order = read_sample_order(&args.samples_order)?;
    let ancient_ids = read_group_list(&args.ancients)?;
    let ancients = build_col_index(&samples_order, &ancient_ids, "anc");

    let nat = match &args.anc_nat {
        Some(path) => read_group_list(path)?,
        None => HashSet::new(),
    };
    let hist = match &args.anc_cult {
        Some(path) => read_group_list(path)?,
        None => HashSet::new(),
    };

    let meta = build_meta_index(&table, args.irr_coverage);
    let accum = score_reference_cohort(
        &args.gt_tsv,
        samples_order.len(),
        &ancients,
        &meta,
        args.max_occ,
        args.chunk_size,
        sep,
    )?;
    let rows = finalize_irr(&samples_order, &ancients, &accum, &nat, &hist);

    let irr_path = PathBuf::from(format!("{}.irr_per_individual.csv", args.out_prefix));
    write_irr_table(&rows, &irr_path)?;
    info!(
        "Wrote IRR scores for {} individuals to {}",
        rows.len(),
        irr_path.display()
    );
    display_irr_entries(&rows, 12);

    let sentinel = PathBuf::from(format!("{}.done", args.out_prefix));
    write_done_sentinel(&sentinel, &format!("individuals={}", rows.len()))?;

    println!("{}", "Analysis complete.".green());
    Ok(())
}
