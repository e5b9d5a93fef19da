use rarerep::parse::{parse_separator, read_group_list, read_sample_order};
use rarerep::process::{
    aggregate_gt_table, build_col_index, write_done_sentinel, CohortConfig, GtError,
};

use std::path::PathBuf;
use clap::Parser;
use colored::Colorize;
use env_logger::Builder;
use log::{info, LevelFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked per-group allele counting over a flat genotype table", long_about = None)]
struct Args {
    /// Genotype table exported by bcftools query (%CHROM %POS %REF %ALT [GT x N]); may be gzipped
    #[arg(long = "gt_tsv")]
    gt_tsv: PathBuf,

    /// Sample ordering of the genotype columns, one ID per line
    #[arg(long = "samples_order")]
    samples_order: PathBuf,

    /// Ancient cohort member list
    #[arg(long = "ancients")]
    ancients: PathBuf,

    /// Cultivated cohort member list
    #[arg(long = "cultivated")]
    cultivated: PathBuf,

    /// Wild cohort member list
    #[arg(long = "wild")]
    wild: PathBuf,

    /// Optional ancient sub-lineage list: natural relicts
    #[arg(long = "anc_nat")]
    anc_nat: Option<PathBuf>,

    /// Optional ancient sub-lineage list: historically cultivated
    #[arg(long = "anc_cult")]
    anc_cult: Option<PathBuf>,

    /// Optional ancient sub-lineage list: admixed lineage
    #[arg(long = "anc_admix")]
    anc_admix: Option<PathBuf>,

    /// Optional ancient sub-lineage list: Minjiang lineage
    #[arg(long = "anc_min")]
    anc_min: Option<PathBuf>,

    /// Optional ancient sub-lineage list: Zhujiang lineage
    #[arg(long = "anc_zhu")]
    anc_zhu: Option<PathBuf>,

    /// Output allele table (TSV)
    #[arg(long = "out", default_value = "allele_table.with_flags.tsv")]
    out: PathBuf,

    /// Rows per chunk
    #[arg(long = "chunk_size", default_value = "200000")]
    chunk_size: usize,

    /// Input field separator ("\t" or "tab" for a tab)
    #[arg(long = "sep", default_value = "\t")]
    sep: String,
}

fn main() -> Result<(), GtError> {
    Builder::new().filter_level(LevelFilter::Info).init();
    let args = Args::parse();

    println!("{}", "Starting allele-count aggregation...".green());

    let sep = parse_separator(&args.sep)?;
    let samples_order = read_sample_order(&args.samples_order)?;
    info!(
        "Loaded {} samples from {}",
        samples_order.len(),
        args.samples_order.display()
    );

    let config = resolve_cohorts(&args, &samples_order)?;
    for group in config.groups() {
        info!("Group {}: {} genotype columns", group.label, group.cols.len());
    }

    let n_rows = aggregate_gt_table(
        &args.gt_tsv,
        samples_order.len(),
        &config,
        &args.out,
        args.chunk_size,
        sep,
    )?;
    info!("Wrote {} rows to {}", n_rows, args.out.display());

    let sentinel = PathBuf::from(format!("{}.done", args.out.display()));
    write_done_sentinel(&sentinel, &format!("rows={}", n_rows))?;

    println!("{}", "Aggregation complete.".green());
    Ok(())
}

/// Resolves every supplied group list into column offsets, once, up front.
fn resolve_cohorts(args: &Args, samples_order: &[String]) -> Result<CohortConfig, GtError> {
    let ancients = read_group_list(&args.ancients)?;
    let cultivated = read_group_list(&args.cultivated)?;
    let wild = read_group_list(&args.wild)?;

    let optional: [(&Option<PathBuf>, &str); 5] = [
        (&args.anc_nat, "anc_nat"),
        (&args.anc_cult, "anc_cult"),
        (&args.anc_admix, "anc_admix"),
        (&args.anc_min, "anc_min"),
        (&args.anc_zhu, "anc_zhu"),
    ];
    let mut sublineages = Vec::new();
    for (path, label) in optional {
        if let Some(path) = path {
            let members = read_group_list(path)?;
            sublineages.push(build_col_index(samples_order, &members, label));
        }
    }

    Ok(CohortConfig {
        ancients: build_col_index(samples_order, &ancients, "anc"),
        cultivated: build_col_index(samples_order, &cultivated, "cult"),
        wild: build_col_index(samples_order, &wild, "wild"),
        sublineages,
    })
}
