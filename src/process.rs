use crate::parse::{open_gt_reader, GtChunk, GtChunkReader};
use crate::stats::assign_bin;

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use chrono::Local;
use csv::WriterBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use log::{info, warn};
use ndarray::Array2;
use thiserror::Error;

/// Leading non-genotype columns of the table: CHROM, POS, REF, ALT.
pub const GT_LEADING_COLS: usize = 4;

#[derive(Debug, Error)]
pub enum GtError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("missing column in allele table: {0}")]
    MissingColumn(String),
    #[error("no usable samples: {0}")]
    NoSamples(String),
}

impl From<csv::Error> for GtError {
    fn from(e: csv::Error) -> Self {
        GtError::Parse(format!("CSV error: {}", e))
    }
}

/// Identity of one ALT allele: (chromosome, position, REF, ALT). Compared
/// textually so both passes key the table the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub chrom: String,
    pub pos: String,
    pub reference: String,
    pub alternate: String,
}

/// Column offsets for one named sample group. Offsets are table columns
/// (position in the sample ordering + `GT_LEADING_COLS`), kept sorted.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub label: String,
    pub cols: Vec<usize>,
}

impl GroupSpec {
    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }
}

/// Which groups were supplied and where their genotype columns live.
/// Resolved once at startup; every downstream stage consults this instead of
/// re-checking per row. `sublineages` holds only the optional groups that
/// were actually provided, in their fixed order.
#[derive(Debug, Clone)]
pub struct CohortConfig {
    pub ancients: GroupSpec,
    pub cultivated: GroupSpec,
    pub wild: GroupSpec,
    pub sublineages: Vec<GroupSpec>,
}

impl CohortConfig {
    /// The three required groups, in output order.
    pub fn base_groups(&self) -> impl Iterator<Item = &GroupSpec> {
        [&self.ancients, &self.cultivated, &self.wild].into_iter()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupSpec> {
        self.base_groups().chain(self.sublineages.iter())
    }
}

/// Maps group members to their table-column offsets. Members absent from the
/// ordering are excluded with a warning; this never aborts the run.
pub fn build_col_index(
    samples_order: &[String],
    members: &HashSet<String>,
    label: &str,
) -> GroupSpec {
    let mut cols = Vec::with_capacity(members.len());
    for (i, sample) in samples_order.iter().enumerate() {
        if members.contains(sample) {
            cols.push(i + GT_LEADING_COLS);
        }
    }
    if cols.len() < members.len() {
        let present: HashSet<&String> = samples_order.iter().collect();
        let mut missing: Vec<&str> = members
            .iter()
            .filter(|m| !present.contains(m))
            .map(|m| m.as_str())
            .collect();
        missing.sort_unstable();
        warn!(
            "{}: {} IDs not found in sample ordering: {}{}",
            label,
            missing.len(),
            missing.iter().take(5).join(", "),
            if missing.len() > 5 { " ..." } else { "" }
        );
    }
    GroupSpec {
        label: label.to_string(),
        cols,
    }
}

/// Per-row allele statistics for one group over one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStats {
    pub ac: Vec<u32>,
    pub an: Vec<u32>,
    pub carriers: Vec<u32>,
}

/// AC = summed dosage over non-missing calls, AN = 2 x non-missing calls,
/// carriers = calls with dosage > 0. An unconfigured group (empty column
/// set) yields all-zero vectors of the chunk's row count.
pub fn group_stats(dosages: &Array2<f64>, cols: &[usize]) -> GroupStats {
    let n_rows = dosages.nrows();
    let mut stats = GroupStats {
        ac: vec![0; n_rows],
        an: vec![0; n_rows],
        carriers: vec![0; n_rows],
    };
    if cols.is_empty() {
        return stats;
    }
    for (i, row) in dosages.outer_iter().enumerate() {
        let mut ac = 0u32;
        let mut called = 0u32;
        let mut carriers = 0u32;
        for &col in cols {
            let d = row[col - GT_LEADING_COLS];
            if d.is_nan() {
                continue;
            }
            ac += d as u32;
            called += 1;
            if d > 0.0 {
                carriers += 1;
            }
        }
        stats.ac[i] = ac;
        stats.an[i] = 2 * called;
        stats.carriers[i] = carriers;
    }
    stats
}

/// First pass: streams the genotype table in row chunks, aggregates every
/// configured group, and appends one output row per variant to `out_path`.
/// The header goes out with the first chunk only; rows keep input order. A
/// pre-existing output file is removed before the run starts so repeated
/// runs never append to stale data. Returns the number of rows written.
pub fn aggregate_gt_table(
    gt_path: &Path,
    n_samples: usize,
    config: &CohortConfig,
    out_path: &Path,
    chunk_size: usize,
    sep: char,
) -> Result<u64, GtError> {
    if out_path.exists() {
        fs::remove_file(out_path)?;
    }
    let reader = open_gt_reader(gt_path)?;
    let mut chunks = GtChunkReader::new(reader, n_samples, chunk_size, sep);

    let file = File::create(out_path)?;
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(BufWriter::new(file));

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("Failed to set progress bar template"),
    );

    let mut chunk_idx = 0u64;
    let mut total_rows = 0u64;
    while let Some(chunk) = chunks.next_chunk()? {
        chunk_idx += 1;
        if chunk_idx == 1 {
            write_table_header(&mut writer, config)?;
        }
        total_rows += chunk.n_rows() as u64;
        spinner.set_message(format!("chunk #{}: {} rows", chunk_idx, chunk.n_rows()));
        info!("Processing chunk #{}, rows={}", chunk_idx, chunk.n_rows());
        write_chunk_rows(&mut writer, config, &chunk)?;
    }
    writer.flush()?;
    spinner.finish_with_message(format!("{} rows aggregated", total_rows));
    Ok(total_rows)
}

fn write_table_header(
    writer: &mut csv::Writer<BufWriter<File>>,
    config: &CohortConfig,
) -> Result<(), GtError> {
    let mut header: Vec<String> = ["CHR", "POS", "REF", "ALT"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for g in config.base_groups() {
        header.push(format!("{}_count", g.label));
    }
    for g in config.base_groups() {
        header.push(format!("in_{}", g.label));
    }
    for g in config.base_groups() {
        header.push(format!("AC_{}", g.label));
        header.push(format!("AN_{}", g.label));
    }
    for g in &config.sublineages {
        header.push(format!("{}_count", g.label));
        header.push(format!("in_{}", g.label));
        header.push(format!("AC_{}", g.label));
        header.push(format!("AN_{}", g.label));
    }
    for g in config.base_groups() {
        header.push(format!("fa_{}", g.label));
    }
    for g in &config.sublineages {
        header.push(format!("fa_{}", g.label));
    }
    for name in ["AC_full", "AN_full", "fa_full", "bin"] {
        header.push(name.to_string());
    }
    writer.write_record(&header)?;
    Ok(())
}

fn write_chunk_rows(
    writer: &mut csv::Writer<BufWriter<File>>,
    config: &CohortConfig,
    chunk: &GtChunk,
) -> Result<(), GtError> {
    let base: Vec<GroupStats> = config
        .base_groups()
        .map(|g| group_stats(&chunk.dosages, &g.cols))
        .collect();
    let subs: Vec<GroupStats> = config
        .sublineages
        .iter()
        .map(|g| group_stats(&chunk.dosages, &g.cols))
        .collect();

    for i in 0..chunk.n_rows() {
        let key = &chunk.keys[i];
        let mut record: Vec<String> = vec![
            key.chrom.clone(),
            key.pos.clone(),
            key.reference.clone(),
            key.alternate.clone(),
        ];
        for s in &base {
            record.push(s.carriers[i].to_string());
        }
        for s in &base {
            record.push(((s.carriers[i] > 0) as u8).to_string());
        }
        for s in &base {
            record.push(s.ac[i].to_string());
            record.push(s.an[i].to_string());
        }
        for s in &subs {
            record.push(s.carriers[i].to_string());
            record.push(((s.carriers[i] > 0) as u8).to_string());
            record.push(s.ac[i].to_string());
            record.push(s.an[i].to_string());
        }
        for s in &base {
            record.push(format_frequency(s.ac[i], s.an[i]));
        }
        for s in &subs {
            record.push(format_frequency(s.ac[i], s.an[i]));
        }
        // Full-cohort columns sum the three required groups only; the
        // sub-lineages are subsets of the ancient cohort and would double
        // count.
        let ac_full: u32 = base.iter().map(|s| s.ac[i]).sum();
        let an_full: u32 = base.iter().map(|s| s.an[i]).sum();
        let fa_full = if an_full > 0 {
            Some(ac_full as f64 / an_full as f64)
        } else {
            None
        };
        record.push(ac_full.to_string());
        record.push(an_full.to_string());
        record.push(format_frequency(ac_full, an_full));
        record.push(assign_bin(ac_full as u64, fa_full).label().to_string());
        writer.write_record(&record)?;
    }
    Ok(())
}

/// AC/AN, or "NA" when AN is zero. An undefined frequency must stay
/// distinguishable from an observed frequency of zero.
pub fn format_frequency(ac: u32, an: u32) -> String {
    if an > 0 {
        format!("{:.6}", ac as f64 / an as f64)
    } else {
        "NA".to_string()
    }
}

pub fn format_optional_float(val_opt: Option<f64>) -> String {
    match val_opt {
        Some(f) if !f.is_nan() => format!("{:.6}", f),
        _ => "NA".to_string(),
    }
}

/// Writes the success sentinel marking a completed run. Because output is
/// appended chunk by chunk, callers treat the sentinel's presence, not the
/// data file's existence, as the completeness signal.
pub fn write_done_sentinel(path: &Path, detail: &str) -> Result<(), GtError> {
    let mut file = File::create(path)?;
    writeln!(
        file,
        "completed {} {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        detail
    )?;
    Ok(())
}
