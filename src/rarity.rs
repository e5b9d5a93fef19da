use crate::parse::{open_gt_reader, GtChunkReader};
use crate::process::{format_optional_float, GroupSpec, GtError, VariantKey, GT_LEADING_COLS};
use crate::stats::AlleleTable;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use clap::ValueEnum;
use colored::Colorize;
use csv::WriterBuilder;
use log::info;
use prettytable::{row, Table};
use rayon::prelude::*;

/// Which external presence flag counts as coverage for the IRR numerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CoverageBasis {
    /// Covered when the allele occurs in the cultivated cohort.
    #[value(name = "cult")]
    Cultivated,
    /// Covered when the allele occurs in the cultivated or wild cohort.
    #[value(name = "cultwild")]
    CultivatedOrWild,
}

/// Per-variant lookup payload for the second pass.
#[derive(Debug, Clone, Copy)]
pub struct VariantMeta {
    pub anc_count: u32,
    pub covered: bool,
    pub weight: f64,
}

/// Builds the identity-keyed lookup once, before streaming begins; the
/// second pass only ever consults this map.
pub fn build_meta_index(
    table: &AlleleTable,
    basis: CoverageBasis,
) -> HashMap<VariantKey, VariantMeta> {
    table
        .records
        .iter()
        .map(|record| {
            let covered = match basis {
                CoverageBasis::Cultivated => record.in_cult,
                CoverageBasis::CultivatedOrWild => record.in_cultwild,
            };
            (
                record.key.clone(),
                VariantMeta {
                    anc_count: record.anc_count,
                    covered,
                    weight: record.weight,
                },
            )
        })
        .collect()
}

/// Running sums for one individual; partial sums are merged across chunk
/// boundaries by plain addition.
#[derive(Debug, Clone, Copy, Default)]
pub struct IrrAccumulator {
    pub num: f64,
    pub den: f64,
}

/// Final per-individual record.
#[derive(Debug, Clone)]
pub struct IrrRow {
    pub id: String,
    pub group: String,
    pub irr: f64,
    pub irr_norm: Option<f64>,
}

/// Second streaming pass. Decodes only the reference-cohort columns of the
/// genotype table; for every individual and every eligible row where the
/// individual carries the allele, accumulates weight x (1 - covered) and
/// the weight total. A row is eligible when its identity resolves in the
/// allele table and its ancient carrier count is at most `max_occ`;
/// unresolved identities are excluded, not treated as zero.
pub fn score_reference_cohort(
    gt_path: &Path,
    n_samples: usize,
    ancients: &GroupSpec,
    meta: &HashMap<VariantKey, VariantMeta>,
    max_occ: u32,
    chunk_size: usize,
    sep: char,
) -> Result<Vec<IrrAccumulator>, GtError> {
    if ancients.is_empty() {
        return Err(GtError::NoSamples(
            "no ancient IDs found in sample ordering".to_string(),
        ));
    }
    let reader = open_gt_reader(gt_path)?;
    let mut chunks = GtChunkReader::with_columns(
        reader,
        n_samples,
        chunk_size,
        sep,
        ancients.cols.clone(),
    );
    let mut accum = vec![IrrAccumulator::default(); ancients.cols.len()];

    let mut chunk_idx = 0u64;
    while let Some(chunk) = chunks.next_chunk()? {
        chunk_idx += 1;
        info!("IRR pass, chunk #{}, rows={}", chunk_idx, chunk.n_rows());

        // Row eligibility is shared by every individual in the chunk.
        let row_meta: Vec<Option<&VariantMeta>> = chunk
            .keys
            .iter()
            .map(|key| meta.get(key).filter(|m| m.anc_count <= max_occ))
            .collect();

        let dosages = &chunk.dosages;
        accum.par_iter_mut().enumerate().for_each(|(j, acc)| {
            let column = dosages.column(j);
            for (dosage, meta) in column.iter().zip(&row_meta) {
                if let Some(meta) = meta {
                    // Missing calls are NaN and fail the carrier test.
                    if *dosage > 0.0 {
                        acc.num += meta.weight * (1.0 - meta.covered as u8 as f64);
                        acc.den += meta.weight;
                    }
                }
            }
        });
    }
    Ok(accum)
}

/// Labels one individual by sub-lineage membership; the first list wins.
/// Labeling only affects downstream grouping, never the scores.
pub fn label_sublineage(
    id: &str,
    nat: &HashSet<String>,
    hist: &HashSet<String>,
) -> &'static str {
    if nat.contains(id) {
        "anc_nat"
    } else if hist.contains(id) {
        "anc_cult"
    } else {
        "anc_other"
    }
}

/// Turns the raw accumulators into output rows: IRR is the weighted
/// uncovered-rarity mass, IRR_norm01 its [0,1] normalization (undefined when
/// the individual carries no eligible rare allele). Rows sort by group, then
/// normalized score descending with undefined last, then id, so repeated
/// runs emit identical tables.
pub fn finalize_irr(
    samples_order: &[String],
    ancients: &GroupSpec,
    accum: &[IrrAccumulator],
    nat: &HashSet<String>,
    hist: &HashSet<String>,
) -> Vec<IrrRow> {
    let mut rows: Vec<IrrRow> = ancients
        .cols
        .iter()
        .zip(accum)
        .map(|(&col, acc)| {
            let id = samples_order[col - GT_LEADING_COLS].clone();
            let group = label_sublineage(&id, nat, hist).to_string();
            let irr_norm = if acc.den > 0.0 {
                Some(acc.num / acc.den)
            } else {
                None
            };
            IrrRow {
                id,
                group,
                irr: acc.num,
                irr_norm,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.group
            .cmp(&b.group)
            .then_with(|| match (a.irr_norm, b.irr_norm) {
                (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    rows
}

pub fn write_irr_table(rows: &[IrrRow], path: &Path) -> Result<(), GtError> {
    let mut writer = WriterBuilder::new().from_writer(BufWriter::new(File::create(path)?));
    writer.write_record(["id", "group", "IRR", "IRR_norm01"])?;
    for row in rows {
        writer.write_record(&[
            row.id.clone(),
            row.group.clone(),
            format!("{:.6}", row.irr),
            format_optional_float(row.irr_norm),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Prints the top-scoring individuals as a terminal table.
pub fn display_irr_entries(rows: &[IrrRow], limit: usize) {
    let mut output = Vec::new();
    let mut table = Table::new();
    table.add_row(row!["Rank", "ID", "Group", "IRR", "IRR_norm01"]);
    for (i, entry) in rows.iter().take(limit).enumerate() {
        table.add_row(row![
            i + 1,
            entry.id,
            entry.group,
            format!("{:.4}", entry.irr),
            format_optional_float(entry.irr_norm)
        ]);
    }
    if table.print(&mut output).is_err() {
        return;
    }
    let table_string = String::from_utf8_lossy(&output);
    print!(
        "\n{}\n{}",
        "Top IRR individuals:".green().bold(),
        table_string
    );
    if rows.len() > limit {
        println!("... and {} more individuals.", rows.len() - limit);
    }
}
