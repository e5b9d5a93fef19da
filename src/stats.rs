use crate::process::{format_optional_float, GtError, VariantKey};

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use csv::{ReaderBuilder, WriterBuilder};
use log::warn;
use once_cell::sync::Lazy;

/// Frequency class of one allele in the combined cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreqBin {
    Singleton,
    /// fa < 0.5%
    Below05,
    /// 0.5% <= fa < 1%
    Pct05To1,
    /// 1% <= fa < 5%
    Pct1To5,
    /// fa >= 5%
    Above5,
    Undefined,
}

impl FreqBin {
    pub fn label(self) -> &'static str {
        match self {
            FreqBin::Singleton => "singleton",
            FreqBin::Below05 => "<0.5%",
            FreqBin::Pct05To1 => "0.5–1%",
            FreqBin::Pct1To5 => "1–5%",
            FreqBin::Above5 => ">5%",
            FreqBin::Undefined => "NA",
        }
    }
}

/// Rarest-first order for per-bin output rows.
static BIN_ORDER: Lazy<Vec<FreqBin>> = Lazy::new(|| {
    vec![
        FreqBin::Singleton,
        FreqBin::Below05,
        FreqBin::Pct05To1,
        FreqBin::Pct1To5,
        FreqBin::Above5,
        FreqBin::Undefined,
    ]
});

/// Bins one allele. A full-cohort AC of exactly 1 is a singleton regardless
/// of its computed frequency; the AC check must precede the frequency
/// ladder. Lower bin bounds are half-open: fa = 0.005 lands in `0.5–1%`.
pub fn assign_bin(ac_full: u64, fa_full: Option<f64>) -> FreqBin {
    if ac_full == 1 {
        return FreqBin::Singleton;
    }
    match fa_full {
        None => FreqBin::Undefined,
        Some(fa) if fa < 0.005 => FreqBin::Below05,
        Some(fa) if fa < 0.01 => FreqBin::Pct05To1,
        Some(fa) if fa < 0.05 => FreqBin::Pct1To5,
        Some(_) => FreqBin::Above5,
    }
}

/// Information weight -log10(fa), clamped below at `epsilon`. An undefined
/// full-cohort frequency is scored as 0 before clamping, i.e. maximal
/// rarity; this is deliberate policy, not a fallback.
pub fn information_weight(fa_full: Option<f64>, epsilon: f64) -> f64 {
    -fa_full.unwrap_or(0.0).max(epsilon).log10()
}

/// One row of the pass-one allele table plus the derived full-cohort fields.
#[derive(Debug, Clone)]
pub struct AlleleRecord {
    pub key: VariantKey,
    /// Carrier count within the ancient cohort.
    pub anc_count: u32,
    pub in_anc: bool,
    pub in_cult: bool,
    pub in_wild: bool,
    pub in_cultwild: bool,
    /// Presence flags for the discovered sub-lineage columns, aligned with
    /// `AlleleTable::sublineages`.
    pub in_subs: Vec<bool>,
    pub ac_full: u64,
    pub an_full: u64,
    pub fa_full: Option<f64>,
    pub bin: FreqBin,
    pub weight: f64,
}

pub struct AlleleTable {
    pub records: Vec<AlleleRecord>,
    /// Labels of the optional sub-lineage groups present in the header.
    pub sublineages: Vec<String>,
}

const REQUIRED_COLUMNS: [&str; 14] = [
    "CHR", "POS", "REF", "ALT", "anc_count", "in_anc", "in_cult", "in_wild",
    "AC_anc", "AN_anc", "AC_cult", "AN_cult", "AC_wild", "AN_wild",
];

/// Optional presence columns recognized as summarization targets.
const OPTIONAL_IN_COLUMNS: [&str; 5] = [
    "in_anc_nat",
    "in_anc_cult",
    "in_anc_admix",
    "in_anc_min",
    "in_anc_zhu",
];

/// Loads the aggregated allele table and derives the full-cohort fields.
///
/// AC_full/AN_full sum exactly the three required groups; sub-lineage
/// columns are subsets of the ancient cohort and adding them would double
/// count. A missing required column is fatal and happens before any pass-two
/// output is created.
pub fn load_allele_table(path: &Path, epsilon: f64) -> Result<AlleleTable, GtError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let index: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect();

    for name in REQUIRED_COLUMNS {
        if !index.contains_key(name) {
            return Err(GtError::MissingColumn(name.to_string()));
        }
    }
    let col = |name: &str| index[name];

    let c_chr = col("CHR");
    let c_pos = col("POS");
    let c_ref = col("REF");
    let c_alt = col("ALT");
    let c_anc_count = col("anc_count");
    let c_in_anc = col("in_anc");
    let c_in_cult = col("in_cult");
    let c_in_wild = col("in_wild");
    let c_ac = [col("AC_anc"), col("AC_cult"), col("AC_wild")];
    let c_an = [col("AN_anc"), col("AN_cult"), col("AN_wild")];

    let mut sublineages = Vec::new();
    let mut sub_cols = Vec::new();
    for name in OPTIONAL_IN_COLUMNS {
        if let Some(&i) = index.get(name) {
            sublineages.push(name.trim_start_matches("in_").to_string());
            sub_cols.push(i);
        }
    }

    let mut records = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;
        let line = row_idx + 2; // header is line 1
        let field = |i: usize| record.get(i).unwrap_or("");

        let key = VariantKey {
            chrom: field(c_chr).to_string(),
            pos: field(c_pos).to_string(),
            reference: field(c_ref).to_string(),
            alternate: field(c_alt).to_string(),
        };
        let anc_count = parse_num(field(c_anc_count), "anc_count", line)? as u32;
        let in_anc = parse_num(field(c_in_anc), "in_anc", line)? != 0.0;
        let in_cult = parse_num(field(c_in_cult), "in_cult", line)? != 0.0;
        let in_wild = parse_num(field(c_in_wild), "in_wild", line)? != 0.0;
        let in_subs = sub_cols
            .iter()
            .zip(&sublineages)
            .map(|(&i, name)| Ok(parse_num(field(i), name, line)? != 0.0))
            .collect::<Result<Vec<bool>, GtError>>()?;

        let mut ac_full = 0u64;
        let mut an_full = 0u64;
        for (&ci, &cj) in c_ac.iter().zip(c_an.iter()) {
            ac_full += parse_num(field(ci), "AC", line)? as u64;
            an_full += parse_num(field(cj), "AN", line)? as u64;
        }
        let fa_full = if an_full > 0 {
            Some(ac_full as f64 / an_full as f64)
        } else {
            None
        };
        let bin = assign_bin(ac_full, fa_full);
        let weight = information_weight(fa_full, epsilon);

        records.push(AlleleRecord {
            key,
            anc_count,
            in_anc,
            in_cult,
            in_wild,
            in_cultwild: in_cult || in_wild,
            in_subs,
            ac_full,
            an_full,
            fa_full,
            bin,
            weight,
        });
    }

    Ok(AlleleTable {
        records,
        sublineages,
    })
}

fn parse_num(field: &str, name: &str, line: usize) -> Result<f64, GtError> {
    field.trim().parse::<f64>().map_err(|_| {
        GtError::Parse(format!(
            "allele table row {}: invalid {} value {:?}",
            line, name, field
        ))
    })
}

/// External-reference coverage predicates evaluated against each allele.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverPredicate {
    Cultivated,
    Wild,
    CultivatedOrWild,
}

impl CoverPredicate {
    pub fn name(self) -> &'static str {
        match self {
            CoverPredicate::Cultivated => "covered_by_cultivated",
            CoverPredicate::Wild => "covered_by_wild",
            CoverPredicate::CultivatedOrWild => "covered_by_cultivated_or_wild",
        }
    }

    fn holds(self, record: &AlleleRecord) -> bool {
        match self {
            CoverPredicate::Cultivated => record.in_cult,
            CoverPredicate::Wild => record.in_wild,
            CoverPredicate::CultivatedOrWild => record.in_cultwild,
        }
    }
}

struct CombinationStats {
    n: usize,
    unweighted: f64,
    weighted: Option<f64>,
    /// (bin, n_in_bin, unweighted, weighted) for non-empty bins, rarest
    /// first.
    by_bin: Vec<(FreqBin, usize, f64, Option<f64>)>,
}

fn combination_stats(
    records: &[AlleleRecord],
    members: &[usize],
    cover: CoverPredicate,
) -> CombinationStats {
    let mut covered = 0usize;
    let mut w_sum = 0.0;
    let mut w_cov = 0.0;
    let mut bins: HashMap<FreqBin, (usize, usize, f64, f64)> = HashMap::new();
    for &i in members {
        let record = &records[i];
        let hit = cover.holds(record);
        covered += hit as usize;
        w_sum += record.weight;
        if hit {
            w_cov += record.weight;
        }
        let entry = bins.entry(record.bin).or_insert((0, 0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += hit as usize;
        entry.2 += record.weight;
        if hit {
            entry.3 += record.weight;
        }
    }
    let by_bin = BIN_ORDER
        .iter()
        .filter_map(|bin| {
            bins.get(bin).map(|&(n_bin, cov_bin, ws, wc)| {
                (
                    *bin,
                    n_bin,
                    cov_bin as f64 / n_bin as f64,
                    if ws > 0.0 { Some(wc / ws) } else { None },
                )
            })
        })
        .collect();
    CombinationStats {
        n: members.len(),
        unweighted: covered as f64 / members.len() as f64,
        weighted: if w_sum > 0.0 { Some(w_cov / w_sum) } else { None },
        by_bin,
    }
}

/// Variant subsets acting as summarization targets, in fixed output order:
/// the ancient cohort, each discovered sub-lineage, then the wild cohort.
fn target_members(table: &AlleleTable) -> Vec<(String, Vec<usize>)> {
    let member_indices = |pred: &dyn Fn(&AlleleRecord) -> bool| -> Vec<usize> {
        table
            .records
            .iter()
            .enumerate()
            .filter(|&(_, r)| pred(r))
            .map(|(i, _)| i)
            .collect()
    };

    let mut targets = Vec::new();
    targets.push(("ancients".to_string(), member_indices(&|r| r.in_anc)));
    for (s, label) in table.sublineages.iter().enumerate() {
        targets.push((label.clone(), member_indices(&|r| r.in_subs[s])));
    }
    targets.push(("wild".to_string(), member_indices(&|r| r.in_wild)));
    targets
}

/// Enumerates the enabled target-coverage combinations, writes one by-bin
/// detail CSV per combination plus the cumulative summary CSV. The wild
/// target is only measured against cultivated coverage (wild covering
/// itself is degenerate). Empty targets are skipped with a warning, not an
/// error. Returns the number of combinations written.
pub fn summarize_coverage(table: &AlleleTable, out_prefix: &str) -> Result<usize, GtError> {
    let targets = target_members(table);
    let covers = [
        CoverPredicate::Cultivated,
        CoverPredicate::Wild,
        CoverPredicate::CultivatedOrWild,
    ];

    let summary_path = format!("{}.ac_wac_summary.csv", out_prefix);
    let mut summary =
        WriterBuilder::new().from_writer(BufWriter::new(File::create(&summary_path)?));
    summary.write_record([
        "target",
        "cover",
        "n_AS",
        "AC_overall",
        "wAC_overall",
        "bin",
        "n_in_bin",
        "AC_bin",
        "wAC_bin",
    ])?;

    let mut n_combinations = 0usize;
    for (target, members) in &targets {
        if members.is_empty() {
            warn!("Target {} has 0 alleles; skipping", target);
            continue;
        }
        for cover in covers {
            if target.as_str() == "wild" && cover != CoverPredicate::Cultivated {
                continue;
            }
            let stats = combination_stats(&table.records, members, cover);
            write_bybin_detail(out_prefix, target, cover, &stats)?;

            summary.write_record(&[
                target.clone(),
                cover.name().to_string(),
                stats.n.to_string(),
                format!("{:.6}", stats.unweighted),
                format_optional_float(stats.weighted),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
            ])?;
            for (bin, n_bin, ac, wac) in &stats.by_bin {
                summary.write_record(&[
                    target.clone(),
                    cover.name().to_string(),
                    String::new(),
                    String::new(),
                    String::new(),
                    bin.label().to_string(),
                    n_bin.to_string(),
                    format!("{:.6}", ac),
                    format_optional_float(*wac),
                ])?;
            }
            n_combinations += 1;
        }
    }
    summary.flush()?;
    Ok(n_combinations)
}

fn write_bybin_detail(
    out_prefix: &str,
    target: &str,
    cover: CoverPredicate,
    stats: &CombinationStats,
) -> Result<(), GtError> {
    let path = format!(
        "{}.ac_wac_bybin.{}.{}.csv",
        out_prefix,
        target,
        cover.name()
    );
    let mut writer = WriterBuilder::new().from_writer(BufWriter::new(File::create(&path)?));
    writer.write_record(["bin", "n_alleles", "AC", "wAC"])?;
    for (bin, n_bin, ac, wac) in &stats.by_bin {
        writer.write_record(&[
            bin.label().to_string(),
            n_bin.to_string(),
            format!("{:.6}", ac),
            format_optional_float(*wac),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
