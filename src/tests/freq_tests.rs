use crate::process::{GtError, VariantKey};
use crate::stats::{
    assign_bin, information_weight, load_allele_table, summarize_coverage, AlleleRecord,
    AlleleTable, FreqBin,
};

use std::fs;
use tempfile::tempdir;

#[test]
fn singleton_takes_precedence_over_frequency() {
    // AC_full=1, AN_full=2 gives fa=0.5, squarely in the >5% range; the
    // singleton check must win anyway.
    assert_eq!(assign_bin(1, Some(0.5)), FreqBin::Singleton);
    assert_eq!(assign_bin(1, Some(0.0001)), FreqBin::Singleton);
}

#[test]
fn bin_boundaries_are_half_open_below() {
    assert_eq!(assign_bin(2, Some(0.0049)), FreqBin::Below05);
    assert_eq!(assign_bin(2, Some(0.005)), FreqBin::Pct05To1);
    assert_eq!(assign_bin(2, Some(0.0099)), FreqBin::Pct05To1);
    assert_eq!(assign_bin(2, Some(0.01)), FreqBin::Pct1To5);
    assert_eq!(assign_bin(2, Some(0.0499)), FreqBin::Pct1To5);
    assert_eq!(assign_bin(2, Some(0.05)), FreqBin::Above5);
    assert_eq!(assign_bin(2, Some(0.5)), FreqBin::Above5);
    assert_eq!(assign_bin(0, None), FreqBin::Undefined);
}

#[test]
fn weight_clamps_at_epsilon_and_maximizes_undefined() {
    let eps = 1e-3;
    assert!((information_weight(Some(0.1), eps) - 1.0).abs() < 1e-12);
    assert!((information_weight(Some(1.0), eps) - 0.0).abs() < 1e-12);
    // Below the clamp, and for an undefined frequency (treated as 0), the
    // weight saturates at -log10(epsilon).
    assert!((information_weight(Some(1e-9), eps) - 3.0).abs() < 1e-12);
    assert!((information_weight(None, eps) - 3.0).abs() < 1e-12);
}

#[test]
fn full_cohort_sums_exclude_sublineage_columns() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("allele_table.tsv");
    // AC_anc_nat is deliberately absurd (99); it must not leak into AC_full.
    fs::write(
        &path,
        "CHR\tPOS\tREF\tALT\tanc_count\tin_anc\tin_cult\tin_wild\t\
         AC_anc\tAN_anc\tAC_cult\tAN_cult\tAC_wild\tAN_wild\t\
         anc_nat_count\tin_anc_nat\tAC_anc_nat\tAN_anc_nat\n\
         1\t100\tA\tT\t1\t1\t1\t1\t1\t4\t1\t2\t1\t2\t1\t1\t99\t99\n",
    )
    .unwrap();

    let table = load_allele_table(&path, 1e-3).unwrap();
    assert_eq!(table.sublineages, vec!["anc_nat".to_string()]);
    assert_eq!(table.records.len(), 1);

    let record = &table.records[0];
    assert_eq!(record.ac_full, 3);
    assert_eq!(record.an_full, 8);
    assert!((record.fa_full.unwrap() - 0.375).abs() < 1e-12);
    assert_eq!(record.bin, FreqBin::Above5);
    assert_eq!(record.in_subs, vec![true]);
    assert!(record.in_cultwild);
    assert_eq!(
        record.key,
        VariantKey {
            chrom: "1".to_string(),
            pos: "100".to_string(),
            reference: "A".to_string(),
            alternate: "T".to_string(),
        }
    );
}

#[test]
fn missing_required_column_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("allele_table.tsv");
    // No anc_count column.
    fs::write(
        &path,
        "CHR\tPOS\tREF\tALT\tin_anc\tin_cult\tin_wild\t\
         AC_anc\tAN_anc\tAC_cult\tAN_cult\tAC_wild\tAN_wild\n\
         1\t100\tA\tT\t1\t1\t1\t1\t4\t1\t2\t1\t2\n",
    )
    .unwrap();

    match load_allele_table(&path, 1e-3) {
        Err(GtError::MissingColumn(name)) => assert_eq!(name, "anc_count"),
        other => panic!("expected MissingColumn error, got {:?}", other.map(|t| t.records.len())),
    }
}

fn record(
    pos: &str,
    in_anc: bool,
    in_cult: bool,
    in_wild: bool,
    weight: f64,
    bin: FreqBin,
) -> AlleleRecord {
    AlleleRecord {
        key: VariantKey {
            chrom: "1".to_string(),
            pos: pos.to_string(),
            reference: "A".to_string(),
            alternate: "T".to_string(),
        },
        anc_count: 1,
        in_anc,
        in_cult,
        in_wild,
        in_cultwild: in_cult || in_wild,
        in_subs: Vec::new(),
        ac_full: 2,
        an_full: 100,
        fa_full: Some(0.02),
        bin,
        weight,
    }
}

#[test]
fn summarizer_skips_empty_targets_and_reports_weighted_coverage() {
    let table = AlleleTable {
        records: vec![
            record("100", true, true, false, 3.0, FreqBin::Singleton),
            record("200", true, false, false, 2.0, FreqBin::Below05),
        ],
        sublineages: Vec::new(),
    };

    let dir = tempdir().unwrap();
    let prefix = dir.path().join("t").to_str().unwrap().to_string();
    // The wild target is empty, so only the ancient target's three coverage
    // pairings are emitted.
    let n = summarize_coverage(&table, &prefix).unwrap();
    assert_eq!(n, 3);

    let summary = fs::read_to_string(format!("{}.ac_wac_summary.csv", prefix)).unwrap();
    // Overall: 1 of 2 covered; weighted 3.0/5.0.
    assert!(summary.contains("ancients,covered_by_cultivated,2,0.500000,0.600000,,,,"));
    // The singleton bin is fully covered, the <0.5% bin not at all.
    assert!(summary.contains("ancients,covered_by_cultivated,,,,singleton,1,1.000000,1.000000"));
    assert!(summary.contains("ancients,covered_by_cultivated,,,,<0.5%,1,0.000000,0.000000"));
    assert!(!summary.contains("wild,covered_by_cultivated"));

    assert!(dir
        .path()
        .join("t.ac_wac_bybin.ancients.covered_by_cultivated.csv")
        .exists());
    assert!(dir
        .path()
        .join("t.ac_wac_bybin.ancients.covered_by_wild.csv")
        .exists());
    assert!(!dir
        .path()
        .join("t.ac_wac_bybin.wild.covered_by_cultivated.csv")
        .exists());
}

#[test]
fn wild_target_pairs_only_with_cultivated_coverage() {
    let table = AlleleTable {
        records: vec![record("100", false, true, true, 1.0, FreqBin::Above5)],
        sublineages: Vec::new(),
    };

    let dir = tempdir().unwrap();
    let prefix = dir.path().join("w").to_str().unwrap().to_string();
    // ancients target is empty (skipped); wild yields exactly one pairing.
    let n = summarize_coverage(&table, &prefix).unwrap();
    assert_eq!(n, 1);

    assert!(dir
        .path()
        .join("w.ac_wac_bybin.wild.covered_by_cultivated.csv")
        .exists());
    assert!(!dir
        .path()
        .join("w.ac_wac_bybin.wild.covered_by_wild.csv")
        .exists());
    assert!(!dir
        .path()
        .join("w.ac_wac_bybin.wild.covered_by_cultivated_or_wild.csv")
        .exists());
}

#[test]
fn zero_weight_sum_yields_na_weighted_coverage() {
    let table = AlleleTable {
        records: vec![record("100", true, true, false, 0.0, FreqBin::Above5)],
        sublineages: Vec::new(),
    };

    let dir = tempdir().unwrap();
    let prefix = dir.path().join("z").to_str().unwrap().to_string();
    summarize_coverage(&table, &prefix).unwrap();

    let summary = fs::read_to_string(format!("{}.ac_wac_summary.csv", prefix)).unwrap();
    assert!(summary.contains("ancients,covered_by_cultivated,1,1.000000,NA,,,,"));
}
