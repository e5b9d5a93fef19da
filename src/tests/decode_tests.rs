use crate::parse::{decode_genotype, parse_separator};

#[test]
fn decode_homozygous_and_heterozygous_calls() {
    assert_eq!(decode_genotype("0/0"), Some(0));
    assert_eq!(decode_genotype("0|0"), Some(0));
    assert_eq!(decode_genotype("0/1"), Some(1));
    assert_eq!(decode_genotype("1/0"), Some(1));
    assert_eq!(decode_genotype("0|1"), Some(1));
    assert_eq!(decode_genotype("1|0"), Some(1));
    assert_eq!(decode_genotype("1/1"), Some(2));
    assert_eq!(decode_genotype("1|1"), Some(2));
}

#[test]
fn decode_missing_forms() {
    assert_eq!(decode_genotype(""), None);
    assert_eq!(decode_genotype("."), None);
    assert_eq!(decode_genotype("./."), None);
    assert_eq!(decode_genotype(".|."), None);
    // A partially missing genotype is fully missing, not half-missing.
    assert_eq!(decode_genotype("0/."), None);
    assert_eq!(decode_genotype("./0"), None);
    assert_eq!(decode_genotype("1|."), None);
}

#[test]
fn decode_haploid_fallback() {
    assert_eq!(decode_genotype("0"), Some(0));
    assert_eq!(decode_genotype("1"), Some(1));
    assert_eq!(decode_genotype("2"), Some(0));
}

#[test]
fn decode_multiallelic_alt_codes_count_as_ref() {
    // Non-0/1 allele symbols are scored as not-ALT. This is the documented
    // simplification for multi-allelic encodings; a `2` allele contributes
    // nothing to the ALT dosage.
    assert_eq!(decode_genotype("1/2"), Some(1));
    assert_eq!(decode_genotype("2/2"), Some(0));
    assert_eq!(decode_genotype("2|1"), Some(1));
}

#[test]
fn decode_trims_surrounding_whitespace() {
    assert_eq!(decode_genotype(" 0/1 "), Some(1));
    assert_eq!(decode_genotype(" . "), None);
}

#[test]
fn decode_ignores_alleles_past_the_second() {
    assert_eq!(decode_genotype("1/1/1"), Some(2));
    assert_eq!(decode_genotype("0/1/1"), Some(1));
}

#[test]
fn separator_spellings() {
    assert_eq!(parse_separator("\t").unwrap(), '\t');
    assert_eq!(parse_separator("\\t").unwrap(), '\t');
    assert_eq!(parse_separator("tab").unwrap(), '\t');
    assert_eq!(parse_separator(",").unwrap(), ',');
    assert!(parse_separator("ab").is_err());
    assert!(parse_separator("").is_err());
}
