//! Rare-allele representation toolkit.
//!
//! Two-pass batch pipeline over a flat genotype table exported from a VCF
//! (`bcftools query -f '%CHROM\t%POS\t%REF\t%ALT[\t%GT]\n'`):
//!
//! 1. `allele_count` — chunked per-group allele counting: carrier counts,
//!    presence flags, AC/AN, and per-group frequencies, appended
//!    incrementally to an allele table.
//! 2. `run_irr` — full-cohort frequency modeling and binning,
//!    target-by-coverage representation summaries, and per-individual
//!    weighted rarity (IRR) scores for the ancient cohort.

// Module declarations
pub mod parse;
pub mod process;
pub mod rarity;
pub mod stats;

#[cfg(test)]
mod tests;
