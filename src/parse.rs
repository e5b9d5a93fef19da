use crate::process::{GtError, VariantKey, GT_LEADING_COLS};

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use flate2::read::MultiGzDecoder;
use ndarray::Array2;
use rayon::prelude::*;

/// Decodes one genotype token into an ALT-allele dosage.
///
/// `0/0`, `0|0` -> 0; `0/1`, `1/0` -> 1; `1/1` -> 2. A fully or partially
/// missing genotype (`.`, `./.`, `.|.`, `0/.`, ...) is `None`. A token with a
/// single allele symbol is treated as haploid (`1` -> 1, anything else -> 0).
/// Allele symbols other than `0`/`1` count as not-ALT; multi-allelic codes
/// like `2` are therefore scored as reference copies.
pub fn decode_genotype(token: &str) -> Option<u8> {
    let gt = token.trim();
    if gt.is_empty() || gt == "." || gt == "./." || gt == ".|." {
        return None;
    }
    let gt = gt.replace('|', "/");
    let mut alleles = gt.split('/');
    let first = alleles.next().unwrap_or("");
    match alleles.next() {
        // Single allele symbol: haploid or degenerate encoding.
        None => {
            if first == "." {
                None
            } else if first == "1" {
                Some(1)
            } else {
                Some(0)
            }
        }
        // Diploid call; any symbol past the second is ignored.
        Some(second) => {
            if first == "." || second == "." {
                return None;
            }
            Some((first == "1") as u8 + (second == "1") as u8)
        }
    }
}

/// Parses the field-separator option. Accepts the literal character, or the
/// spellings `\t` / `tab` for a tab.
pub fn parse_separator(spec: &str) -> Result<char, GtError> {
    if spec == "\\t" || spec.eq_ignore_ascii_case("tab") {
        return Ok('\t');
    }
    let mut chars = spec.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(GtError::Parse(format!(
            "invalid field separator: {:?}",
            spec
        ))),
    }
}

/// Reads the canonical sample ordering, one identifier per line.
pub fn read_sample_order(path: &Path) -> Result<Vec<String>, GtError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut samples = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            samples.push(id.to_string());
        }
    }
    if samples.is_empty() {
        return Err(GtError::NoSamples(format!(
            "sample ordering file {} is empty",
            path.display()
        )));
    }
    Ok(samples)
}

/// Reads a group membership list, one identifier per line.
pub fn read_group_list(path: &Path) -> Result<HashSet<String>, GtError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut members = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            members.insert(id.to_string());
        }
    }
    Ok(members)
}

/// Opens the genotype table, transparently decompressing `.gz` input.
pub fn open_gt_reader(path: &Path) -> Result<Box<dyn BufRead>, GtError> {
    let file = File::open(path)?;
    if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        let decoder = MultiGzDecoder::new(file);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// One decoded slice of the genotype table: variant identities plus a
/// rows-by-columns dosage matrix (NaN = missing call). Built from raw text
/// rows, consumed into per-group accumulators, then dropped; nothing is
/// carried across chunks.
pub struct GtChunk {
    pub keys: Vec<VariantKey>,
    pub dosages: Array2<f64>,
}

impl GtChunk {
    pub fn n_rows(&self) -> usize {
        self.keys.len()
    }
}

/// Bounded-size chunk reader over the genotype table. Every line must carry
/// exactly `GT_LEADING_COLS + n_samples` fields. With `keep_cols` set, only
/// those table columns are decoded (the rarity pass reads the ancient
/// columns only); the matrix width is then `keep_cols.len()`.
pub struct GtChunkReader {
    reader: Box<dyn BufRead>,
    n_samples: usize,
    chunk_size: usize,
    sep: char,
    keep_cols: Option<Vec<usize>>,
    line_no: usize,
}

impl GtChunkReader {
    pub fn new(
        reader: Box<dyn BufRead>,
        n_samples: usize,
        chunk_size: usize,
        sep: char,
    ) -> Self {
        GtChunkReader {
            reader,
            n_samples,
            chunk_size,
            sep,
            keep_cols: None,
            line_no: 0,
        }
    }

    /// Restricts decoding to the given table-column offsets (sorted, each
    /// >= `GT_LEADING_COLS`).
    pub fn with_columns(
        reader: Box<dyn BufRead>,
        n_samples: usize,
        chunk_size: usize,
        sep: char,
        keep_cols: Vec<usize>,
    ) -> Self {
        GtChunkReader {
            reader,
            n_samples,
            chunk_size,
            sep,
            keep_cols: Some(keep_cols),
            line_no: 0,
        }
    }

    /// Reads and decodes the next chunk; `Ok(None)` at end of input.
    pub fn next_chunk(&mut self) -> Result<Option<GtChunk>, GtError> {
        let mut lines: Vec<(usize, String)> = Vec::with_capacity(self.chunk_size);
        let mut buf = String::new();
        while lines.len() < self.chunk_size {
            buf.clear();
            if self.reader.read_line(&mut buf)? == 0 {
                break;
            }
            self.line_no += 1;
            let line = buf.trim_end_matches(&['\n', '\r'][..]);
            if line.is_empty() {
                continue;
            }
            lines.push((self.line_no, line.to_string()));
        }
        if lines.is_empty() {
            return Ok(None);
        }

        let n_samples = self.n_samples;
        let sep = self.sep;
        let keep = self.keep_cols.as_deref();
        let rows: Vec<(VariantKey, Vec<f64>)> = lines
            .par_iter()
            .map(|(line_no, line)| decode_gt_row(line, *line_no, n_samples, sep, keep))
            .collect::<Result<_, _>>()?;

        let n_rows = rows.len();
        let width = keep.map_or(n_samples, |cols| cols.len());
        let mut keys = Vec::with_capacity(n_rows);
        let mut flat = Vec::with_capacity(n_rows * width);
        for (key, dosages) in rows {
            keys.push(key);
            flat.extend(dosages);
        }
        let dosages = Array2::from_shape_vec((n_rows, width), flat)
            .map_err(|e| GtError::Parse(format!("chunk shape error: {}", e)))?;
        Ok(Some(GtChunk { keys, dosages }))
    }
}

fn decode_gt_row(
    line: &str,
    line_no: usize,
    n_samples: usize,
    sep: char,
    keep_cols: Option<&[usize]>,
) -> Result<(VariantKey, Vec<f64>), GtError> {
    let fields: Vec<&str> = line.split(sep).collect();
    let expected = GT_LEADING_COLS + n_samples;
    if fields.len() != expected {
        return Err(GtError::Parse(format!(
            "line {}: expected {} fields ({} identity + {} genotypes), found {}",
            line_no,
            expected,
            GT_LEADING_COLS,
            n_samples,
            fields.len()
        )));
    }
    let key = VariantKey {
        chrom: fields[0].to_string(),
        pos: fields[1].to_string(),
        reference: fields[2].to_string(),
        alternate: fields[3].to_string(),
    };
    let dosages = match keep_cols {
        Some(cols) => cols
            .iter()
            .map(|&c| decode_genotype(fields[c]).map(f64::from).unwrap_or(f64::NAN))
            .collect(),
        None => fields[GT_LEADING_COLS..]
            .iter()
            .map(|gt| decode_genotype(gt).map(f64::from).unwrap_or(f64::NAN))
            .collect(),
    };
    Ok((key, dosages))
}
