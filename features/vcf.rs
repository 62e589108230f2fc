// ========================================================================================
//
//                       Variant-call text: header and data lines
//
// ========================================================================================
//
// Only the eight fixed columns, FORMAT, and one selected sample column of each data line
// are interpreted. INFO content and multi-allelic structure are carried through verbatim.

use crate::files::{FileError, TextSource, open_text_source};
use log::debug;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Number of fixed columns preceding the sample columns (CHROM..FORMAT).
pub const FIXED_COLUMNS: usize = 9;

const HEADER_PREFIX: &str = "#CHROM";
const FORMAT_COLUMN: &str = "FORMAT";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("{source_name}: no '#CHROM' header line was found")]
    MissingHeader { source_name: String },
    #[error("'#CHROM' header has no FORMAT column")]
    MissingFormatColumn,
    #[error("'#CHROM' header lists no sample columns after FORMAT")]
    NoSampleColumns,
    #[error("{source_name}: line {line} is not valid UTF-8")]
    InvalidUtf8 { source_name: String, line: usize },
    #[error("line {line}: expected at least {expected} tab-separated columns, found {found}")]
    TooFewColumns {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: sample column {column} is out of range ({found} columns present)")]
    SampleOutOfRange {
        line: usize,
        column: usize,
        found: usize,
    },
}

/// Whether the file carries one sample column or several.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    Single,
    Multi,
}

impl fmt::Display for SampleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleMode::Single => f.write_str("single-sample"),
            SampleMode::Multi => f.write_str("multi-sample"),
        }
    }
}

/// The parsed `#CHROM` line: where FORMAT sits and which columns hold samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcfHeader {
    format_index: usize,
    sample_names: Vec<String>,
}

impl VcfHeader {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let columns: Vec<&str> = line.trim_end().split('\t').collect();
        let format_index = columns
            .iter()
            .position(|column| *column == FORMAT_COLUMN)
            .ok_or(ParseError::MissingFormatColumn)?;

        let sample_names: Vec<String> = columns[format_index + 1..]
            .iter()
            .map(|name| name.to_string())
            .collect();
        if sample_names.is_empty() {
            return Err(ParseError::NoSampleColumns);
        }

        Ok(Self {
            format_index,
            sample_names,
        })
    }

    /// Zero-based column index of FORMAT.
    #[inline]
    pub fn format_index(&self) -> usize {
        self.format_index
    }

    /// Sample names in file column order.
    pub fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    pub fn n_samples(&self) -> usize {
        self.sample_names.len()
    }

    /// Absolute zero-based column indices of every sample, in file order.
    pub fn sample_columns(&self) -> std::ops::Range<usize> {
        let first = self.format_index + 1;
        first..first + self.sample_names.len()
    }

    /// Looks up the absolute column of a sample by exact name.
    pub fn column_of(&self, name: &str) -> Option<usize> {
        self.sample_names
            .iter()
            .position(|candidate| candidate == name)
            .map(|offset| self.format_index + 1 + offset)
    }

    /// The sample name stored at an absolute column index.
    pub fn name_at(&self, column: usize) -> Option<&str> {
        column
            .checked_sub(self.format_index + 1)
            .and_then(|offset| self.sample_names.get(offset))
            .map(String::as_str)
    }

    pub fn mode(&self) -> SampleMode {
        if self.sample_names.len() > 1 {
            SampleMode::Multi
        } else {
            SampleMode::Single
        }
    }
}

/// One data line reduced to the fixed columns and a single sample field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantLine<'a> {
    pub line_number: usize,
    pub chrom: &'a str,
    pub pos: &'a str,
    pub id: &'a str,
    pub reference: &'a str,
    pub alternate: &'a str,
    pub qual: &'a str,
    pub filter: &'a str,
    pub info: &'a str,
    pub format: &'a str,
    pub sample: &'a str,
}

impl<'a> VariantLine<'a> {
    /// Splits a tab-delimited data line, keeping the fixed columns and `sample_column`.
    pub fn parse(line: &'a str, sample_column: usize, line_number: usize) -> Result<Self, ParseError> {
        let mut fixed = [""; FIXED_COLUMNS];
        let mut sample = None;
        let mut found = 0usize;

        for (index, field) in line.split('\t').enumerate() {
            if index < FIXED_COLUMNS {
                fixed[index] = field;
            }
            if index == sample_column {
                sample = Some(field);
            }
            found = index + 1;
        }

        if found < FIXED_COLUMNS + 1 {
            return Err(ParseError::TooFewColumns {
                line: line_number,
                expected: FIXED_COLUMNS + 1,
                found,
            });
        }
        let sample = match sample {
            Some(field) if sample_column >= FIXED_COLUMNS => field,
            _ => {
                return Err(ParseError::SampleOutOfRange {
                    line: line_number,
                    column: sample_column,
                    found,
                });
            }
        };

        let [chrom, pos, id, reference, alternate, qual, filter, info, format] = fixed;
        Ok(Self {
            line_number,
            chrom,
            pos,
            id,
            reference,
            alternate,
            qual,
            filter,
            info,
            format,
            sample,
        })
    }

    /// The GT subfield of the sample, located through FORMAT.
    ///
    /// Falls back to the first subfield when FORMAT does not name GT.
    pub fn genotype(&self) -> &'a str {
        let gt_index = self
            .format
            .split(':')
            .position(|key| key == "GT")
            .unwrap_or(0);
        self.sample.split(':').nth(gt_index).unwrap_or("")
    }
}

/// An in-memory variant-call file: its header plus every data line.
///
/// The lines are read once and can then be scanned for any number of samples.
#[derive(Debug, Clone)]
pub struct VcfDocument {
    name: String,
    header: VcfHeader,
    lines: Vec<(usize, String)>,
}

impl VcfDocument {
    pub fn open(path: &Path) -> Result<Self, ParseError> {
        let mut source = open_text_source(path)?;
        Self::read(source.as_mut())
    }

    /// Reads every line of `source`. Comment lines are skipped, except the first `#CHROM`
    /// line, which is parsed as the header. Blank lines are ignored.
    pub fn read(source: &mut dyn TextSource) -> Result<Self, ParseError> {
        let name = source.name().to_string();
        let mut header = None;
        let mut lines = Vec::new();
        let mut line_number = 0usize;

        while let Some(raw) = source.next_line()? {
            line_number += 1;
            let text = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidUtf8 {
                source_name: name.clone(),
                line: line_number,
            })?;

            if text.starts_with('#') {
                if header.is_none() && text.starts_with(HEADER_PREFIX) {
                    header = Some(VcfHeader::parse(text)?);
                }
                continue;
            }
            if text.trim().is_empty() {
                continue;
            }
            lines.push((line_number, text.trim_end().to_string()));
        }

        let header = header.ok_or_else(|| ParseError::MissingHeader {
            source_name: name.clone(),
        })?;
        debug!(
            "Read {} data line(s) and {} sample column(s) from {name}",
            lines.len(),
            header.n_samples()
        );

        Ok(Self {
            name,
            header,
            lines,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &VcfHeader {
        &self.header
    }

    pub fn n_data_lines(&self) -> usize {
        self.lines.len()
    }

    /// Parses every data line for one sample column, in file order.
    pub fn variant_lines(
        &self,
        sample_column: usize,
    ) -> impl Iterator<Item = Result<VariantLine<'_>, ParseError>> + '_ {
        self.lines
            .iter()
            .map(move |(line_number, text)| VariantLine::parse(text, sample_column, *line_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::reader_text_source;

    const HEADER: &str = "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts1\ts2";

    fn document(text: &str) -> Result<VcfDocument, ParseError> {
        let mut source = reader_text_source("test.vcf", std::io::Cursor::new(text.to_string().into_bytes()));
        VcfDocument::read(source.as_mut())
    }

    #[test]
    fn header_locates_format_and_samples() {
        let header = VcfHeader::parse(HEADER).unwrap();
        assert_eq!(header.format_index(), 8);
        assert_eq!(header.sample_names(), ["s1", "s2"]);
        assert_eq!(header.sample_columns(), 9..11);
        assert_eq!(header.column_of("s2"), Some(10));
        assert_eq!(header.name_at(9), Some("s1"));
        assert_eq!(header.name_at(8), None);
        assert_eq!(header.mode(), SampleMode::Multi);
    }

    #[test]
    fn header_without_format_is_rejected() {
        let err = VcfHeader::parse("#CHROM\tPOS\tID\tREF\tALT").unwrap_err();
        assert!(matches!(err, ParseError::MissingFormatColumn));
        let err = VcfHeader::parse("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT").unwrap_err();
        assert!(matches!(err, ParseError::NoSampleColumns));
    }

    #[test]
    fn data_line_keeps_fixed_columns_and_selected_sample() {
        let line = "1\t100\trs1\tA\tG\t50\tPASS\tDP=3\tGT:DP\t0/1:3\t1/1:7";
        let parsed = VariantLine::parse(line, 10, 12).unwrap();
        assert_eq!(parsed.chrom, "1");
        assert_eq!(parsed.pos, "100");
        assert_eq!(parsed.reference, "A");
        assert_eq!(parsed.alternate, "G");
        assert_eq!(parsed.format, "GT:DP");
        assert_eq!(parsed.sample, "1/1:7");
        assert_eq!(parsed.genotype(), "1/1");
        assert_eq!(parsed.line_number, 12);
    }

    #[test]
    fn genotype_is_found_through_format() {
        let line = "1\t100\t.\tA\tG\t.\t.\t.\tDP:GT\t7:0|1";
        let parsed = VariantLine::parse(line, 9, 1).unwrap();
        assert_eq!(parsed.genotype(), "0|1");
    }

    #[test]
    fn short_lines_and_bad_sample_columns_are_parse_errors() {
        let err = VariantLine::parse("1\t100\t.\tA\tG", 9, 4).unwrap_err();
        assert!(matches!(err, ParseError::TooFewColumns { line: 4, found: 5, .. }));

        let line = "1\t100\t.\tA\tG\t.\t.\t.\tGT\t0/1";
        let err = VariantLine::parse(line, 11, 5).unwrap_err();
        assert!(matches!(err, ParseError::SampleOutOfRange { column: 11, found: 10, .. }));
        let err = VariantLine::parse(line, 3, 5).unwrap_err();
        assert!(matches!(err, ParseError::SampleOutOfRange { column: 3, .. }));
    }

    #[test]
    fn document_skips_meta_lines_and_keeps_line_numbers() {
        let text = format!("##fileformat=VCFv4.2\n{HEADER}\n1\t100\t.\tA\tG\t.\t.\t.\tGT\t0/1\t1/1\n\n");
        let doc = document(&text).unwrap();
        assert_eq!(doc.n_data_lines(), 1);
        let lines: Vec<_> = doc.variant_lines(9).collect::<Result<_, _>>().unwrap();
        assert_eq!(lines[0].line_number, 3);
        assert_eq!(lines[0].sample, "0/1");
    }

    #[test]
    fn document_without_data_lines_is_valid() {
        let doc = document(&format!("{HEADER}\n")).unwrap();
        assert_eq!(doc.n_data_lines(), 0);
        assert_eq!(doc.variant_lines(9).count(), 0);
    }

    #[test]
    fn document_without_header_is_rejected() {
        let err = document("1\t100\t.\tA\tG\t.\t.\t.\tGT\t0/1\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingHeader { .. }));
    }

    #[test]
    fn parsing_is_deterministic() {
        let text = format!("{HEADER}\n1\t100\t.\tA\tG\t.\t.\t.\tGT\t0/1\t1/1\n2\t5\t.\tC\tT\t.\t.\t.\tGT\t1|1\t0|0\n");
        let first = document(&text).unwrap();
        let second = document(&text).unwrap();
        let a: Vec<_> = first.variant_lines(10).collect::<Result<_, _>>().unwrap();
        let b: Vec<_> = second.variant_lines(10).collect::<Result<_, _>>().unwrap();
        assert_eq!(a, b);
    }
}
