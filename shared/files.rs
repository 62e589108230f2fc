use flate2::read::MultiGzDecoder;
use itertools::Itertools;
use log::debug;
use natord::compare;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Recognised variant-call file extensions, uncompressed and gzip/BGZF compressed.
const VARIANT_EXTENSIONS: [&str; 6] = [".g.vcf", ".gvcf", ".vcf", ".g.vcf.gz", ".gvcf.gz", ".vcf.gz"];

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum FileError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not a recognised variant file (.vcf, .g.vcf, .gvcf, optionally .gz)")]
    UnsupportedExtension(String),
}

impl FileError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// A trait that abstracts sequential, line-oriented access to text data such as VCF
/// files, regardless of whether the bytes on disk are compressed.
pub trait TextSource: Send {
    /// A human-readable name for the underlying data, used in diagnostics.
    fn name(&self) -> &str;

    /// Returns the next line without its trailing `\n` or `\r\n`, or `None` at the end.
    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>, FileError>;
}

/// How a variant file is stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantCompression {
    Plain,
    Gzip,
}

/// Detects whether a path names a variant file and how it is compressed, by extension.
pub fn detect_variant_file(path: &Path) -> Option<VariantCompression> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    let extension = VARIANT_EXTENSIONS.iter().find(|ext| name.ends_with(*ext))?;
    if extension.ends_with(".gz") {
        Some(VariantCompression::Gzip)
    } else {
        Some(VariantCompression::Plain)
    }
}

/// The file name of a variant file without its variant extension, e.g. `NA12878` for
/// `NA12878.g.vcf.gz`. Unrecognised names are returned whole.
pub fn variant_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_ascii_lowercase();
    match VARIANT_EXTENSIONS.iter().find(|ext| lower.ends_with(*ext)) {
        Some(ext) => name[..name.len() - ext.len()].to_string(),
        None => name,
    }
}

/// Output stems for a batch of variant files, parallel to `paths`.
///
/// Each file gets its `variant_stem` unless another file in the batch shares it
/// (`s1.vcf` next to `s1.vcf.gz`). Those files keep their whole file name instead.
pub fn output_stems(paths: &[PathBuf]) -> Vec<String> {
    let stems: Vec<String> = paths.iter().map(|path| variant_stem(path)).collect();
    let counts = stems.iter().counts();
    stems
        .iter()
        .zip(paths)
        .map(|(stem, path)| {
            if counts[stem] > 1 {
                debug!("Stem '{stem}' is shared; naming output after {}", path.display());
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| stem.clone())
            } else {
                stem.clone()
            }
        })
        .collect()
}

/// Lists the variant files inside a directory in natural order, or returns the path
/// itself when it already names a variant file.
pub fn list_variant_paths(path: &Path) -> Result<Vec<PathBuf>, FileError> {
    if !path.is_dir() {
        if detect_variant_file(path).is_none() {
            return Err(FileError::UnsupportedExtension(path.display().to_string()));
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| FileError::io(path, e))? {
        let entry = entry.map_err(|e| FileError::io(path, e))?;
        let candidate = entry.path();
        if candidate.is_file() && detect_variant_file(&candidate).is_some() {
            paths.push(candidate);
        }
    }
    paths.sort_by(|a, b| compare(&a.to_string_lossy(), &b.to_string_lossy()));
    debug!("Found {} variant file(s) in {}", paths.len(), path.display());
    Ok(paths)
}

/// Opens a local text file, transparently decompressing gzip and BGZF data.
///
/// Compression is detected from the leading magic bytes, not the extension.
pub fn open_text_source(path: &Path) -> Result<Box<dyn TextSource>, FileError> {
    let file = File::open(path).map_err(|e| FileError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let is_gzip = {
        let head = reader.fill_buf().map_err(|e| FileError::io(path, e))?;
        head.len() >= 2 && head[..2] == GZIP_MAGIC
    };

    let inner: Box<dyn BufRead + Send> = if is_gzip {
        debug!("Detected gzip/BGZF layer in {}", path.display());
        Box::new(BufReader::new(MultiGzDecoder::new(reader)))
    } else {
        Box::new(reader)
    };
    Ok(Box::new(ReaderTextSource::new(
        path.display().to_string(),
        inner,
    )))
}

/// Wraps any in-memory or streaming reader as a `TextSource`.
pub fn reader_text_source<R: Read + Send + 'static>(
    name: impl Into<String>,
    reader: R,
) -> Box<dyn TextSource> {
    Box::new(ReaderTextSource::new(
        name.into(),
        Box::new(BufReader::new(reader)),
    ))
}

struct ReaderTextSource {
    reader: Box<dyn BufRead + Send>,
    line: Vec<u8>,
    line_active: bool,
    name: String,
}

impl ReaderTextSource {
    fn new(name: String, reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(1024),
            line_active: false,
            name,
        }
    }
}

impl TextSource for ReaderTextSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>, FileError> {
        if self.line_active {
            self.line.clear();
            self.line_active = false;
        }

        let bytes_read = self
            .reader
            .read_until(b'\n', &mut self.line)
            .map_err(|e| FileError::Io {
                path: self.name.clone(),
                source: e,
            })?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        self.line_active = true;
        Ok(Some(&self.line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    fn collect_lines(mut source: Box<dyn TextSource>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = source.next_line().expect("read line") {
            lines.push(String::from_utf8(line.to_vec()).expect("utf8"));
        }
        lines
    }

    #[test]
    fn detects_variant_extensions() {
        assert_eq!(
            detect_variant_file(Path::new("/data/sample.vcf")),
            Some(VariantCompression::Plain)
        );
        assert_eq!(
            detect_variant_file(Path::new("/data/sample.g.vcf.gz")),
            Some(VariantCompression::Gzip)
        );
        assert_eq!(
            detect_variant_file(Path::new("/data/SAMPLE.GVCF")),
            Some(VariantCompression::Plain)
        );
        assert_eq!(detect_variant_file(Path::new("/data/sample.bcf")), None);
        assert_eq!(detect_variant_file(Path::new("/data/features.txt")), None);
    }

    #[test]
    fn variant_stem_strips_the_longest_known_extension() {
        assert_eq!(variant_stem(Path::new("/d/NA12878.g.vcf.gz")), "NA12878");
        assert_eq!(variant_stem(Path::new("/d/trio.VCF")), "trio");
        assert_eq!(variant_stem(Path::new("/d/s1.gvcf")), "s1");
        assert_eq!(variant_stem(Path::new("/d/notes.txt")), "notes.txt");
    }

    #[test]
    fn output_stems_keep_full_names_when_stems_collide() {
        let paths: Vec<PathBuf> = ["/d/s1.vcf", "/d/s1.vcf.gz", "/d/s2.g.vcf.gz"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(output_stems(&paths), vec!["s1.vcf", "s1.vcf.gz", "s2"]);
    }

    #[test]
    fn reads_plain_and_gzip_files_identically() {
        let dir = tempdir().expect("tempdir");
        let content = "#CHROM\tPOS\r\n1\t100\n2\t200";

        let plain = dir.path().join("a.vcf");
        fs::write(&plain, content).expect("write plain");

        let gz = dir.path().join("a.vcf.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).expect("create gz"), Compression::default());
        encoder.write_all(content.as_bytes()).expect("write gz");
        encoder.finish().expect("finish gz");

        let expected = vec!["#CHROM\tPOS", "1\t100", "2\t200"];
        assert_eq!(collect_lines(open_text_source(&plain).unwrap()), expected);
        assert_eq!(collect_lines(open_text_source(&gz).unwrap()), expected);
    }

    #[test]
    fn lists_variant_files_in_natural_order() {
        let dir = tempdir().expect("tempdir");
        for name in ["s10.vcf", "s2.vcf.gz", "s1.g.vcf", "notes.txt"] {
            fs::write(dir.path().join(name), "").expect("write");
        }
        let names: Vec<String> = list_variant_paths(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["s1.g.vcf", "s2.vcf.gz", "s10.vcf"]);
    }

    #[test]
    fn rejects_single_non_variant_path() {
        let err = list_variant_paths(Path::new("/nonexistent/model.bin")).unwrap_err();
        assert!(matches!(err, FileError::UnsupportedExtension(_)));
    }
}
