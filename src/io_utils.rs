//! I/O utilities for CSV reading, writing, and encoding resolution.
//!
//! Every CSV file the ingester touches flows through this module:
//!
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//!   Catalog exports are commonly ISO-8859-1, which resolves to
//!   `windows-1252`.
//! - **Reader/writer construction**: `open_csv_reader_from_path` and
//!   `open_csv_writer`.
//! - **stdout**: the `-` path convention routes output through standard out.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};

use crate::error::{IngestError, IngestResult};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> IngestResult<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| IngestError::Config(format!("unknown encoding '{value}'")))
    } else {
        Ok(UTF_8)
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
) -> IngestResult<csv::Reader<BufReader<File>>> {
    let file = File::open(path).map_err(IngestError::io("opening input file", path))?;
    Ok(open_csv_reader(BufReader::new(file), delimiter))
}

pub fn open_csv_writer(path: Option<&Path>) -> IngestResult<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).map_err(IngestError::io("creating output file", p))?,
        )),
        _ => Box::new(std::io::stdout()),
    };
    let mut builder = csv::WriterBuilder::new();
    builder.delimiter(DEFAULT_CSV_DELIMITER).double_quote(true);
    Ok(builder.from_writer(base))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        None
    } else {
        Some(text.into_owned())
    }
}

pub fn decode_record(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
    path: &Path,
) -> IngestResult<Vec<String>> {
    record
        .iter()
        .map(|field| {
            decode_bytes(field, encoding).ok_or_else(|| {
                IngestError::Io {
                    context: "decoding",
                    path: path.to_path_buf(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("text is not valid {}", encoding.name()),
                    ),
                }
            })
        })
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
    path: &Path,
) -> IngestResult<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers().map_err(IngestError::csv(path))?.clone();
    let mut decoded = decode_record(&headers, encoding, path)?;
    // Excel exports prefix the first header with a byte order mark.
    if let Some(first) = decoded.first_mut()
        && let Some(stripped) = first.strip_prefix('\u{feff}')
    {
        *first = stripped.to_string();
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_encoding_accepts_latin1_labels() {
        let encoding = resolve_encoding(Some("ISO-8859-1")).unwrap();
        assert_eq!(encoding.name(), "windows-1252");
        assert!(resolve_encoding(Some("klingon")).is_err());
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
    }

    #[test]
    fn reader_headers_strip_byte_order_mark() {
        let data = "\u{feff}PrimaryKey,LineKey\nP1,L1\n";
        let mut reader = open_csv_reader(data.as_bytes(), b',');
        let headers = reader_headers(&mut reader, UTF_8, Path::new("inline.csv")).unwrap();
        assert_eq!(headers, vec!["PrimaryKey", "LineKey"]);
    }
}
