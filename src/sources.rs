// 🗂️ Source Readers - one reader per file format
// Each reader turns a file into a Table with the source's own field names

use crate::table::{infer_columns, Table};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// SourceFormat - which kind of file a source is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Comma-separated text with a header row
    Csv,
    /// Tab-separated text with a header row
    Tsv,
    /// Array of flat objects
    Json,
    /// Root element with one child element per record
    Xml,
    /// Free text, one line per row (operator notes)
    Text,
}

impl SourceFormat {
    pub fn name(&self) -> &str {
        match self {
            SourceFormat::Csv => "CSV",
            SourceFormat::Tsv => "TSV",
            SourceFormat::Json => "JSON",
            SourceFormat::Xml => "XML",
            SourceFormat::Text => "Text",
        }
    }

    /// Whether rows of this format take part in the merge
    pub fn is_tabular(&self) -> bool {
        !matches!(self, SourceFormat::Text)
    }
}

/// SourceReader - load one file into a Table
///
/// Adding a format means adding a reader; nothing downstream changes.
pub trait SourceReader: Send + Sync {
    /// Read the whole file. `source` labels the resulting table.
    fn read(&self, file_path: &Path, source: &str) -> Result<Table>;

    fn format(&self) -> SourceFormat;

    /// Reader version (logged with each load)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

/// Detect format from the file extension
pub fn detect_format(file_path: &Path) -> Result<SourceFormat> {
    let ext = file_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" => Ok(SourceFormat::Csv),
        "tsv" | "tab" => Ok(SourceFormat::Tsv),
        "json" => Ok(SourceFormat::Json),
        "xml" => Ok(SourceFormat::Xml),
        "txt" | "text" => Ok(SourceFormat::Text),
        _ => Err(anyhow!(
            "Could not detect source format from file name: {}",
            file_path.display()
        )),
    }
}

/// Get the reader for a format
pub fn get_reader(format: SourceFormat) -> Box<dyn SourceReader> {
    match format {
        SourceFormat::Csv => Box::new(CsvSourceReader::new()),
        SourceFormat::Tsv => Box::new(CsvSourceReader::with_delimiter(b'\t')),
        SourceFormat::Json => Box::new(JsonSourceReader::new()),
        SourceFormat::Xml => Box::new(XmlSourceReader::new()),
        SourceFormat::Text => Box::new(TextSourceReader::new()),
    }
}

/// Fingerprint of one input file, kept with the batch that read it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub source: String,
    pub path: String,
    pub sha256: String,
    pub rows: usize,
}

/// SHA-256 of the file contents, hex encoded
pub fn fingerprint_file(file_path: &Path) -> Result<String> {
    let bytes = fs::read(file_path)
        .with_context(|| format!("Failed to read file: {}", file_path.display()))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// CSV
// ============================================================================

pub struct CsvSourceReader {
    delimiter: u8,
}

impl CsvSourceReader {
    pub fn new() -> Self {
        CsvSourceReader { delimiter: b',' }
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        CsvSourceReader { delimiter }
    }
}

impl Default for CsvSourceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceReader for CsvSourceReader {
    fn read(&self, file_path: &Path, source: &str) -> Result<Table> {
        use csv::ReaderBuilder;

        let file = File::open(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .from_reader(file);

        let columns: Vec<String> = reader
            .headers()
            .with_context(|| format!("Failed to read CSV header in {}", file_path.display()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut raw_rows = Vec::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| {
                format!(
                    "Failed to parse CSV line {} in {}",
                    line_num + 2,
                    file_path.display()
                )
            })?;

            raw_rows.push(record.iter().map(|c| Some(c.to_string())).collect());
        }

        let rows = infer_columns(columns.len(), raw_rows);
        Ok(Table::from_rows(source, columns, rows))
    }

    fn format(&self) -> SourceFormat {
        if self.delimiter == b'\t' {
            SourceFormat::Tsv
        } else {
            SourceFormat::Csv
        }
    }
}

// ============================================================================
// JSON
// ============================================================================

pub struct JsonSourceReader;

impl JsonSourceReader {
    pub fn new() -> Self {
        JsonSourceReader
    }
}

impl Default for JsonSourceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceReader for JsonSourceReader {
    fn read(&self, file_path: &Path, source: &str) -> Result<Table> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

        let json: Value = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse JSON from {}", file_path.display()))?;

        json_records_to_table(&json, source)
            .with_context(|| format!("Unexpected JSON layout in {}", file_path.display()))
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Json
    }
}

/// Accepts `[{...}, ...]` or an object wrapping exactly one such array
/// (e.g. `{"users": [...]}`)
fn json_records_to_table(json: &Value, source: &str) -> Result<Table> {
    let records = match json {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut arrays = map.values().filter_map(|v| v.as_array());
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => items,
                _ => return Err(anyhow!("expected a single array of records")),
            }
        }
        _ => return Err(anyhow!("expected an array of records")),
    };

    // Columns in first-seen order across all records
    let mut columns: Vec<String> = Vec::new();
    for (idx, item) in records.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| anyhow!("record {} is not an object", idx + 1))?;
        for key in obj.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    let mut table = Table::new(source, columns.clone());
    for item in records {
        let row = columns
            .iter()
            .map(|c| item.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        table.push_row(row);
    }

    Ok(table)
}

// ============================================================================
// XML
// ============================================================================

pub struct XmlSourceReader;

impl XmlSourceReader {
    pub fn new() -> Self {
        XmlSourceReader
    }
}

impl Default for XmlSourceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceReader for XmlSourceReader {
    fn read(&self, file_path: &Path, source: &str) -> Result<Table> {
        let xml = fs::read_to_string(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

        parse_xml_records(&xml, source)
            .with_context(|| format!("Failed to parse XML from {}", file_path.display()))
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Xml
    }
}

/// Each child of the root element is a record; its attributes and its leaf
/// child elements are the fields. Empty elements are missing values.
fn parse_xml_records(xml: &str, source: &str) -> Result<Table> {
    use quick_xml::events::{BytesStart, Event};
    use quick_xml::Reader;

    fn push_field(
        columns: &mut Vec<String>,
        record: &mut Vec<(usize, Option<String>)>,
        name: &str,
        value: Option<String>,
    ) {
        let idx = match columns.iter().position(|c| c == name) {
            Some(idx) => idx,
            None => {
                columns.push(name.to_string());
                columns.len() - 1
            }
        };
        record.push((idx, value));
    }

    fn record_attributes(
        e: &BytesStart,
        columns: &mut Vec<String>,
        record: &mut Vec<(usize, Option<String>)>,
    ) -> Result<()> {
        for attr in e.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = attr.unescape_value()?.to_string();
            push_field(columns, record, &key, Some(value));
        }
        Ok(())
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut columns: Vec<String> = Vec::new();
    let mut records: Vec<Vec<(usize, Option<String>)>> = Vec::new();
    let mut current: Vec<(usize, Option<String>)> = Vec::new();
    let mut field: Option<String> = None;
    let mut text = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                depth += 1;
                match depth {
                    2 => {
                        current.clear();
                        record_attributes(e, &mut columns, &mut current)?;
                    }
                    3 => {
                        field = Some(String::from_utf8_lossy(e.name().as_ref()).to_string());
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Empty(ref e) => match depth + 1 {
                2 => {
                    let mut record = Vec::new();
                    record_attributes(e, &mut columns, &mut record)?;
                    records.push(record);
                }
                3 => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    push_field(&mut columns, &mut current, &name, None);
                }
                _ => {}
            },
            Event::Text(ref e) if depth == 3 => {
                text.push_str(&e.unescape()?);
            }
            Event::CData(ref e) if depth == 3 => {
                text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Event::End(_) => {
                match depth {
                    3 => {
                        if let Some(name) = field.take() {
                            let value = if text.trim().is_empty() {
                                None
                            } else {
                                Some(text.clone())
                            };
                            push_field(&mut columns, &mut current, &name, value);
                        }
                    }
                    2 => records.push(std::mem::take(&mut current)),
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let width = columns.len();
    let raw_rows = records
        .into_iter()
        .map(|fields| {
            let mut row = vec![None; width];
            for (idx, value) in fields {
                row[idx] = value;
            }
            row
        })
        .collect();

    let rows = infer_columns(width, raw_rows);
    Ok(Table::from_rows(source, columns, rows))
}

// ============================================================================
// TEXT
// ============================================================================

/// Free text: one `line` column, one row per line
pub struct TextSourceReader;

impl TextSourceReader {
    pub fn new() -> Self {
        TextSourceReader
    }
}

impl Default for TextSourceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceReader for TextSourceReader {
    fn read(&self, file_path: &Path, source: &str) -> Result<Table> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

        let mut table = Table::new(source, vec!["line".to_string()]);
        for line in BufReader::new(file).lines() {
            let line = line
                .with_context(|| format!("Failed to read line from {}", file_path.display()))?;
            table.push_row(vec![Value::String(line)]);
        }

        Ok(table)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Text
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("user_data.csv")).unwrap(), SourceFormat::Csv);
        assert_eq!(detect_format(Path::new("user_data.tsv")).unwrap(), SourceFormat::Tsv);
        assert_eq!(detect_format(Path::new("USER_DATA.JSON")).unwrap(), SourceFormat::Json);
        assert_eq!(detect_format(Path::new("user_data.xml")).unwrap(), SourceFormat::Xml);
        assert_eq!(detect_format(Path::new("user_data.txt")).unwrap(), SourceFormat::Text);
        assert!(detect_format(Path::new("user_data.parquet")).is_err());
    }

    #[test]
    fn test_csv_reader_keeps_header_names_and_types() {
        let file = write_temp(
            ".csv",
            "First Name,Second Name,Age (Years),Sex,Vehicle Year\nJane,Doe,40,F,2015\nJohn,Roe,,M,2001\n",
        );

        let table = CsvSourceReader::new().read(file.path(), "csv").unwrap();

        assert_eq!(table.source(), "csv");
        assert_eq!(table.columns()[2], "Age (Years)");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "Age (Years)"), Some(&json!(40)));
        assert_eq!(table.get(1, "Age (Years)"), Some(&Value::Null));
        assert_eq!(table.get(1, "Vehicle Year"), Some(&json!(2001)));
    }

    #[test]
    fn test_tsv_source_splits_on_tabs() {
        let file = write_temp(".tsv", "first_name\tlast_name\tage\nJane\tDoe\t40\n");

        let format = detect_format(file.path()).unwrap();
        let reader = get_reader(format);
        let table = reader.read(file.path(), "hr").unwrap();

        assert_eq!(reader.format(), SourceFormat::Tsv);
        assert_eq!(table.columns(), &["first_name", "last_name", "age"]);
        assert_eq!(table.get(0, "last_name"), Some(&json!("Doe")));
        assert_eq!(table.get(0, "age"), Some(&json!(40)));
    }

    #[test]
    fn test_json_reader_array_and_wrapped() {
        let file = write_temp(
            ".json",
            r#"[{"firstName": "Jane", "lastName": "Doe", "debt": null},
                {"firstName": "John", "lastName": "Roe", "debt": 12.5, "iban": "GB00"}]"#,
        );
        let table = JsonSourceReader::new().read(file.path(), "json").unwrap();

        assert_eq!(table.columns(), &["firstName", "lastName", "debt", "iban"]);
        assert_eq!(table.get(0, "debt"), Some(&Value::Null));
        assert_eq!(table.get(0, "iban"), Some(&Value::Null));
        assert_eq!(table.get(1, "debt"), Some(&json!(12.5)));

        let wrapped = write_temp(".json", r#"{"users": [{"firstName": "Jane"}]}"#);
        let table = JsonSourceReader::new().read(wrapped.path(), "json").unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_json_reader_rejects_scalars() {
        let file = write_temp(".json", "42");
        assert!(JsonSourceReader::new().read(file.path(), "json").is_err());
    }

    #[test]
    fn test_xml_reader_fields_and_empty_elements() {
        let file = write_temp(
            ".xml",
            r#"<?xml version="1.0"?>
<users>
  <user>
    <firstName>Jane</firstName>
    <lastName>Doe</lastName>
    <dependants>2</dependants>
    <company>Smith &amp; Sons</company>
    <retired>False</retired>
  </user>
  <user>
    <firstName>John</firstName>
    <lastName>Roe</lastName>
    <dependants/>
    <company></company>
    <retired>True</retired>
  </user>
</users>"#,
        );

        let table = XmlSourceReader::new().read(file.path(), "xml").unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.columns(),
            &["firstName", "lastName", "dependants", "company", "retired"]
        );
        assert_eq!(table.get(0, "company"), Some(&json!("Smith & Sons")));
        assert_eq!(table.get(0, "dependants"), Some(&json!(2)));
        assert_eq!(table.get(1, "dependants"), Some(&Value::Null));
        assert_eq!(table.get(1, "company"), Some(&Value::Null));
        assert_eq!(table.get(1, "retired"), Some(&json!(true)));
    }

    #[test]
    fn test_xml_reader_attributes() {
        let file = write_temp(
            ".xml",
            r#"<users><user firstName="Jane" age="40"/><user firstName="John" age="41"/></users>"#,
        );

        let table = XmlSourceReader::new().read(file.path(), "xml").unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1, "age"), Some(&json!(41)));
    }

    #[test]
    fn test_text_reader_lines() {
        let file = write_temp(".txt", "Update Debra Wood\n\nRaise Howard\n");
        let table = TextSourceReader::new().read(file.path(), "notes").unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(2, "line"), Some(&json!("Raise Howard")));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let reader = get_reader(SourceFormat::Csv);
        assert!(reader.read(Path::new("/nonexistent/user_data.csv"), "csv").is_err());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let file = write_temp(".txt", "abc");
        let a = fingerprint_file(file.path()).unwrap();
        let b = fingerprint_file(file.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
