use std::io::{Cursor, Read};

use async_trait::async_trait;
use calamine::{DataType, Ods, Range, Reader, Xls, Xlsx};
use csv::ReaderBuilder;
use flate2::read::MultiGzDecoder;
use tabviz_core::{
    clean_key, clean_records, parse_oracle_payload, FileFormat, GenericRecord, PipelineError,
    Result, Schema, SourceFile, Value,
};

use super::ExtractionOracle;

/// Offline oracle for files that are already tabular: spreadsheets (first
/// sheet only), CSV, TSV, their gzip variants and JSON arrays. Both variants
/// return the same rows; the orchestrator maps them onto the schema.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOracle;

impl LocalOracle {
    fn read(&self, file: &SourceFile) -> Result<Vec<GenericRecord>> {
        let rows = match file.format {
            FileFormat::Csv => read_delimited(file.bytes.as_slice(), b',')?,
            FileFormat::Tsv => read_delimited(file.bytes.as_slice(), b'\t')?,
            FileFormat::CsvGz => read_delimited(MultiGzDecoder::new(file.bytes.as_slice()), b',')?,
            FileFormat::TsvGz => {
                read_delimited(MultiGzDecoder::new(file.bytes.as_slice()), b'\t')?
            }
            FileFormat::Xlsx => read_workbook::<Xlsx<_>>(file.bytes.clone())?,
            FileFormat::Xls => read_workbook::<Xls<_>>(file.bytes.clone())?,
            FileFormat::Ods => read_workbook::<Ods<_>>(file.bytes.clone())?,
            FileFormat::Json => return parse_oracle_payload(&String::from_utf8_lossy(&file.bytes)),
            other => {
                return Err(PipelineError::Oracle(format!(
                    "the local reader cannot open {} files; set TABVIZ_PROVIDER to openai, anthropic or gemini",
                    other.as_str()
                )))
            }
        };
        tracing::debug!(file = %file.name, rows = rows.len(), "read tabular file");
        Ok(rows)
    }
}

#[async_trait]
impl ExtractionOracle for LocalOracle {
    fn name(&self) -> &str {
        "local"
    }

    async fn extract_canonical(
        &self,
        file: &SourceFile,
        _schema: &Schema,
    ) -> Result<Vec<GenericRecord>> {
        self.read(file)
    }

    async fn extract_generic(&self, file: &SourceFile) -> Result<Vec<GenericRecord>> {
        self.read(file)
    }
}

fn read_delimited<R: Read>(reader: R, delimiter: u8) -> Result<Vec<GenericRecord>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader);
    let headers = reader
        .headers()
        .map(|h| h.iter().map(clean_key).collect::<Vec<_>>())
        .map_err(|err| PipelineError::ExtractionFormat(format!("missing headers: {err}")))?;
    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record
            .map_err(|err| PipelineError::ExtractionFormat(format!("invalid row {}: {err}", idx + 1)))?;
        let mut row = GenericRecord::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            let cell = cell.trim();
            let value = if cell.is_empty() {
                Value::Null
            } else {
                Value::text(cell)
            };
            row.entry(header.clone()).or_insert(value);
        }
        rows.push(row);
    }
    Ok(clean_records(rows))
}

fn read_workbook<R>(bytes: Vec<u8>) -> Result<Vec<GenericRecord>>
where
    R: Reader<Cursor<Vec<u8>>>,
{
    let mut workbook = R::new(Cursor::new(bytes)).map_err(|err| {
        PipelineError::ExtractionFormat(format!("unable to open the spreadsheet: {err:?}"))
    })?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| PipelineError::ExtractionFormat("the workbook has no worksheets".into()))?;
    let range = workbook
        .worksheet_range(&sheet)
        .ok_or_else(|| PipelineError::ExtractionFormat(format!("unable to read sheet {sheet}")))?
        .map_err(|err| PipelineError::ExtractionFormat(format!("unable to read sheet {sheet}: {err:?}")))?;
    tracing::debug!(sheet = %sheet, "reading first worksheet");
    Ok(records_from_range(&range))
}

/// The first row with any content is the header row; blank headers become
/// `column_<n>`.
fn records_from_range(range: &Range<DataType>) -> Vec<GenericRecord> {
    let mut rows = range
        .rows()
        .skip_while(|row| row.iter().all(|cell| cell_value(cell).is_empty()));
    let Some(header_row) = rows.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(idx, cell)| match cell_value(cell) {
            value if value.is_empty() => format!("column_{}", idx + 1),
            value => clean_key(&value.to_string()),
        })
        .collect();
    let records = rows
        .map(|row| {
            let mut record = GenericRecord::new();
            for (header, cell) in headers.iter().zip(row.iter()) {
                record.entry(header.clone()).or_insert_with(|| cell_value(cell));
            }
            record
        })
        .collect();
    clean_records(records)
}

fn cell_value(cell: &DataType) -> Value {
    match cell {
        DataType::Empty | DataType::Error(_) => Value::Null,
        DataType::String(s) if s.trim().is_empty() => Value::Null,
        DataType::String(s) => Value::text(s.trim()),
        DataType::Float(f) => Value::Number(*f),
        DataType::Int(i) => Value::Number(*i as f64),
        DataType::Bool(b) => Value::Bool(*b),
        other => Value::text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[tokio::test]
    async fn csv_rows_use_cleaned_headers() {
        let file = SourceFile::new(
            "survey.csv",
            b"Unit Name,Avg. Monthly Bill\nAvemariya,1200\n,\nHaritham,850\n".to_vec(),
            0,
        );
        let rows = LocalOracle.extract_generic(&file).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Unit_Name"), Some(&Value::text("Avemariya")));
        assert_eq!(rows[1].get("Avg_Monthly_Bill"), Some(&Value::text("850")));
    }

    #[tokio::test]
    async fn gzipped_tsv_is_decoded() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        writeln!(encoder, "city\trevenue").unwrap();
        writeln!(encoder, "Kochi\t10").unwrap();
        let bytes = encoder.finish().unwrap();
        let file = SourceFile::new("sales.tsv.gz", bytes, 0);
        let rows = LocalOracle.extract_generic(&file).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("city"), Some(&Value::text("Kochi")));
    }

    #[tokio::test]
    async fn json_files_follow_the_payload_contract() {
        let ok = SourceFile::new("rows.json", br#"[{"a": 1}]"#.to_vec(), 0);
        assert_eq!(LocalOracle.extract_generic(&ok).await.unwrap().len(), 1);
        let bad = SourceFile::new("rows.json", b"not json".to_vec(), 0);
        let err = LocalOracle.extract_generic(&bad).await.unwrap_err();
        assert!(err.is_format_error());
    }

    #[tokio::test]
    async fn binary_documents_need_a_remote_provider() {
        let file = SourceFile::new("scan.pdf", b"%PDF-1.4".to_vec(), 0);
        let err = LocalOracle.extract_generic(&file).await.unwrap_err();
        assert!(matches!(err, PipelineError::Oracle(_)));
    }

    const SURVEY_XLSX: &[u8] = include_bytes!("../../tests/fixtures/survey.xlsx");

    #[tokio::test]
    async fn workbook_first_sheet_becomes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.xlsx");
        std::fs::write(&path, SURVEY_XLSX).unwrap();
        let file = SourceFile::from_path(&path).unwrap();
        assert_eq!(file.format, FileFormat::Xlsx);

        let rows = LocalOracle.extract_generic(&file).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Unit_Name"), Some(&Value::text("Avemariya")));
        assert_eq!(rows[0].get("Family_Size"), Some(&Value::Number(4.0)));
        assert_eq!(rows[0].get("Avg_Monthly_Bill"), Some(&Value::Number(1200.5)));
        assert_eq!(rows[1].get("Solar_Panels"), Some(&Value::text("No")));
        assert!(rows.iter().all(|row| !row.values().any(|v| v == &Value::text("ignored"))));
    }

    #[tokio::test]
    async fn corrupt_workbook_is_a_format_error() {
        let file = SourceFile::new("survey.xlsx", b"PK not really a zip".to_vec(), 0);
        let err = LocalOracle.extract_generic(&file).await.unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn header_row_is_the_first_non_blank_row() {
        let mut range = Range::new((0, 0), (3, 2));
        range.set_value((1, 0), DataType::String("House Type".into()));
        range.set_value((1, 2), DataType::String("  ".into()));
        range.set_value((2, 0), DataType::String("Independent".into()));
        range.set_value((2, 1), DataType::Int(2));
        range.set_value((2, 2), DataType::Bool(true));

        let rows = records_from_range(&range);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("House_Type"), Some(&Value::text("Independent")));
        assert_eq!(row.get("column_2"), Some(&Value::Number(2.0)));
        assert_eq!(row.get("column_3"), Some(&Value::Bool(true)));
    }
}
