use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Pdf,
    Xlsx,
    Xls,
    Ods,
    Csv,
    Tsv,
    CsvGz,
    TsvGz,
    Json,
    Image,
    Unknown,
}

impl FileFormat {
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".csv.gz") {
            return FileFormat::CsvGz;
        }
        if lower.ends_with(".tsv.gz") {
            return FileFormat::TsvGz;
        }
        let ext = Path::new(&lower)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_string);
        match ext.as_deref() {
            Some("pdf") => FileFormat::Pdf,
            Some("xlsx") | Some("xlsm") => FileFormat::Xlsx,
            Some("xls") => FileFormat::Xls,
            Some("ods") => FileFormat::Ods,
            Some("csv") => FileFormat::Csv,
            Some("tsv") | Some("tab") => FileFormat::Tsv,
            Some("json") => FileFormat::Json,
            Some(ext)
                if matches!(
                    ext,
                    "png" | "jpg" | "jpeg" | "gif" | "tif" | "tiff" | "bmp" | "webp"
                ) =>
            {
                FileFormat::Image
            }
            _ => FileFormat::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Pdf => "pdf",
            FileFormat::Xlsx => "xlsx",
            FileFormat::Xls => "xls",
            FileFormat::Ods => "ods",
            FileFormat::Csv => "csv",
            FileFormat::Tsv => "tsv",
            FileFormat::CsvGz => "csv.gz",
            FileFormat::TsvGz => "tsv.gz",
            FileFormat::Json => "json",
            FileFormat::Image => "image",
            FileFormat::Unknown => "unknown",
        }
    }

    pub fn mime_type(&self, name: &str) -> &'static str {
        match self {
            FileFormat::Pdf => "application/pdf",
            FileFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            FileFormat::Xls => "application/vnd.ms-excel",
            FileFormat::Ods => "application/vnd.oasis.opendocument.spreadsheet",
            FileFormat::Csv => "text/csv",
            FileFormat::Tsv => "text/tab-separated-values",
            FileFormat::CsvGz | FileFormat::TsvGz => "application/gzip",
            FileFormat::Json => "application/json",
            FileFormat::Image => {
                let lower = name.to_lowercase();
                if lower.ends_with(".png") {
                    "image/png"
                } else if lower.ends_with(".gif") {
                    "image/gif"
                } else if lower.ends_with(".webp") {
                    "image/webp"
                } else if lower.ends_with(".tif") || lower.ends_with(".tiff") {
                    "image/tiff"
                } else if lower.ends_with(".bmp") {
                    "image/bmp"
                } else {
                    "image/jpeg"
                }
            }
            FileFormat::Unknown => "application/octet-stream",
        }
    }
}

/// An uploaded file: its bytes plus the metadata that feeds the fingerprint.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Last-modified time in milliseconds since the Unix epoch.
    pub modified_ms: i64,
    pub format: FileFormat,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, modified_ms: i64) -> Self {
        let name = name.into();
        let format = FileFormat::from_name(&name);
        Self {
            name,
            bytes,
            modified_ms,
            format,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let modified_ms = fs::metadata(path)?
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self::new(name, bytes, modified_ms))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_follow_extension() {
        assert_eq!(FileFormat::from_name("Survey.XLSX"), FileFormat::Xlsx);
        assert_eq!(FileFormat::from_name("rows.csv.gz"), FileFormat::CsvGz);
        assert_eq!(FileFormat::from_name("scan.pdf"), FileFormat::Pdf);
        assert_eq!(FileFormat::from_name("notes"), FileFormat::Unknown);
    }

    #[test]
    fn mime_types_for_uploads() {
        let file = SourceFile::new("page.png", vec![1, 2], 0);
        assert_eq!(file.mime_type(), "image/png");
        assert_eq!(file.size(), 2);
        assert_eq!(SourceFile::new("a.csv", vec![], 0).mime_type(), "text/csv");
    }
}
