use tabviz_core::SourceFile;

const PRIME: u64 = 31;
const MASK: u64 = 0x7fff_ffff;
const MAX_SAMPLE: usize = 1024;

/// Rolling polynomial hash over an evenly strided byte sample followed by
/// `name_size_modified`. Rendered in base 36.
pub fn compute_fingerprint(file: &SourceFile) -> String {
    let bytes = &file.bytes;
    let sample_size = bytes.len().min(MAX_SAMPLE);
    let step = if sample_size == 0 {
        1
    } else {
        (bytes.len() / sample_size).max(1)
    };

    let mut hash = 0u64;
    for byte in bytes.iter().step_by(step) {
        hash = (hash * PRIME + u64::from(*byte)) & MASK;
    }

    let metadata = format!("{}_{}_{}", file.name, file.size(), file.modified_ms);
    for unit in metadata.encode_utf16() {
        hash = (hash * PRIME + u64::from(unit)) & MASK;
    }

    to_base36(hash)
}

/// Lowercased file name with everything but ASCII letters and digits dropped.
pub fn name_key(file_name: &str) -> String {
    file_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base36_matches_radix_rendering() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(0x7fff_ffff), "zik0zj");
    }

    #[test]
    fn empty_file_hashes_metadata_only() {
        let a = SourceFile::new("a.csv", Vec::new(), 0);
        let b = SourceFile::new("b.csv", Vec::new(), 0);
        assert_ne!(compute_fingerprint(&a), compute_fingerprint(&b));
    }

    #[test]
    fn large_files_are_sampled() {
        let bytes = vec![7u8; 10_000];
        let file = SourceFile::new("big.xlsx", bytes.clone(), 1_700_000_000_000);
        assert_eq!(compute_fingerprint(&file), compute_fingerprint(&file.clone()));

        let mut edited = bytes;
        edited[0] = 8;
        let changed = SourceFile::new("big.xlsx", edited, 1_700_000_000_000);
        assert_ne!(compute_fingerprint(&file), compute_fingerprint(&changed));
    }

    #[test]
    fn name_key_strips_punctuation() {
        assert_eq!(name_key("Survey (Final).XLSX"), "surveyfinalxlsx");
        assert_eq!(name_key("survey_final.xlsx"), "surveyfinalxlsx");
    }
}
