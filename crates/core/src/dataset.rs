use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::analysis::{DatasetAnalyzer, DatasetMetadata};
use crate::rows::CanonicalRecord;
use crate::value::{GenericDataset, GenericRecord};

/// The dataset handed to the presentation layer: either normalized to the
/// canonical schema or kept in the free-form shape the oracle produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum Dataset {
    Canonical(Vec<CanonicalRecord>),
    Generic(GenericDataset),
}

impl Dataset {
    pub fn len(&self) -> usize {
        match self {
            Dataset::Canonical(rows) => rows.len(),
            Dataset::Generic(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self, Dataset::Canonical(_))
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Dataset::Canonical(_) => "canonical",
            Dataset::Generic(_) => "generic",
        }
    }

    pub fn generic_rows(&self) -> Cow<'_, [GenericRecord]> {
        match self {
            Dataset::Canonical(rows) => {
                Cow::Owned(rows.iter().map(CanonicalRecord::to_generic).collect())
            }
            Dataset::Generic(rows) => Cow::Borrowed(rows.as_slice()),
        }
    }

    /// Fresh metadata for the current rows; never cached alongside the data.
    pub fn analyze(&self, analyzer: &DatasetAnalyzer) -> DatasetMetadata {
        analyzer.analyze(&self.generic_rows())
    }
}
