mod analysis;
mod coerce;
mod dataset;
mod error;
mod extract;
mod header;
mod rows;
mod schema;
mod source;
mod value;

pub use analysis::{
    analyze_dataset, column_summary, detect_column_type, format_column_name,
    get_categorical_columns, get_numerical_columns, is_valid_pie_chart_column,
    prepare_pie_chart_data, Aggregation, ChartSlice, ChartType, ColumnInfo, ColumnSummary,
    ColumnType, DatasetAnalyzer, DatasetKind, DatasetMetadata, IndicatorClassifier,
    SchemaClassifier,
};
pub use coerce::{
    parse_float_prefix, to_boolean, to_integer, to_number, to_text, TextFallback, NOT_AVAILABLE,
};
pub use dataset::Dataset;
pub use error::{PipelineError, Result};
pub use extract::{clean_records, parse_oracle_payload};
pub use header::{map_header, normalize_header, HeaderMatch};
pub use rows::{json_shape, normalize_record, normalize_records, normalize_rows, CanonicalRecord};
pub use schema::{FieldKind, FieldSpec, Schema};
pub use source::{FileFormat, SourceFile};
pub use value::{clean_key, record_from_json, record_to_json, GenericDataset, GenericRecord, Value};
