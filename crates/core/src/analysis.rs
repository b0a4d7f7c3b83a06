//! Shape inference over generic datasets: per-column types, cardinality,
//! canonical-schema detection and chart suggestions.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::coerce::parse_float_prefix;
use crate::header::normalize_header;
use crate::value::{GenericRecord, Value};

const TYPE_VOTE_THRESHOLD: f64 = 0.8;
const UNIQUE_SAMPLE_LIMIT: usize = 50;
const MAX_CATEGORICAL_DISTINCT: usize = 20;
const MIN_PIE_DISTINCT: usize = 2;
const MAX_PIE_COLUMN_DISTINCT: usize = 15;
const UNKNOWN_CATEGORY: &str = "Unknown";

const BOOLEAN_TOKENS: [&str; 6] = ["true", "false", "yes", "no", "1", "0"];
const DATE_FORMATS: [&str; 10] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Date,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Household,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Pie,
    Bar,
    Line,
    Scatter,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Pie => "pie",
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Scatter => "scatter",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
    /// First distinct values in encounter order, bounded.
    pub unique_values: Vec<Value>,
    pub distinct_count: usize,
    pub has_null_values: bool,
    pub is_numerical: bool,
    pub is_categorical: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub columns: Vec<ColumnInfo>,
    pub row_count: usize,
    pub kind: DatasetKind,
    pub suggested_chart_types: Vec<ChartType>,
}

impl DatasetMetadata {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            row_count: 0,
            kind: DatasetKind::Generic,
            suggested_chart_types: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_canonical(&self) -> bool {
        self.kind == DatasetKind::Household
    }
}

/// Decides whether a set of column names looks like the canonical schema.
pub trait SchemaClassifier: Send + Sync {
    fn is_canonical(&self, columns: &[String]) -> bool;
}

/// Substring match of normalized column names (`Unit_Name` reads as
/// `unitname`) against indicator tokens.
#[derive(Debug, Clone)]
pub struct IndicatorClassifier {
    indicators: Vec<String>,
}

impl IndicatorClassifier {
    pub fn new<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            indicators: indicators
                .into_iter()
                .map(|s| normalize_header(s.as_ref()))
                .collect(),
        }
    }

    pub fn household() -> Self {
        Self::new([
            "unitname",
            "familymembers",
            "housetype",
            "monthlybill",
            "energy",
        ])
    }
}

impl Default for IndicatorClassifier {
    fn default() -> Self {
        Self::household()
    }
}

impl SchemaClassifier for IndicatorClassifier {
    fn is_canonical(&self, columns: &[String]) -> bool {
        columns.iter().any(|column| {
            let lower = normalize_header(column);
            self.indicators
                .iter()
                .any(|indicator| lower.contains(indicator.as_str()))
        })
    }
}

pub struct DatasetAnalyzer {
    classifier: Box<dyn SchemaClassifier>,
}

impl Default for DatasetAnalyzer {
    fn default() -> Self {
        Self::new(IndicatorClassifier::household())
    }
}

impl DatasetAnalyzer {
    pub fn new(classifier: impl SchemaClassifier + 'static) -> Self {
        Self {
            classifier: Box::new(classifier),
        }
    }

    pub fn analyze(&self, rows: &[GenericRecord]) -> DatasetMetadata {
        if rows.is_empty() {
            return DatasetMetadata::empty();
        }
        let names = column_names(rows);
        let columns: Vec<ColumnInfo> = names
            .iter()
            .map(|name| analyze_column(name, rows))
            .collect();
        let kind = if self.classifier.is_canonical(&names) {
            DatasetKind::Household
        } else {
            DatasetKind::Generic
        };
        let categorical = columns.iter().filter(|c| c.is_categorical).count();
        let numerical = columns.iter().filter(|c| c.is_numerical).count();
        let mut suggested_chart_types = Vec::new();
        if categorical > 0 {
            suggested_chart_types.push(ChartType::Pie);
            suggested_chart_types.push(ChartType::Bar);
        }
        if numerical >= 2 {
            suggested_chart_types.push(ChartType::Scatter);
        }
        if numerical > 0 {
            suggested_chart_types.push(ChartType::Line);
        }
        tracing::debug!(
            rows = rows.len(),
            columns = columns.len(),
            kind = ?kind,
            "dataset analyzed"
        );
        DatasetMetadata {
            columns,
            row_count: rows.len(),
            kind,
            suggested_chart_types,
        }
    }
}

pub fn analyze_dataset(rows: &[GenericRecord]) -> DatasetMetadata {
    DatasetAnalyzer::default().analyze(rows)
}

/// Union of keys across rows, first-seen order; rows may be sparse.
fn column_names(rows: &[GenericRecord]) -> Vec<String> {
    let mut names: IndexSet<&str> = IndexSet::new();
    for row in rows {
        for key in row.keys() {
            names.insert(key.as_str());
        }
    }
    names.into_iter().map(str::to_string).collect()
}

fn column_values<'a>(rows: &'a [GenericRecord], name: &str) -> Vec<&'a Value> {
    static NULL: Value = Value::Null;
    rows.iter()
        .map(|row| row.get(name).unwrap_or(&NULL))
        .collect()
}

fn analyze_column(name: &str, rows: &[GenericRecord]) -> ColumnInfo {
    let values = column_values(rows, name);
    let column_type = detect_column_type(&values);
    let mut seen = HashSet::new();
    let mut unique_values = Vec::new();
    for value in &values {
        if seen.insert(value.distinct_key()) && unique_values.len() < UNIQUE_SAMPLE_LIMIT {
            unique_values.push((*value).clone());
        }
    }
    let distinct_count = seen.len();
    let is_numerical = column_type == ColumnType::Number;
    let is_categorical = matches!(column_type, ColumnType::String | ColumnType::Boolean)
        || (is_numerical && distinct_count <= MAX_CATEGORICAL_DISTINCT);
    ColumnInfo {
        name: name.to_string(),
        column_type,
        unique_values,
        distinct_count,
        has_null_values: values.iter().any(|v| v.is_empty()),
        is_numerical,
        is_categorical,
    }
}

/// Majority vote: a type wins when at least 80% of the non-empty cells agree,
/// checked in the order boolean, number, date.
pub fn detect_column_type(values: &[&Value]) -> ColumnType {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_empty()).collect();
    if present.is_empty() {
        return ColumnType::Unknown;
    }
    let total = present.len() as f64;
    let share = |pred: fn(&Value) -> bool| present.iter().filter(|v| pred(v)).count() as f64 / total;
    if share(is_boolean_like) >= TYPE_VOTE_THRESHOLD {
        ColumnType::Boolean
    } else if share(is_number_like) >= TYPE_VOTE_THRESHOLD {
        ColumnType::Number
    } else if share(is_date_like) >= TYPE_VOTE_THRESHOLD {
        ColumnType::Date
    } else {
        ColumnType::String
    }
}

fn is_boolean_like(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::Text(s) => BOOLEAN_TOKENS.contains(&s.trim().to_lowercase().as_str()),
        _ => false,
    }
}

/// The whole cell must be numeric (digit grouping commas allowed), so ISO
/// dates such as `2024-01-05` are not mistaken for `2024`.
fn is_number_like(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_finite(),
        Value::Text(s) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .map(|n| n.is_finite())
            .unwrap_or(false),
        _ => false,
    }
}

fn is_date_like(value: &Value) -> bool {
    match value {
        Value::Text(s) => parse_date(s),
        _ => false,
    }
}

fn parse_date(raw: &str) -> bool {
    let s = raw.trim();
    if DateTime::parse_from_rfc3339(s).is_ok() || DateTime::parse_from_rfc2822(s).is_ok() {
        return true;
    }
    DATE_FORMATS
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(s, fmt).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(s, fmt).is_ok())
}

/// Categorical columns with a legible number of slices (2 to 20).
pub fn get_categorical_columns(metadata: &DatasetMetadata) -> Vec<&ColumnInfo> {
    metadata
        .columns
        .iter()
        .filter(|c| {
            c.is_categorical
                && (MIN_PIE_DISTINCT..=MAX_CATEGORICAL_DISTINCT).contains(&c.distinct_count)
        })
        .collect()
}

pub fn get_numerical_columns(metadata: &DatasetMetadata) -> Vec<&ColumnInfo> {
    metadata.columns.iter().filter(|c| c.is_numerical).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Count,
    Sum,
    Average,
    Min,
    Max,
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "count" => Ok(Aggregation::Count),
            "sum" => Ok(Aggregation::Sum),
            "average" | "avg" | "mean" => Ok(Aggregation::Average),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            other => Err(format!("unknown aggregation {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSlice {
    pub name: String,
    pub value: f64,
}

fn category_label(value: Option<&Value>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN_CATEGORY.to_string(),
    }
}

fn lenient_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) if n.is_finite() => *n,
        Some(Value::Text(s)) => parse_float_prefix(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Groups rows by `column` and reduces each group, largest first. Equal values
/// keep the order in which their category first appeared.
pub fn prepare_pie_chart_data(
    rows: &[GenericRecord],
    column: &str,
    aggregation: Aggregation,
    value_column: Option<&str>,
) -> Vec<ChartSlice> {
    let mut groups: IndexMap<String, Vec<f64>> = IndexMap::new();
    for row in rows {
        let label = category_label(row.get(column));
        let value = value_column
            .map(|name| lenient_number(row.get(name)))
            .unwrap_or(0.0);
        groups.entry(label).or_default().push(value);
    }
    let aggregation = if value_column.is_none() {
        Aggregation::Count
    } else {
        aggregation
    };
    let mut slices: Vec<ChartSlice> = groups
        .into_iter()
        .map(|(name, values)| {
            let value = match aggregation {
                Aggregation::Count => values.len() as f64,
                Aggregation::Sum => values.iter().sum(),
                Aggregation::Average => values.iter().sum::<f64>() / values.len() as f64,
                Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            ChartSlice { name, value }
        })
        .collect();
    slices.sort_by(|a, b| b.value.total_cmp(&a.value));
    slices
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub total: usize,
    pub unique: usize,
    pub null_count: usize,
    pub most_common: Option<(String, usize)>,
}

pub fn column_summary(rows: &[GenericRecord], column: &str) -> ColumnSummary {
    let values = column_values(rows, column);
    let mut counts: IndexMap<String, usize> = IndexMap::new();
    let mut null_count = 0;
    for value in &values {
        if value.is_empty() {
            null_count += 1;
        } else {
            *counts.entry(value.to_string()).or_default() += 1;
        }
    }
    let mut most_common: Option<(String, usize)> = None;
    for (value, count) in &counts {
        if most_common.as_ref().map_or(true, |(_, best)| count > best) {
            most_common = Some((value.clone(), *count));
        }
    }
    ColumnSummary {
        total: values.len(),
        unique: counts.len(),
        null_count,
        most_common,
    }
}

/// A pie needs 2 to 15 distinct non-null values to stay readable.
pub fn is_valid_pie_chart_column(rows: &[GenericRecord], column: &str) -> bool {
    if rows.is_empty() || column.is_empty() {
        return false;
    }
    let distinct: HashSet<(u8, String)> = column_values(rows, column)
        .into_iter()
        .filter(|v| !matches!(v, Value::Null))
        .map(Value::distinct_key)
        .collect();
    (MIN_PIE_DISTINCT..=MAX_PIE_COLUMN_DISTINCT).contains(&distinct.len())
}

/// `avgMonthlyBill` becomes `Avg Monthly Bill`, `unit_name` becomes `Unit name`.
pub fn format_column_name(name: &str) -> String {
    let mut spaced = String::with_capacity(name.len() + 8);
    for ch in name.chars() {
        if ch.is_uppercase() {
            spaced.push(' ');
        }
        if ch == '-' || ch == '_' {
            spaced.push(' ');
        } else {
            spaced.push(ch);
        }
    }
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> GenericRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn city_revenue() -> Vec<GenericRecord> {
        let cities = ["Kochi", "Paravur", "Aluva", "Kochi", "Munnar", "Thrissur"];
        cities
            .iter()
            .enumerate()
            .map(|(idx, city)| {
                row(&[
                    ("city", Value::text(*city)),
                    ("revenue", Value::Number(100.0 * (idx as f64 + 1.0))),
                ])
            })
            .collect()
    }

    #[test]
    fn city_and_revenue_suggest_pie_bar_line() {
        let meta = analyze_dataset(&city_revenue());
        assert_eq!(meta.row_count, 6);
        assert_eq!(meta.kind, DatasetKind::Generic);
        assert_eq!(
            meta.suggested_chart_types,
            vec![ChartType::Pie, ChartType::Bar, ChartType::Line]
        );
        let city = meta.column("city").unwrap();
        assert_eq!(city.column_type, ColumnType::String);
        assert_eq!(city.distinct_count, 5);
        assert!(meta.column("revenue").unwrap().is_numerical);
    }

    #[test]
    fn two_numeric_columns_add_scatter() {
        let rows = vec![
            row(&[("x", Value::Number(1.0)), ("y", Value::text("2.5"))]),
            row(&[("x", Value::Number(2.0)), ("y", Value::text("3"))]),
        ];
        let meta = analyze_dataset(&rows);
        assert!(meta.suggested_chart_types.contains(&ChartType::Scatter));
    }

    #[test]
    fn majority_vote_tolerates_bad_cells() {
        let values: Vec<Value> = (0..9)
            .map(|i| Value::text(i.to_string() + "5"))
            .chain(std::iter::once(Value::text("oops")))
            .collect();
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(detect_column_type(&refs), ColumnType::Number);
    }

    #[test]
    fn detects_booleans_dates_and_unknown() {
        let bools = [Value::text("Yes"), Value::text("no"), Value::Bool(true)];
        assert_eq!(
            detect_column_type(&bools.iter().collect::<Vec<_>>()),
            ColumnType::Boolean
        );
        let dates = [Value::text("2024-01-05"), Value::text("March 3, 2021")];
        assert_eq!(
            detect_column_type(&dates.iter().collect::<Vec<_>>()),
            ColumnType::Date
        );
        let empty = [Value::Null, Value::text("")];
        assert_eq!(
            detect_column_type(&empty.iter().collect::<Vec<_>>()),
            ColumnType::Unknown
        );
    }

    #[test]
    fn household_columns_are_recognized() {
        let rows = vec![row(&[("unitName", Value::text("Avemariya"))])];
        assert_eq!(analyze_dataset(&rows).kind, DatasetKind::Household);
        let custom = DatasetAnalyzer::new(IndicatorClassifier::new(["sku"]));
        let rows = vec![row(&[("SKU_code", Value::text("A1"))])];
        assert!(custom.analyze(&rows).is_canonical());
        let cleaned = vec![row(&[("Number_of_Family_Members", Value::Number(4.0))])];
        assert!(analyze_dataset(&cleaned).is_canonical());
    }

    #[test]
    fn sparse_rows_union_columns() {
        let rows = vec![
            row(&[("a", Value::Number(1.0))]),
            row(&[("b", Value::text("x"))]),
        ];
        let meta = analyze_dataset(&rows);
        let names: Vec<&str> = meta.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(meta.column("a").unwrap().has_null_values);
    }

    #[test]
    fn categorical_columns_respect_bounds() {
        let rows: Vec<GenericRecord> = (0..30)
            .map(|i| {
                row(&[
                    ("id", Value::text(format!("id-{i}"))),
                    ("constant", Value::text("same")),
                    ("bucket", Value::text(format!("b{}", i % 4))),
                ])
            })
            .collect();
        let meta = analyze_dataset(&rows);
        let names: Vec<&str> = get_categorical_columns(&meta)
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["bucket"]);
    }

    #[test]
    fn pie_counts_sorted_with_stable_ties() {
        let rows = city_revenue();
        let slices = prepare_pie_chart_data(&rows, "city", Aggregation::Count, None);
        assert_eq!(slices[0].name, "Kochi");
        assert_eq!(slices[0].value, 2.0);
        let rest: Vec<&str> = slices[1..].iter().map(|s| s.name.as_str()).collect();
        assert_eq!(rest, vec!["Paravur", "Aluva", "Munnar", "Thrissur"]);
    }

    #[test]
    fn pie_aggregates_second_column() {
        let rows = city_revenue();
        let sum = prepare_pie_chart_data(&rows, "city", Aggregation::Sum, Some("revenue"));
        assert_eq!(sum[0].name, "Thrissur");
        assert_eq!(sum[0].value, 600.0);
        let kochi = sum.iter().find(|s| s.name == "Kochi").unwrap();
        assert_eq!(kochi.value, 500.0);
        let avg = prepare_pie_chart_data(&rows, "city", Aggregation::Average, Some("revenue"));
        let kochi = avg.iter().find(|s| s.name == "Kochi").unwrap();
        assert_eq!(kochi.value, 250.0);
        let min = prepare_pie_chart_data(&rows, "city", Aggregation::Min, Some("revenue"));
        assert_eq!(min.iter().find(|s| s.name == "Kochi").unwrap().value, 100.0);
    }

    #[test]
    fn missing_category_is_unknown() {
        let rows = vec![row(&[("city", Value::Null)]), row(&[])];
        let slices = prepare_pie_chart_data(&rows, "city", Aggregation::Count, None);
        assert_eq!(slices, vec![ChartSlice { name: "Unknown".into(), value: 2.0 }]);
    }

    #[test]
    fn summary_reports_most_common() {
        let summary = column_summary(&city_revenue(), "city");
        assert_eq!(summary.total, 6);
        assert_eq!(summary.unique, 5);
        assert_eq!(summary.null_count, 0);
        assert_eq!(summary.most_common, Some(("Kochi".to_string(), 2)));
    }

    #[test]
    fn pie_column_validity() {
        let rows = city_revenue();
        assert!(is_valid_pie_chart_column(&rows, "city"));
        assert!(!is_valid_pie_chart_column(&rows, ""));
        assert!(!is_valid_pie_chart_column(&[], "city"));
    }

    #[test]
    fn formats_column_names() {
        assert_eq!(format_column_name("avgMonthlyBill"), "Avg Monthly Bill");
        assert_eq!(format_column_name("unit_name"), "Unit name");
        assert_eq!(format_column_name(""), "");
    }
}
