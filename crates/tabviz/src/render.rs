use std::fmt::Write as _;

use tabviz_core::{format_column_name, ChartSlice, ColumnType, DatasetMetadata, GenericRecord};

const BAR_WIDTH: f64 = 40.0;

pub fn render_metadata(meta: &DatasetMetadata) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} rows, {} columns ({} dataset)",
        meta.row_count,
        meta.columns.len(),
        if meta.is_canonical() { "household" } else { "generic" }
    );
    let charts: Vec<&str> = meta
        .suggested_chart_types
        .iter()
        .map(|chart| chart.as_str())
        .collect();
    let _ = writeln!(
        out,
        "suggested charts: {}",
        if charts.is_empty() {
            "none".to_string()
        } else {
            charts.join(", ")
        }
    );
    out.push('\n');
    let headers = ["column", "type", "distinct", "nulls", "role"].map(String::from);
    let rows: Vec<Vec<String>> = meta
        .columns
        .iter()
        .map(|column| {
            let role = match (column.is_categorical, column.is_numerical) {
                (true, _) => "categorical",
                (_, true) => "numerical",
                _ => "",
            };
            vec![
                format_column_name(&column.name),
                type_label(column.column_type).to_string(),
                column.distinct_count.to_string(),
                if column.has_null_values { "yes" } else { "no" }.to_string(),
                role.to_string(),
            ]
        })
        .collect();
    render_table(&headers, &rows, &mut out);
    out
}

/// Markdown table of the first `limit` rows across `columns`.
pub fn render_rows(rows: &[GenericRecord], columns: &[String], limit: usize) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        out.push_str("(no rows)\n");
        return out;
    }
    let headers: Vec<String> = columns.iter().map(|c| format_column_name(c)).collect();
    let body: Vec<Vec<String>> = rows
        .iter()
        .take(limit)
        .map(|row| {
            columns
                .iter()
                .map(|column| row.get(column).map(|v| v.to_string()).unwrap_or_default())
                .collect()
        })
        .collect();
    render_table(&headers, &body, &mut out);
    if rows.len() > limit {
        let _ = writeln!(out, "... {} more rows", rows.len() - limit);
    }
    out
}

pub fn render_slices(title: &str, slices: &[ChartSlice]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## {title}\n");
    let max = slices
        .iter()
        .map(|slice| slice.value.abs())
        .fold(0.0_f64, f64::max);
    let total: f64 = slices.iter().map(|slice| slice.value).sum();
    let label_width = slices
        .iter()
        .map(|slice| slice.name.chars().count())
        .max()
        .unwrap_or(0);
    for slice in slices {
        let width = if max > 0.0 {
            (slice.value.abs() / max * BAR_WIDTH).round() as usize
        } else {
            0
        };
        let share = if total != 0.0 {
            slice.value / total * 100.0
        } else {
            0.0
        };
        let _ = writeln!(
            out,
            "{:<label_width$}  {:<bar$}  {} ({:.1}%)",
            slice.name,
            "#".repeat(width),
            format_value(slice.value),
            share,
            bar = BAR_WIDTH as usize,
        );
    }
    out
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

fn type_label(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::String => "string",
        ColumnType::Number => "number",
        ColumnType::Boolean => "boolean",
        ColumnType::Date => "date",
        ColumnType::Unknown => "unknown",
    }
}

fn render_table(headers: &[String], rows: &[Vec<String>], out: &mut String) {
    out.push('|');
    for header in headers {
        let _ = write!(out, " {} |", sanitize_cell(header));
    }
    out.push('\n');
    out.push('|');
    for _ in headers {
        out.push_str(" --- |");
    }
    out.push('\n');
    for row in rows {
        out.push('|');
        for cell in row {
            let _ = write!(out, " {} |", sanitize_cell(cell));
        }
        out.push('\n');
    }
    out.push('\n');
}

fn sanitize_cell(value: &str) -> String {
    value
        .replace('|', "\\|")
        .replace(['\r', '\n'], " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabviz_core::{analyze_dataset, Value};

    fn rows() -> Vec<GenericRecord> {
        ["Kochi", "Kochi", "Paravur"]
            .iter()
            .enumerate()
            .map(|(i, city)| {
                let mut row = GenericRecord::new();
                row.insert("city".into(), Value::text(*city));
                row.insert("monthlyRevenue".into(), Value::Number(i as f64));
                row.insert("note".into(), Value::text("a|b\nc"));
                row
            })
            .collect()
    }

    #[test]
    fn rows_render_as_markdown() {
        let columns = vec!["city".to_string(), "note".to_string()];
        let table = render_rows(&rows(), &columns, 2);
        assert!(table.starts_with("| City | Note |\n| --- | --- |\n"));
        assert!(table.contains("a\\|b c"));
        assert!(table.contains("... 1 more rows"));
    }

    #[test]
    fn metadata_lists_columns_and_charts() {
        let meta = analyze_dataset(&rows());
        let text = render_metadata(&meta);
        assert!(text.starts_with("3 rows, 3 columns (generic dataset)"));
        assert!(text.contains("suggested charts: pie, bar, line"));
        assert!(text.contains("| Monthly Revenue | number |"));
    }

    #[test]
    fn slices_render_proportional_bars() {
        let slices = vec![
            ChartSlice { name: "Kochi".into(), value: 2.0 },
            ChartSlice { name: "Paravur".into(), value: 1.0 },
        ];
        let text = render_slices("city", &slices);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "## city");
        assert!(lines[2].contains(&"#".repeat(40)));
        assert!(lines[2].ends_with("2 (66.7%)"));
        assert!(lines[3].contains(&"#".repeat(20)));
    }
}
