use super::ReportError;
use crate::{
    aggregate::{Aggregates, MetricSummary},
    database::NOT_APPLICABLE,
};
use std::{fs, path::Path};
use tracing::info;

const HEADERS: [&str; 5] = [
    "Implementation",
    "Configuration",
    "Avg Throughput (ops/sec)",
    "Avg Hit Ratio (%)",
    "Avg Run Time (s)",
];

/// columns holding numbers are right aligned
const NUMERIC: [bool; 5] = [false, false, true, true, true];

pub const EMPTY_TABLE: &str = "No PASSED records matched a known implementation, nothing to summarise.";

/// integer part of `value` with `,` between every group of three digits
pub fn thousands(value: f64) -> String {
    let digits = (value.trunc() as i64).unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);

    if value <= -1.0 {
        grouped.push('-');
    }

    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    grouped
}

fn cell(summary: Option<&MetricSummary>, format: fn(f64) -> String) -> String {
    summary
        .map(|summary| format(summary.mean))
        .unwrap_or_else(|| NOT_APPLICABLE.to_owned())
}

fn two_decimals(value: f64) -> String {
    format!("{value:.2}")
}

fn separator(widths: &[usize], fill: char) -> String {
    let mut line = String::from("+");

    for width in widths {
        line.extend(std::iter::repeat(fill).take(width + 2));
        line.push('+');
    }

    line
}

fn row(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::from("|");

    for ((cell, width), numeric) in cells.iter().zip(widths.iter().copied()).zip(NUMERIC) {
        if numeric {
            line.push_str(&format!(" {cell:>width$} |"));
        } else {
            line.push_str(&format!(" {cell:<width$} |"));
        }
    }

    line
}

/// Render the aggregates as a grid table, one row per (category, configuration)
pub fn render_table(aggregates: &Aggregates) -> String {
    if aggregates.is_empty() {
        return EMPTY_TABLE.to_owned();
    }

    let rows = aggregates
        .iter()
        .map(|((category, configuration), result)| {
            vec![
                category.label().to_owned(),
                configuration.clone(),
                cell(result.throughput.as_ref(), thousands),
                cell(result.hit_ratio.as_ref(), two_decimals),
                cell(result.elapsed.as_ref(), two_decimals),
            ]
        })
        .collect::<Vec<_>>();

    let mut widths = HEADERS.map(|header| header.chars().count());
    for cells in rows.iter() {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let headers = HEADERS.map(str::to_owned);
    let mut lines = vec![
        separator(&widths, '-'),
        // headers are always left aligned
        headers
            .iter()
            .zip(widths)
            .fold(String::from("|"), |line, (header, width)| {
                line + &format!(" {header:<width$} |")
            }),
        separator(&widths, '='),
    ];

    for cells in rows.iter() {
        lines.push(row(cells, &widths));
        lines.push(separator(&widths, '-'));
    }

    lines.join("\n")
}

pub fn write_table(path: &Path, aggregates: &Aggregates) -> Result<String, ReportError> {
    let table = render_table(aggregates);
    info!("Performance summary:\n{table}");

    fs::write(path, format!("{table}\n")).map_err(|source| ReportError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Wrote performance summary to {}", path.to_string_lossy());

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateResult, Category};

    #[test]
    fn thousands_separator() {
        assert_eq!(thousands(0.0), "0");
        assert_eq!(thousands(999.9), "999");
        assert_eq!(thousands(1000.0), "1,000");
        assert_eq!(thousands(4_970_000.4), "4,970,000");
        assert_eq!(thousands(-1234.0), "-1,234");
    }

    #[test]
    fn renders_grid_with_unavailable_cells() {
        let mut aggregates = Aggregates::new();
        aggregates.insert(
            (Category::Sharded, "NoResizer_SegHashTable".to_owned()),
            AggregateResult {
                throughput: MetricSummary::from_values(vec![1234567.0]),
                hit_ratio: None,
                elapsed: MetricSummary::from_values(vec![2.0, 2.5]),
                samples: 2,
            },
        );

        let table = render_table(&aggregates);
        let lines = table.lines().collect::<Vec<_>>();

        assert_eq!(lines.len(), 5);
        assert_eq!(
            lines[1],
            "| Implementation | Configuration          | Avg Throughput (ops/sec) | Avg Hit Ratio (%) | Avg Run Time (s) |"
        );
        assert!(lines[2].starts_with("+================+"));
        assert_eq!(
            lines[3],
            "| SegLRU         | NoResizer_SegHashTable |                1,234,567 |               N/A |             2.25 |"
        );
        assert_eq!(lines[0], lines[4]);
    }

    #[test]
    fn empty_aggregates_render_notice() {
        assert_eq!(render_table(&Aggregates::new()), EMPTY_TABLE);
    }
}
