use super::ReportError;
use crate::database::{excerpt, RunRecord};
use serde::Serialize;
use std::{fs::File, io::Write, path::Path};
use tracing::info;

/// One line of the run log file, columns in declaration order
#[derive(Serialize, Debug)]
struct Row<'a> {
    configuration: &'a str,
    segment_bits: u32,
    segments: u64,
    binary: &'a str,
    test_case: &'a str,
    run: u32,
    status: &'static str,
    throughput_ops_sec: Option<f64>,
    hit_ratio_pct: Option<f64>,
    run_time_s: Option<f64>,
    failed_output: String,
}

impl<'a> From<&'a RunRecord> for Row<'a> {
    fn from(record: &'a RunRecord) -> Self {
        let metrics = record.metrics.unwrap_or_default();

        Self {
            configuration: &record.configuration,
            segment_bits: record.segment_bits,
            segments: record.segments(),
            binary: &record.binary,
            test_case: &record.test_case,
            run: record.run,
            status: record.status.as_str(),
            throughput_ops_sec: metrics.throughput,
            hit_ratio_pct: metrics.hit_ratio,
            run_time_s: metrics.elapsed,
            failed_output: record
                .failure
                .as_deref()
                .map(excerpt)
                .unwrap_or_default(),
        }
    }
}

/// Write every record as one CSV row, preceded by a header line
pub fn write_rows<W: Write>(writer: W, records: &[RunRecord]) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_writer(writer);

    for record in records {
        writer.serialize(Row::from(record))?;
    }
    writer.flush()?;

    Ok(())
}

pub fn write_csv(path: &Path, records: &[RunRecord]) -> Result<(), ReportError> {
    let file = File::create(path).map_err(|source| ReportError::Create {
        path: path.to_path_buf(),
        source,
    })?;

    write_rows(file, records)?;
    info!("Wrote {} run records to {}", records.len(), path.to_string_lossy());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MetricSet, OutcomeStatus};

    #[test]
    fn rows_follow_column_order_and_leave_missing_values_empty() {
        let records = vec![
            RunRecord {
                configuration: "NoResizer_Libcuckoo".to_owned(),
                segment_bits: 2,
                binary: "mylru_tests_mt".to_owned(),
                test_case: "BenchMark Test (Single LRU)".to_owned(),
                run: 1,
                status: OutcomeStatus::Passed,
                metrics: Some(MetricSet {
                    throughput: Some(12345.5),
                    hit_ratio: None,
                    elapsed: Some(2.0),
                }),
                failure: None,
            },
            RunRecord::build_failure("WithResizer", 2, OutcomeStatus::BuildError, "line one\nline two"),
        ];

        let mut buffer = Vec::new();
        write_rows(&mut buffer, &records).unwrap();
        let written = String::from_utf8(buffer).unwrap();
        let lines = written.lines().collect::<Vec<_>>();

        assert_eq!(
            lines[0],
            "configuration,segment_bits,segments,binary,test_case,run,status,throughput_ops_sec,hit_ratio_pct,run_time_s,failed_output"
        );
        assert_eq!(
            lines[1],
            "NoResizer_Libcuckoo,2,4,mylru_tests_mt,BenchMark Test (Single LRU),1,PASSED,12345.5,,2.0,"
        );
        assert_eq!(
            lines[2],
            "WithResizer,2,4,N/A (Build Failed),N/A,0,BUILD_ERROR,,,,\"line one"
        );
        assert_eq!(lines[3], "line two\"");
    }

    #[test]
    fn unwritable_path_is_reported() {
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().join("missing").join("results.csv");

        assert!(matches!(
            write_csv(&path, &[]),
            Err(ReportError::Create { .. })
        ));
    }
}
