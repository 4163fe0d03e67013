use super::RunRecord;
use parking_lot::FairMutex;
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;
use tracing_unwrap::ResultExt;

/// Append-only log of every `RunRecord` produced during a sweep.
/// Cloning shares the underlying buffer, so every configuration task can hold its own handle.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    buffer: Arc<FairMutex<Vec<RunRecord>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: RunRecord) {
        debug!(
            configuration = %record.configuration,
            binary = %record.binary,
            run = record.run,
            status = %record.status,
            "Appending run record"
        );

        self.buffer.lock_arc().push(record);
    }

    pub fn extend<I: IntoIterator<Item = RunRecord>>(&self, records: I) {
        let mut buffer = self.buffer.lock_arc();

        buffer.extend(records);
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Consume the log once every other handle is gone, ordering the records by the position
    /// of their configuration in `order`. Records of one configuration keep their append order.
    pub fn close(self, order: &[&str]) -> Vec<RunRecord> {
        let position: BTreeMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(index, name)| (*name, index))
            .collect();

        let mut records = Arc::try_unwrap(self.buffer).unwrap_or_log().into_inner();
        records.sort_by_key(|record| {
            position
                .get(record.configuration.as_str())
                .copied()
                .unwrap_or(usize::MAX)
        });

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::OutcomeStatus;

    fn record(configuration: &str, run: u32) -> RunRecord {
        RunRecord {
            configuration: configuration.to_owned(),
            segment_bits: 0,
            binary: "bin".to_owned(),
            test_case: "case".to_owned(),
            run,
            status: OutcomeStatus::Passed,
            metrics: None,
            failure: None,
        }
    }

    #[test]
    fn close_orders_by_configuration_and_keeps_run_order() {
        let log = RunLog::new();
        let other = log.clone();

        log.append(record("B", 1));
        other.append(record("A", 1));
        log.append(record("B", 2));
        other.extend([record("A", 2), record("A", 3)]);
        drop(other);

        assert_eq!(log.len(), 5);

        let closed = log.close(&["A", "B"]);
        let order = closed
            .iter()
            .map(|record| (record.configuration.as_str(), record.run))
            .collect::<Vec<_>>();

        assert_eq!(
            order,
            vec![("A", 1), ("A", 2), ("A", 3), ("B", 1), ("B", 2)]
        );
    }
}
