//! Side channels for meter records.

use serde::{Deserialize, Serialize};

use crate::meter::Record;

/// Destination for records a meter produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Writer {
    /// Emit each record as a `tracing` event.
    Log,
    /// Keep records in the hub's result list until drained with
    /// [`Hub::take_results`](super::Hub::take_results).
    Results,
}

impl Writer {
    /// Writers attached to meters connected with default writers enabled.
    pub const DEFAULTS: [Self; 2] = [Self::Log, Self::Results];

    pub(crate) fn write(self, record: &Record, results: &mut Vec<Record>) {
        match self {
            Self::Log => {
                if record.is_final {
                    tracing::info!(
                        meter = %record.meter,
                        context = %record.context.file_key(),
                        value = %record.value,
                        "final result"
                    );
                } else {
                    tracing::debug!(
                        meter = %record.meter,
                        context = %record.context.file_key(),
                        value = %record.value,
                        "record"
                    );
                }
            }
            Self::Results => results.push(record.clone()),
        }
    }
}
