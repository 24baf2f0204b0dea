//! Temperature history and chart series.
//!
//! Entries are kept in capture order. When a chart wants the history, only the
//! axis labels are thinned; the value series is always complete.

use crate::fixed_point::FixedPoint;
use crate::reading::{Quantity, Reading};
use std::collections::VecDeque;
use std::time::SystemTime;
use thiserror::Error;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Error types for recording history.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("only temperature readings are kept in history, got {0}")]
    NotTemperature(Quantity),
}

/// One recorded temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub captured_at: SystemTime,
    pub temperature: FixedPoint,
}

/// Chart-ready view of the history.
///
/// `labels` and `values` always have the same length.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Series {
    pub labels: Vec<String>,
    pub values: Vec<FixedPoint>,
}

impl Series {
    /// Number of labels that will actually be drawn.
    pub fn visible_labels(&self) -> usize {
        self.labels.iter().filter(|l| !l.is_empty()).count()
    }
}

/// Append-only temperature history.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: VecDeque<HistoryEntry>,
    /// Oldest entries are evicted beyond this many. `None` keeps everything.
    limit: Option<usize>,
    label_offset: UtcOffset,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore {
    /// An unbounded history with UTC labels.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            limit: None,
            label_offset: UtcOffset::UTC,
        }
    }

    /// A history retaining at most `limit` entries.
    pub fn bounded(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Render labels in the given offset instead of UTC.
    pub fn with_label_offset(mut self, offset: UtcOffset) -> Self {
        self.label_offset = offset;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Append a temperature reading.
    ///
    /// A timestamp older than the last entry (wall clock stepped back) is
    /// clamped to the last entry's, keeping entries non-decreasing in time.
    pub fn record(&mut self, reading: &Reading) -> Result<(), HistoryError> {
        if reading.quantity != Quantity::Temperature {
            return Err(HistoryError::NotTemperature(reading.quantity));
        }

        let captured_at = match self.entries.back() {
            Some(last) if reading.captured_at < last.captured_at => last.captured_at,
            _ => reading.captured_at,
        };

        if let Some(limit) = self.limit {
            if limit == 0 {
                return Ok(());
            }
            while self.entries.len() >= limit {
                self.entries.pop_front();
            }
        }

        self.entries.push_back(HistoryEntry {
            captured_at,
            temperature: reading.value,
        });
        Ok(())
    }

    /// Produce the full value series with at most `max_labels` visible labels.
    ///
    /// Every `k`-th entry keeps its time label, `k = ceil(len / max_labels)`,
    /// starting at index 0. With `max_labels == 0` no label is shown.
    pub fn series(&self, max_labels: usize) -> Series {
        let step = label_step(self.entries.len(), max_labels);

        let (labels, values) = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let label = match step {
                    Some(k) if i % k == 0 => self.label(entry.captured_at),
                    _ => String::new(),
                };
                (label, entry.temperature)
            })
            .unzip();

        Series { labels, values }
    }

    fn label(&self, at: SystemTime) -> String {
        OffsetDateTime::from(at)
            .to_offset(self.label_offset)
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_default()
    }
}

/// Label stride for `total` entries, `None` when no label may be shown.
pub fn label_step(total: usize, max_labels: usize) -> Option<usize> {
    if max_labels == 0 {
        return None;
    }
    Some(total.div_ceil(max_labels).max(1))
}
