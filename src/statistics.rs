// src/statistics.rs

use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data_model::DocInfo;
use crate::error::{PipelineError, Result};

/// Additive accounting record for one stage (or for a whole pipeline, named "Total").
///
/// Every execution mode funnels its bookkeeping through `update_by_diff`, so the same
/// corpus yields the same counters whether it is applied per document, per batch, as a
/// stream, asynchronously or on a worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub name: String,
    pub input_num: u64,
    pub input_bytes: u64,
    pub input_chars: u64,
    pub output_num: u64,
    pub output_bytes: u64,
    pub output_chars: u64,
    pub discard_num: u64,
    pub diff_bytes: i64,
    pub diff_chars: i64,
    pub cumulative_time_ns: u64,
    pub errors: u64,
}

impl Statistics {
    pub fn new(name: impl Into<String>) -> Self {
        Statistics {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Accumulate the delta between two snapshots of one document.
    ///
    /// A document that becomes rejected counts as a discard whose size change is minus its
    /// size before the stage; anything else counts as an output.
    pub fn update_by_diff(&mut self, before: &DocInfo, after: &DocInfo) {
        self.input_num += 1;
        self.input_bytes += before.bytes;
        self.input_chars += before.chars;

        if !before.is_rejected && after.is_rejected {
            self.discard_num += 1;
            self.diff_bytes -= before.bytes as i64;
            self.diff_chars -= before.chars as i64;
        } else {
            self.output_num += 1;
            self.output_bytes += after.bytes;
            self.output_chars += after.chars;
            self.diff_bytes += after.bytes as i64 - before.bytes as i64;
            self.diff_chars += after.chars as i64 - before.chars as i64;
        }

        self.cumulative_time_ns += after.time_ns.saturating_sub(before.time_ns);
    }

    /// Field-wise sum. Records with different names describe different stages and
    /// cannot be combined.
    pub fn add(&self, other: &Statistics) -> Result<Statistics> {
        if self.name != other.name {
            return Err(PipelineError::StatisticsMismatch {
                left: self.name.clone(),
                right: other.name.clone(),
            });
        }
        Ok(Statistics {
            name: self.name.clone(),
            input_num: self.input_num + other.input_num,
            input_bytes: self.input_bytes + other.input_bytes,
            input_chars: self.input_chars + other.input_chars,
            output_num: self.output_num + other.output_num,
            output_bytes: self.output_bytes + other.output_bytes,
            output_chars: self.output_chars + other.output_chars,
            discard_num: self.discard_num + other.discard_num,
            diff_bytes: self.diff_bytes + other.diff_bytes,
            diff_chars: self.diff_chars + other.diff_chars,
            cumulative_time_ns: self.cumulative_time_ns + other.cumulative_time_ns,
            errors: self.errors + other.errors,
        })
    }

    /// Pairwise `add` over two ordered lists describing the same pipeline.
    pub fn add_list(left: &[Statistics], right: &[Statistics]) -> Result<Vec<Statistics>> {
        left.iter()
            .zip_longest(right.iter())
            .map(|pair| match pair {
                EitherOrBoth::Both(l, r) => l.add(r),
                EitherOrBoth::Left(l) => Err(PipelineError::StatisticsMismatch {
                    left: l.name.clone(),
                    right: "<missing>".to_string(),
                }),
                EitherOrBoth::Right(r) => Err(PipelineError::StatisticsMismatch {
                    left: "<missing>".to_string(),
                    right: r.name.clone(),
                }),
            })
            .collect()
    }

    pub fn get_filter<'a>(name: &str, stats: &'a [Statistics]) -> Option<&'a Statistics> {
        stats.iter().find(|s| s.name == name)
    }

    pub fn reset(&mut self) {
        *self = Statistics::new(std::mem::take(&mut self.name));
    }

    /// JSON export consumed by reporting tools. Keys appear in declaration order.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(is_rejected: bool, bytes: u64, chars: u64, time_ns: u64) -> DocInfo {
        DocInfo {
            is_rejected,
            bytes,
            chars,
            time_ns,
        }
    }

    #[test]
    fn diff_counts_output_when_kept() {
        let mut stats = Statistics::new("0-Append");
        stats.update_by_diff(&info(false, 1, 1, 10), &info(false, 3, 3, 25));
        assert_eq!(stats.input_num, 1);
        assert_eq!(stats.output_num, 1);
        assert_eq!(stats.output_bytes, 3);
        assert_eq!(stats.diff_bytes, 2);
        assert_eq!(stats.diff_chars, 2);
        assert_eq!(stats.discard_num, 0);
        assert_eq!(stats.cumulative_time_ns, 15);
    }

    #[test]
    fn diff_counts_discard_with_before_size() {
        let mut stats = Statistics::new("0-DiscardAll");
        // The after-size is irrelevant once the document is discarded.
        stats.update_by_diff(&info(false, 4, 4, 0), &info(true, 100, 100, 5));
        assert_eq!(stats.discard_num, 1);
        assert_eq!(stats.output_num, 0);
        assert_eq!(stats.diff_bytes, -4);
        assert_eq!(stats.diff_chars, -4);
    }

    #[test]
    fn add_rejects_mismatched_names() {
        let a = Statistics::new("0-A");
        let b = Statistics::new("0-B");
        assert!(matches!(
            a.add(&b),
            Err(PipelineError::StatisticsMismatch { .. })
        ));
    }

    #[test]
    fn add_list_sums_pairwise_and_checks_length() {
        let mut a = vec![Statistics::new("Total"), Statistics::new("0-A")];
        a[1].discard_num = 2;
        let mut b = a.clone();
        b[1].errors = 1;

        let sum = Statistics::add_list(&a, &b).unwrap();
        assert_eq!(sum[1].discard_num, 4);
        assert_eq!(sum[1].errors, 1);

        assert!(Statistics::add_list(&a, &b[..1]).is_err());
    }

    #[test]
    fn reset_keeps_name() {
        let mut stats = Statistics::new("Total");
        stats.input_num = 9;
        stats.diff_bytes = -3;
        stats.reset();
        assert_eq!(stats, Statistics::new("Total"));
    }

    #[test]
    fn to_map_exports_every_counter() {
        let map = Statistics::new("Total").to_map();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "name",
                "input_num",
                "input_bytes",
                "input_chars",
                "output_num",
                "output_bytes",
                "output_chars",
                "discard_num",
                "diff_bytes",
                "diff_chars",
                "cumulative_time_ns",
                "errors"
            ]
        );
    }
}
