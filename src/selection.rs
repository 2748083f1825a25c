//! Frequency-spaced selection of acquisition dates.
//!
//! Dates are scanned newest first. When a frequency is configured, every
//! date that passes the cloud threshold becomes an anchor and the dates in
//! the `frequency - 3` days before it are skipped without being evaluated.

use crate::catalog::DateGroup;
use crate::config::MIN_FREQUENCY_DAYS;
use crate::coverage::{CoverageResult, DateEvaluator};
use crate::error::S2MosaicError;
use chrono::{Duration, NaiveDate};
use log::{debug, error, info};

/// Slack subtracted from the frequency when advancing the anchor.
const FREQUENCY_SLACK_DAYS: i64 = 3;

/// What happened to one date during the scan.
#[derive(Debug)]
pub enum DateOutcome {
    Evaluated(CoverageResult),
    /// Too close to the last anchor; never evaluated.
    Skipped { date: NaiveDate, next_date: NaiveDate },
    Failed { date: NaiveDate, error: S2MosaicError },
}

impl DateOutcome {
    pub fn date(&self) -> NaiveDate {
        match self {
            DateOutcome::Evaluated(result) => result.date,
            DateOutcome::Skipped { date, .. } | DateOutcome::Failed { date, .. } => *date,
        }
    }
}

/// Dates eligible for download, in calendar order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionTable {
    rows: Vec<CoverageResult>,
}

impl SelectionTable {
    /// Keep covered results whose invalid fraction is at or below `threshold`.
    pub fn from_results<'r>(
        results: impl IntoIterator<Item = &'r CoverageResult>,
        threshold: f64,
    ) -> Self {
        let mut rows: Vec<CoverageResult> = results
            .into_iter()
            .filter(|result| result.passes(threshold))
            .copied()
            .collect();
        rows.sort_by_key(|row| row.date);
        Self { rows }
    }

    pub fn rows(&self) -> &[CoverageResult] {
        &self.rows
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|row| row.date).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result of one search: per-date outcomes in scan order plus the selection.
#[derive(Debug)]
pub struct SearchReport {
    pub outcomes: Vec<DateOutcome>,
    pub selection: SelectionTable,
}

impl SearchReport {
    pub fn evaluated(&self) -> impl Iterator<Item = &CoverageResult> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            DateOutcome::Evaluated(result) => Some(result),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (NaiveDate, &S2MosaicError)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            DateOutcome::Failed { date, error } => Some((*date, error)),
            _ => None,
        })
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Greedy frequency-based scan over dated catalog results.
#[derive(Debug, Clone, Copy)]
pub struct DateSelector {
    frequency: Option<u32>,
    threshold: f64,
}

impl DateSelector {
    /// Frequencies of 7 days or fewer disable spacing.
    pub fn new(frequency: Option<u32>, threshold: f64) -> Self {
        Self {
            frequency: frequency.filter(|&days| days > MIN_FREQUENCY_DAYS),
            threshold,
        }
    }

    pub fn frequency(&self) -> Option<u32> {
        self.frequency
    }

    /// Earliest date still evaluated after anchoring on `anchor`.
    fn next_threshold(&self, anchor: NaiveDate, frequency: u32) -> NaiveDate {
        anchor - Duration::days(frequency as i64 - FREQUENCY_SLACK_DAYS)
    }

    pub fn scan(&self, groups: &DateGroup, evaluator: &dyn DateEvaluator) -> SearchReport {
        let mut outcomes = Vec::with_capacity(groups.len());
        let mut next_date: Option<NaiveDate> = None;

        for (&date, items) in groups.iter().rev() {
            if let (Some(_), Some(limit)) = (self.frequency, next_date) {
                if date > limit {
                    debug!("Skipping {}: within frequency window (next date {})", date, limit);
                    outcomes.push(DateOutcome::Skipped {
                        date,
                        next_date: limit,
                    });
                    continue;
                }
            }

            info!("Computing cloud coverage: {} - {} items", date, items.len());
            match evaluator.evaluate(date, items) {
                Ok(result) => {
                    if let Some(frequency) = self.frequency {
                        if result.passes(self.threshold) {
                            next_date = Some(self.next_threshold(date, frequency));
                        }
                    }
                    outcomes.push(DateOutcome::Evaluated(result));
                }
                Err(error) => {
                    error!("Error computing cloud coverage: {} - {}", date, error);
                    outcomes.push(DateOutcome::Failed {
                        date,
                        error: S2MosaicError::coverage(date, error),
                    });
                }
            }
        }

        let selection = SelectionTable::from_results(
            outcomes.iter().filter_map(|outcome| match outcome {
                DateOutcome::Evaluated(result) => Some(result),
                _ => None,
            }),
            self.threshold,
        );
        info!("{} of {} dates selected", selection.len(), groups.len());

        SearchReport {
            outcomes,
            selection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::item_with_footprint;
    use crate::catalog::CatalogItem;
    use crate::error::Result;
    use geo::{Coord, Rect};
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Returns canned results and records which dates were evaluated.
    struct Canned {
        results: HashMap<NaiveDate, Option<f64>>,
        failing: Vec<NaiveDate>,
        calls: RefCell<Vec<NaiveDate>>,
    }

    impl Canned {
        fn new(entries: &[(NaiveDate, Option<f64>)]) -> Self {
            Self {
                results: entries.iter().copied().collect(),
                failing: Vec::new(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl DateEvaluator for Canned {
        fn evaluate(&self, date: NaiveDate, _items: &[CatalogItem]) -> Result<CoverageResult> {
            self.calls.borrow_mut().push(date);
            if self.failing.contains(&date) {
                return Err(S2MosaicError::Mosaic("tile read failed".to_string()));
            }
            Ok(match self.results[&date] {
                Some(fraction) => CoverageResult::covered(date, fraction),
                None => CoverageResult::uncovered(date),
            })
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn groups(dates: &[NaiveDate]) -> DateGroup {
        let rect = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 });
        dates
            .iter()
            .map(|&date| (date, vec![item_with_footprint("item", date, rect)]))
            .collect()
    }

    #[test]
    fn test_frequency_scenario() {
        let entries = [
            (ymd(2020, 5, 1), Some(0.02)),
            (ymd(2020, 5, 3), Some(0.10)),
            (ymd(2020, 5, 12), Some(0.01)),
        ];
        let canned = Canned::new(&entries);
        let dates: Vec<_> = entries.iter().map(|(d, _)| *d).collect();

        let report = DateSelector::new(Some(10), 0.05).scan(&groups(&dates), &canned);

        let mut evaluated: Vec<_> = report.evaluated().map(|r| r.date).collect();
        evaluated.sort();
        assert_eq!(evaluated, dates);
        assert_eq!(report.selection.dates(), vec![ymd(2020, 5, 1), ymd(2020, 5, 12)]);
    }

    #[test]
    fn test_dates_inside_window_are_skipped() {
        let entries = [
            (ymd(2020, 5, 6), Some(0.01)),
            (ymd(2020, 5, 9), Some(0.01)),
            (ymd(2020, 5, 12), Some(0.01)),
        ];
        let canned = Canned::new(&entries);
        let dates: Vec<_> = entries.iter().map(|(d, _)| *d).collect();

        let report = DateSelector::new(Some(10), 0.05).scan(&groups(&dates), &canned);

        // Anchor 05-12 moves the threshold to 05-05: 05-09 and 05-06 are skipped.
        assert_eq!(*canned.calls.borrow(), vec![ymd(2020, 5, 12)]);
        assert_eq!(report.selection.dates(), vec![ymd(2020, 5, 12)]);
        let skipped: Vec<_> = report
            .outcomes
            .iter()
            .filter(|o| matches!(o, DateOutcome::Skipped { .. }))
            .map(|o| o.date())
            .collect();
        assert_eq!(skipped, vec![ymd(2020, 5, 9), ymd(2020, 5, 6)]);
    }

    #[test]
    fn test_small_frequency_evaluates_everything() {
        let entries = [
            (ymd(2020, 5, 1), Some(0.01)),
            (ymd(2020, 5, 2), Some(0.01)),
            (ymd(2020, 5, 3), Some(0.01)),
        ];
        let canned = Canned::new(&entries);
        let dates: Vec<_> = entries.iter().map(|(d, _)| *d).collect();

        let selector = DateSelector::new(Some(5), 0.05);
        assert_eq!(selector.frequency(), None);
        let report = selector.scan(&groups(&dates), &canned);

        assert_eq!(canned.calls.borrow().len(), 3);
        assert_eq!(report.selection.len(), 3);
    }

    #[test]
    fn test_uncovered_and_cloudy_dates_do_not_anchor() {
        let entries = [
            (ymd(2020, 5, 10), None),
            (ymd(2020, 5, 8), Some(0.50)),
            (ymd(2020, 5, 6), Some(0.04)),
            (ymd(2020, 5, 4), Some(0.01)),
        ];
        let canned = Canned::new(&entries);
        let dates: Vec<_> = entries.iter().map(|(d, _)| *d).collect();

        let report = DateSelector::new(Some(10), 0.05).scan(&groups(&dates), &canned);

        assert_eq!(
            *canned.calls.borrow(),
            vec![ymd(2020, 5, 10), ymd(2020, 5, 8), ymd(2020, 5, 6)]
        );
        assert_eq!(report.selection.dates(), vec![ymd(2020, 5, 6)]);
    }

    #[test]
    fn test_failed_date_is_reported_and_scan_continues() {
        let entries = [(ymd(2020, 5, 1), Some(0.01)), (ymd(2020, 5, 20), Some(0.01))];
        let mut canned = Canned::new(&entries);
        canned.failing.push(ymd(2020, 5, 20));
        let dates: Vec<_> = entries.iter().map(|(d, _)| *d).collect();

        let report = DateSelector::new(None, 0.05).scan(&groups(&dates), &canned);

        assert!(report.has_failures());
        let failures: Vec<_> = report.failures().map(|(date, _)| date).collect();
        assert_eq!(failures, vec![ymd(2020, 5, 20)]);
        assert!(matches!(
            report.failures().next().unwrap().1,
            S2MosaicError::CoverageEvaluation { .. }
        ));
        assert_eq!(report.selection.dates(), vec![ymd(2020, 5, 1)]);
    }

    #[test]
    fn test_uncovered_dates_never_selected() {
        let results = [
            CoverageResult::uncovered(ymd(2020, 1, 1)),
            CoverageResult::covered(ymd(2020, 1, 2), 0.05),
            CoverageResult::covered(ymd(2020, 1, 3), 0.06),
        ];
        let table = SelectionTable::from_results(results.iter(), 0.05);
        assert_eq!(table.dates(), vec![ymd(2020, 1, 2)]);
    }
}
