//! Hourly sales aggregate and the PLU registry that fixes its shape.
//!
//! The registry is loaded once at startup and never changes, so every hour's
//! aggregate has the same PLU slots in the same order and the CSV schema never
//! shifts. Amounts are held in pence.

use chrono::NaiveTime;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::ecr::protocol::{format_amount, title_case};
use crate::error::{Result, TallyError};

// ---------------------------------------------------------------------------
// PLU registry
// ---------------------------------------------------------------------------

/// One product code: the label as written in the registry file (used as the
/// CSV column name) and its normalized lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluEntry {
    pub label: String,
    pub key: String,
}

/// Ordered, immutable set of valid PLU codes.
#[derive(Debug, Clone, Default)]
pub struct PluRegistry {
    entries: Vec<PluEntry>,
    index: HashMap<String, usize>,
}

impl PluRegistry {
    /// Build a registry from codes in column order. Blank codes are skipped;
    /// a code whose lookup key repeats an earlier one is ignored.
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::default();
        for code in codes {
            let label = code.as_ref().trim();
            if label.is_empty() {
                continue;
            }
            let key = title_case(label);
            if registry.index.contains_key(&key) {
                warn!(plu = %label, "Duplicate PLU code in registry, keeping first");
                continue;
            }
            registry.index.insert(key.clone(), registry.entries.len());
            registry.entries.push(PluEntry {
                label: label.to_string(),
                key,
            });
        }
        registry
    }

    /// Load the newline-delimited registry file. `#` starts a comment line.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| TallyError::PluRead {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_codes(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#')),
        );
        if registry.is_empty() {
            return Err(TallyError::EmptyPluRegistry(path.to_path_buf()));
        }
        info!(path = %path.display(), count = registry.len(), "PLU registry loaded");
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PluEntry] {
        &self.entries
    }

    /// Slot for a transaction key, ignoring case and surrounding whitespace.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(&title_case(key)).copied()
    }
}

// ---------------------------------------------------------------------------
// Hourly aggregate
// ---------------------------------------------------------------------------

/// Running totals for one business hour.
///
/// A plain value: snapshots are `clone()`, rollback is assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourlyAggregate {
    /// Hour this aggregate covers; `None` until the first header of the hour.
    pub hour: Option<u32>,
    pub total_takings: i64,
    /// Net cash: tendered minus change, so it may go negative.
    pub cash_total: i64,
    pub card_total: i64,
    /// One slot per registry entry, in registry order.
    pub plu_totals: Vec<i64>,
    pub customer_count: u32,
    pub no_sale_count: u32,
    pub first_transaction_time: Option<NaiveTime>,
    pub last_transaction_time: Option<NaiveTime>,
}

impl HourlyAggregate {
    /// A zeroed aggregate with `plu_slots` PLU totals.
    pub fn new(plu_slots: usize) -> Self {
        Self {
            hour: None,
            total_takings: 0,
            cash_total: 0,
            card_total: 0,
            plu_totals: vec![0; plu_slots],
            customer_count: 0,
            no_sale_count: 0,
            first_transaction_time: None,
            last_transaction_time: None,
        }
    }

    /// True until a header has opened the hour.
    pub fn is_unset(&self) -> bool {
        self.hour.is_none()
    }

    /// Mark the hour as opened by a header at `time`.
    pub fn open_hour(&mut self, hour: u32, time: NaiveTime) {
        self.hour = Some(hour);
        self.first_transaction_time = Some(time);
    }

    /// `"HH.00-HH+1.00"`, e.g. `"09.00-10.00"`.
    pub fn hour_label(&self) -> Option<String> {
        self.hour.map(|h| format!("{:02}.00-{:02}.00", h, h + 1))
    }

    /// CSV fields in output column order (see [`csv_header`]).
    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(self.plu_totals.len() + 8);
        row.push(self.hour_label().unwrap_or_default());
        row.push(format_amount(self.total_takings));
        row.push(format_amount(self.cash_total));
        row.push(format_amount(self.card_total));
        row.extend(self.plu_totals.iter().map(|&v| format_amount(v)));
        row.push(self.customer_count.to_string());
        row.push(format_time(self.first_transaction_time));
        row.push(format_time(self.last_transaction_time));
        row.push(self.no_sale_count.to_string());
        row
    }
}

fn format_time(time: Option<NaiveTime>) -> String {
    time.map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "0".to_string())
}

/// Header row matching [`HourlyAggregate::to_row`].
pub fn csv_header(registry: &PluRegistry) -> Vec<String> {
    let mut header: Vec<String> = ["Hours", "Total Takings", "Cash", "Credit Cards"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(registry.entries().iter().map(|e| e.label.clone()));
    header.extend(
        ["Customer Count", "First Transaction", "Last Transaction", "No Sale"]
            .iter()
            .map(|s| s.to_string()),
    );
    header
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_registry_preserves_order_and_labels() {
        let registry = PluRegistry::from_codes(["COFFEE", "tea", "Hot Chocolate"]);
        let labels: Vec<&str> = registry.entries().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, ["COFFEE", "tea", "Hot Chocolate"]);
        assert_eq!(registry.position("hot chocolate"), Some(2));
    }

    #[test]
    fn test_registry_lookup_is_case_and_space_insensitive() {
        let registry = PluRegistry::from_codes(["COFFEE"]);
        assert_eq!(registry.position(" coffee "), Some(0));
        assert_eq!(registry.position("COFFEE"), Some(0));
        assert_eq!(registry.position("Coffee"), Some(0));
        assert_eq!(registry.position("Coffees"), None);
    }

    #[test]
    fn test_registry_skips_blanks_and_duplicates() {
        let registry = PluRegistry::from_codes(["COFFEE", "", "  ", "coffee", "TEA"]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.entries()[0].label, "COFFEE");
        assert_eq!(registry.position("tea"), Some(1));
    }

    #[test]
    fn test_registry_load_ignores_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# products\nCOFFEE\r\n\nTEA\nCAKE").unwrap();
        let registry = PluRegistry::load(file.path()).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.entries()[2].key, "Cake");
    }

    #[test]
    fn test_registry_load_empty_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# nothing here").unwrap();
        assert!(matches!(
            PluRegistry::load(file.path()),
            Err(TallyError::EmptyPluRegistry(_))
        ));
    }

    #[test]
    fn test_registry_load_missing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PluRegistry::load(&dir.path().join("plu.txt")),
            Err(TallyError::PluRead { .. })
        ));
    }

    #[test]
    fn test_aggregate_snapshot_is_independent() {
        let mut live = HourlyAggregate::new(2);
        live.total_takings = 100;
        let snapshot = live.clone();
        live.total_takings += 250;
        live.plu_totals[1] += 250;
        assert_eq!(snapshot.total_takings, 100);
        assert_eq!(snapshot.plu_totals, vec![0, 0]);
        assert_ne!(snapshot, live);
    }

    #[test]
    fn test_hour_label() {
        let mut agg = HourlyAggregate::new(0);
        assert!(agg.is_unset());
        assert_eq!(agg.hour_label(), None);
        agg.open_hour(9, NaiveTime::from_hms_opt(9, 5, 0).unwrap());
        assert_eq!(agg.hour_label().as_deref(), Some("09.00-10.00"));
        agg.hour = Some(23);
        assert_eq!(agg.hour_label().as_deref(), Some("23.00-24.00"));
    }

    #[test]
    fn test_row_matches_header_shape() {
        let registry = PluRegistry::from_codes(["COFFEE", "TEA"]);
        let mut agg = HourlyAggregate::new(registry.len());
        agg.open_hour(9, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        agg.total_takings = 250;
        agg.cash_total = -50;
        agg.plu_totals[0] = 250;
        agg.customer_count = 1;

        let header = csv_header(&registry);
        let row = agg.to_row();
        assert_eq!(header.len(), row.len());
        assert_eq!(
            header,
            [
                "Hours",
                "Total Takings",
                "Cash",
                "Credit Cards",
                "COFFEE",
                "TEA",
                "Customer Count",
                "First Transaction",
                "Last Transaction",
                "No Sale"
            ]
        );
        assert_eq!(
            row,
            ["09.00-10.00", "2.50", "-0.50", "0.00", "2.50", "0.00", "1", "09:00", "0", "0"]
        );
    }
}
