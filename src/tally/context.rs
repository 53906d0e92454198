//! Stateful line handlers.
//!
//! [`TallyContext`] owns the parser state and the live [`HourlyAggregate`];
//! every handler takes `&mut self`, so there is exactly one writer and no
//! hidden coupling between handlers. Handlers never fail: a line that does
//! not fit the current state is logged and dropped.
//!
//! A completed hour leaves the context as the return value of the call that
//! flushed it; the caller hands it to the output sink.

use chrono::{NaiveDate, NaiveTime, Timelike};
use tracing::{debug, info, warn};

use super::aggregate::{HourlyAggregate, PluRegistry};
use crate::ecr::protocol::{
    classify, extract_time, header_date, is_bare_tender, match_tender, normalize_line,
    parse_amount, split_transaction, LineKind, Tender,
};

/// What the last successfully classified line was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Header,
    Transaction,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserState {
    pub current_event: EventKind,
    pub previous_event: EventKind,
    pub current_event_time: Option<NaiveTime>,
    /// Time of the last header before the current one that started a sale
    /// which was not voided; becomes the hour's last transaction time.
    pub previous_event_time: Option<NaiveTime>,
    pub current_event_hour: Option<u32>,
    /// Trading date of the latest dated header.
    pub current_event_date: Option<NaiveDate>,
    /// Completed sales this hour.
    pub transaction_count: u32,
    /// Aggregate as it stood once the last header was applied.
    pub aggregate_snapshot: HourlyAggregate,
    /// Hour most recently handed to the output boundary. Headers at or
    /// before it on the same trading date never reopen it.
    pub flushed_hour: Option<u32>,
}

impl ParserState {
    fn new(plu_slots: usize) -> Self {
        Self {
            current_event: EventKind::Other,
            previous_event: EventKind::Other,
            current_event_time: None,
            previous_event_time: None,
            current_event_hour: None,
            current_event_date: None,
            transaction_count: 0,
            aggregate_snapshot: HourlyAggregate::new(plu_slots),
            flushed_hour: None,
        }
    }
}

pub struct TallyContext {
    registry: PluRegistry,
    pub state: ParserState,
    pub aggregate: HourlyAggregate,
}

impl TallyContext {
    pub fn new(registry: PluRegistry) -> Self {
        let slots = registry.len();
        Self {
            registry,
            state: ParserState::new(slots),
            aggregate: HourlyAggregate::new(slots),
        }
    }

    pub fn registry(&self) -> &PluRegistry {
        &self.registry
    }

    fn fresh_aggregate(&self) -> HourlyAggregate {
        HourlyAggregate::new(self.registry.len())
    }

    fn set_event(&mut self, kind: EventKind) {
        self.state.previous_event = self.state.current_event;
        self.state.current_event = kind;
    }

    /// Normalize, classify, and dispatch one raw journal line.
    pub fn ingest_line(&mut self, raw: &[u8]) -> Option<HourlyAggregate> {
        let line = normalize_line(raw);
        self.handle_line(&line)
    }

    /// Dispatch an already normalized line to its handler.
    pub fn handle_line(&mut self, line: &str) -> Option<HourlyAggregate> {
        if line.is_empty() {
            return None;
        }
        match classify(line) {
            LineKind::Header => return self.on_header(line),
            LineKind::Report => self.on_report(line),
            LineKind::Cancel => self.on_cancel(line),
            LineKind::Refund => self.on_refund(line),
            LineKind::NoSale => self.on_no_sale(line),
            LineKind::Diagnostic => self.on_diagnostic(line),
            LineKind::Unclassified => {
                self.on_transaction(line);
            }
        }
        None
    }

    // -- Header ---------------------------------------------------------------

    /// Start of a receipt. May roll the hour over, in which case the
    /// completed hour is returned.
    pub fn on_header(&mut self, line: &str) -> Option<HourlyAggregate> {
        let Some(time) = extract_time(line) else {
            debug!(line = %line, "Header without a time, counting only");
            self.aggregate.customer_count = self.state.transaction_count;
            self.set_event(EventKind::Header);
            self.state.aggregate_snapshot = self.aggregate.clone();
            return None;
        };

        self.settle_last_event_time();
        let hour = time.hour();
        let date = header_date(line);
        let new_day = date.is_some()
            && self.state.current_event_date.is_some()
            && date != self.state.current_event_date;
        self.state.current_event_time = Some(time);
        self.state.current_event_hour = Some(hour);
        if date.is_some() {
            self.state.current_event_date = date;
        }

        let mut completed = None;
        if !new_day && self.is_behind(hour) {
            // Register clock lags the till clock: the sale joins the open hour
            info!(
                hour,
                open = ?self.aggregate.hour,
                flushed = ?self.state.flushed_hour,
                line = %line,
                "Header behind the tally, kept in the current hour"
            );
            if self.aggregate.is_unset() {
                let next = self.state.flushed_hour.map_or(hour, |f| (f + 1).min(23));
                self.aggregate.open_hour(next, time);
            }
        } else {
            if let Some(open) = self.aggregate.hour {
                if open != hour {
                    info!(from = open, to = hour, line = %line, "Hour rollover from journal");
                    completed = self.flush();
                }
            }
            if new_day {
                self.state.flushed_hour = None;
            }
            if self.aggregate.is_unset() {
                self.aggregate.open_hour(hour, time);
                debug!(label = ?self.aggregate.hour_label(), "Hour opened");
            }
        }
        self.aggregate.customer_count = self.state.transaction_count;
        self.set_event(EventKind::Header);
        self.state.aggregate_snapshot = self.aggregate.clone();
        completed
    }

    /// Whether a header at `hour` is earlier than the open hour or at or
    /// before the last flushed one.
    fn is_behind(&self, hour: u32) -> bool {
        self.aggregate.hour.is_some_and(|open| hour < open)
            || self.state.flushed_hour.is_some_and(|flushed| hour <= flushed)
    }

    /// Remember the current event time as the latest sale time, unless the
    /// sale it belongs to was voided.
    fn settle_last_event_time(&mut self) {
        if self.state.current_event_time.is_some() && self.state.current_event != EventKind::Other
        {
            self.state.previous_event_time = self.state.current_event_time;
        }
    }

    // -- Transaction ----------------------------------------------------------

    /// `KEY£VALUE` line inside a sale. Returns whether the aggregate changed.
    pub fn on_transaction(&mut self, line: &str) -> bool {
        if self.state.current_event == EventKind::Other {
            debug!(line = %line, "Dropping line outside a sale");
            return false;
        }
        let Some((key, value)) = split_transaction(line) else {
            debug!(line = %line, event = ?self.state.current_event, "Dropping unrecognized line");
            return false;
        };
        self.set_event(EventKind::Transaction);

        let Some(amount) = parse_amount(value) else {
            warn!(line = %line, "Unparseable transaction amount");
            return false;
        };

        // A registered PLU such as "Total Care" outranks a tender keyword prefix
        let tender = match self.registry.position(key) {
            Some(_) if !is_bare_tender(key) => None,
            _ => match_tender(key),
        };
        match tender {
            Some(Tender::Total) => {
                self.state.transaction_count += 1;
                self.aggregate.customer_count = self.state.transaction_count;
                self.aggregate.total_takings += amount;
            }
            Some(Tender::Cash) => self.aggregate.cash_total += amount,
            Some(Tender::Change) => self.aggregate.cash_total -= amount,
            Some(Tender::Card) => self.aggregate.card_total += amount,
            None => match self.registry.position(key) {
                Some(slot) => self.aggregate.plu_totals[slot] += amount,
                None => {
                    warn!(
                        line = %line,
                        key = %key.trim(),
                        hour = ?self.aggregate.hour,
                        "Unknown PLU code, line dropped"
                    );
                    return false;
                }
            },
        }
        true
    }

    // -- Cancel / reprint -----------------------------------------------------

    /// Void everything since the last header.
    pub fn on_cancel(&mut self, line: &str) {
        if self.state.current_event == EventKind::Other {
            debug!(line = %line, "Cancel with no open sale, ignored");
            return;
        }
        self.aggregate = self.state.aggregate_snapshot.clone();
        self.state.transaction_count = self.state.transaction_count.saturating_sub(1);
        self.aggregate.customer_count = self.state.transaction_count;
        self.set_event(EventKind::Other);
        info!(
            line = %line,
            transactions = self.state.transaction_count,
            "Sale voided, aggregate rolled back"
        );
    }

    // -- Inert handlers -------------------------------------------------------

    pub fn on_no_sale(&mut self, line: &str) {
        self.aggregate.no_sale_count += 1;
        info!(line = %line, count = self.aggregate.no_sale_count, "No sale");
    }

    pub fn on_report(&mut self, line: &str) {
        info!(line = %line, "Report printed, not tallied");
        self.set_event(EventKind::Other);
    }

    pub fn on_refund(&mut self, line: &str) {
        info!(line = %line, "Paid out, not tallied");
        self.set_event(EventKind::Other);
    }

    pub fn on_diagnostic(&mut self, line: &str) {
        debug!(line = %line, "Diagnostic line ignored");
        self.set_event(EventKind::Other);
    }

    // -- Flush ----------------------------------------------------------------

    /// Close the current hour and start a zeroed one. Returns the completed
    /// hour unless it took nothing.
    pub fn flush(&mut self) -> Option<HourlyAggregate> {
        self.aggregate.last_transaction_time = self.state.previous_event_time;
        let fresh = self.fresh_aggregate();
        let completed = std::mem::replace(&mut self.aggregate, fresh);
        self.state.transaction_count = 0;
        self.state.flushed_hour = completed.hour;
        self.state.aggregate_snapshot = self.aggregate.clone();

        if completed.total_takings == 0 {
            info!(label = ?completed.hour_label(), "Hour took nothing, discarded");
            return None;
        }
        info!(
            label = ?completed.hour_label(),
            takings = completed.total_takings,
            customers = completed.customer_count,
            "Hour flushed"
        );
        Some(completed)
    }

    /// Wall-clock trigger: flush once the clock has passed the open hour. An
    /// open hour ahead of the clock (register clock running fast) waits for
    /// the journal or the clock to catch up. Fires at most once per hour.
    pub fn flush_on_clock(&mut self, now_hour: u32) -> Option<HourlyAggregate> {
        let open = self.aggregate.hour?;
        if now_hour <= open || self.state.flushed_hour == Some(open) {
            return None;
        }
        info!(from = open, to = now_hour, "Hour rollover from wall clock");
        self.settle_last_event_time();
        self.flush()
    }

    /// End of business hours: flush and forget any sale in progress.
    pub fn close_business_day(&mut self) -> Option<HourlyAggregate> {
        self.settle_last_event_time();
        let completed = self.flush();
        self.set_event(EventKind::Other);
        completed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
