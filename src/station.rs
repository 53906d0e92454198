//! The till station: a single-threaded poll loop over the journal feed.
//!
//! Each [`Station::poll_once`] call evaluates the business-hours gate, reads
//! whatever the register sent since the last poll, dispatches complete lines
//! to the tally, and hands completed hours to the output sink. While the shop
//! is closed it runs the idle side jobs instead (update checks). All state is
//! owned here, so handlers run strictly one after another.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tracing::{debug, info};

use crate::config::Settings;
use crate::ecr::lines::LineAssembler;
use crate::ecr::transport::EcrTransport;
use crate::error::Result;
use crate::hours::{BusinessHoursGate, GateTransition};
use crate::output::HourSink;
use crate::tally::{HourlyAggregate, TallyContext};
use crate::updater::{UpdateOutcome, Updater};

/// Wall-clock source, injectable for tests.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local time of the till.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Journal was read this poll.
    pub ingesting: bool,
    /// Complete lines dispatched.
    pub lines: usize,
    /// Rows handed to the sink.
    pub rows_emitted: usize,
    /// A finite source has nothing left.
    pub exhausted: bool,
    /// The binary was replaced; the caller should restart.
    pub restart: bool,
}

pub struct Station<C: Clock> {
    context: TallyContext,
    transport: Box<dyn EcrTransport>,
    sink: Box<dyn HourSink>,
    clock: C,
    gate: BusinessHoursGate,
    assembler: LineAssembler,
    updater: Option<Updater>,
    debug: bool,
    read_timeout_ms: u64,
}

impl<C: Clock> Station<C> {
    pub fn new(
        context: TallyContext,
        transport: Box<dyn EcrTransport>,
        sink: Box<dyn HourSink>,
        clock: C,
        settings: &Settings,
    ) -> Self {
        Self {
            context,
            transport,
            sink,
            clock,
            gate: BusinessHoursGate::new(settings.opening_hour, settings.closing_hour),
            assembler: LineAssembler::new(),
            updater: None,
            debug: settings.debug,
            read_timeout_ms: settings.serial.timeout_ms,
        }
    }

    pub fn with_updater(mut self, updater: Option<Updater>) -> Self {
        self.updater = updater;
        self
    }

    pub fn context(&self) -> &TallyContext {
        &self.context
    }

    /// One pass of the control loop. Errors are fatal for the loop.
    pub fn poll_once(&mut self) -> Result<PollReport> {
        let now = self.clock.now();
        let mut report = PollReport::default();

        let transition = self.gate.evaluate(now.time());
        // Debug runs ingest around the clock; the gate only schedules idle jobs
        match transition {
            _ if self.debug => {}
            GateTransition::Closed => {
                info!("Business hours ended, closing the day");
                let completed = self.context.close_business_day();
                self.emit(now, completed, &mut report)?;
                self.sink.close();
            }
            GateTransition::Opened => info!("Business hours started, ingesting"),
            GateTransition::Unchanged => {}
        }

        report.ingesting = self.gate.is_active() || self.debug;
        if report.ingesting {
            if !self.transport.is_connected() {
                self.transport.connect()?;
            }
            let data = self.transport.receive(self.read_timeout_ms)?;
            if data.is_empty() {
                report.exhausted = self.transport.is_exhausted();
                // Debug runs take hour boundaries from the journal only
                if !self.debug {
                    let completed = self.context.flush_on_clock(now.hour());
                    self.emit(now, completed, &mut report)?;
                }
            } else {
                for line in self.assembler.push(&data) {
                    report.lines += 1;
                    let completed = self.context.ingest_line(&line);
                    self.emit(now, completed, &mut report)?;
                }
            }
        }

        if !self.gate.is_active() {
            if let Some(updater) = self.updater.as_mut() {
                report.restart = updater.poll(now) == Some(UpdateOutcome::Replaced);
            }
        }

        Ok(report)
    }

    /// Flush the open hour and release the output and the transport.
    pub fn finish(&mut self) -> Result<()> {
        let now = self.clock.now();
        let mut report = PollReport::default();
        let completed = self.context.close_business_day();
        self.emit(now, completed, &mut report)?;
        self.sink.close();
        self.transport.disconnect();
        info!(rows = report.rows_emitted, "Station finished");
        Ok(())
    }

    fn emit(
        &mut self,
        now: NaiveDateTime,
        completed: Option<HourlyAggregate>,
        report: &mut PollReport,
    ) -> Result<()> {
        let Some(hour) = completed else {
            return Ok(());
        };
        let date = row_date(now, hour.hour);
        debug!(%date, label = ?hour.hour_label(), "Emitting hour");
        self.sink.emit(date, &hour)?;
        report.rows_emitted += 1;
        Ok(())
    }
}

/// Date a completed hour belongs to. An hour later than the clock's hour was
/// closed after midnight and belongs to the previous day.
fn row_date(now: NaiveDateTime, hour: Option<u32>) -> NaiveDate {
    let today = now.date();
    match hour {
        Some(h) if h > now.hour() => today.pred_opt().unwrap_or(today),
        _ => today,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
