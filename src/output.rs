//! Hourly output boundary.
//!
//! Completed hours are written as CSV rows to one file per shop per day,
//! `<shop_id>_<YYYY-MM-DD>.csv`. The header row is written only when the file
//! is new or empty, so a restarted process appends to the same file. Every
//! row is flushed before `emit` returns, leaving the file syntactically
//! complete for the upload daemon at all times.

use chrono::NaiveDate;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, TallyError};
use crate::tally::{csv_header, HourlyAggregate, PluRegistry};

/// Receives completed hours.
pub trait HourSink {
    /// Persist one completed hour, dated `date`.
    fn emit(&mut self, date: NaiveDate, hour: &HourlyAggregate) -> Result<()>;

    /// Release any open file. The next `emit` reopens.
    fn close(&mut self);
}

struct OpenFile {
    date: NaiveDate,
    path: PathBuf,
    writer: csv::Writer<File>,
}

pub struct CsvHourWriter {
    dir: PathBuf,
    shop_id: String,
    header: Vec<String>,
    open: Option<OpenFile>,
}

impl CsvHourWriter {
    pub fn new(dir: &Path, shop_id: &str, registry: &PluRegistry) -> Self {
        Self {
            dir: dir.to_path_buf(),
            shop_id: shop_id.to_string(),
            header: csv_header(registry),
            open: None,
        }
    }

    pub fn file_path(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", self.shop_id, date.format("%Y-%m-%d")))
    }

    fn open_for(&mut self, date: NaiveDate) -> Result<&mut OpenFile> {
        if self.open.as_ref().is_some_and(|open| open.date != date) {
            self.close();
        }
        if self.open.is_none() {
            std::fs::create_dir_all(&self.dir)?;
            let path = self.file_path(date);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let is_new = file.metadata()?.len() == 0;

            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            if is_new {
                writer
                    .write_record(&self.header)
                    .map_err(|source| TallyError::Output {
                        path: path.clone(),
                        source,
                    })?;
                writer.flush()?;
            }
            info!(path = %path.display(), new = is_new, "Hourly output opened");
            self.open = Some(OpenFile { date, path, writer });
        }
        self.open
            .as_mut()
            .ok_or_else(|| TallyError::NotConnected("hourly output".into()))
    }
}

impl HourSink for CsvHourWriter {
    fn emit(&mut self, date: NaiveDate, hour: &HourlyAggregate) -> Result<()> {
        let open = self.open_for(date)?;
        open.writer
            .write_record(hour.to_row())
            .map_err(|source| TallyError::Output {
                path: open.path.clone(),
                source,
            })?;
        open.writer.flush()?;
        info!(
            path = %open.path.display(),
            label = ?hour.hour_label(),
            "Hourly row written"
        );
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut open) = self.open.take() {
            // Rows are flushed on write; this only catches a failed earlier flush.
            let _ = open.writer.flush();
            info!(path = %open.path.display(), "Hourly output closed");
        }
    }
}
