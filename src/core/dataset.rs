use super::{parse_run_id, RunRecord, SinkError};
use csv::WriterBuilder;
use log::{error, info};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Append-only CSV sink with the fixed `RunRecord` column schema.
///
/// Every row is flushed as soon as it is written so that a crash between two
/// runs keeps all earlier rows. The sink is flushed again when closed or
/// dropped, whichever comes first.
pub struct DatasetWriter<W: Write> {
    inner: Option<csv::Writer<W>>,
    written: usize,
    last_run_id: u64,
}

impl DatasetWriter<File> {
    /// Creates (or truncates) the dataset at `path`. With `append`, an
    /// existing non-empty file is extended without repeating the header and
    /// run ids continue after the highest one already stored.
    pub fn create(path: &Path, append: bool) -> Result<Self, SinkError> {
        let io_err = |source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let has_rows = append && fs::metadata(path).map(|meta| meta.len() > 0).unwrap_or(false);
        let last_run_id = if has_rows { highest_run_id(path)? } else { 0 };
        if last_run_id > 0 {
            info!("Appending to {} after run id {}", path.display(), last_run_id);
        }
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)
        } else {
            File::create(path)
        }
        .map_err(io_err)?;

        let mut writer = Self::from_writer(file, !has_rows)?;
        writer.last_run_id = last_run_id;
        Ok(writer)
    }
}

/// Largest `run_NNNNNN` id in an existing dataset. Rows with labels that do
/// not parse are skipped.
fn highest_run_id(path: &Path) -> Result<u64, SinkError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let column = reader
        .headers()?
        .iter()
        .position(|name| name == "run_id")
        .ok_or_else(|| SinkError::MissingRunId(path.to_path_buf()))?;

    let mut highest = 0;
    for row in reader.records() {
        if let Some(id) = row?.get(column).and_then(parse_run_id) {
            highest = highest.max(id);
        }
    }
    Ok(highest)
}

impl<W: Write> DatasetWriter<W> {
    pub fn from_writer(writer: W, write_header: bool) -> Result<Self, SinkError> {
        let mut inner = WriterBuilder::new().has_headers(false).from_writer(writer);
        if write_header {
            inner.write_record(RunRecord::COLUMNS)?;
            inner.flush()?;
        }
        Ok(Self {
            inner: Some(inner),
            written: 0,
            last_run_id: 0,
        })
    }

    pub fn write_record(&mut self, record: &RunRecord<'_>) -> Result<(), SinkError> {
        let inner = self.inner.as_mut().ok_or_else(|| {
            SinkError::Flush(std::io::Error::other("dataset sink already closed"))
        })?;
        inner.serialize(record)?;
        inner.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.written
    }

    /// Highest run id already present in the sink, 0 for a fresh dataset.
    pub fn last_run_id(&self) -> u64 {
        self.last_run_id
    }

    /// Flushes and releases the sink, handing back the underlying writer.
    pub fn close(mut self) -> Result<W, SinkError> {
        let mut inner = self.inner.take().ok_or_else(|| {
            SinkError::Flush(std::io::Error::other("dataset sink already closed"))
        })?;
        inner.flush()?;
        inner
            .into_inner()
            .map_err(|err| SinkError::Flush(err.into_error()))
    }
}

impl<W: Write> Drop for DatasetWriter<W> {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            if let Err(err) = inner.flush() {
                error!("Failed to flush dataset on drop: {}", err);
            }
        }
    }
}
