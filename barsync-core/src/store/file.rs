//! One append-only store file.
//!
//! Appends are serialized through a per-store lock so concurrent workers never
//! interleave partial records. Removal of tickers is a full streamed rewrite
//! into a sibling `.tmp` file followed by an atomic rename.

use crate::data::schema::{store_header, TimestampCodec, TICKER_COLUMN};
use crate::domain::{Bar, Granularity};
use crate::error::SyncError;
use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Outcome of [`StoreFile::rewrite_excluding`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    pub kept: usize,
    pub removed: usize,
    /// Torn or short rows dropped during the rewrite.
    pub malformed: usize,
}

#[derive(Debug)]
pub struct StoreFile {
    path: PathBuf,
    granularity: Granularity,
    codec: TimestampCodec,
    write_lock: Mutex<()>,
}

impl StoreFile {
    pub fn new(path: impl Into<PathBuf>, granularity: Granularity, codec: TimestampCodec) -> Self {
        Self {
            path: path.into(),
            granularity,
            codec,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn codec(&self) -> TimestampCodec {
        self.codec
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create the store with its header if it is absent or empty.
    /// Returns `true` when a header was written.
    pub fn ensure_header(&self) -> Result<bool, SyncError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(SyncError::io(&self.path, e)),
        };
        if len > 0 {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        let mut writer = WriterBuilder::new()
            .from_path(&self.path)
            .map_err(|e| SyncError::csv(&self.path, e))?;
        writer
            .write_record(store_header(self.granularity))
            .map_err(|e| SyncError::csv(&self.path, e))?;
        writer.flush().map_err(|e| SyncError::io(&self.path, e))?;
        tracing::info!(store = %self.path.display(), "created store");
        Ok(true)
    }

    /// Append rows in canonical column order, without header.
    ///
    /// If the file does not end in a newline (a torn write from an earlier
    /// crash) a newline is written first so the torn line stays isolated.
    pub fn append(&self, bars: &[Bar]) -> Result<usize, SyncError> {
        if bars.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SyncError::io(&self.path, e))?;

        if !ends_with_newline(&mut file).map_err(|e| SyncError::io(&self.path, e))? {
            tracing::warn!(store = %self.path.display(), "store ends mid-line, terminating torn row");
            file.write_all(b"\n")
                .map_err(|e| SyncError::io(&self.path, e))?;
        }

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        for bar in bars {
            writer
                .write_record(self.codec.to_record(bar))
                .map_err(|e| SyncError::csv(&self.path, e))?;
        }
        writer.flush().map_err(|e| SyncError::io(&self.path, e))?;
        Ok(bars.len())
    }

    /// Open a streaming reader positioned after the header, together with
    /// the header record. `None` when the store is missing or has no header
    /// yet (a zero-byte file left by an interrupted create).
    pub fn open(&self) -> Result<Option<(csv::Reader<File>, ByteRecord)>, SyncError> {
        if !self.exists() {
            return Ok(None);
        }
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| SyncError::csv(&self.path, e))?;
        let headers = reader
            .byte_headers()
            .map_err(|e| SyncError::csv(&self.path, e))?
            .clone();
        if headers.is_empty() {
            return Ok(None);
        }
        Ok(Some((reader, headers)))
    }

    /// Position of a header column, or a schema error.
    pub fn column_index(&self, headers: &ByteRecord, column: &str) -> Result<usize, SyncError> {
        headers
            .iter()
            .position(|h| h == column.as_bytes())
            .ok_or_else(|| SyncError::StoreSchema {
                path: self.path.clone(),
                column: column.to_string(),
            })
    }

    /// Distinct upper-cased tickers in the store. Missing store → empty.
    pub fn tickers(&self) -> Result<BTreeSet<String>, SyncError> {
        let mut tickers = BTreeSet::new();
        let Some((mut reader, headers)) = self.open()? else {
            return Ok(tickers);
        };
        let ticker_idx = self.column_index(&headers, TICKER_COLUMN)?;

        let mut record = ByteRecord::new();
        while reader
            .read_byte_record(&mut record)
            .map_err(|e| SyncError::csv(&self.path, e))?
        {
            if !is_complete(&record, &headers) {
                continue;
            }
            if let Some(ticker) = ticker_field(&record, ticker_idx) {
                tickers.insert(ticker);
            }
        }
        Ok(tickers)
    }

    /// Rewrite the store without any row whose ticker is in `exclude`
    /// (upper-cased). Rows with the wrong field count are dropped too.
    pub fn rewrite_excluding(&self, exclude: &BTreeSet<String>) -> Result<RewriteSummary, SyncError> {
        let mut summary = RewriteSummary::default();
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let Some((mut reader, headers)) = self.open()? else {
            return Ok(summary);
        };
        let ticker_idx = self.column_index(&headers, TICKER_COLUMN)?;

        let tmp_path = self.tmp_path();
        let result = (|| -> Result<(), SyncError> {
            let mut writer = WriterBuilder::new()
                .from_path(&tmp_path)
                .map_err(|e| SyncError::csv(&tmp_path, e))?;
            writer
                .write_byte_record(&headers)
                .map_err(|e| SyncError::csv(&tmp_path, e))?;

            let mut record = ByteRecord::new();
            while reader
                .read_byte_record(&mut record)
                .map_err(|e| SyncError::csv(&self.path, e))?
            {
                if !is_complete(&record, &headers) {
                    summary.malformed += 1;
                    continue;
                }
                match ticker_field(&record, ticker_idx) {
                    Some(ticker) if exclude.contains(&ticker) => summary.removed += 1,
                    _ => {
                        writer
                            .write_byte_record(&record)
                            .map_err(|e| SyncError::csv(&tmp_path, e))?;
                        summary.kept += 1;
                    }
                }
            }
            writer.flush().map_err(|e| SyncError::io(&tmp_path, e))?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            SyncError::io(&self.path, e)
        })?;

        tracing::info!(
            store = %self.path.display(),
            kept = summary.kept,
            removed = summary.removed,
            malformed = summary.malformed,
            "rewrote store"
        );
        Ok(summary)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Upper-cased ticker at `idx`, if present and non-empty.
pub(crate) fn ticker_field(record: &ByteRecord, idx: usize) -> Option<String> {
    let raw = std::str::from_utf8(record.get(idx)?).ok()?.trim();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_uppercase())
    }
}

/// A row is only trusted when it has every header field. A crash mid-append
/// can leave a short row whose ticker and timestamp still parse.
pub(crate) fn is_complete(record: &ByteRecord, headers: &ByteRecord) -> bool {
    record.len() == headers.len()
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
