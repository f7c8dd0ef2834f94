//! JSONL log files: one self-describing record per line.
//!
//! Reads are unlocked snapshots. Every write takes the directory lock,
//! re-reads the file, and either appends a single line or rewrites the whole
//! file through a temp file and rename.
//!
//! Rewrites are never torn. Appends go straight to the file with `O_APPEND`,
//! so an unlocked reader can catch the last line half written. A final line
//! without its newline that does not parse is treated as an append still in
//! flight and skipped. Once the writer is gone (the lock is free) the next
//! append starts on a fresh line, and a leftover fragment becomes a corrupt
//! line that fails reads.
//!
//! Ids never go backwards. When a rewrite drops the highest id, that id is
//! kept in a `<log>.hwm` sidecar and allocation continues above it.

use crate::models::Record;
use crate::storage::lock::{LockGuard, LockManager};
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Mode for newly created data files.
#[cfg(unix)]
pub const DATA_FILE_MODE: u32 = 0o600;

/// Serialize one record as a JSON line, including the trailing newline.
pub fn encode_record<T: Record>(record: &T) -> Result<String> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}

/// Parse every line of a JSONL stream.
///
/// Blank lines are skipped. An unparsable final line with no trailing
/// newline is an in-flight append and is skipped too. Any other line that
/// fails to parse fails the whole read with `CorruptData`.
pub fn decode_records<T: Record>(mut reader: impl BufRead, path: &Path) -> Result<Vec<T>> {
    let mut records = Vec::new();
    let mut buf = Vec::new();
    let mut line_no = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        let terminated = buf.last() == Some(&b'\n');

        let parsed = std::str::from_utf8(&buf)
            .map_err(|e| e.to_string())
            .and_then(|line| {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    serde_json::from_str::<T>(trimmed)
                        .map(Some)
                        .map_err(|e| e.to_string())
                }
            });

        match parsed {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(message) if !terminated => {
                debug!(path = %path.display(), line = line_no, %message, "skipping unterminated tail");
            }
            Err(message) => return Err(corrupt(path, line_no, message)),
        }
    }
    Ok(records)
}

fn corrupt(path: &Path, line: usize, message: String) -> Error {
    Error::CorruptData {
        path: path.display().to_string(),
        line,
        message,
    }
}

/// Next id for a record set: max existing id + 1, or 1 when empty.
///
/// This alone would hand out a removed maximum again; `LogStore` also
/// applies its high-water mark.
pub fn next_id<T: Record>(records: &[T]) -> u64 {
    max_id(records) + 1
}

fn max_id<T: Record>(records: &[T]) -> u64 {
    records.iter().map(Record::id).max().unwrap_or(0)
}

/// A JSONL file of one record kind, with writes serialized by a lock.
#[derive(Debug, Clone)]
pub struct LogStore<T: Record> {
    path: PathBuf,
    high_water_path: PathBuf,
    lock: LockManager,
    _marker: PhantomData<T>,
}

impl<T: Record> LogStore<T> {
    pub fn new(path: PathBuf, lock: LockManager) -> Self {
        let mut high_water = path.clone().into_os_string();
        high_water.push(".hwm");
        Self {
            high_water_path: PathBuf::from(high_water),
            path,
            lock,
            _marker: PhantomData,
        }
    }

    /// Get the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<T>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        decode_records(BufReader::new(file), &self.path)
    }

    /// Find a record by id.
    pub fn find_by_id(&self, id: u64) -> Result<Option<T>> {
        Ok(self.read_all()?.into_iter().find(|r| r.id() == id))
    }

    /// Append a record, assigning an id if it has none. Returns the id.
    pub fn append(&self, record: T) -> Result<u64> {
        let guard = self.lock.acquire()?;
        let id = self.append_locked(&guard, record)?;
        guard.release()?;
        Ok(id)
    }

    /// `append` for a caller that already holds the lock.
    pub fn append_locked(&self, guard: &LockGuard, mut record: T) -> Result<u64> {
        self.check_guard(guard)?;
        let records = self.read_all()?;

        if record.id() == 0 {
            let floor = self.read_high_water()?;
            record.set_id(next_id(&records).max(floor + 1));
        } else if records.iter().any(|r| r.id() == record.id()) {
            return Err(Error::Validation(format!(
                "{} id {} already exists",
                T::KIND,
                record.id()
            )));
        }

        let mut line = encode_record(&record)?;
        let mut file = open_for_append(&self.path)?;
        if !ends_with_newline(&mut file)? {
            // A crashed writer left a fragment; keep it off our line
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        file.sync_data()?;

        debug!(kind = T::KIND, id = record.id(), path = %self.path.display(), "appended record");
        Ok(record.id())
    }

    /// Replace the record with the same id.
    pub fn update(&self, record: T) -> Result<()> {
        self.mutate(|records| {
            let slot = records
                .iter_mut()
                .find(|r| r.id() == record.id())
                .ok_or_else(|| not_found::<T>(record.id()))?;
            *slot = record;
            Ok(((), true))
        })
    }

    /// Remove the record with the given id and return it.
    pub fn delete(&self, id: u64) -> Result<T> {
        self.mutate(|records| {
            let idx = records
                .iter()
                .position(|r| r.id() == id)
                .ok_or_else(|| not_found::<T>(id))?;
            Ok((records.remove(idx), true))
        })
    }

    /// Run a read-modify-write under the lock.
    ///
    /// The mutator returns `(value, changed)`; the file is rewritten only
    /// when `changed` is true. An error from the mutator leaves the file
    /// untouched.
    pub fn mutate<R, F>(&self, mutator: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<T>) -> Result<(R, bool)>,
    {
        let guard = self.lock.acquire()?;
        let value = self.mutate_locked(&guard, mutator)?;
        guard.release()?;
        Ok(value)
    }

    /// `mutate` for a caller that already holds the lock.
    pub fn mutate_locked<R, F>(&self, guard: &LockGuard, mutator: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<T>) -> Result<(R, bool)>,
    {
        self.check_guard(guard)?;
        let mut records = self.read_all()?;
        let previous_max = max_id(&records);
        let (value, changed) = mutator(&mut records)?;
        if changed {
            if max_id(&records) < previous_max {
                self.raise_high_water(previous_max)?;
            }
            self.rewrite(&records)?;
        }
        Ok(value)
    }

    /// Highest id ever allocated beyond what the file still holds, or 0.
    fn read_high_water(&self) -> Result<u64> {
        let contents = match std::fs::read_to_string(&self.high_water_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };
        contents.trim().parse::<u64>().map_err(|e| Error::CorruptData {
            path: self.high_water_path.display().to_string(),
            line: 1,
            message: e.to_string(),
        })
    }

    /// Persist `id` as the high-water mark unless a higher one is recorded.
    fn raise_high_water(&self, id: u64) -> Result<()> {
        if self.read_high_water()? >= id {
            return Ok(());
        }
        let dir = parent_dir(&self.high_water_path);
        let mut tmp = NamedTempFile::new_in(dir)?;
        writeln!(tmp, "{}", id)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.high_water_path)
            .map_err(|e| Error::Io(e.error))?;
        debug!(kind = T::KIND, id, "raised id high-water mark");
        Ok(())
    }

    /// Replace the whole file atomically.
    fn rewrite(&self, records: &[T]) -> Result<()> {
        let dir = parent_dir(&self.path);
        std::fs::create_dir_all(dir)?;

        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            for record in records {
                writer.write_all(encode_record(record)?.as_bytes())?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        debug!(kind = T::KIND, count = records.len(), path = %self.path.display(), "rewrote log");
        Ok(())
    }

    fn check_guard(&self, guard: &LockGuard) -> Result<()> {
        if guard.path() != self.lock.path() {
            return Err(Error::Validation(format!(
                "lock {} does not guard {}",
                guard.path().display(),
                self.path.display()
            )));
        }
        Ok(())
    }
}

fn not_found<T: Record>(id: u64) -> Error {
    Error::NotFound(format!("{} {}", T::KIND, id))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// True for an empty file or one whose last byte is a newline.
fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn open_for_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut options = OpenOptions::new();
    options.create(true).read(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(DATA_FILE_MODE);
    }
    options.open(path)
}
