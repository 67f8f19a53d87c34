//! Versioned binary file
//!
//! Every persistence file starts with a fixed-width, zero-padded magic
//! string naming its format version. All integers are big-endian and
//! strings are prefixed with a u32 byte length.
//!
//! Writes go to `<path>.new` and only replace the real file once
//! [`PersistenceFile::close_and_commit`] has synced it, so an interrupted
//! save leaves the previous snapshot untouched.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::{PersistenceError, Result};

/// Width of the magic string at the start of every file
pub const MAGIC_STRING_LEN: usize = 32;

/// Default ceiling for files opened for reading (1 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

enum Mode {
    Closed,
    Write(BufWriter<File>),
    Read(BufReader<File>),
}

/// A persistence file open for either writing or reading
pub struct PersistenceFile {
    path: PathBuf,
    temp_path: PathBuf,
    max_file_size: u64,
    mode: Mode,
    version_tag: Option<String>,
    /// Unread bytes left in the file, bounds length-prefixed reads
    remaining: u64,
}

impl PersistenceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut temp = OsString::from(path.as_os_str());
        temp.push(".new");

        Self {
            path,
            temp_path: PathBuf::from(temp),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            mode: Mode::Closed,
            version_tag: None,
            remaining: 0,
        }
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where writes are staged before the commit rename
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Magic string written or found when the file was opened
    pub fn version_tag(&self) -> Option<&str> {
        self.version_tag.as_deref()
    }

    pub fn is_writing(&self) -> bool {
        matches!(self.mode, Mode::Write(_))
    }

    pub fn is_reading(&self) -> bool {
        matches!(self.mode, Mode::Read(_))
    }

    /// Start a new file at the temp path with the given magic string
    pub fn open_write(&mut self, magic: &str) -> Result<()> {
        if magic.len() > MAGIC_STRING_LEN {
            return Err(PersistenceError::Limit("magic string"));
        }
        self.discard();

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut out = BufWriter::new(File::create(&self.temp_path)?);
        let mut header = [0u8; MAGIC_STRING_LEN];
        header[..magic.len()].copy_from_slice(magic.as_bytes());
        out.write_all(&header)?;

        debug!(path = %self.temp_path.display(), magic, "Opened persistence file for writing");
        self.mode = Mode::Write(out);
        self.version_tag = Some(magic.to_string());
        Ok(())
    }

    /// Open the real file and read its magic string.
    ///
    /// Fails with [`PersistenceError::TooLarge`] before reading anything when
    /// the file exceeds the configured maximum size.
    pub fn open_read(&mut self) -> Result<()> {
        self.discard();

        let file = File::open(&self.path)?;
        let size = file.metadata()?.len();
        if size > self.max_file_size {
            return Err(PersistenceError::TooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let mut input = BufReader::new(file);
        let mut header = [0u8; MAGIC_STRING_LEN];
        input.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => {
                PersistenceError::Corruption("file is shorter than its header".to_string())
            }
            _ => PersistenceError::Io(e),
        })?;

        let end = header.iter().position(|&b| b == 0).unwrap_or(MAGIC_STRING_LEN);
        let tag = String::from_utf8_lossy(&header[..end]).into_owned();

        debug!(path = %self.path.display(), magic = %tag, size, "Opened persistence file for reading");
        self.mode = Mode::Read(input);
        self.version_tag = Some(tag);
        self.remaining = size - MAGIC_STRING_LEN as u64;
        Ok(())
    }

    /// Finish the current file.
    ///
    /// A file being written is flushed, synced and renamed over the target.
    /// A file being read is simply closed.
    pub fn close_and_commit(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.mode, Mode::Closed) {
            Mode::Write(out) => {
                let file = out.into_inner().map_err(|e| e.into_error())?;
                file.sync_all()?;
                drop(file);
                fs::rename(&self.temp_path, &self.path)?;
                debug!(path = %self.path.display(), "Committed persistence file");
            }
            Mode::Read(_) | Mode::Closed => {}
        }
        Ok(())
    }

    /// Close without committing. A half written temp file is removed.
    pub fn discard(&mut self) {
        if let Mode::Write(out) = std::mem::replace(&mut self.mode, Mode::Closed) {
            drop(out);
            if let Err(e) = fs::remove_file(&self.temp_path) {
                warn!(path = %self.temp_path.display(), "Failed to remove abandoned temp file: {}", e);
            }
        }
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        match &mut self.mode {
            Mode::Write(out) => Ok(out),
            _ => Err(PersistenceError::NotOpen),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer()?.write_all(bytes)?;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_zeroes(&mut self, len: usize) -> Result<()> {
        let out = self.writer()?;
        io::copy(&mut io::repeat(0).take(len as u64), out)?;
        Ok(())
    }

    /// u32 length prefix followed by the UTF-8 bytes
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        let len = u32::try_from(s.len()).map_err(|_| PersistenceError::Limit("string length"))?;
        self.write_u32(len)?;
        self.write_bytes(s.as_bytes())
    }

    /// Fill `buf` completely.
    ///
    /// Returns `Ok(false)` when the file ended before the first byte. Ending
    /// partway through is corruption.
    fn read_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        let input = match &mut self.mode {
            Mode::Read(input) => input,
            _ => return Err(PersistenceError::NotOpen),
        };

        let mut filled = 0;
        while filled < buf.len() {
            match input.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.remaining = self.remaining.saturating_sub(filled as u64);

        match filled {
            0 if !buf.is_empty() => Ok(false),
            n if n == buf.len() => Ok(true),
            n => Err(PersistenceError::Corruption(format!(
                "file ends {} bytes into a {} byte field",
                n,
                buf.len()
            ))),
        }
    }

    /// `None` on a clean end of file
    pub fn read_u16(&mut self) -> Result<Option<u16>> {
        let mut buf = [0u8; 2];
        Ok(self.read_or_eof(&mut buf)?.then(|| u16::from_be_bytes(buf)))
    }

    /// `None` on a clean end of file
    pub fn read_u32(&mut self) -> Result<Option<u32>> {
        let mut buf = [0u8; 4];
        Ok(self.read_or_eof(&mut buf)?.then(|| u32::from_be_bytes(buf)))
    }

    /// `None` on a clean end of file
    pub fn read_i64(&mut self) -> Result<Option<i64>> {
        let mut buf = [0u8; 8];
        Ok(self.read_or_eof(&mut buf)?.then(|| i64::from_be_bytes(buf)))
    }

    /// Read exactly `len` bytes; running out is corruption
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len as u64 > self.remaining {
            return Err(PersistenceError::Corruption(format!(
                "{} byte field runs past the end of the file",
                len
            )));
        }

        let mut buf = vec![0u8; len];
        if !self.read_or_eof(&mut buf)? && len > 0 {
            return Err(PersistenceError::Corruption(
                "unexpected end of file".to_string(),
            ));
        }
        Ok(buf)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = required(self.read_u32()?, "string length")?;
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes)
            .map_err(|_| PersistenceError::Corruption("string is not valid UTF-8".to_string()))
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }
}

impl Drop for PersistenceFile {
    fn drop(&mut self) {
        self.discard();
    }
}

impl std::fmt::Debug for PersistenceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.mode {
            Mode::Closed => "closed",
            Mode::Write(_) => "write",
            Mode::Read(_) => "read",
        };
        f.debug_struct("PersistenceFile")
            .field("path", &self.path)
            .field("mode", &mode)
            .field("version_tag", &self.version_tag)
            .finish_non_exhaustive()
    }
}

/// Turn a clean end of file in the middle of a record into corruption
pub fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| PersistenceError::Corruption(format!("unexpected end of file reading {}", field)))
}
