//! Write-to-temp-then-rename output files.
//!
//! Outputs are first written to a hidden temporary file in the destination
//! directory and renamed into place on commit. If the writer fails or the
//! handle is dropped before commit, the temporary file is deleted and the
//! destination is left untouched.

use crate::error::ExportResult;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Pending output file.
#[derive(Debug)]
pub struct AtomicFile {
    temp: TempPath,
    dest: PathBuf,
}

impl AtomicFile {
    /// Reserve a temporary file next to `dest`, creating parent directories.
    pub fn new<P: AsRef<Path>>(dest: P) -> ExportResult<Self> {
        let dest = dest.as_ref().to_path_buf();
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let stem = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{stem}."))
            .suffix(".partial")
            .tempfile_in(&dir)?
            .into_temp_path();

        Ok(Self { temp, dest })
    }

    /// Path of the temporary file to write into.
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Final destination.
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Rename the temporary file onto the destination.
    pub fn commit(self) -> ExportResult<PathBuf> {
        self.temp.persist(&self.dest)?;
        tracing::debug!(path = ?self.dest, "Committed output file");
        Ok(self.dest)
    }
}

/// Write a file atomically through a buffered writer.
pub fn write_atomic<P, F>(dest: P, write: F) -> ExportResult<PathBuf>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<File>) -> ExportResult<()>,
{
    let target = AtomicFile::new(dest)?;
    {
        let mut out = BufWriter::new(File::create(target.temp_path())?);
        write(&mut out)?;
        out.flush()?;
        out.get_ref().sync_all()?;
    }
    target.commit()
}

/// Write a text file atomically.
pub fn write_text<P: AsRef<Path>>(dest: P, contents: &str) -> ExportResult<PathBuf> {
    write_atomic(dest, |out| {
        out.write_all(contents.as_bytes())?;
        Ok(())
    })
}
