//! Uncompressed backing: a plain file or in-memory buffer, opened or
//! created directly with no chunking involved.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind};
use std::path::Path;

use crate::error::{FormatError, Result};

pub fn open_read(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

/// Creates `path` for writing. Refuses to clobber an existing file unless
/// `overwrite` is set, surfacing that as [`FormatError::FileExists`] rather
/// than the generic IO error `create_new` raises.
pub fn create_write(path: &Path, overwrite: bool) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true);
    if overwrite {
        opts.truncate(true);
    } else {
        opts.create_new(true);
    }
    opts.open(path).map_err(|e| {
        if !overwrite && e.kind() == ErrorKind::AlreadyExists {
            FormatError::FileExists
        } else {
            FormatError::Io(e)
        }
    })
}
