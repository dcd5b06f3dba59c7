use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use byte_unit::Byte;

use crate::error::{PackError, Result};

/// Write `data` to `path` and flush it to disk before returning
pub fn write_durable(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// [`write_durable`] that leaves nothing behind at `path` when it fails
pub fn write_artifact(path: &Path, data: &[u8]) -> std::io::Result<()> {
    write_durable(path, data).inspect_err(|_| {
        let _ = fs::remove_file(path);
    })
}

/// Remove `dir` with everything in it and create it again, empty
pub fn recreate_dir(dir: &Path) -> Result<PathBuf> {
    if dir.exists() {
        debug!("removing previous work dir {}", dir.display());
        fs::remove_dir_all(dir).map_err(|e| PackError::io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| PackError::io(dir, e))?;
    Ok(dir.to_path_buf())
}

/// Human readable file size, e.g. `1.5 KiB`
pub fn display_size(len: u64) -> String {
    format!("{:#}", Byte::from_u64(len))
}
