use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Create an empty file, leaving an existing file untouched.
pub fn create_file(path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    if path.exists() {
        return Err(AppError::AlreadyExists(path.display().to_string()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::File::create(path)?;
    Ok(())
}

/// Write `data` to a new file. Fails with `AlreadyExists` if anything is
/// already at `path`.
pub fn write_new(path: &Path, data: &[u8]) -> Result<()> {
    if fs::symlink_metadata(path).is_ok() {
        return Err(AppError::AlreadyExists(path.display().to_string()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(data)?;
    Ok(())
}

/// Create a directory and any missing ancestors. An existing directory is a no-op.
pub fn create_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(AppError::AlreadyExists(path.display().to_string()));
    }
    fs::create_dir_all(path)?;
    Ok(())
}

/// Rename (move) a file or directory, creating the destination's parent.
///
/// Uses `fs::rename` first; falls back to copy+delete when that fails
/// (cross-device).
pub fn rename(from: &Path, to: &Path) -> Result<()> {
    if fs::symlink_metadata(from).is_err() {
        return Err(AppError::FileNotFound(from.display().to_string()));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            if from.is_dir() {
                copy_dir_recursive(from, to)?;
                fs::remove_dir_all(from)?;
            } else {
                fs::copy(from, to)?;
                fs::remove_file(from)?;
            }
            Ok(())
        }
    }
}

/// Delete a file or directory. Directories are removed recursively.
pub fn delete(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path)
        .map_err(|_| AppError::FileNotFound(path.display().to_string()))?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Whether no file lies anywhere beneath `dir` (empty sub-directories allowed).
pub fn holds_no_files(dir: &Path) -> Result<bool> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = fs::symlink_metadata(entry.path())?;
        if !metadata.is_dir() || !holds_no_files(&entry.path())? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Pick an unused scratch directory name under `base`: `temp`, `temp1`, `temp2`, ...
pub fn unused_staging_dir(base: &Path) -> PathBuf {
    let first = base.join("temp");
    if !first.exists() {
        return first;
    }
    for i in 1..=1000 {
        let candidate = base.join(format!("temp{}", i));
        if !candidate.exists() {
            return candidate;
        }
    }
    // Fallback: should not happen in practice
    base.join(format!("temp-{}", std::process::id()))
}

/// Move a staged file or directory into `dest`, replacing whatever is there.
pub fn replace_from_staging(staged: &Path, dest: &Path) -> Result<()> {
    if fs::symlink_metadata(dest).is_ok() {
        delete(dest)?;
    }
    rename(staged, dest)
}

/// Internal recursive directory copy.
fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dest_path)?;
        } else {
            fs::copy(&src_path, &dest_path)?;
        }
    }
    Ok(())
}
