//! Filesystem helpers shared by the directory-backed stores.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Recursively copy `src` into `dst`, preserving symlinks.
///
/// `dst` is created if it does not exist.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
  fs::create_dir_all(dst)?;

  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = match entry.path().strip_prefix(src) {
      Ok(rel) if !rel.as_os_str().is_empty() => rel,
      _ => continue,
    };
    let target = dst.join(rel);
    let file_type = entry.file_type();

    if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      symlink(&link, &target)?;
    } else if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target)?;
    }
  }

  Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  if target.is_dir() {
    std::os::windows::fs::symlink_dir(target, link)
  } else {
    std::os::windows::fs::symlink_file(target, link)
  }
}

/// Write `contents` to `path` atomically (write to a sibling temp file, then rename).
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
  let dir = path.parent().ok_or_else(|| io::Error::other("path has no parent"))?;
  fs::create_dir_all(dir)?;
  let tmp = tempfile::NamedTempFile::new_in(dir)?;
  fs::write(tmp.path(), contents)?;
  tmp.persist(path).map_err(|e| e.error)?;
  Ok(())
}

/// Write `contents` to `path` only if `path` does not exist yet.
///
/// The content is fully written to a temp file before being hard-linked into
/// place, so readers never observe a partial file and two racing writers cannot
/// both succeed. Returns `Ok(false)` when `path` already existed.
pub fn write_no_clobber(path: &Path, contents: &[u8]) -> io::Result<bool> {
  let dir = path.parent().ok_or_else(|| io::Error::other("path has no parent"))?;
  fs::create_dir_all(dir)?;
  let tmp = tempfile::NamedTempFile::new_in(dir)?;
  fs::write(tmp.path(), contents)?;

  match fs::hard_link(tmp.path(), path) {
    Ok(()) => Ok(true),
    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
    Err(e) => Err(e),
  }
}

/// Total size in bytes of regular files below `path`.
pub fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}
