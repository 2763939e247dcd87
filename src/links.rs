//! Symlink reconciliation between install and data directories.
//!
//! Each sub-application may declare source → destination pairs; the source
//! lives inside the checkout and the destination under the shared data root.
//! Reconciliation turns the source into a symbolic link to the destination,
//! first move-merging any real content the source still holds. Re-running
//! against an already-correct link is a no-op.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::SubApplication;

/// Reconciles every configured symlink pair for one application.
///
/// Individual pair failures are logged and skipped; one broken mapping must
/// not prevent the others from being repaired.
pub fn reconcile_all(app: &SubApplication, install_dir: &Path, data_dir: &Path) {
    for (source, destination) in &app.sym_links {
        if let Err(e) = reconcile(install_dir, data_dir, source, destination) {
            tracing::warn!(
                app = %app.name,
                source,
                destination,
                error = %e,
                "symlink reconciliation failed"
            );
        }
    }
}

/// Reconciles a single source → destination pair.
///
/// Relative sources resolve under `install_dir`, relative destinations under
/// `data_dir`; both sides are created as directories when missing. If the
/// source already links to the resolved destination nothing happens.
/// Otherwise the source's contents are move-merged into the destination, the
/// source is removed, and the link is created.
pub fn reconcile(
    install_dir: &Path,
    data_dir: &Path,
    source: &str,
    destination: &str,
) -> io::Result<()> {
    let destination = resolve_side(data_dir, destination, true)?;
    let source = resolve_side(install_dir, source, false)?;

    match read_link_target(&source)? {
        Some(target) if same_path(&resolved_target(&source, &target), &destination) => {
            tracing::debug!(source = %source.display(), "symlink already correct");
            Ok(())
        }
        Some(_) => relink(&source, &destination),
        None => relink(&source, &destination),
    }
}

/// Resolves one side of a pair to an absolute path.
///
/// `create` forces the directory into existence; the source side is only
/// created when it does not exist at all (an existing symlink must be left
/// alone for inspection).
fn resolve_side(base: &Path, path: &str, create: bool) -> io::Result<PathBuf> {
    let p = Path::new(path);
    let absolute = if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    };
    if create && !absolute.is_dir() {
        fs::create_dir_all(&absolute)?;
    }
    Ok(absolute)
}

/// Returns the link target when `path` is a symbolic link, `None` for a
/// regular file/directory or a missing path.
fn read_link_target(path: &Path) -> io::Result<Option<PathBuf>> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Ok(Some(fs::read_link(path)?)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// A relative link target resolves against the link's parent directory.
fn resolved_target(link: &Path, target: &Path) -> PathBuf {
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        link.parent().unwrap_or(Path::new("")).join(target)
    }
}

/// Compares two paths after lexical normalization.
///
/// Case-insensitive on Windows, case-sensitive elsewhere, matching the
/// underlying filesystem conventions.
fn same_path(a: &Path, b: &Path) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if cfg!(windows) {
        a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
    } else {
        a == b
    }
}

/// Removes `.` components and resolves `..` lexically.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Move-merges whatever the source currently holds into the destination,
/// removes the source path, and creates the link.
fn relink(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::symlink_metadata(source) {
        Ok(meta) if meta.file_type().is_symlink() => {
            // A stale link: rescue the old target's contents before
            // dropping the link itself.
            if let Ok(target) = fs::read_link(source) {
                let resolved = resolved_target(source, &target);
                if resolved.is_dir() && !same_path(&resolved, destination) {
                    move_merge(&resolved, destination)?;
                }
            }
            fs::remove_file(source)?;
        }
        Ok(meta) if meta.is_dir() => {
            // move_merge removes the emptied source directory itself.
            move_merge(source, destination)?;
        }
        Ok(_) => {
            fs::remove_file(source)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    make_symlink(destination, source)?;
    tracing::info!(
        source = %source.display(),
        destination = %destination.display(),
        "symlinked"
    );
    Ok(())
}

/// Recursively moves the contents of `src` into `dst`, merging directory
/// trees, then removes `src`. Existing files in `dst` are replaced by the
/// moved files (rename semantics); directories are merged, never deleted.
fn move_merge(src: &Path, dst: &Path) -> io::Result<()> {
    let src_meta = fs::metadata(src)?;
    if !src_meta.is_dir() {
        return Err(io::Error::other("source is not a directory"));
    }
    if !dst.exists() {
        fs::create_dir_all(dst)?;
    } else if !fs::metadata(dst)?.is_dir() {
        return Err(io::Error::other("destination is not a directory"));
    }

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            move_merge(&from, &to)?;
        } else {
            // Cross-device renames fail; fall back to copy + remove.
            if fs::rename(&from, &to).is_err() {
                fs::copy(&from, &to)?;
                fs::remove_file(&from)?;
            }
        }
    }
    fs::remove_dir_all(src)
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
