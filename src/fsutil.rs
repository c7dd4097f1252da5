//! Filesystem utilities shared across the pipeline.
//!
//! Recursive copies that preserve symlinks, atomic renames, uniquely-named
//! sibling directories, and the symlink swap used to promote a freshly
//! built repository tree for concurrent readers.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Recursively copy a directory, preserving symlinks.
///
/// Symlinks are recreated pointing at their original target, never
/// followed.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)?;
    }

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

/// Move a file by rename, falling back to copy+remove across filesystems.
pub fn atomic_move(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)?;
            Ok(())
        }
    }
}

/// A temp-file name unlikely to collide within one directory.
pub fn tmp_name(prefix: &str) -> String {
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{prefix}-{n}")
}

/// Remove and recreate a directory, leaving it empty.
pub fn recreate_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

const UNIQUE_DIR_ATTEMPTS: u32 = 10;

/// Create a uniquely-named sibling of `base` via exclusive-create.
///
/// The name is `<base>.<YYYYMMDD>[.N]`. Retries on genuine name
/// collisions only, up to a bounded attempt count.
pub fn create_unique_sibling(base: &Path, date_stamp: &str) -> Result<PathBuf> {
    for attempt in 0..UNIQUE_DIR_ATTEMPTS {
        let name = match base.file_name().and_then(|n| n.to_str()) {
            Some(name) if attempt == 0 => format!("{}.{}", name, date_stamp),
            Some(name) => format!("{}.{}.{}", name, date_stamp, attempt),
            None => {
                return Err(Error::config(format!(
                    "cannot derive sibling name from '{}'",
                    base.display()
                )))
            }
        };
        let candidate = base.with_file_name(name);
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(Error::publish(format!(
        "no unique sibling name for '{}' after {} attempts",
        base.display(),
        UNIQUE_DIR_ATTEMPTS
    )))
}

/// Atomically retarget the symlink at `link` to point at `target`.
///
/// A fresh temp symlink is renamed over `link`, so readers always see
/// either the old tree or the new one. The previous symlink, if any, is
/// kept aside at `<link>.old` as a rollback point.
pub fn swap_symlink(link: &Path, target: &Path) -> Result<()> {
    let parent = link
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let tmp_link = parent.join(tmp_name(".link"));

    if link.is_symlink() {
        let old = link.with_extension("old");
        if old.is_symlink() || old.exists() {
            fs::remove_file(&old)?;
        }
        let previous = fs::read_link(link)?;
        std::os::unix::fs::symlink(&previous, &old)?;
    }

    std::os::unix::fs::symlink(target, &tmp_link)?;
    if let Err(err) = fs::rename(&tmp_link, link) {
        let _ = fs::remove_file(&tmp_link);
        return Err(err.into());
    }
    Ok(())
}

/// Promote a freshly built tree: copy it into a uniquely-named dated
/// sibling of `dst`, then swap the `dst` symlink onto it.
pub fn promote_tree(src: &Path, dst: &Path, date_stamp: &str) -> Result<PathBuf> {
    let unique = create_unique_sibling(dst, date_stamp)?;
    copy_dir_recursive(src, &unique)?;
    swap_symlink(dst, &unique)?;
    Ok(unique)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_preserves_symlinks() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");

        fs::create_dir_all(src.join("subdir")).unwrap();
        fs::write(src.join("file.txt"), "hello").unwrap();
        fs::write(src.join("subdir/nested.txt"), "world").unwrap();
        std::os::unix::fs::symlink("file.txt", src.join("link")).unwrap();

        copy_dir_recursive(&src, &dst).unwrap();

        assert!(dst.join("subdir/nested.txt").exists());
        assert!(dst.join("link").is_symlink());
        assert_eq!(
            fs::read_link(dst.join("link")).unwrap().to_str().unwrap(),
            "file.txt"
        );
    }

    #[test]
    fn atomic_move_replaces_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.txt");
        let dst = temp.path().join("out/dst.txt");

        fs::write(&src, "content").unwrap();
        atomic_move(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "content");
    }

    #[test]
    fn unique_sibling_skips_collisions() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("repo");

        let first = create_unique_sibling(&base, "20240601").unwrap();
        let second = create_unique_sibling(&base, "20240601").unwrap();

        assert_ne!(first, second);
        assert!(first.is_dir());
        assert!(second.is_dir());
        assert!(first.file_name().unwrap().to_str().unwrap().starts_with("repo.20240601"));
    }

    #[test]
    fn swap_symlink_keeps_rollback() {
        let temp = TempDir::new().unwrap();
        let tree_a = temp.path().join("tree-a");
        let tree_b = temp.path().join("tree-b");
        fs::create_dir_all(&tree_a).unwrap();
        fs::create_dir_all(&tree_b).unwrap();
        let link = temp.path().join("current");

        swap_symlink(&link, &tree_a).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), tree_a);

        swap_symlink(&link, &tree_b).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), tree_b);
        assert_eq!(fs::read_link(link.with_extension("old")).unwrap(), tree_a);
    }

    #[test]
    fn promote_tree_copies_and_swaps() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("fresh");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("Packages"), "data").unwrap();
        let dst = temp.path().join("repo");

        let unique = promote_tree(&src, &dst, "20240601").unwrap();

        assert!(unique.join("Packages").exists());
        assert_eq!(fs::read_link(&dst).unwrap(), unique);
        assert_eq!(fs::read_to_string(dst.join("Packages")).unwrap(), "data");
    }
}
