use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Remove a file or directory tree. Already-absent paths are not an error.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to stat {}", path.display()))
        }
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// Recursively copy `src` into `dst`, skipping entries for which `skip`
/// returns true.
pub(crate) fn copy_dir_all(src: &Path, dst: &Path, skip: &dyn Fn(&Path) -> bool) -> Result<u64> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    let mut copied = 0;
    for entry in fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))? {
        let entry = entry.with_context(|| format!("failed to list {}", src.display()))?;
        let path = entry.path();
        if skip(&path) {
            continue;
        }
        let target = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to stat {}", path.display()))?;
        if file_type.is_dir() {
            copied += copy_dir_all(&path, &target, skip)?;
        } else if file_type.is_file() {
            fs::copy(&path, &target).with_context(|| {
                format!("failed to copy {} to {}", path.display(), target.display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// All regular files under `dir`, sorted.
pub(crate) fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in
            fs::read_dir(&current).with_context(|| format!("failed to read {}", current.display()))?
        {
            let entry = entry.with_context(|| format!("failed to list {}", current.display()))?;
            let file_type = entry
                .file_type()
                .with_context(|| format!("failed to stat {}", entry.path().display()))?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_missing_paths_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        remove_if_exists(&dir.path().join("nope")).unwrap();

        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("f"), b"x").unwrap();
        remove_if_exists(&dir.path().join("a")).unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn copies_trees_with_skips() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("mod")).unwrap();
        fs::create_dir_all(src.join("target")).unwrap();
        fs::write(src.join("lib.rs"), b"x").unwrap();
        fs::write(src.join("mod/a.rs"), b"x").unwrap();
        fs::write(src.join("target/junk"), b"x").unwrap();
        fs::write(src.join(".hidden"), b"x").unwrap();

        let dst = dir.path().join("dst");
        let skip = |p: &Path| is_hidden(p) || p.ends_with("target");
        assert_eq!(copy_dir_all(&src, &dst, &skip).unwrap(), 2);

        let files = walk_files(&dst).unwrap();
        assert_eq!(files, vec![dst.join("lib.rs"), dst.join("mod/a.rs")]);
    }
}
