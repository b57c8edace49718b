use crate::error::{Result, WardenError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Readers see either the old content or the new content, never a mix.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Append one line to a file, creating it (and its parents) if needed.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(f, "{line}")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// FileLock
// ---------------------------------------------------------------------------

/// Cross-process advisory lock backed by an exclusively created lock file.
///
/// The lock file is removed when the guard drops. A lock file older than
/// `stale_after` is assumed to belong to a crashed process and is broken.
/// Breaking goes through a sibling `.break` file and re-checks the age while
/// holding it, so two waiters that both saw the stale lock cannot remove
/// each other's fresh one.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn acquire(path: &Path, timeout: Duration, stale_after: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + timeout;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(mut f) => {
                    let _ = write!(f, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(path, stale_after) && break_stale(path, stale_after) {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(WardenError::LockTimeout(path.display().to_string()));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Remove `path` if it is still stale once the break file is held. Returns
/// whether this call removed it.
fn break_stale(path: &Path, stale_after: Duration) -> bool {
    let breaker = path.with_extension("break");
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&breaker)
    {
        Ok(_) => {
            let broken = is_stale(path, stale_after) && std::fs::remove_file(path).is_ok();
            if broken {
                tracing::warn!(path = %path.display(), "broke stale lock");
            }
            let _ = std::fs::remove_file(&breaker);
            broken
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            // Left behind by a process that died while breaking.
            if is_stale(&breaker, stale_after) {
                let _ = std::fs::remove_file(&breaker);
            }
            false
        }
        Err(_) => false,
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .map(|age| age > stale_after)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.yaml");
        atomic_write(&path, b"hello: world").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello: world");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/test.yaml");
        atomic_write(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn append_line_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/debug.log");
        append_line(&path, "one").unwrap();
        append_line(&path, "two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.lock");
        let guard =
            FileLock::acquire(&path, Duration::from_millis(50), Duration::from_secs(60)).unwrap();
        let second = FileLock::acquire(&path, Duration::from_millis(50), Duration::from_secs(60));
        assert!(matches!(second, Err(WardenError::LockTimeout(_))));

        drop(guard);
        assert!(!path.exists());
        FileLock::acquire(&path, Duration::from_millis(50), Duration::from_secs(60)).unwrap();
    }

    fn age(path: &Path, by: Duration) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - by)
            .unwrap();
    }

    #[test]
    fn stale_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.lock");
        std::fs::write(&path, "99999").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        FileLock::acquire(&path, Duration::from_millis(50), Duration::from_millis(1)).unwrap();
        assert!(!dir.path().join("s.break").exists());
    }

    #[test]
    fn waiters_on_stale_lock_take_turns() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Barrier};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.lock");
        std::fs::write(&path, "99999").unwrap();
        age(&path, Duration::from_secs(3600));

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let (path, barrier) = (path.clone(), barrier.clone());
                let (inside, overlap) = (inside.clone(), overlap.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    let _guard =
                        FileLock::acquire(&path, Duration::from_secs(5), Duration::from_secs(60))
                            .unwrap();
                    if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.fetch_add(1, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_millis(20));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert!(!path.exists());
    }

    #[test]
    fn fresh_lock_is_not_broken_by_late_breaker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.lock");
        let _held =
            FileLock::acquire(&path, Duration::from_millis(50), Duration::from_secs(60)).unwrap();
        // A waiter that judged the previous lock stale arrives after it was replaced.
        assert!(!break_stale(&path, Duration::from_secs(60)));
        assert!(path.exists());
    }

    #[test]
    fn abandoned_break_file_is_cleared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.lock");
        let breaker = dir.path().join("s.break");
        std::fs::write(&path, "99999").unwrap();
        std::fs::write(&breaker, "").unwrap();
        age(&path, Duration::from_secs(3600));
        age(&breaker, Duration::from_secs(3600));
        FileLock::acquire(&path, Duration::from_secs(1), Duration::from_secs(60)).unwrap();
        assert!(!breaker.exists());
    }
}
