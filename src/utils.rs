use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

/// Name of the throwaway file used to check write access.
pub const PROBE_FILE: &str = "test.txt";

/// Creates and immediately deletes a probe file in `dir`.
pub fn probe_write_access(dir: &Path) -> io::Result<()> {
    let path = dir.join(PROBE_FILE);
    {
        let mut file = File::create(&path)?;
        file.write_all(b"probe")?;
    }
    fs::remove_file(&path)?;
    debug!("Output directory {} is writable", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        probe_write_access(dir.path()).unwrap();
        assert!(!dir.path().join(PROBE_FILE).exists());
    }

    #[test]
    fn probe_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(probe_write_access(&missing).is_err());
    }
}
