use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Create the flag folder if needed and return its path
pub fn ensure_flag_folder(folder: &str) -> io::Result<PathBuf> {
    let path = Path::new(folder);
    fs::create_dir_all(path)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_flag_folder() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("flags");
        let created = ensure_flag_folder(nested.to_str().unwrap()).unwrap();
        assert!(created.is_dir());
        // Existing folders are fine.
        assert!(ensure_flag_folder(nested.to_str().unwrap()).is_ok());
    }
}
