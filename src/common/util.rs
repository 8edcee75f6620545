//! Small utility functions shared by discovery and execution.

use crate::common::error::Result;
use std::{fs::File, io::Read, path::Path};

/// Reads at most `limit` bytes from the start of a file.
///
/// Used for script metadata headers and metadata probe output, which are
/// both bounded by contract so a misbehaving file cannot balloon memory.
pub fn read_prefix(path: impl AsRef<Path>, limit: usize) -> Result<Vec<u8>> {
    let file = File::open(path.as_ref())?;
    let mut buffer = Vec::new();
    file.take(limit as u64).read_to_end(&mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn prefix_is_bounded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[b'x'; 1000]).unwrap();
        let prefix = read_prefix(file.path(), 16).unwrap();
        assert_eq!(prefix.len(), 16);
        let all = read_prefix(file.path(), 4096).unwrap();
        assert_eq!(all.len(), 1000);
    }
}
