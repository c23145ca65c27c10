// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fs;
use std::path::{Path, PathBuf};

/// Error types for fetching sample bytes.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty source reference")]
    EmptySource,
}

/// Retrieves the raw bytes behind a sample's source reference. Fetches run on the
/// blocking pool, so implementations may block.
pub trait SampleFetcher: Send + Sync + 'static {
    fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError>;
}

/// Reads samples from disk. Relative references resolve against the base path.
pub struct FileFetcher {
    base_path: PathBuf,
}

impl FileFetcher {
    pub fn new(base_path: &Path) -> FileFetcher {
        FileFetcher {
            base_path: base_path.to_path_buf(),
        }
    }

    /// Resolves a source reference to a path on disk.
    pub fn resolve(&self, source: &str) -> PathBuf {
        let path = Path::new(source);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}

impl SampleFetcher for FileFetcher {
    fn fetch(&self, source: &str) -> Result<Vec<u8>, FetchError> {
        if source.trim().is_empty() {
            return Err(FetchError::EmptySource);
        }

        let path = self.resolve(source);
        fs::read(&path).map_err(|e| {
            FetchError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })
    }
}

/// Gets the extension of a source reference, used as a decoder hint.
pub fn extension_hint(source: &str) -> Option<&str> {
    Path::new(source).extension().and_then(|ext| ext.to_str())
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_file_fetcher() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        fs::write(tempdir.path().join("hat.wav"), b"bytes")?;

        let fetcher = FileFetcher::new(tempdir.path());
        assert_eq!(b"bytes".to_vec(), fetcher.fetch("hat.wav")?);

        let absolute = tempdir.path().join("hat.wav");
        assert_eq!(
            b"bytes".to_vec(),
            fetcher.fetch(absolute.to_str().expect("path"))?
        );

        let missing = fetcher.fetch("missing.wav").unwrap_err();
        assert!(missing.to_string().contains("missing.wav"));
        assert!(matches!(fetcher.fetch(" "), Err(FetchError::EmptySource)));
        Ok(())
    }

    #[test]
    fn test_extension_hint() {
        assert_eq!(Some("wav"), extension_hint("samples/kick/kick-1.wav"));
        assert_eq!(Some("mp3"), extension_hint("loop.mp3"));
        assert_eq!(None, extension_hint("noextension"));
    }
}
