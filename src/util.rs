use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Reads a whole file. `kind` names the file's role in the error message
/// (e.g., "template" or "project").
pub fn read_to_string(path: &Path, kind: &'static str) -> Result<String, FileError> {
    std::fs::read_to_string(path).map_err(|err| FileError {
        kind,
        path: path.to_owned(),
        err,
    })
}

/// An I/O error annotated with the file it happened on.
#[derive(Debug)]
pub struct FileError {
    pub kind: &'static str,
    pub path: PathBuf,
    pub err: io::Error,
}

impl FileError {
    pub fn is_not_found(&self) -> bool {
        self.err.kind() == io::ErrorKind::NotFound
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Opening {} file `{}`: {}",
            self.kind,
            self.path.display(),
            self.err
        )
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.err)
    }
}
