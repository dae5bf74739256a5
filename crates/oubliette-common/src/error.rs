// error.rs — typed errors for the save/load subsystem
//
// Low-level helpers never terminate the process themselves; they return a
// SaveError and the caller decides whether the condition is fatal. The only
// place that exits is fail_fast(), the top-level policy for conditions the
// game cannot safely continue from (a half-read world, a primary save that
// won't open).

use std::path::PathBuf;

use thiserror::Error;

use crate::message::mpr;

pub type SaveResult<T> = Result<T, SaveError>;

#[derive(Debug, Error)]
pub enum SaveError {
    /// A file that must exist could not be opened.
    #[error("unable to open \"{path}\": {source}")]
    IoUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored major version does not match this build's.
    #[error("sorry, this release cannot read a v{found_major}.{found_minor} file \"{path}\" (expected v{expected}.x)")]
    VersionMismatch {
        path: PathBuf,
        found_major: u8,
        found_minor: u8,
        expected: u8,
    },

    /// Truncated data, trailing garbage, or an unrecognized section.
    #[error("incomplete read of \"{path}\": {detail}")]
    MalformedStream { path: PathBuf, detail: String },

    /// The codec ran out of bytes mid-value. The tag layer wraps this in
    /// MalformedStream once it knows which file was being read.
    #[error("unexpected end of save data")]
    UnexpectedEof,

    /// A byte was read fine but doesn't decode to anything: an out-of-range
    /// enum discriminant, a non-UTF-8 string. Wrapped like UnexpectedEof.
    #[error("invalid {what} value {value}")]
    InvalidValue { what: &'static str, value: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SaveError {
    /// Attach file context to a codec-level error.
    pub fn with_path(self, path: &std::path::Path) -> SaveError {
        match self {
            SaveError::UnexpectedEof => SaveError::MalformedStream {
                path: path.to_path_buf(),
                detail: "unexpected end of data".to_string(),
            },
            SaveError::InvalidValue { what, value } => SaveError::MalformedStream {
                path: path.to_path_buf(),
                detail: format!("invalid {} value {}", what, value),
            },
            other => other,
        }
    }
}

/// Top-level policy for unrecoverable save/load failures: print a one-line
/// diagnostic on the user message channel and end the process.
pub fn fail_fast(err: &SaveError) -> ! {
    mpr(&format!("{}\n", err));
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_names_file_and_versions() {
        let err = SaveError::VersionMismatch {
            path: PathBuf::from("wizard.sav"),
            found_major: 9,
            found_minor: 2,
            expected: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("wizard.sav"));
        assert!(msg.contains("v9.2"));
        assert!(msg.contains("v4.x"));
    }

    #[test]
    fn test_with_path_promotes_eof() {
        let err = SaveError::UnexpectedEof.with_path(std::path::Path::new("d03a.lvl"));
        match err {
            SaveError::MalformedStream { path, .. } => {
                assert_eq!(path, PathBuf::from("d03a.lvl"));
            }
            other => panic!("expected MalformedStream, got {:?}", other),
        }
    }

    #[test]
    fn test_with_path_promotes_invalid_value() {
        let err = SaveError::InvalidValue {
            what: "species",
            value: 99,
        };
        match err.with_path(std::path::Path::new("old.sav")) {
            SaveError::MalformedStream { path, detail } => {
                assert_eq!(path, PathBuf::from("old.sav"));
                assert!(detail.contains("species"));
                assert!(detail.contains("99"));
            }
            other => panic!("expected MalformedStream, got {:?}", other),
        }
    }

    #[test]
    fn test_with_path_leaves_other_errors_alone() {
        let err = SaveError::MalformedStream {
            path: PathBuf::from("a"),
            detail: "trailing bytes".to_string(),
        };
        match err.with_path(std::path::Path::new("b")) {
            SaveError::MalformedStream { path, .. } => assert_eq!(path, PathBuf::from("a")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
