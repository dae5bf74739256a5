// files.rs — save directory layout and filename construction
//
// Filenames are a pure function of their inputs so the same identity always
// maps to the same path. Player-scoped files look like
// "<prefix>[-uid].<ext>"; level files use the level suffix code as their
// extension (e.g. "Wizard-1000.03o").

use std::fs;
use std::path::{Path, PathBuf};

use crate::message::mpr;

/// Longest player-name prefix that goes into a filename.
pub const FILE_NAME_LEN: usize = 30;

/// Drop characters that are unsafe in filenames, keeping the result
/// recognizable. Everything except alphanumerics, '-', '_' and '.' goes.
pub fn strip_filename_unsafe_chars(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

/// Build a save-directory filename from its parts. `uid` is the multi-user
/// disambiguator; None on single-user setups and for shared files (bones).
pub fn savedir_filename(
    save_dir: &Path,
    prefix: &str,
    suffix: &str,
    extension: &str,
    uid: Option<u32>,
) -> PathBuf {
    let mut name = strip_filename_unsafe_chars(prefix);
    name.truncate(FILE_NAME_LEN);

    if let Some(uid) = uid {
        name.push_str(&format!("-{}", uid));
    }

    name.push_str(suffix);

    if !extension.is_empty() {
        name.push('.');
        name.push_str(extension);
    }

    save_dir.join(name)
}

/// True if `name` (a bare filename from a directory listing) is one of this
/// user's files with the given extension: it ends in "[-uid].<ext>" with a
/// non-empty prefix before it.
pub fn is_save_file_name(name: &str, uid: Option<u32>, ext: &str) -> bool {
    let mut tail = String::new();
    if let Some(uid) = uid {
        tail.push_str(&format!("-{}", uid));
    }
    tail.push('.');
    tail.push_str(ext);

    name.len() > tail.len() && name.ends_with(&tail)
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

pub fn dir_exists(path: &Path) -> bool {
    path.is_dir()
}

/// Names of all entries in a directory. Missing directory reads as empty.
pub fn get_dir_files(dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files
}

/// Recursively create every missing segment of `dir`.
pub fn create_dirs(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

/// Make sure `dir` exists, creating it if needed. Failure is reported to the
/// player (unless silent) and returned; the caller decides how bad it is.
pub fn check_dir(whatdir: &str, dir: &Path, silent: bool) -> bool {
    if dir_exists(dir) {
        return true;
    }
    if create_dirs(dir).is_err() {
        if !silent {
            mpr(&format!(
                "{} \"{}\" does not exist and I can't create it.",
                whatdir,
                dir.display()
            ));
        }
        return false;
    }
    true
}

/// Walk a prioritized list of base directories and prefixes, returning the
/// first existing path for `basename`. None means the file is nowhere; the
/// caller escalates if it was required.
pub fn datafile_path(basename: &str, bases: &[PathBuf], prefixes: &[&str]) -> Option<PathBuf> {
    for base in bases {
        for prefix in prefixes {
            let candidate = base.join(prefix).join(basename);
            if file_exists(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_savedir_filename_is_deterministic() {
        let dir = Path::new("/saves");
        let a = savedir_filename(dir, "Wizard", "", "sav", Some(1000));
        let b = savedir_filename(dir, "Wizard", "", "sav", Some(1000));
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/saves/Wizard-1000.sav"));
    }

    #[test]
    fn test_savedir_filename_without_uid() {
        let p = savedir_filename(Path::new("/saves"), "bones", "", "03o", None);
        assert_eq!(p, PathBuf::from("/saves/bones.03o"));
    }

    #[test]
    fn test_unsafe_chars_stripped_and_clamped() {
        let p = savedir_filename(Path::new("."), "a/b\\c:d e", "", "sav", None);
        assert_eq!(p, PathBuf::from("./abcde.sav"));

        let long = "x".repeat(FILE_NAME_LEN + 20);
        let p = savedir_filename(Path::new("."), &long, "", "sav", None);
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), FILE_NAME_LEN + 4);
    }

    #[test]
    fn test_is_save_file_name() {
        assert!(is_save_file_name("Wizard-1000.sav", Some(1000), "sav"));
        assert!(!is_save_file_name("Wizard-1000.sav", Some(1001), "sav"));
        assert!(!is_save_file_name("-1000.sav", Some(1000), "sav")); // empty prefix
        assert!(is_save_file_name("Minotaur.sav", None, "sav"));
        assert!(!is_save_file_name("Minotaur.st", None, "sav"));
    }

    #[test]
    fn test_datafile_path_walks_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_path_buf();
        create_dirs(&base.join("dat")).unwrap();
        std::fs::write(base.join("dat/descript.txt"), b"x").unwrap();
        std::fs::write(base.join("descript.txt"), b"y").unwrap();

        let found = datafile_path("descript.txt", &[base.clone()], &["dat", ""]).unwrap();
        assert_eq!(found, base.join("dat/descript.txt"));

        assert!(datafile_path("missing.txt", &[base], &["dat", ""]).is_none());
    }

    #[test]
    fn test_check_dir_creates_missing_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("saves/deep/down");
        assert!(check_dir("Save directory", &dir, true));
        assert!(dir_exists(&dir));
    }
}
