use std::path::{Path, PathBuf};
use chrono::{DateTime, TimeZone};
use std::fs;

use crate::error::RecorderError;

const FALLBACK_NAME: &str = "recording";

/// Replace anything outside `[A-Za-z0-9 _.-]` with `_`
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<dir>/<sanitized>_<YYYYmmdd_HHMMSS>.<container>`, with `_1`, `_2`, ... appended
/// to the stem while that path exists on disk or `in_use` claims it.
pub fn output_path<Tz, F>(dir: &Path, name: &str, when: &DateTime<Tz>, container: &str, in_use: F) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
    F: Fn(&Path) -> bool,
{
    let stem = format!("{}_{}", sanitize_name(name), when.format("%Y%m%d_%H%M%S"));
    let ext = container.trim_start_matches('.');
    let taken = |path: &Path| path.exists() || in_use(path);

    let mut candidate = dir.join(format!("{stem}.{ext}"));
    let mut n = 1u32;
    while taken(&candidate) {
        candidate = dir.join(format!("{stem}_{n}.{ext}"));
        n += 1;
    }
    candidate
}

/// Create the directory a recording is about to be written into
pub fn ensure_parent_dir(path: &Path) -> Result<(), RecorderError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| RecorderError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

/// Size of the output file, or `None` if it does not exist
pub fn output_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_name("News/Weather: 22:00"), "News_Weather_ 22_00");
        assert_eq!(sanitize_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_name("   "), "recording");
        assert_eq!(sanitize_name("Café Olé"), "Café Olé");
    }

    #[test]
    fn output_path_layout() {
        let when = Utc.with_ymd_and_hms(2024, 5, 4, 21, 3, 9).unwrap();
        let path = output_path(Path::new("/rec"), "Late Show", &when, "ts", |_| false);
        assert_eq!(path, PathBuf::from("/rec/Late Show_20240504_210309.ts"));

        let dotted = output_path(Path::new("/rec"), "x", &when, ".mkv", |_| false);
        assert_eq!(dotted.extension().and_then(|e| e.to_str()), Some("mkv"));
    }

    #[test]
    fn output_path_skips_existing_and_claimed_files() {
        let dir = tempfile::tempdir().unwrap();
        let when = Utc.with_ymd_and_hms(2024, 5, 4, 21, 3, 9).unwrap();
        let first = output_path(dir.path(), "News", &when, "ts", |_| false);
        fs::write(&first, b"data").unwrap();

        let second = output_path(dir.path(), "News", &when, "ts", |_| false);
        assert_eq!(second, dir.path().join("News_20240504_210309_1.ts"));

        let third = output_path(dir.path(), "News", &when, "ts", |p| p == second);
        assert_eq!(third, dir.path().join("News_20240504_210309_2.ts"));
    }

    #[test]
    fn ensure_parent_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b").join("out.ts");
        ensure_parent_dir(&target).unwrap();
        assert!(target.parent().unwrap().is_dir());
    }

    #[test]
    fn output_size_reports_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ts");
        assert_eq!(output_size(&path), None);
        fs::write(&path, b"").unwrap();
        assert_eq!(output_size(&path), Some(0));
        fs::write(&path, b"abc").unwrap();
        assert_eq!(output_size(&path), Some(3));
    }

    proptest! {
        #[test]
        fn sanitized_names_stay_in_one_directory(name in ".{0,40}") {
            let clean = sanitize_name(&name);
            prop_assert!(!clean.is_empty());
            prop_assert!(!clean.contains('/'));
            prop_assert!(!clean.contains('\\'));
            prop_assert!(clean != ".." && clean != ".");
        }
    }
}
