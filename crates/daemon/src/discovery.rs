use std::path::{Path, PathBuf};
use log::{debug, warn};
use walkdir::WalkDir;

use crate::store::{is_valid_profile_id, STORE_EXTENSION, STORE_PREFIX};

/// A profile store found on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreLocation {
    pub profile_id: String,
    pub path: PathBuf,
}

/// Extract the profile hash from a `profile_<hash>.db` file name
pub fn profile_id_from_path(path: &Path) -> Option<String> {
    let ext = path.extension().and_then(|s| s.to_str())?;
    if ext != STORE_EXTENSION {
        return None;
    }
    let stem = path.file_stem().and_then(|s| s.to_str())?;
    let id = stem.strip_prefix(STORE_PREFIX)?;
    if !is_valid_profile_id(id) {
        return None;
    }
    Some(id.to_string())
}

/// Scan `dir` (non-recursively) for profile stores.
///
/// Called at the start of every poll cycle, so profiles appear and vanish without a restart.
pub fn discover_stores(dir: &Path) -> Vec<StoreLocation> {
    if !dir.exists() {
        debug!("Store directory does not exist yet: {}", dir.display());
        return Vec::new();
    }

    let mut stores = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading store directory entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if let Some(profile_id) = profile_id_from_path(path) {
            stores.push(StoreLocation { profile_id, path: path.to_path_buf() });
        }
    }

    stores.sort();
    debug!("Discovered {} profile store(s) in {}", stores.len(), dir.display());
    stores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;
    use crate::store::{store_path, JobStore};
    use proptest::prelude::*;

    #[test]
    fn parses_profile_hash() {
        assert_eq!(profile_id_from_path(Path::new("/x/profile_a1b2.db")).as_deref(), Some("a1b2"));
        assert_eq!(profile_id_from_path(Path::new("/x/profile_.db")), None);
        assert_eq!(profile_id_from_path(Path::new("/x/profile_a1b2.db-journal")), None);
        assert_eq!(profile_id_from_path(Path::new("/x/settings.db")), None);
        assert_eq!(profile_id_from_path(Path::new("/x/profile_a1b2.json")), None);
    }

    #[test]
    fn finds_only_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("profile_one.db"), b"").unwrap();
        std::fs::write(dir.path().join("profile_two.db"), b"").unwrap();
        std::fs::write(dir.path().join("profile_two.db-wal"), b"").unwrap();
        std::fs::write(dir.path().join("config.toml"), b"").unwrap();
        std::fs::create_dir(dir.path().join("profile_dir.db")).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("profile_deep.db"), b"").unwrap();

        let ids: Vec<String> = discover_stores(dir.path()).into_iter().map(|s| s.profile_id).collect();
        assert_eq!(ids, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn rescan_picks_up_new_and_removed_profiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("profile_one.db"), b"").unwrap();
        assert_eq!(discover_stores(dir.path()).len(), 1);

        std::fs::write(dir.path().join("profile_two.db"), b"").unwrap();
        std::fs::remove_file(dir.path().join("profile_one.db")).unwrap();
        let found = discover_stores(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].profile_id, "two");
    }

    #[test]
    fn stores_written_by_store_path_are_discovered() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["a1b2", "home-tv", "living_room"] {
            let store = JobStore::open(store_path(dir.path(), id).unwrap()).unwrap();
            store.add(&NewJob::new(id, "Arte", "http://x", 10, 20, None)).unwrap();
        }
        assert!(store_path(dir.path(), "alice.home").is_err());

        let ids: Vec<String> = discover_stores(dir.path()).into_iter().map(|s| s.profile_id).collect();
        assert_eq!(ids, vec!["a1b2".to_string(), "home-tv".to_string(), "living_room".to_string()]);
    }

    proptest! {
        #[test]
        fn every_writable_profile_is_findable(id in "[A-Za-z0-9_.-]{0,12}") {
            if let Ok(path) = store_path(Path::new("/cfg"), &id) {
                prop_assert_eq!(profile_id_from_path(&path), Some(id));
            }
        }
    }

    #[test]
    fn missing_directory_is_empty() {
        assert!(discover_stores(Path::new("/definitely/not/here")).is_empty());
    }
}
