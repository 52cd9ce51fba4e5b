use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sigma::Engine;
use tempfile::TempDir;

/// Template files and a cache directory that are removed on drop.
pub struct Files {
    root: TempDir,
    cache: TempDir,
}

impl Files {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            cache: tempfile::tempdir().unwrap(),
        }
    }

    /// Returns an engine reading from the template root, with caching
    /// enabled.
    pub fn engine(&self) -> Engine<'static> {
        let mut engine = Engine::new();
        engine.set_root(self.root());
        engine.set_cache_dir(self.cache()).unwrap();
        engine
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn cache(&self) -> &Path {
        self.cache.path()
    }

    #[track_caller]
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    /// Returns the path of the cache file for a template.
    pub fn cached(&self, name: &str) -> PathBuf {
        self.cache().join(format!("{}.it", name.replace('/', "__")))
    }

    #[track_caller]
    pub fn modified(&self, path: &Path) -> SystemTime {
        fs::metadata(path).unwrap().modified().unwrap()
    }

    #[track_caller]
    pub fn set_modified(&self, path: &Path, time: SystemTime) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    /// Returns the time `secs` after the epoch.
    pub fn time(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }
}
