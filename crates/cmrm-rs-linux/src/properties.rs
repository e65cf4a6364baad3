// crates/cmrm-rs-linux/src/properties.rs

//! File-backed host property store.
//!
//! One `key=value` pair per line, namespaced by instance id so several
//! daemon instances can share one file. Writes rewrite the file through a
//! temporary sibling and a rename, so a crash never leaves a half-written
//! store behind.

use cmrm_rs::hal::PropertyStore;
use log::warn;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct FileProperties {
    path: PathBuf,
    prefix: String,
    values: BTreeMap<String, String>,
}

impl FileProperties {
    pub fn open(path: &Path, instance_id: u32) -> Self {
        let mut values = BTreeMap::new();
        match fs::read_to_string(path) {
            Ok(text) => {
                for line in text.lines() {
                    if let Some((key, value)) = line.split_once('=') {
                        values.insert(key.to_string(), value.to_string());
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("cannot read property store {}: {}", path.display(), err),
        }
        Self {
            path: path.to_path_buf(),
            prefix: format!("inst{}.", instance_id),
            values,
        }
    }

    fn flush(&self) {
        let mut text = String::new();
        for (key, value) in &self.values {
            text.push_str(key);
            text.push('=');
            text.push_str(value);
            text.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        let result = fs::write(&tmp, text).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(err) = result {
            warn!("cannot persist property store {}: {}", self.path.display(), err);
        }
    }
}

impl PropertyStore for FileProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(&format!("{}{}", self.prefix, key)).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(format!("{}{}", self.prefix, key), value.to_string());
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props");

        let mut store = FileProperties::open(&path, 0);
        assert_eq!(store.get("reboot_counter"), None);
        store.set("reboot_counter", "2");

        let store = FileProperties::open(&path, 0);
        assert_eq!(store.get("reboot_counter").as_deref(), Some("2"));
    }

    #[test]
    fn instances_are_namespaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props");

        let mut store0 = FileProperties::open(&path, 0);
        store0.set("reboot_counter", "1");

        let store1 = FileProperties::open(&path, 1);
        assert_eq!(store1.get("reboot_counter"), None);
    }
}
