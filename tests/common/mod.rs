use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;

/// A scratch repository with the engine initialized.
pub struct Repo {
    pub dir: tempfile::TempDir,
}

impl Repo {
    pub fn init() -> Repo {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repo { dir };
        repo.rinne(&["init"]).assert().success();
        repo
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// A `rinne` invocation rooted at the workspace.
    pub fn rinne(&self, args: &[&str]) -> Command {
        let mut cmd = Command::cargo_bin("rinne").unwrap();
        cmd.current_dir(self.root()).args(args);
        cmd
    }

    pub fn write(&self, rel: &str, contents: &[u8]) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    pub fn read(&self, rel: &str) -> Vec<u8> {
        fs::read(self.root().join(rel)).unwrap()
    }

    /// Snapshot ids in the given space, ascending.
    pub fn snapshot_ids(&self, space: &str) -> Vec<String> {
        let dir = self
            .root()
            .join(".rinne/snapshots/space")
            .join(space);
        let mut ids: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().into_string().unwrap())
            .collect();
        ids.sort();
        ids
    }

    pub fn manifest_path(&self, id: &str) -> PathBuf {
        self.root()
            .join(".rinne/store/manifests")
            .join(format!("{id}.json"))
    }

    /// All chunk files currently in the store.
    pub fn chunk_files(&self) -> Vec<PathBuf> {
        let mut chunks = Vec::new();
        let store = self.root().join(".rinne/store");
        for shard1 in fs::read_dir(&store).unwrap().filter_map(|e| e.ok()) {
            let name = shard1.file_name();
            let name = name.to_string_lossy();
            if name.len() != 2 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }
            for shard2 in fs::read_dir(shard1.path()).unwrap().filter_map(|e| e.ok()) {
                for file in fs::read_dir(shard2.path()).unwrap().filter_map(|e| e.ok()) {
                    chunks.push(file.path());
                }
            }
        }
        chunks
    }
}
