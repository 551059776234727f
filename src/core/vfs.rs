//! In-memory-addressed, disk-backed virtual filesystem (§3 "VFS node").
//!
//! The VFS is the single seam through which every other subsystem touches
//! storage — `MerkleEngine`, `WorkflowSession`'s viewport link, and the
//! kernel's shell builtins all go through here, never through bare
//! `std::fs` calls, so path canonicalization, symlink-cycle limits, and
//! change-event emission are enforced in exactly one place.
//!
//! Nodes are backed directly by a real directory tree (files, directories,
//! and real symlinks) rather than held purely in RAM, because the session
//! tree is an *on-disk* provenance contract (§6) that other tools must be
//! able to `cd` into. "Virtual" here means: every path is resolved and
//! validated against the VFS root before it ever reaches the OS, and lazy
//! content generators can materialize a file's bytes on first read without
//! the caller knowing whether the content was ever written to disk.

use crate::core::error::CalypsoError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

const MAX_LINK_HOPS: usize = 10;

#[derive(Debug, Clone)]
pub enum VfsEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    LinkUpdated(PathBuf),
}

pub type ContentGenerator = Box<dyn Fn() -> Vec<u8> + Send + Sync>;

/// Disk-backed VFS rooted at an absolute directory. Single-writer-per-session
/// is enforced here with a plain mutex, matching §5's "no locks, but if the
/// host breaks cooperative scheduling it must introduce one".
pub struct Vfs {
    root: PathBuf,
    write_lock: Mutex<()>,
    generators: Mutex<HashMap<PathBuf, ContentGenerator>>,
    events_tx: Sender<VfsEvent>,
}

impl Vfs {
    /// Create a VFS rooted at `root`, creating the directory if absent.
    /// Returns the event receiver the caller should drain (e.g. into the
    /// telemetry bus).
    pub fn new(root: impl Into<PathBuf>) -> Result<(Self, Receiver<VfsEvent>), CalypsoError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let root = fs::canonicalize(&root)?;
        let (events_tx, events_rx) = mpsc::channel();
        Ok((
            Vfs {
                root,
                write_lock: Mutex::new(()),
                generators: Mutex::new(HashMap::new()),
                events_tx,
            },
            events_rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a `/`-joined relative path to an absolute path inside the
    /// VFS root, rejecting `.`/`..` segments and paths that escape the root.
    pub fn resolve(&self, rel_path: &str) -> Result<PathBuf, CalypsoError> {
        let mut out = self.root.clone();
        for segment in rel_path.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(CalypsoError::PathError(format!(
                    "path segment '{segment}' is not canonical in '{rel_path}'"
                )));
            }
            out.push(segment);
        }
        Ok(out)
    }

    fn rel_of(&self, abs: &Path) -> PathBuf {
        abs.strip_prefix(&self.root).unwrap_or(abs).to_path_buf()
    }

    /// Follow symlinks (relative to each link's own parent, unless the
    /// target is absolute) up to `MAX_LINK_HOPS` before giving up.
    pub fn resolve_through_links(&self, rel_path: &str) -> Result<PathBuf, CalypsoError> {
        let mut current = self.resolve(rel_path)?;
        for _ in 0..MAX_LINK_HOPS {
            if !current.is_symlink() {
                return Ok(current);
            }
            let target = fs::read_link(&current)?;
            current = if target.is_absolute() {
                target
            } else {
                current
                    .parent()
                    .unwrap_or(&self.root)
                    .join(target)
            };
        }
        Err(CalypsoError::PathError(format!(
            "symlink cycle exceeded {MAX_LINK_HOPS} hops resolving '{rel_path}'"
        )))
    }

    pub fn exists(&self, rel_path: &str) -> bool {
        self.resolve(rel_path)
            .map(|p| p.exists() || p.is_symlink())
            .unwrap_or(false)
    }

    pub fn is_dir(&self, rel_path: &str) -> bool {
        self.resolve(rel_path).map(|p| p.is_dir()).unwrap_or(false)
    }

    pub fn create_dir_all(&self, rel_path: &str) -> Result<(), CalypsoError> {
        let _guard = self.write_lock.lock().unwrap();
        let abs = self.resolve(rel_path)?;
        fs::create_dir_all(&abs)?;
        Ok(())
    }

    /// Write bytes to a file, creating parent directories as needed, and
    /// emit a `Created`/`Modified` change event.
    pub fn write_file(&self, rel_path: &str, content: &[u8]) -> Result<(), CalypsoError> {
        let _guard = self.write_lock.lock().unwrap();
        let abs = self.resolve(rel_path)?;
        let existed = abs.exists();
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&abs, content)?;
        let _ = self.events_tx.send(if existed {
            VfsEvent::Modified(abs)
        } else {
            VfsEvent::Created(self.resolve(rel_path)?)
        });
        Ok(())
    }

    /// Register a lazy content generator for a path that may not yet exist
    /// on disk. `read_file` falls through to the generator on first read
    /// when the underlying file is absent.
    pub fn register_generator(&self, rel_path: &str, generator: ContentGenerator) {
        if let Ok(abs) = self.resolve(rel_path) {
            self.generators.lock().unwrap().insert(abs, generator);
        }
    }

    pub fn read_file(&self, rel_path: &str) -> Result<Vec<u8>, CalypsoError> {
        let abs = self.resolve_through_links(rel_path)?;
        if abs.exists() {
            return Ok(fs::read(&abs)?);
        }
        if let Some(generator) = self.generators.lock().unwrap().get(&abs) {
            return Ok(generator());
        }
        Err(CalypsoError::PathError(format!(
            "no such file: {rel_path}"
        )))
    }

    pub fn read_to_string(&self, rel_path: &str) -> Result<String, CalypsoError> {
        let bytes = self.read_file(rel_path)?;
        String::from_utf8(bytes)
            .map_err(|e| CalypsoError::PathError(format!("non-utf8 content at {rel_path}: {e}")))
    }

    /// Create (or replace) a symlink at `link_rel_path` pointing at
    /// `target_rel_path`, both relative to the VFS root. Targets are stored
    /// relative to the link's parent, per §3.
    pub fn symlink(&self, link_rel_path: &str, target_rel_path: &str) -> Result<(), CalypsoError> {
        let _guard = self.write_lock.lock().unwrap();
        let link_abs = self.resolve(link_rel_path)?;
        let target_abs = self.resolve(target_rel_path)?;
        if let Some(parent) = link_abs.parent() {
            fs::create_dir_all(parent)?;
        }
        if link_abs.is_symlink() || link_abs.exists() {
            fs::remove_file(&link_abs)?;
        }
        let link_parent = link_abs.parent().unwrap_or(&self.root);
        let relative_target = pathdiff(&target_abs, link_parent);
        symlink_platform(&relative_target, &link_abs)?;
        let _ = self.events_tx.send(VfsEvent::LinkUpdated(link_abs));
        Ok(())
    }

    pub fn remove(&self, rel_path: &str) -> Result<(), CalypsoError> {
        let _guard = self.write_lock.lock().unwrap();
        let abs = self.resolve(rel_path)?;
        if abs.is_symlink() || abs.is_file() {
            fs::remove_file(&abs)?;
        } else if abs.is_dir() {
            fs::remove_dir_all(&abs)?;
        }
        let _ = self.events_tx.send(VfsEvent::Removed(abs));
        Ok(())
    }

    /// List immediate children of a folder, excluding permanent session
    /// entries the caller passes in `keep` (used by the viewport-link
    /// cleanup in `workflow_session`).
    pub fn list_children(&self, rel_path: &str) -> Result<Vec<String>, CalypsoError> {
        let abs = self.resolve(rel_path)?;
        if !abs.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&abs)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    /// Recursively find every file under `rel_path` whose relative path
    /// ends with `.json`, returning VFS-relative path strings.
    pub fn find_json_files(&self, rel_path: &str) -> Result<Vec<String>, CalypsoError> {
        let abs = self.resolve(rel_path)?;
        let mut out = Vec::new();
        self.walk_json(&abs, &mut out)?;
        Ok(out)
    }

    fn walk_json(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), CalypsoError> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk_json(&path, out)?;
            } else if path.extension().is_some_and(|ext| ext == "json") {
                out.push(self.rel_of(&path).to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

fn pathdiff(target: &Path, base: &Path) -> PathBuf {
    let target_components: Vec<_> = target.components().collect();
    let base_components: Vec<_> = base.components().collect();
    let common = target_components
        .iter()
        .zip(base_components.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..base_components.len() {
        out.push("..");
    }
    for component in &target_components[common..] {
        out.push(component.as_os_str());
    }
    out
}

#[cfg(unix)]
fn symlink_platform(target: &Path, link: &Path) -> Result<(), CalypsoError> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(not(unix))]
fn symlink_platform(target: &Path, link: &Path) -> Result<(), CalypsoError> {
    std::os::windows::fs::symlink_dir(target, link)
        .or_else(|_| fs::write(link, target.to_string_lossy().as_bytes()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (vfs, _rx) = Vfs::new(dir.path()).unwrap();
        vfs.write_file("a/b/c.json", b"{\"x\":1}").unwrap();
        assert_eq!(vfs.read_to_string("a/b/c.json").unwrap(), "{\"x\":1}");
    }

    #[test]
    fn rejects_dot_dot_segments() {
        let dir = tempfile::tempdir().unwrap();
        let (vfs, _rx) = Vfs::new(dir.path()).unwrap();
        assert!(vfs.resolve("../escape").is_err());
    }

    #[test]
    fn lazy_generator_supplies_missing_content() {
        let dir = tempfile::tempdir().unwrap();
        let (vfs, _rx) = Vfs::new(dir.path()).unwrap();
        vfs.register_generator("generated.txt", Box::new(|| b"hello".to_vec()));
        assert_eq!(vfs.read_file("generated.txt").unwrap(), b"hello");
    }

    #[test]
    fn symlink_points_at_relative_target() {
        let dir = tempfile::tempdir().unwrap();
        let (vfs, _rx) = Vfs::new(dir.path()).unwrap();
        vfs.write_file("stage/meta/stage.json", b"{}").unwrap();
        vfs.symlink("stage_latest", "stage/meta").unwrap();
        let resolved = vfs.resolve_through_links("stage_latest").unwrap();
        assert!(resolved.ends_with("stage/meta"));
    }

    #[test]
    fn write_emits_change_event() {
        let dir = tempfile::tempdir().unwrap();
        let (vfs, rx) = Vfs::new(dir.path()).unwrap();
        vfs.write_file("x.json", b"{}").unwrap();
        match rx.try_recv().unwrap() {
            VfsEvent::Created(_) => {}
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn find_json_files_walks_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let (vfs, _rx) = Vfs::new(dir.path()).unwrap();
        vfs.write_file("a/meta/a.json", b"{}").unwrap();
        vfs.write_file("a/b/meta/b.json", b"{}").unwrap();
        vfs.write_file("a/b/note.txt", b"ignored").unwrap();
        let mut found = vfs.find_json_files("a").unwrap();
        found.sort();
        assert_eq!(found, vec!["a/b/meta/b.json", "a/meta/a.json"]);
    }
}
