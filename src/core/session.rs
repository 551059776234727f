//! Session root resolution (§3 "SessionPaths", generalized from the
//! teacher's `Store`/`StoreKind` dual-root concept): where a workflow
//! session's VFS lives on disk.
//!
//! A session root is `<home>/<user>/projects/<persona>/<session_id>/`, with
//! `provenance/` underneath it holding the topology-mirroring artifact tree
//! that `core::session_paths::SessionPaths` addresses. Unlike the teacher's
//! `StoreKind::User`/`StoreKind::Repo` split, there is a single root kind
//! here — every session is a self-contained, session-id-addressed workspace.

use std::env;
use std::path::PathBuf;

pub const PROVENANCE_DIR: &str = "provenance";

/// Handle to one workflow session's on-disk root.
#[derive(Debug, Clone)]
pub struct SessionRoot {
    pub persona: String,
    pub session_id: String,
    pub root: PathBuf,
}

impl SessionRoot {
    /// Build a session root under `base` (typically the user's home
    /// directory) at `<base>/<user>/projects/<persona>/<session_id>`.
    pub fn new(base: impl Into<PathBuf>, user: &str, persona: &str, session_id: &str) -> Self {
        let root = base
            .into()
            .join(user)
            .join("projects")
            .join(persona)
            .join(session_id);
        SessionRoot {
            persona: persona.to_string(),
            session_id: session_id.to_string(),
            root,
        }
    }

    /// Build a session root under the process's actual home directory,
    /// falling back to `.` when `HOME` is unset (e.g. minimal containers).
    pub fn under_home(user: &str, persona: &str, session_id: &str) -> Self {
        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(home, user, persona, session_id)
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// The VFS-relative provenance directory name, used as the
    /// `root_rel` argument to `SessionPaths::new`.
    pub fn provenance_root(&self) -> &'static str {
        PROVENANCE_DIR
    }
}
