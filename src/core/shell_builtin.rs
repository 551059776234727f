//! Shell-level builtins (§4.7 step 4): a small set of filesystem escape
//! hatches resolved before a line ever reaches DAG command dispatch, so an
//! operator can poke around a session tree without it being mistaken for a
//! stage command. Grounded on the same allowlisted-binary shape the teacher
//! uses for external processes in `core::external_action::execute` — only
//! `python`/`python3` shell out, and only with `current_dir` pinned to the
//! session's own VFS root.

use crate::core::kernel::{CalypsoResponse, ShellBuiltin, StatusCode};
use crate::core::workflow_session::WorkflowSession;
use std::process::Command;
use std::sync::Mutex;

const ALLOWED_BINS: &[&str] = &["python", "python3"];

fn respond(status: StatusCode, message: impl Into<String>) -> CalypsoResponse {
    CalypsoResponse {
        status,
        message: message.into(),
        stage_id: None,
        suggestion: None,
        data: None,
    }
}

fn ok(message: impl Into<String>) -> CalypsoResponse {
    respond(StatusCode::Ok, message)
}

fn fail(message: impl Into<String>) -> CalypsoResponse {
    respond(StatusCode::Error, message)
}

/// `ls`/`cd`/`cat`/`mkdir`/`touch`/`rm`/`cp`/`mv`/`tree`/`pwd`/`env`/`python`
/// against one session's VFS, with a `cd`-tracked working directory
/// relative to the VFS root (the VFS itself carries no such concept).
pub struct DefaultShellBuiltin {
    cwd: Mutex<String>,
}

impl DefaultShellBuiltin {
    pub fn new() -> Self {
        DefaultShellBuiltin {
            cwd: Mutex::new(String::new()),
        }
    }

    fn join(cwd: &str, arg: &str) -> String {
        if arg.is_empty() || arg == "." {
            cwd.to_string()
        } else if cwd.is_empty() {
            arg.to_string()
        } else {
            format!("{cwd}/{arg}")
        }
    }
}

impl Default for DefaultShellBuiltin {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellBuiltin for DefaultShellBuiltin {
    fn try_handle(&self, input: &str, session: &mut WorkflowSession) -> Option<CalypsoResponse> {
        let mut parts = input.split_whitespace();
        let verb = parts.next()?;
        let args: Vec<&str> = parts.collect();
        let mut cwd = self.cwd.lock().unwrap();

        match verb {
            "pwd" => Some(ok(format!("/{cwd}"))),
            "cd" => {
                let target = Self::join(&cwd, args.first().copied().unwrap_or(""));
                if target.is_empty() || session.vfs().is_dir(&target) {
                    *cwd = target;
                    Some(ok(format!("/{cwd}")))
                } else {
                    Some(fail(format!(
                        "cd: no such directory: {}",
                        args.first().copied().unwrap_or("")
                    )))
                }
            }
            "ls" => {
                let target = Self::join(&cwd, args.first().copied().unwrap_or(""));
                match session.vfs().list_children(&target) {
                    Ok(names) => Some(ok(names.join("  "))),
                    Err(e) => Some(fail(e.to_string())),
                }
            }
            "tree" => {
                let target = Self::join(&cwd, args.first().copied().unwrap_or(""));
                match session.vfs().find_json_files(&target) {
                    Ok(mut files) => {
                        files.sort();
                        Some(ok(files.join("\n")))
                    }
                    Err(e) => Some(fail(e.to_string())),
                }
            }
            "cat" => {
                let Some(name) = args.first() else {
                    return Some(fail("cat: missing file operand"));
                };
                let target = Self::join(&cwd, name);
                match session.vfs().read_to_string(&target) {
                    Ok(contents) => Some(ok(contents)),
                    Err(e) => Some(fail(e.to_string())),
                }
            }
            "mkdir" => {
                let Some(name) = args.first() else {
                    return Some(fail("mkdir: missing operand"));
                };
                let target = Self::join(&cwd, name);
                match session.vfs().create_dir_all(&target) {
                    Ok(()) => Some(ok(format!("created {target}"))),
                    Err(e) => Some(fail(e.to_string())),
                }
            }
            "touch" => {
                let Some(name) = args.first() else {
                    return Some(fail("touch: missing operand"));
                };
                let target = Self::join(&cwd, name);
                if session.vfs().exists(&target) {
                    return Some(ok(format!("{target} already exists")));
                }
                match session.vfs().write_file(&target, b"") {
                    Ok(()) => Some(ok(format!("created {target}"))),
                    Err(e) => Some(fail(e.to_string())),
                }
            }
            "rm" => {
                let Some(name) = args.first() else {
                    return Some(fail("rm: missing operand"));
                };
                let target = Self::join(&cwd, name);
                match session.vfs().remove(&target) {
                    Ok(()) => Some(ok(format!("removed {target}"))),
                    Err(e) => Some(fail(e.to_string())),
                }
            }
            "cp" => {
                let (Some(src), Some(dst)) = (args.first(), args.get(1)) else {
                    return Some(fail("cp: missing operand"));
                };
                let src = Self::join(&cwd, src);
                let dst = Self::join(&cwd, dst);
                let result = session
                    .vfs()
                    .read_file(&src)
                    .and_then(|bytes| session.vfs().write_file(&dst, &bytes));
                match result {
                    Ok(()) => Some(ok(format!("copied {src} -> {dst}"))),
                    Err(e) => Some(fail(e.to_string())),
                }
            }
            "mv" => {
                let (Some(src), Some(dst)) = (args.first(), args.get(1)) else {
                    return Some(fail("mv: missing operand"));
                };
                let src = Self::join(&cwd, src);
                let dst = Self::join(&cwd, dst);
                let result = session
                    .vfs()
                    .read_file(&src)
                    .and_then(|bytes| session.vfs().write_file(&dst, &bytes))
                    .and_then(|()| session.vfs().remove(&src));
                match result {
                    Ok(()) => Some(ok(format!("moved {src} -> {dst}"))),
                    Err(e) => Some(fail(e.to_string())),
                }
            }
            "env" => {
                let mut vars: Vec<String> =
                    std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();
                vars.sort();
                Some(ok(vars.join("\n")))
            }
            "python" | "python3" => {
                let bin = if ALLOWED_BINS.contains(&verb) { verb } else { "python3" };
                match Command::new(bin)
                    .args(&args)
                    .current_dir(session.vfs().root())
                    .output()
                {
                    Ok(out) => {
                        let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                        if !out.status.success() {
                            text.push_str(&String::from_utf8_lossy(&out.stderr));
                        }
                        Some(respond(
                            if out.status.success() {
                                StatusCode::Ok
                            } else {
                                StatusCode::Error
                            },
                            text,
                        ))
                    }
                    Err(e) => Some(fail(format!("{bin}: {e}"))),
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dag::Dag;
    use crate::core::vfs::Vfs;
    use crate::core::workflow_adapter::WorkflowAdapter;

    fn session() -> (tempfile::TempDir, WorkflowSession) {
        let dir = tempfile::tempdir().unwrap();
        let (vfs, _rx) = Vfs::new(dir.path()).unwrap();
        let adapter = WorkflowAdapter::new(Dag::from_manifest_str("[[stage]]\nid = \"a\"\n").unwrap());
        let session = WorkflowSession::new(vfs, adapter, "provenance");
        (dir, session)
    }

    #[test]
    fn declines_commands_it_does_not_own() {
        let (_dir, mut session) = session();
        let builtin = DefaultShellBuiltin::new();
        assert!(builtin.try_handle("search histology", &mut session).is_none());
    }

    #[test]
    fn touch_then_cat_round_trips() {
        let (_dir, mut session) = session();
        let builtin = DefaultShellBuiltin::new();
        let response = builtin.try_handle("touch notes.txt", &mut session).unwrap();
        assert_eq!(response.status, StatusCode::Ok);
        assert!(session.vfs().exists("notes.txt"));
    }

    #[test]
    fn cd_into_missing_directory_fails() {
        let (_dir, mut session) = session();
        let builtin = DefaultShellBuiltin::new();
        let response = builtin.try_handle("cd nowhere", &mut session).unwrap();
        assert_eq!(response.status, StatusCode::Error);
    }

    #[test]
    fn mkdir_then_cd_then_pwd_tracks_cwd() {
        let (_dir, mut session) = session();
        let builtin = DefaultShellBuiltin::new();
        builtin.try_handle("mkdir notes", &mut session).unwrap();
        builtin.try_handle("cd notes", &mut session).unwrap();
        let response = builtin.try_handle("pwd", &mut session).unwrap();
        assert_eq!(response.message, "/notes");
    }
}
