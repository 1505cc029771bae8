use std::collections::BTreeMap;
use std::env;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ExecError;

/// Environment variables and working directory threaded through evaluation.
///
/// Sequential steps share one context, so a `cd` or `NAME=value` leaf is
/// visible to everything evaluated after it. Forked branches get a clone.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    vars: BTreeMap<String, String>,
    cwd: PathBuf,
}

impl ExecutionContext {
    /// Empty environment rooted at `cwd`.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        ExecutionContext {
            vars: BTreeMap::new(),
            cwd: cwd.into(),
        }
    }

    /// Snapshot of the current process environment and working directory.
    /// Variables whose name or value is not valid UTF-8 are left out; they
    /// still reach children because syncing never removes variables.
    pub fn from_process() -> io::Result<Self> {
        let vars = env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Ok(ExecutionContext {
            vars,
            cwd: env::current_dir()?,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Binds `NAME=value`, splitting on the first `=`. Returns false without
    /// touching the context when either side is empty.
    pub fn assign(&mut self, word: &str) -> bool {
        match word.split_once('=') {
            Some((name, value)) if !name.is_empty() && !value.is_empty() => {
                self.set(name, value);
                true
            }
            _ => false,
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn set_cwd(&mut self, dir: PathBuf) {
        if let Some(old) = self.cwd.to_str().map(str::to_string) {
            self.set("OLDPWD", &old);
        }
        if let Some(new) = dir.to_str() {
            self.set("PWD", new);
        }
        self.cwd = dir;
    }

    /// Interprets `path` relative to the context's working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.cwd.join(path)
    }

    /// Exports every variable into the real process environment and enters
    /// the working directory.
    ///
    /// # Safety
    ///
    /// Mutates the process environment, so no other thread may be running.
    /// Call it only in a freshly forked child.
    pub(crate) unsafe fn sync_to_process(&self) -> Result<(), ExecError> {
        for (key, value) in &self.vars {
            if env::var(key).ok().as_deref() != Some(value.as_str()) {
                // SAFETY: single-threaded per the caller's contract.
                unsafe { env::set_var(key, value) };
            }
        }
        nix::unistd::chdir(&self.cwd).map_err(|source| ExecError::WorkingDir {
            path: self.cwd.clone(),
            source,
        })
    }
}
