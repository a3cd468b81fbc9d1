//! Version-control change listing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};
use tokio::process::Command;

use crate::{Error, Result};

/// Paths changed since a reference, relative to the repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VcsChanges {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl VcsChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

/// Lists changes recorded by a version-control system.
pub trait ChangeLister: Send + Sync {
    /// Identifier of the current revision.
    fn head(&self) -> BoxFuture<'_, Result<String>>;

    /// Paths added, modified or deleted in the working tree since `reference`.
    fn changes_since<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Result<VcsChanges>>;
}

/// [`ChangeLister`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitChangeLister {
    root: PathBuf,
}

impl GitChangeLister {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// A lister for `root` if it is the top of a git work tree.
    #[must_use]
    pub fn detect(root: &Path) -> Option<Self> {
        root.join(".git").exists().then(|| Self::new(root))
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Vcs(format!("failed to run git {}: {e}", args.join(" "))))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Vcs(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn head_inner(&self) -> Result<String> {
        Ok(self.git(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    async fn changes_inner(&self, reference: &str) -> Result<VcsChanges> {
        let diff = self
            .git(&["diff", "--name-status", "--no-renames", reference, "--"])
            .await?;
        let mut changes = parse_name_status(&diff);

        let untracked = self
            .git(&["ls-files", "--others", "--exclude-standard"])
            .await?;
        changes.added.extend(
            untracked
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
        tracing::debug!(reference, changes = changes.len(), "Listed git changes");
        Ok(changes)
    }
}

impl ChangeLister for GitChangeLister {
    fn head(&self) -> BoxFuture<'_, Result<String>> {
        self.head_inner().boxed()
    }

    fn changes_since<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Result<VcsChanges>> {
        self.changes_inner(reference).boxed()
    }
}

/// Parse `git diff --name-status` output.
///
/// Renames and copies (when present) count as deleting the old path and
/// adding the new one.
#[must_use]
pub fn parse_name_status(output: &str) -> VcsChanges {
    let mut changes = VcsChanges::default();
    for line in output.lines() {
        let mut fields = line.split('\t');
        let (Some(status), Some(path)) = (fields.next(), fields.next()) else {
            continue;
        };
        let path = path.to_string();
        match status.chars().next() {
            Some('A') => {
                changes.added.insert(path);
            }
            Some('D') => {
                changes.deleted.insert(path);
            }
            Some('R') => {
                changes.deleted.insert(path);
                if let Some(new_path) = fields.next() {
                    changes.added.insert(new_path.to_string());
                }
            }
            Some('C') => {
                if let Some(new_path) = fields.next() {
                    changes.added.insert(new_path.to_string());
                }
            }
            Some(_) => {
                changes.modified.insert(path);
            }
            None => {}
        }
    }
    changes
}
