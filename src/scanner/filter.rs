//! Ignore-pattern parsing and matching.
//!
//! Patterns use shell-glob wildcards (`*`, `?`, `[...]`) and are matched
//! unanchored against path components: `build` ignores any file or
//! directory named `build` at any depth, `docs/*.py` ignores matching files
//! under any `docs` directory. A trailing `/` restricts a pattern to
//! directories (and so to everything beneath them). A leading `/` anchors it
//! at the repository root.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::{Config, Error, Result};

/// Compiled ignore rules.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    any: GlobSet,
    dirs_only: GlobSet,
    anchored_any: GlobSet,
    anchored_dirs_only: GlobSet,
    patterns: Vec<String>,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            any: GlobSet::empty(),
            dirs_only: GlobSet::empty(),
            anchored_any: GlobSet::empty(),
            anchored_dirs_only: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }
}

impl IgnoreRules {
    /// Rules that ignore nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse newline-delimited patterns.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a pattern is not a valid glob.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_patterns(text.lines())
    }

    /// Compile patterns given one per item, with the same syntax as [`parse`](Self::parse).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a pattern is not a valid glob.
    pub fn from_patterns<I, S>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut any = GlobSetBuilder::new();
        let mut dirs_only = GlobSetBuilder::new();
        let mut anchored_any = GlobSetBuilder::new();
        let mut anchored_dirs_only = GlobSetBuilder::new();
        let mut patterns = Vec::new();

        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (body, dir_only) = match line.strip_suffix('/') {
                Some(body) => (body, true),
                None => (line, false),
            };
            let (body, anchored) = match body.strip_prefix('/') {
                Some(body) => (body, true),
                None => (body, false),
            };
            if body.is_empty() {
                continue;
            }

            let glob = GlobBuilder::new(body)
                .literal_separator(true)
                .build()
                .map_err(|e| Error::config(format!("invalid ignore pattern '{line}': {e}")))?;

            match (anchored, dir_only) {
                (false, false) => any.add(glob),
                (false, true) => dirs_only.add(glob),
                (true, false) => anchored_any.add(glob),
                (true, true) => anchored_dirs_only.add(glob),
            };
            patterns.push(line.to_string());
        }

        let build = |builder: GlobSetBuilder| {
            builder
                .build()
                .map_err(|e| Error::config(format!("failed to compile ignore patterns: {e}")))
        };

        Ok(Self {
            any: build(any)?,
            dirs_only: build(dirs_only)?,
            anchored_any: build(anchored_any)?,
            anchored_dirs_only: build(anchored_dirs_only)?,
            patterns,
        })
    }

    /// Load the configured ignore file plus inline patterns.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the ignore file cannot be read or a
    /// pattern is invalid.
    pub fn load(config: &Config) -> Result<Self> {
        let mut lines: Vec<String> = Vec::new();
        if let Some(path) = config.resolved_ignore_file() {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                Error::config(format!("cannot read ignore file {}: {e}", path.display()))
            })?;
            lines.extend(text.lines().map(str::to_string));
            tracing::debug!(path = %path.display(), "Loaded ignore file");
        }
        lines.extend(config.ignore_patterns.iter().cloned());
        Self::from_patterns(lines)
    }

    /// Number of active patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Active patterns as written.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `rel_path` (relative to the root, `/`-separated) is ignored.
    ///
    /// Every ancestor component of `rel_path` is a directory; the last
    /// component is a directory only when `is_dir` is set.
    #[must_use]
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        if self.is_empty() {
            return false;
        }
        let components: Vec<&str> = rel_path.split('/').filter(|c| !c.is_empty()).collect();
        let last = components.len().saturating_sub(1);

        for end in 0..components.len() {
            let component_is_dir = end < last || is_dir;
            for start in 0..=end {
                let candidate = components[start..=end].join("/");
                if self.any.is_match(&candidate)
                    || (component_is_dir && self.dirs_only.is_match(&candidate))
                {
                    return true;
                }
                if start == 0
                    && (self.anchored_any.is_match(&candidate)
                        || (component_is_dir && self.anchored_dirs_only.is_match(&candidate)))
                {
                    return true;
                }
            }
        }
        false
    }
}
