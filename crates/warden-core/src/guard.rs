//! Path and command validation.
//!
//! Pure, synchronous and deterministic. This is a second line of defense in
//! front of the sandbox, not an isolation mechanism of its own: paths are
//! normalized lexically (the filesystem is never consulted) and commands are
//! matched against a denylist.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::GuardConfig;
use crate::error::WardenError;

/// Absolute prefixes that no path may reference.
pub const SYSTEM_PREFIXES: &[&str] = &["/etc", "/proc", "/sys", "/dev", "/root", "/boot"];

/// Device files that commands may mention (output sinks, entropy).
const ALLOWED_DEVICES: &[&str] = &[
    "/dev/null",
    "/dev/stdout",
    "/dev/stderr",
    "/dev/zero",
    "/dev/random",
    "/dev/urandom",
];

/// `(label, regex)` pairs matched against the space-joined command text.
const DENIED_COMMANDS: &[(&str, &str)] = &[
    (
        "recursive force delete",
        r"(?i)\brm\s+(?:-\S+\s+)*-[a-z]*(?:r[a-z]*f|f[a-z]*r)[a-z]*\b",
    ),
    (
        "recursive force delete",
        r"(?i)\brm\s+(?:\S+\s+)*(?:-r|--recursive)\s+(?:\S+\s+)*(?:-f|--force)\b",
    ),
    (
        "recursive force delete",
        r"(?i)\brm\s+(?:\S+\s+)*(?:-f|--force)\s+(?:\S+\s+)*(?:-r|--recursive)\b",
    ),
    (
        "privilege escalation",
        r"(?:^|[\s;&|(])(?:sudo|su|doas|pkexec)(?:\s|$)",
    ),
    ("filesystem format", r"\bmkfs(?:\.\w+)?\b"),
    ("raw device write", r"\bdd\s+.*\bof=/dev/"),
    (
        "fork bomb",
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    ),
    (
        "host power control",
        r"(?:^|[\s;&|(])(?:shutdown|reboot|halt|poweroff|systemctl)(?:\s|$)",
    ),
    (
        "pipe download to shell",
        r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:sh|bash|zsh|dash)\b",
    ),
    ("world-writable root", r"\bchmod\s+(?:-\S+\s+)*0?777\s+/(?:\s|$)"),
    ("ownership change of root", r"\bchown\s+(?:-\S+\s+)*\S+\s+/(?:\s|$)"),
    (
        "namespace escape",
        r"(?:^|[\s;&|(])(?:mount|umount|chroot|nsenter|unshare)(?:\s|$)",
    ),
    (
        "system configuration write",
        r"(?:>|>>)\s*/(?:etc|boot|sys|proc)/",
    ),
    ("signal to init", r"\bkill\s+(?:-\S+\s+)*1(?:\s|$)"),
];

/// Why the guard refused a path or command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardViolation {
    #[error("empty path")]
    EmptyPath,

    #[error("path contains a NUL byte")]
    NulByte,

    #[error("parent-directory traversal in {path:?}")]
    ParentTraversal { path: String },

    #[error("workspace root {root:?} must be an absolute, normalized path")]
    InvalidWorkspaceRoot { root: String },

    #[error("{path:?} references system directory {prefix}")]
    SystemPath { path: String, prefix: String },

    #[error("{path:?} resolves outside workspace {root:?}")]
    OutsideWorkspace { path: String, root: String },

    #[error("empty command")]
    EmptyCommand,

    #[error("command denied: {label}")]
    DeniedCommand { label: String },

    #[error("command references forbidden path {token:?}")]
    ForbiddenPathInCommand { token: String },
}

impl From<GuardViolation> for WardenError {
    fn from(v: GuardViolation) -> Self {
        WardenError::SecurityViolation {
            reason: v.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct DeniedPattern {
    label: String,
    regex: Regex,
}

/// Compiled guard rules.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    denied: Vec<DeniedPattern>,
    forbidden_prefixes: Vec<PathBuf>,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl GuardPolicy {
    /// Built-in denylist and system prefixes.
    pub fn standard() -> Self {
        let denied = DENIED_COMMANDS
            .iter()
            .filter_map(|(label, pattern)| {
                Regex::new(pattern).ok().map(|regex| DeniedPattern {
                    label: (*label).to_string(),
                    regex,
                })
            })
            .collect();
        Self {
            denied,
            forbidden_prefixes: SYSTEM_PREFIXES.iter().map(PathBuf::from).collect(),
        }
    }

    /// Standard rules extended with configured patterns and prefixes.
    pub fn from_config(config: &GuardConfig) -> Result<Self, regex::Error> {
        let mut policy = Self::standard();
        for pattern in &config.denied_command_patterns {
            policy.denied.push(DeniedPattern {
                label: format!("configured pattern {pattern}"),
                regex: Regex::new(pattern)?,
            });
        }
        policy.forbidden_prefixes.extend(
            config
                .forbidden_path_prefixes
                .iter()
                .map(|p| lexical_normalize(Path::new(p))),
        );
        Ok(policy)
    }

    /// Validate `path` against `workspace_root` and return its normalized
    /// absolute form. Relative paths resolve against the root.
    pub fn check_path(&self, path: &str, workspace_root: &str) -> Result<PathBuf, GuardViolation> {
        if path.trim().is_empty() {
            return Err(GuardViolation::EmptyPath);
        }
        if path.contains('\0') || workspace_root.contains('\0') {
            return Err(GuardViolation::NulByte);
        }
        if has_parent_segment(path) {
            return Err(GuardViolation::ParentTraversal {
                path: path.to_string(),
            });
        }

        let root = Path::new(workspace_root);
        if !root.is_absolute() || has_parent_segment(workspace_root) {
            return Err(GuardViolation::InvalidWorkspaceRoot {
                root: workspace_root.to_string(),
            });
        }
        let root = lexical_normalize(root);

        let candidate = Path::new(path);
        let resolved = if candidate.is_absolute() {
            lexical_normalize(candidate)
        } else {
            lexical_normalize(&root.join(candidate))
        };

        for prefix in &self.forbidden_prefixes {
            if resolved.starts_with(prefix) && !root.starts_with(prefix) {
                return Err(GuardViolation::SystemPath {
                    path: path.to_string(),
                    prefix: prefix.display().to_string(),
                });
            }
        }
        if let Some(home) = home_dir_of(&resolved) {
            if !root.starts_with(&home) {
                return Err(GuardViolation::SystemPath {
                    path: path.to_string(),
                    prefix: home.display().to_string(),
                });
            }
        }

        if !resolved.starts_with(&root) {
            return Err(GuardViolation::OutsideWorkspace {
                path: path.to_string(),
                root: root.display().to_string(),
            });
        }
        Ok(resolved)
    }

    /// Validate an argv-style command without a workspace in view.
    ///
    /// Absolute paths are held to the system prefixes and every home
    /// directory. Use [`GuardPolicy::check_command_in`] when the command will
    /// run against a known workspace.
    pub fn check_command<S: AsRef<str>>(&self, tokens: &[S]) -> Result<(), GuardViolation> {
        self.scan_command(tokens, None)
    }

    /// Validate an argv-style command that runs against `workspace_root`.
    ///
    /// On top of [`GuardPolicy::check_command`], absolute paths next to the
    /// workspace (under its parent but not under the root) are refused, and
    /// the home directory that contains the root is allowed.
    pub fn check_command_in<S: AsRef<str>>(
        &self,
        tokens: &[S],
        workspace_root: &str,
    ) -> Result<(), GuardViolation> {
        let root = Path::new(workspace_root);
        if !root.is_absolute() || has_parent_segment(workspace_root) {
            return Err(GuardViolation::InvalidWorkspaceRoot {
                root: workspace_root.to_string(),
            });
        }
        self.scan_command(tokens, Some(&lexical_normalize(root)))
    }

    pub fn is_safe_path(&self, path: &str, workspace_root: &str) -> bool {
        self.check_path(path, workspace_root).is_ok()
    }

    pub fn is_safe_command<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        self.check_command(tokens).is_ok()
    }

    fn scan_command<S: AsRef<str>>(
        &self,
        tokens: &[S],
        root: Option<&Path>,
    ) -> Result<(), GuardViolation> {
        if tokens.is_empty() || tokens.iter().all(|t| t.as_ref().trim().is_empty()) {
            return Err(GuardViolation::EmptyCommand);
        }
        if tokens.iter().any(|t| t.as_ref().contains('\0')) {
            return Err(GuardViolation::NulByte);
        }

        let joined = tokens
            .iter()
            .map(|t| t.as_ref())
            .collect::<Vec<_>>()
            .join(" ");

        if let Some(hit) = self.denied.iter().find(|d| d.regex.is_match(&joined)) {
            return Err(GuardViolation::DeniedCommand {
                label: hit.label.clone(),
            });
        }

        for word in joined
            .split(|c: char| c.is_whitespace() || "'\"=<>|;&(),`".contains(c))
            .filter(|w| !w.is_empty())
        {
            if has_parent_segment(word) {
                return Err(GuardViolation::ParentTraversal {
                    path: word.to_string(),
                });
            }
            if word.starts_with('/') && !ALLOWED_DEVICES.contains(&word) {
                self.check_path_word(word, root)?;
            }
        }
        Ok(())
    }

    /// Boundary rules for one absolute path mentioned by a command.
    fn check_path_word(&self, word: &str, root: Option<&Path>) -> Result<(), GuardViolation> {
        let path = lexical_normalize(Path::new(word));
        let inside_root = |prefix: &Path| root.is_some_and(|r| r.starts_with(prefix));

        let forbidden = self
            .forbidden_prefixes
            .iter()
            .any(|p| path.starts_with(p) && !inside_root(p));
        let home_listing = path == Path::new("/home");
        let other_home = home_dir_of(&path).is_some_and(|home| !inside_root(&home));
        if forbidden || home_listing || other_home {
            return Err(GuardViolation::ForbiddenPathInCommand {
                token: word.to_string(),
            });
        }

        if let Some(root) = root {
            let beside_root = root
                .parent()
                .filter(|parent| parent.parent().is_some())
                .is_some_and(|parent| path.starts_with(parent) && !path.starts_with(root));
            if beside_root {
                return Err(GuardViolation::OutsideWorkspace {
                    path: word.to_string(),
                    root: root.display().to_string(),
                });
            }
        }
        Ok(())
    }
}

fn standard_policy() -> &'static GuardPolicy {
    static POLICY: OnceLock<GuardPolicy> = OnceLock::new();
    POLICY.get_or_init(GuardPolicy::standard)
}

/// [`GuardPolicy::is_safe_path`] with the standard rules.
pub fn is_safe_path(path: &str, workspace_root: &str) -> bool {
    standard_policy().is_safe_path(path, workspace_root)
}

/// [`GuardPolicy::is_safe_command`] with the standard rules.
pub fn is_safe_command<S: AsRef<str>>(tokens: &[S]) -> bool {
    standard_policy().is_safe_command(tokens)
}

fn has_parent_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|seg| seg == "..")
}

/// Drop `.` segments and redundant separators without touching the disk.
/// Callers reject `..` before getting here.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `/home/<user>` when `path` lives under a home directory.
fn home_dir_of(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    match (components.next(), components.next(), components.next()) {
        (Some(Component::RootDir), Some(Component::Normal(home)), Some(Component::Normal(user)))
            if home == "home" =>
        {
            Some(Path::new("/home").join(user))
        }
        _ => None,
    }
}
