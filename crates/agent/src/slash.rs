//! Custom slash commands, skills, and agents found in `.claude/` and
//! `.cursor/` directories.
//!
//! A user message starting with `/<id>` is rewritten into a pointer at the
//! markdown file defining `<id>`, so the agent reads the definition itself.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use {
    regex::Regex,
    tracing::{debug, info, warn},
    walkdir::WalkDir,
};

/// What a definition file describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Command,
    Skill,
    Agent,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Skill => "skill",
            Self::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashEntry {
    pub kind: EntryKind,
    pub path: PathBuf,
}

/// Definitions visible from one workspace, keyed by command id.
#[derive(Debug, Clone, Default)]
pub struct SlashCommands {
    entries: BTreeMap<String, SlashEntry>,
}

impl SlashCommands {
    /// Scan `workspace` and, when given, the user's `home`.
    ///
    /// Later sources override earlier ones for the same id: project
    /// `.claude/commands`, `.cursor/commands`, `.cursor/skills`,
    /// `.cursor/agents`, then the same under `home` plus
    /// `.cursor/skills-cursor`.
    pub fn load(workspace: &Path, home: Option<&Path>) -> Self {
        let mut commands = Self::default();
        commands.scan_root(workspace, false);
        if let Some(home) = home {
            commands.scan_root(home, true);
        }
        commands
    }

    fn scan_root(&mut self, root: &Path, user_level: bool) {
        self.scan_commands(&root.join(".claude").join("commands"));
        self.scan_commands(&root.join(".cursor").join("commands"));
        self.scan_skills(&root.join(".cursor").join("skills"));
        if user_level {
            self.scan_skills(&root.join(".cursor").join("skills-cursor"));
        }
        self.scan_agents(&root.join(".cursor").join("agents"));
    }

    pub fn get(&self, id: &str) -> Option<&SlashEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite `/<id> [args]` into `Use this <kind> @<path> [args]`.
    /// Anything else, unknown ids included, is returned unchanged.
    pub fn resolve(&self, text: &str) -> String {
        let Some(caps) = command_re().captures(text) else {
            return text.to_string();
        };
        let id = &caps[1];
        let Some(entry) = self.entries.get(id) else {
            debug!(command = id, "unknown slash command, passing through");
            return text.to_string();
        };
        info!(command = id, path = %entry.path.display(), "resolved slash command");
        let head = format!("Use this {} @{}", entry.kind.as_str(), entry.path.display());
        match caps.get(2).map(|m| m.as_str()).filter(|a| !a.is_empty()) {
            Some(args) => format!("{head} {args}"),
            None => head,
        }
    }

    // ── Scanning ────────────────────────────────────────────────────────

    /// `*.md` directly inside `dir`; the id is the file stem.
    fn scan_commands(&mut self, dir: &Path) {
        for path in markdown_files(dir, 1) {
            if let Some(id) = file_stem(&path) {
                self.register(id, EntryKind::Command, path);
            }
        }
    }

    /// `SKILL.md` anywhere below `dir`; the id is its parent directory name.
    fn scan_skills(&mut self, dir: &Path) {
        for path in markdown_files(dir, usize::MAX) {
            if path.file_name().is_none_or(|n| n != "SKILL.md") {
                continue;
            }
            let id = path
                .parent()
                .and_then(Path::file_name)
                .and_then(|n| n.to_str())
                .map(str::to_string);
            if let Some(id) = id {
                self.register(id, EntryKind::Skill, path);
            }
        }
    }

    /// `*.md` anywhere below `dir`; the id is the file stem.
    fn scan_agents(&mut self, dir: &Path) {
        for path in markdown_files(dir, usize::MAX) {
            if let Some(id) = file_stem(&path) {
                self.register(id, EntryKind::Agent, path);
            }
        }
    }

    fn register(&mut self, id: String, kind: EntryKind, path: PathBuf) {
        match fs::read_to_string(&path) {
            Ok(body) if body.trim().is_empty() => {
                debug!(path = %path.display(), "skipping empty definition");
            },
            Ok(_) => {
                debug!(command = %id, kind = kind.as_str(), path = %path.display(), "loaded slash command");
                self.entries.insert(id, SlashEntry { kind, path });
            },
            Err(e) => warn!(path = %path.display(), error = %e, "failed to read definition"),
        }
    }
}

#[allow(clippy::expect_used)]
fn command_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^/(\S+)(?:\s+(.*))?$").expect("valid regex"))
}

/// Markdown files below `dir` up to `max_depth`, in file-name order.
fn markdown_files(dir: &Path, max_depth: usize) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if entry.file_type().is_file() && path.extension().is_some_and(|e| e == "md") {
                    files.push(path.to_path_buf());
                }
            },
            Err(e) => warn!(dir = %dir.display(), error = %e, "failed to scan definitions"),
        }
    }
    files
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

/// The current user's home directory, if one can be determined.
pub fn user_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
