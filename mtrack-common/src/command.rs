//! Model CLI commands as a tagged union.
//!
//! Commands are built (or parsed) once; classification, target path,
//! ancestry and inversion are read off the variant fields.

use crate::util::shell_quote;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Peekable;

/// Default name of the model CLI on the endpoints.
pub const DEFAULT_CLI_BINARY: &str = "litp";

/// Path of the single deployment plan.
pub const PLAN_PATH: &str = "/plans/plan";

/// Name used for the untagged deployment snapshot.
pub const DEFAULT_SNAPSHOT_NAME: &str = "snapshot";

/// A normalized model path such as `/deployments/d1/clusters/c1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelPath(String);

impl ModelPath {
    /// Normalize: collapse repeated `/`, drop a trailing `/`, force a leading `/`.
    pub fn new(raw: &str) -> Self {
        let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            if raw.trim().is_empty() {
                return Self(String::new());
            }
            return Self("/".to_string());
        }
        Self(format!("/{}", segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// True when `self` is a proper segment-wise prefix of `other`.
    ///
    /// `/a/b` is an ancestor of `/a/b/c` but not of `/a/bc` or `/a/b`.
    pub fn is_strict_ancestor_of(&self, other: &ModelPath) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        let mut theirs = other.segments();
        for mine in self.segments() {
            match theirs.next() {
                Some(seg) if seg == mine => {}
                _ => return false,
            }
        }
        theirs.next().is_some()
    }

    pub fn join(&self, child: &str) -> ModelPath {
        ModelPath::new(&format!("{}/{}", self.0, child))
    }
}

impl fmt::Display for ModelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// How a successful command is tracked for cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    CreateOrLink,
    Remove,
    PlanRun,
    Snapshot,
    XmlExport,
    Inherit,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateOrLink => "create_or_link",
            Self::Remove => "remove",
            Self::PlanRun => "plan_run",
            Self::Snapshot => "snapshot",
            Self::XmlExport => "xml_export",
            Self::Inherit => "inherit",
        };
        f.write_str(name)
    }
}

/// Ordered `key=value` pairs for `-o`.
pub type Properties = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ModelCommand {
    Create {
        path: ModelPath,
        item_type: String,
        properties: Properties,
    },
    Link {
        path: ModelPath,
        item_type: String,
        properties: Properties,
    },
    Inherit {
        path: ModelPath,
        source: ModelPath,
        properties: Properties,
    },
    Update {
        path: ModelPath,
        set: Properties,
        delete: Vec<String>,
    },
    Remove {
        path: ModelPath,
    },
    Show {
        path: ModelPath,
    },
    CreatePlan,
    RunPlan,
    StopPlan,
    RemovePlan,
    ShowPlan {
        all: bool,
    },
    CreateSnapshot {
        name: Option<String>,
    },
    RemoveSnapshot {
        name: Option<String>,
    },
    RestoreSnapshot,
    Export {
        path: ModelPath,
        file: String,
    },
}

impl ModelCommand {
    pub fn create(path: impl Into<ModelPath>, item_type: &str, properties: &[(&str, &str)]) -> Self {
        Self::Create {
            path: path.into(),
            item_type: item_type.to_string(),
            properties: to_properties(properties),
        }
    }

    pub fn link(path: impl Into<ModelPath>, item_type: &str, properties: &[(&str, &str)]) -> Self {
        Self::Link {
            path: path.into(),
            item_type: item_type.to_string(),
            properties: to_properties(properties),
        }
    }

    pub fn inherit(path: impl Into<ModelPath>, source: impl Into<ModelPath>) -> Self {
        Self::Inherit {
            path: path.into(),
            source: source.into(),
            properties: Vec::new(),
        }
    }

    pub fn update(path: impl Into<ModelPath>, set: &[(&str, &str)], delete: &[&str]) -> Self {
        Self::Update {
            path: path.into(),
            set: to_properties(set),
            delete: delete.iter().map(|k| (*k).to_string()).collect(),
        }
    }

    pub fn remove(path: impl Into<ModelPath>) -> Self {
        Self::Remove { path: path.into() }
    }

    pub fn show(path: impl Into<ModelPath>) -> Self {
        Self::Show { path: path.into() }
    }

    /// Ledger kind, or `None` for commands that need no undo.
    pub fn classify(&self) -> Option<Kind> {
        match self {
            Self::Create { .. } | Self::Link { .. } => Some(Kind::CreateOrLink),
            Self::Inherit { .. } => Some(Kind::Inherit),
            Self::Remove { .. } => Some(Kind::Remove),
            Self::RunPlan => Some(Kind::PlanRun),
            Self::CreateSnapshot { .. } | Self::RemoveSnapshot { .. } | Self::RestoreSnapshot => {
                Some(Kind::Snapshot)
            }
            Self::Export { .. } => Some(Kind::XmlExport),
            Self::Update { .. }
            | Self::Show { .. }
            | Self::CreatePlan
            | Self::StopPlan
            | Self::RemovePlan
            | Self::ShowPlan { .. } => None,
        }
    }

    pub fn target_path(&self) -> ModelPath {
        match self {
            Self::Create { path, .. }
            | Self::Link { path, .. }
            | Self::Inherit { path, .. }
            | Self::Update { path, .. }
            | Self::Remove { path }
            | Self::Show { path }
            | Self::Export { path, .. } => path.clone(),
            Self::CreatePlan
            | Self::RunPlan
            | Self::StopPlan
            | Self::RemovePlan
            | Self::ShowPlan { .. } => ModelPath::new(PLAN_PATH),
            Self::CreateSnapshot { name } | Self::RemoveSnapshot { name } => {
                snapshot_path(name.as_deref())
            }
            Self::RestoreSnapshot => snapshot_path(None),
        }
    }

    /// Command that undoes this one, for creates, links and inherits.
    pub fn invert(&self) -> Option<ModelCommand> {
        match self {
            Self::Create { path, .. } | Self::Link { path, .. } | Self::Inherit { path, .. } => {
                Some(Self::Remove { path: path.clone() })
            }
            _ => None,
        }
    }

    pub fn is_snapshot_command(&self) -> bool {
        self.classify() == Some(Kind::Snapshot)
    }

    /// `(true, Some(name))` for snapshot commands carrying `-n name`.
    pub fn tagged_snapshot(&self) -> (bool, Option<&str>) {
        match self {
            Self::CreateSnapshot { name: Some(name) } | Self::RemoveSnapshot { name: Some(name) } => {
                (true, Some(name.as_str()))
            }
            _ => (false, None),
        }
    }

    /// Render with an explicit binary name.
    pub fn render(&self, binary: &str) -> String {
        let mut words: Vec<String> = vec![binary.to_string()];
        let mut push = |w: &str| words.push(shell_quote(w).into_owned());

        match self {
            Self::Create {
                path,
                item_type,
                properties,
            }
            | Self::Link {
                path,
                item_type,
                properties,
            } => {
                push(if matches!(self, Self::Create { .. }) { "create" } else { "link" });
                push("-p");
                push(path.as_str());
                push("-t");
                push(item_type);
                push_properties(&mut push, properties);
            }
            Self::Inherit {
                path,
                source,
                properties,
            } => {
                push("inherit");
                push("-p");
                push(path.as_str());
                push("-s");
                push(source.as_str());
                push_properties(&mut push, properties);
            }
            Self::Update { path, set, delete } => {
                push("update");
                push("-p");
                push(path.as_str());
                push_properties(&mut push, set);
                if !delete.is_empty() {
                    push("-d");
                    for key in delete {
                        push(key);
                    }
                }
            }
            Self::Remove { path } => {
                push("remove");
                push("-p");
                push(path.as_str());
            }
            Self::Show { path } => {
                push("show");
                push("-p");
                push(path.as_str());
            }
            Self::CreatePlan => push("create_plan"),
            Self::RunPlan => push("run_plan"),
            Self::StopPlan => push("stop_plan"),
            Self::RemovePlan => push("remove_plan"),
            Self::ShowPlan { all } => {
                push("show_plan");
                if *all {
                    push("-a");
                }
            }
            Self::CreateSnapshot { name } | Self::RemoveSnapshot { name } => {
                push(if matches!(self, Self::CreateSnapshot { .. }) {
                    "create_snapshot"
                } else {
                    "remove_snapshot"
                });
                if let Some(name) = name {
                    push("-n");
                    push(name);
                }
            }
            Self::RestoreSnapshot => push("restore_snapshot"),
            Self::Export { path, file } => {
                push("export");
                push("-p");
                push(path.as_str());
                push("-f");
                push(file);
            }
        }

        words.join(" ")
    }

    /// Parse a command line. Returns `None` for anything that is not an
    /// invocation of `binary` with a known action.
    pub fn parse(line: &str, binary: &str) -> Option<ModelCommand> {
        let words = tokenize(line)?;
        let mut words = words.into_iter();

        let program = words.next()?;
        let program_name = program.rsplit('/').next().unwrap_or(&program);
        let binary_name = binary.rsplit('/').next().unwrap_or(binary);
        if program_name != binary_name {
            return None;
        }

        let action = words.next()?;
        let opts = Options::collect(words);

        let cmd = match action.as_str() {
            "create" => Self::Create {
                path: opts.path()?,
                item_type: opts.item_type.clone()?,
                properties: opts.properties.clone(),
            },
            "link" => Self::Link {
                path: opts.path()?,
                item_type: opts.item_type.clone()?,
                properties: opts.properties.clone(),
            },
            "inherit" => Self::Inherit {
                path: opts.path()?,
                source: ModelPath::new(opts.source.as_deref()?),
                properties: opts.properties.clone(),
            },
            "update" => Self::Update {
                path: opts.path()?,
                set: opts.properties.clone(),
                delete: opts.delete.clone(),
            },
            "remove" => Self::Remove { path: opts.path()? },
            "show" => Self::Show { path: opts.path()? },
            "create_plan" => Self::CreatePlan,
            "run_plan" => Self::RunPlan,
            "stop_plan" => Self::StopPlan,
            "remove_plan" => Self::RemovePlan,
            "show_plan" => Self::ShowPlan { all: opts.all },
            "create_snapshot" => Self::CreateSnapshot {
                name: opts.name.clone(),
            },
            "remove_snapshot" => Self::RemoveSnapshot {
                name: opts.name.clone(),
            },
            "restore_snapshot" => Self::RestoreSnapshot,
            "export" => Self::Export {
                path: opts.path()?,
                file: opts.file.clone()?,
            },
            _ => return None,
        };
        Some(cmd)
    }
}

impl fmt::Display for ModelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(DEFAULT_CLI_BINARY))
    }
}

/// True iff `a`'s target path is a strict segment-wise prefix of `b`'s.
pub fn is_ancestor_command(a: &ModelCommand, b: &ModelCommand) -> bool {
    a.target_path().is_strict_ancestor_of(&b.target_path())
}

/// Snapshot item path for a tagged or default snapshot.
pub fn snapshot_path(name: Option<&str>) -> ModelPath {
    ModelPath::new(&format!(
        "/snapshots/{}",
        name.unwrap_or(DEFAULT_SNAPSHOT_NAME)
    ))
}

fn to_properties(pairs: &[(&str, &str)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn push_properties(push: &mut impl FnMut(&str), properties: &Properties) {
    if properties.is_empty() {
        return;
    }
    push("-o");
    for (key, value) in properties {
        push(&format!("{key}={value}"));
    }
}

#[derive(Default)]
struct Options {
    path: Option<String>,
    item_type: Option<String>,
    source: Option<String>,
    name: Option<String>,
    file: Option<String>,
    properties: Properties,
    delete: Vec<String>,
    all: bool,
}

impl Options {
    fn collect(words: impl Iterator<Item = String>) -> Self {
        let mut opts = Options::default();
        let mut multi: Option<char> = None;
        let mut words = words.peekable();

        while let Some(word) = words.next() {
            match word.as_str() {
                "-p" | "--path" => {
                    multi = None;
                    opts.path = take_value(&mut words);
                }
                "-t" | "--type" => {
                    multi = None;
                    opts.item_type = take_value(&mut words);
                }
                "-s" | "--source-path" => {
                    multi = None;
                    opts.source = take_value(&mut words);
                }
                "-n" | "--name" => {
                    multi = None;
                    opts.name = take_value(&mut words);
                }
                "-f" | "--file" => {
                    multi = None;
                    opts.file = take_value(&mut words);
                }
                "-a" | "--all" => {
                    multi = None;
                    opts.all = true;
                }
                "-o" | "--options" => multi = Some('o'),
                "-d" | "--delete-property" => multi = Some('d'),
                other if is_flag(other) => {
                    tracing::debug!(flag = other, "ignoring unknown model cli flag");
                    multi = None;
                }
                value => match multi {
                    Some('o') => {
                        if let Some((k, v)) = value.split_once('=') {
                            opts.properties.push((k.to_string(), v.to_string()));
                        }
                    }
                    Some('d') => opts.delete.push(value.to_string()),
                    _ => {}
                },
            }
        }
        opts
    }

    fn path(&self) -> Option<ModelPath> {
        let path = ModelPath::new(self.path.as_deref()?);
        (!path.is_empty()).then_some(path)
    }
}

fn take_value<I: Iterator<Item = String>>(words: &mut Peekable<I>) -> Option<String> {
    match words.peek() {
        Some(next) if !is_flag(next) => words.next(),
        _ => None,
    }
}

fn is_flag(word: &str) -> bool {
    word.len() > 1 && word.starts_with('-')
}

/// Split a shell-like line into words, honouring quotes and backslashes.
/// Returns `None` on an unterminated quote.
pub fn tokenize(line: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some(q) => {
                if c == q {
                    quote = None;
                } else if c == '\\' {
                    match chars.next() {
                        Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                        Some(next) => {
                            current.push('\\');
                            current.push(next);
                        }
                        None => return None,
                    }
                } else {
                    current.push(c);
                }
            }
            None => {
                if c.is_whitespace() {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                    continue;
                }
                in_word = true;
                match c {
                    '\'' | '"' => quote = Some(c),
                    '\\' => current.push(chars.next()?),
                    _ => current.push(c),
                }
            }
        }
    }

    if quote.is_some() {
        return None;
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}
