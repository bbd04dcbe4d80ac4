//! Line state machine for the `FILE: <path>` transcript protocol.
//!
//! The parser only ever sees complete lines. Both the streaming extractor and
//! the one-shot [`super::extract_files`] drive the same parser, which is what
//! makes streamed and non-streamed results converge.

use std::collections::HashMap;

pub const FILE_MARKER: &str = "FILE:";
pub const DELIMITER: &str = "---";
const FENCE: &str = "```";

/// Normalize a path written by the model into a project-root-relative path
/// under `src/`. Returns `None` when nothing usable is left.
pub fn normalize_path(raw: &str, project_name: Option<&str>) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'')
        .replace('\\', "/");
    let mut path = cleaned.trim_start_matches('/');

    if let Some(name) = project_name.filter(|n| !n.is_empty())
        && let Some(rest) = path.strip_prefix(name).and_then(|r| r.strip_prefix('/'))
    {
        path = rest;
    }

    let segments: Vec<&str> = path
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    if segments.is_empty() {
        return None;
    }

    let joined = segments.join("/");
    if segments[0] == "src" && segments.len() > 1 {
        Some(joined)
    } else {
        Some(format!("src/{joined}"))
    }
}

/// Canonical file content: leading and trailing blank lines dropped, lines
/// joined with `\n` and terminated by a final `\n`. Empty stays empty.
pub fn canonical_content(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let Some(start) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return String::new();
    };
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .unwrap_or(start);

    let mut out = lines[start..=end].join("\n");
    out.push('\n');
    out
}

/// If `line` is a file marker, the raw path text after `FILE:`.
pub fn marker_path(line: &str) -> Option<&str> {
    line.strip_prefix(FILE_MARKER).map(str::trim)
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with(FENCE)
}

fn is_closing_fence(line: &str) -> bool {
    line.trim() == FENCE
}

/// How content after a marker is being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    /// Marker seen, waiting for the first non-blank line to pick a convention.
    AwaitingBody,
    /// `---` convention. `open` toggles on each delimiter line.
    Delimited { open: bool },
    /// Body wrapped in a ``` fence. A bare closing fence is only final if
    /// nothing but blank lines follows it before the next marker; until then
    /// it is `closed` and held back.
    Fenced { closed: bool },
    /// No delimiters: every line up to the next marker.
    Bare,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub path: String,
    body: String,
}

impl Entry {
    pub fn content(&self) -> String {
        canonical_content(&self.body)
    }

    /// Length of the captured body before canonicalization.
    pub fn raw_len(&self) -> usize {
        self.body.len()
    }
}

/// What a single line did to the parser state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Nothing visible changed.
    Ignored,
    /// The current file grew.
    Appended,
    /// A marker switched capture to `index`.
    Switched {
        /// File that was being captured before the marker, if any.
        left: Option<usize>,
        index: usize,
        /// First time this path was declared.
        fresh: bool,
        /// Content of an earlier declaration of the same path, now discarded.
        replaced: Option<String>,
    },
}

#[derive(Debug)]
pub struct LineParser {
    project_name: Option<String>,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    current: Option<usize>,
    capture: Capture,
    /// Tentative closing fence and the blank lines after it.
    held: String,
}

impl LineParser {
    pub fn new(project_name: Option<String>) -> Self {
        Self {
            project_name,
            entries: Vec::new(),
            index: HashMap::new(),
            current: None,
            capture: Capture::AwaitingBody,
            held: String::new(),
        }
    }

    /// True once at least one marker has been recognized.
    pub fn saw_marker(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> &Entry {
        &self.entries[index]
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Feed one complete line (without its line terminator).
    pub fn push_line(&mut self, line: &str) -> LineOutcome {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(raw) = marker_path(line) {
            return match normalize_path(raw, self.project_name.as_deref()) {
                Some(path) => self.switch_to(path),
                None => LineOutcome::Ignored,
            };
        }

        let Some(current) = self.current else {
            return LineOutcome::Ignored;
        };

        match self.capture {
            Capture::AwaitingBody => {
                if line.trim().is_empty() {
                    LineOutcome::Ignored
                } else if line.trim() == DELIMITER {
                    self.capture = Capture::Delimited { open: true };
                    LineOutcome::Ignored
                } else if is_fence(line) {
                    self.capture = Capture::Fenced { closed: false };
                    LineOutcome::Ignored
                } else {
                    self.capture = Capture::Bare;
                    self.append(current, line)
                }
            }
            Capture::Delimited { open } => {
                if line.trim() == DELIMITER {
                    self.capture = Capture::Delimited { open: !open };
                    LineOutcome::Ignored
                } else if open {
                    self.append(current, line)
                } else {
                    LineOutcome::Ignored
                }
            }
            Capture::Fenced { closed: true } => {
                if line.trim().is_empty() {
                    self.hold(line);
                    return LineOutcome::Ignored;
                }
                // The fence closed an inner block: it and the held lines are content.
                let held = std::mem::take(&mut self.held);
                self.entries[current].body.push_str(&held);
                self.capture = Capture::Fenced { closed: false };
                self.push_line(line);
                LineOutcome::Appended
            }
            Capture::Fenced { closed: false } => {
                if is_closing_fence(line) {
                    self.capture = Capture::Fenced { closed: true };
                    self.hold(line);
                    LineOutcome::Ignored
                } else {
                    self.append(current, line)
                }
            }
            Capture::Bare => self.append(current, line),
        }
    }

    fn hold(&mut self, line: &str) {
        self.held.push_str(line);
        self.held.push('\n');
    }

    fn append(&mut self, index: usize, line: &str) -> LineOutcome {
        let body = &mut self.entries[index].body;
        body.push_str(line);
        body.push('\n');
        LineOutcome::Appended
    }

    fn switch_to(&mut self, path: String) -> LineOutcome {
        let left = self.current;
        self.capture = Capture::AwaitingBody;
        self.held.clear();

        match self.index.get(&path) {
            Some(&index) => {
                let previous = std::mem::take(&mut self.entries[index].body);
                self.current = Some(index);
                LineOutcome::Switched {
                    left: left.filter(|l| *l != index),
                    index,
                    fresh: false,
                    replaced: Some(canonical_content(&previous)),
                }
            }
            None => {
                let index = self.entries.len();
                self.entries.push(Entry {
                    path: path.clone(),
                    body: String::new(),
                });
                self.index.insert(path, index);
                self.current = Some(index);
                LineOutcome::Switched {
                    left,
                    index,
                    fresh: true,
                    replaced: None,
                }
            }
        }
    }
}
