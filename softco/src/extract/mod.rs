//! Reconstruct files from LLM output while it is still arriving.
//!
//! The code stage writes its files in a line protocol:
//!
//! ```text
//! FILE: src/app.py
//! ---
//! print(1)
//! ---
//! ```
//!
//! The `---` pair is optional. [`StreamingFileExtractor`] is fed the whole
//! accumulated text after every transport chunk, keeps a cursor of what it has
//! already consumed, and never acts on the trailing unterminated line: a
//! `FILE:` path split across two chunks is simply picked up on the next call.
//! [`extract_files`] runs the same parser over a finished transcript.

mod fallback;
mod parser;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::stage::Stage;

pub use fallback::fenced_blocks;
pub use parser::{DELIMITER, FILE_MARKER, canonical_content, normalize_path};
use parser::{LineOutcome, LineParser};

/// A file recovered from a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFile {
    pub path: String,
    pub content: String,
}

/// Events emitted while a transcript streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// First time a path is recognized. Emitted once per path.
    Opened { path: String },
    /// Full content accumulated for the path so far.
    Content { path: String, content: String },
    /// Final content for the path. The last event for a path is always this.
    Complete { path: String, content: String },
}

impl FileEvent {
    pub fn path(&self) -> &str {
        match self {
            FileEvent::Opened { path }
            | FileEvent::Content { path, .. }
            | FileEvent::Complete { path, .. } => path,
        }
    }
}

/// When to emit intermediate [`FileEvent::Content`] updates for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Throttle {
    /// Bytes of growth since the last update that force a new one.
    pub min_growth: usize,
    /// Time since the last update after which any growth is reported.
    #[serde(with = "crate::millis")]
    pub min_interval: Duration,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            min_growth: 50,
            min_interval: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Emission {
    len: usize,
    at: Instant,
}

/// Per-path bookkeeping for which events were already sent.
#[derive(Debug)]
struct Emitter {
    throttle: Throttle,
    opened: HashSet<String>,
    last: HashMap<String, Emission>,
}

impl Emitter {
    fn open(&mut self, path: &str, events: &mut Vec<FileEvent>) {
        if self.opened.insert(path.to_string()) {
            events.push(FileEvent::Opened {
                path: path.to_string(),
            });
        }
    }

    fn due(&self, path: &str, len: usize) -> bool {
        match self.last.get(path) {
            None => len > 0,
            Some(last) => {
                len != last.len
                    && (len.abs_diff(last.len) > self.throttle.min_growth
                        || last.at.elapsed() >= self.throttle.min_interval)
            }
        }
    }

    /// `len` is the measure `due` compares against: the raw body length for
    /// files, the text length for documents.
    fn content(&mut self, path: &str, len: usize, content: String, events: &mut Vec<FileEvent>) {
        self.last.insert(
            path.to_string(),
            Emission {
                len,
                at: Instant::now(),
            },
        );
        events.push(FileEvent::Content {
            path: path.to_string(),
            content,
        });
    }

    /// Report a file the parser just left, unless nothing changed since the
    /// last update.
    fn flush(&mut self, path: &str, len: usize, content: impl FnOnce() -> String, events: &mut Vec<FileEvent>) {
        let unchanged = self.last.get(path).is_some_and(|last| last.len == len);
        if unchanged {
            return;
        }
        let content = content();
        if !content.is_empty() {
            self.content(path, len, content, events);
        }
    }

    fn complete(&mut self, path: &str, content: String, events: &mut Vec<FileEvent>) {
        self.open(path, events);
        self.last.remove(path);
        events.push(FileEvent::Complete {
            path: path.to_string(),
            content,
        });
    }
}

#[derive(Debug)]
enum Mode {
    /// Whole output is one document at a fixed path.
    Document { path: &'static str },
    /// `FILE:` protocol.
    Files {
        parser: LineParser,
        cursor: usize,
        processed: String,
    },
    /// Output of actions without a stage is not tracked as files.
    Untracked,
}

/// Incremental file-boundary parser for one action's output.
#[derive(Debug)]
pub struct StreamingFileExtractor {
    mode: Mode,
    project_name: Option<String>,
    emitter: Emitter,
    finished: bool,
}

impl StreamingFileExtractor {
    /// Extractor for the `FILE:` protocol.
    pub fn files(project_name: Option<String>, throttle: Throttle) -> Self {
        let parser = LineParser::new(project_name.clone());
        Self::with_mode(
            Mode::Files {
                parser,
                cursor: 0,
                processed: String::new(),
            },
            project_name,
            throttle,
        )
    }

    /// Extractor that maps the whole output to one fixed path.
    pub fn document(path: &'static str, throttle: Throttle) -> Self {
        Self::with_mode(Mode::Document { path }, None, throttle)
    }

    /// Pick the mode from the stage of the running action.
    pub fn for_stage(stage: Option<Stage>, project_name: Option<String>, throttle: Throttle) -> Self {
        match stage.map(|s| (s, s.document_path())) {
            Some((Stage::Code, _)) => Self::files(project_name, throttle),
            Some((_, Some(path))) => Self::document(path, throttle),
            _ => Self::with_mode(Mode::Untracked, project_name, throttle),
        }
    }

    fn with_mode(mode: Mode, project_name: Option<String>, throttle: Throttle) -> Self {
        Self {
            mode,
            project_name,
            emitter: Emitter {
                throttle,
                opened: HashSet::new(),
                last: HashMap::new(),
            },
            finished: false,
        }
    }

    /// Paths recognized so far, in first-seen order.
    pub fn paths(&self) -> Vec<String> {
        match &self.mode {
            Mode::Files { parser, .. } => parser.entries().iter().map(|e| e.path.clone()).collect(),
            Mode::Document { path } if self.emitter.opened.contains(*path) => vec![path.to_string()],
            _ => Vec::new(),
        }
    }

    /// Feed the entire text accumulated so far.
    pub fn feed(&mut self, accumulated: &str) -> Vec<FileEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        let emitter = &mut self.emitter;

        match &mut self.mode {
            Mode::Untracked => {}
            Mode::Document { path } => {
                let path = *path;
                if accumulated.is_empty() {
                    return events;
                }
                emitter.open(path, &mut events);
                if emitter.due(path, accumulated.len()) {
                    emitter.content(path, accumulated.len(), accumulated.to_string(), &mut events);
                }
            }
            Mode::Files {
                parser,
                cursor,
                processed,
            } => {
                let Some(pending) = accumulated.get(*cursor..) else {
                    tracing::warn!(
                        cursor = *cursor,
                        len = accumulated.len(),
                        "Accumulated text no longer extends what was consumed"
                    );
                    return events;
                };
                // Only complete lines; the tail may be a half-received marker.
                let Some(last_newline) = pending.rfind('\n') else {
                    return events;
                };
                let complete = &pending[..=last_newline];

                for line in complete.split_inclusive('\n') {
                    let line = line.strip_suffix('\n').unwrap_or(line);
                    let LineOutcome::Switched {
                        left,
                        index,
                        fresh,
                        replaced,
                    } = parser.push_line(line)
                    else {
                        continue;
                    };
                    if let Some(left) = left {
                        let entry = parser.entry(left);
                        emitter.flush(&entry.path, entry.raw_len(), || entry.content(), &mut events);
                    }
                    let path = parser.entry(index).path.clone();
                    if let Some(old) = replaced {
                        emitter.complete(&path, old, &mut events);
                    }
                    if fresh {
                        emitter.open(&path, &mut events);
                    }
                }
                processed.push_str(complete);
                *cursor += complete.len();

                if let Some(current) = parser.current() {
                    let entry = parser.entry(current);
                    let len = entry.raw_len();
                    // Canonicalize only when an update is going out.
                    if emitter.due(&entry.path, len) {
                        let content = entry.content();
                        if !content.is_empty() {
                            emitter.content(&entry.path, len, content, &mut events);
                        }
                    }
                }
            }
        }
        events
    }

    /// The action finished; `final_text` is its complete output. Emits the
    /// remaining events, ending with one [`FileEvent::Complete`] per path.
    pub fn finish(&mut self, final_text: &str) -> Vec<FileEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.finished = true;
        let emitter = &mut self.emitter;

        match &mut self.mode {
            Mode::Untracked => {}
            Mode::Document { path } => {
                let path = *path;
                emitter.complete(path, final_text.to_string(), &mut events);
            }
            Mode::Files {
                parser,
                cursor,
                processed,
            } => {
                let consistent = final_text.len() >= *cursor
                    && final_text.is_char_boundary(*cursor)
                    && final_text[..*cursor] == processed[..];
                if !consistent {
                    tracing::warn!("Final output diverged from streamed text, re-parsing");
                    *parser = LineParser::new(self.project_name.clone());
                    *cursor = 0;
                }

                for line in final_text[*cursor..].split('\n') {
                    parser.push_line(line);
                }
                *cursor = final_text.len();

                for file in finalize(parser, final_text, self.project_name.as_deref()) {
                    emitter.complete(&file.path, file.content, &mut events);
                }
            }
        }
        events
    }
}

/// Turn parser state into the final file set, falling back to fenced code
/// blocks when no marker was ever seen.
fn finalize(parser: &LineParser, full_text: &str, project_name: Option<&str>) -> Vec<ExtractedFile> {
    if parser.saw_marker() {
        return parser
            .entries()
            .iter()
            .map(|e| ExtractedFile {
                path: e.path.clone(),
                content: e.content(),
            })
            .collect();
    }

    let mut files: Vec<ExtractedFile> = Vec::new();
    for (raw, content) in fenced_blocks(full_text) {
        let Some(path) = normalize_path(&raw, project_name) else {
            continue;
        };
        match files.iter_mut().find(|f| f.path == path) {
            Some(existing) => existing.content = content,
            None => files.push(ExtractedFile { path, content }),
        }
    }
    if files.is_empty() {
        tracing::debug!("No files recognized in transcript");
    } else {
        tracing::info!(count = files.len(), "Recovered files from fenced code blocks");
    }
    files
}

/// One-shot extraction over a finished transcript. Produces exactly the
/// `Complete` set a fully streamed [`StreamingFileExtractor`] would.
pub fn extract_files(text: &str, project_name: Option<&str>) -> Vec<ExtractedFile> {
    let mut parser = LineParser::new(project_name.map(str::to_string));
    for line in text.split('\n') {
        parser.push_line(line);
    }
    finalize(&parser, text, project_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const TWO_FILES: &str =
        "FILE: src/app.py\n---\nprint(1)\n---\nFILE: src/readme.md\n---\nhello\n---";

    fn quiet() -> Throttle {
        Throttle {
            min_growth: usize::MAX,
            min_interval: Duration::from_secs(3600),
        }
    }

    fn completed(events: &[FileEvent]) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for event in events {
            if let FileEvent::Complete { path, content } = event {
                out.insert(path.clone(), content.clone());
            }
        }
        out
    }

    /// Stream `text` in chunks of `size` bytes (on char boundaries).
    fn stream(text: &str, size: usize, project: Option<&str>) -> Vec<FileEvent> {
        let mut ex = StreamingFileExtractor::files(project.map(str::to_string), quiet());
        let mut events = Vec::new();
        let mut acc = String::new();
        let chars: Vec<char> = text.chars().collect();
        for chunk in chars.chunks(size.max(1)) {
            acc.extend(chunk.iter());
            events.extend(ex.feed(&acc));
        }
        events.extend(ex.finish(text));
        events
    }

    #[test]
    fn parses_the_reference_transcript() {
        let files = extract_files(TWO_FILES, None);
        assert_eq!(
            files,
            vec![
                ExtractedFile {
                    path: "src/app.py".into(),
                    content: "print(1)\n".into()
                },
                ExtractedFile {
                    path: "src/readme.md".into(),
                    content: "hello\n".into()
                },
            ]
        );
    }

    #[test]
    fn final_file_set_is_independent_of_chunking() {
        let text = "Intro\nFILE: /proj/app.py\n---\nimport os\n\nprint(os.name)\n---\n\nFILE: static/index.html\n<html>\n</html>\nFILE: app.py\n---\nprint(2)\n---\n";
        let reference = completed(&stream(text, text.len(), Some("proj")));
        for size in [1, 2, 3, 5, 7, 11, 64] {
            assert_eq!(completed(&stream(text, size, Some("proj"))), reference, "chunk size {size}");
        }
        assert_eq!(reference["src/app.py"], "print(2)\n");
        assert_eq!(reference["src/static/index.html"], "<html>\n</html>\n");
    }

    #[test]
    fn nested_fences_survive_any_chunking() {
        let text = "FILE: README.md\n```markdown\n# App\n\n```bash\nnpm start\n```\n\n## Usage\nOpen the browser.\n```\nFILE: app.js\nx\n";
        let reference = completed(&stream(text, text.len(), None));
        for size in [1, 2, 3, 5, 7, 11, 64] {
            assert_eq!(completed(&stream(text, size, None)), reference, "chunk size {size}");
        }
        assert_eq!(
            reference["src/README.md"],
            "# App\n\n```bash\nnpm start\n```\n\n## Usage\nOpen the browser.\n"
        );
        let one_shot: BTreeMap<String, String> = extract_files(text, None)
            .into_iter()
            .map(|f| (f.path, f.content))
            .collect();
        assert_eq!(one_shot, reference);
    }

    #[test]
    fn streaming_converges_with_one_shot_extraction() {
        let text = format!("{TWO_FILES}\nFILE: lib/util.py\ndef f():\n    return 1\n");
        let streamed = completed(&stream(&text, 4, None));
        let one_shot: BTreeMap<String, String> = extract_files(&text, None)
            .into_iter()
            .map(|f| (f.path, f.content))
            .collect();
        assert_eq!(streamed, one_shot);
    }

    #[test]
    fn split_marker_line_is_deferred() {
        let mut ex = StreamingFileExtractor::files(None, quiet());
        assert!(ex.feed("FILE: src/ap").is_empty());
        assert!(ex.paths().is_empty());

        let events = ex.feed("FILE: src/app.py\n");
        assert_eq!(
            events,
            vec![FileEvent::Opened {
                path: "src/app.py".into()
            }]
        );
    }

    #[test]
    fn each_path_opens_once_and_completes_last() {
        let text = "FILE: a.py\na1\nFILE: b.py\nb\nFILE: a.py\na2\n";
        let events = stream(text, 3, None);

        let opened: Vec<&str> = events
            .iter()
            .filter(|e| matches!(e, FileEvent::Opened { .. }))
            .map(FileEvent::path)
            .collect();
        assert_eq!(opened, vec!["src/a.py", "src/b.py"]);

        for path in ["src/a.py", "src/b.py"] {
            let last = events.iter().rev().find(|e| e.path() == path).unwrap();
            assert!(matches!(last, FileEvent::Complete { .. }), "{path}: {last:?}");
        }

        // The first declaration of a.py was flushed as final before it was replaced.
        let a_completions: Vec<&FileEvent> = events
            .iter()
            .filter(|e| matches!(e, FileEvent::Complete { path, .. } if path == "src/a.py"))
            .collect();
        assert_eq!(a_completions.len(), 2);
        assert_eq!(
            a_completions[0],
            &FileEvent::Complete {
                path: "src/a.py".into(),
                content: "a1\n".into()
            }
        );
        assert_eq!(completed(&events)["src/a.py"], "a2\n");
    }

    #[test]
    fn completion_is_emitted_even_without_throttled_updates() {
        let events = stream("FILE: x.txt\n---\ntiny\n---\n", 100, None);
        assert!(!events.iter().any(|e| matches!(e, FileEvent::Content { .. })));
        assert_eq!(completed(&events)["src/x.txt"], "tiny\n");
    }

    #[test]
    fn growth_threshold_triggers_content_updates() {
        let throttle = Throttle {
            min_growth: 10,
            min_interval: Duration::from_secs(3600),
        };
        let mut ex = StreamingFileExtractor::files(None, throttle);
        let mut acc = String::from("FILE: big.txt\n");
        ex.feed(&acc);

        let mut updates = 0;
        for i in 0..20 {
            acc.push_str(&format!("line number {i}\n"));
            updates += ex
                .feed(&acc)
                .iter()
                .filter(|e| matches!(e, FileEvent::Content { .. }))
                .count();
        }
        assert!(updates >= 10, "expected frequent updates, got {updates}");

        let finals = ex.finish(&acc);
        let last = finals.last().unwrap();
        match last {
            FileEvent::Complete { content, .. } => assert!(content.ends_with("line number 19\n")),
            other => panic!("Expected Complete, got {:?}", other),
        }
    }

    #[test]
    fn throttle_measures_growth_of_the_raw_body() {
        let throttle = Throttle {
            min_growth: 5,
            min_interval: Duration::from_secs(3600),
        };
        let mut ex = StreamingFileExtractor::files(None, throttle);
        let mut acc = String::from("FILE: a.txt\n");
        let mut contents = Vec::new();
        for line in ["", "ab\n", "cd\n", "ef\n"] {
            acc.push_str(line);
            for event in ex.feed(&acc) {
                if let FileEvent::Content { content, .. } = event {
                    contents.push(content);
                }
            }
        }
        assert_eq!(contents, vec!["ab\n".to_string(), "ab\ncd\nef\n".to_string()]);
    }

    #[test]
    fn content_updates_carry_full_content_so_far() {
        let throttle = Throttle {
            min_growth: 0,
            min_interval: Duration::ZERO,
        };
        let mut ex = StreamingFileExtractor::files(None, throttle);
        ex.feed("FILE: a.txt\none\n");
        let events = ex.feed("FILE: a.txt\none\ntwo\n");
        assert_eq!(
            events,
            vec![FileEvent::Content {
                path: "src/a.txt".into(),
                content: "one\ntwo\n".into()
            }]
        );
    }

    #[test]
    fn unterminated_last_line_is_included_at_finish() {
        let events = stream("FILE: a.py\nprint('no newline')", 5, None);
        assert_eq!(completed(&events)["src/a.py"], "print('no newline')\n");
    }

    #[test]
    fn fallback_runs_only_when_no_marker_was_seen() {
        let text = "Here you go:\n```python\nprint(1)\n```\n```python\nprint(2)\n```\n";
        let events = stream(text, 6, None);
        let files = completed(&events);
        assert_eq!(files["src/main.py"], "print(1)\n");
        assert_eq!(files["src/main_2.py"], "print(2)\n");
        assert_eq!(
            extract_files(text, None)
                .into_iter()
                .map(|f| (f.path, f.content))
                .collect::<BTreeMap<_, _>>(),
            files
        );

        let with_marker = "FILE: a.py\n```python\nx\n```\n```python\ny\n```\n";
        let paths: Vec<String> = extract_files(with_marker, None)
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(paths, vec!["src/a.py"]);
    }

    #[test]
    fn nothing_recognized_yields_no_files() {
        assert!(extract_files("I could not produce any code.", None).is_empty());
        let events = stream("I could not produce any code.", 4, None);
        assert!(events.is_empty());
    }

    #[test]
    fn document_mode_maps_everything_to_fixed_path() {
        let mut ex = StreamingFileExtractor::for_stage(Some(Stage::Requirements), None, quiet());
        let mut events = ex.feed("# PRD\n");
        events.extend(ex.feed("# PRD\nFILE: not/a/file.py\n"));
        events.extend(ex.finish("# PRD\nFILE: not/a/file.py\n"));
        assert_eq!(
            events,
            vec![
                FileEvent::Opened {
                    path: crate::stage::PRD_PATH.into()
                },
                FileEvent::Content {
                    path: crate::stage::PRD_PATH.into(),
                    content: "# PRD\n".into()
                },
                FileEvent::Complete {
                    path: crate::stage::PRD_PATH.into(),
                    content: "# PRD\nFILE: not/a/file.py\n".into()
                },
            ]
        );
    }

    #[test]
    fn diverging_final_text_is_reparsed() {
        let mut ex = StreamingFileExtractor::files(None, quiet());
        ex.feed("FILE: a.py\nold\n");
        let events = ex.finish("FILE: b.py\nnew\n");
        let files = completed(&events);
        assert_eq!(files.len(), 1);
        assert_eq!(files["src/b.py"], "new\n");
    }

    #[test]
    fn feeding_after_finish_is_a_no_op() {
        let mut ex = StreamingFileExtractor::files(None, quiet());
        ex.finish("FILE: a.py\nx\n");
        assert!(ex.feed("FILE: a.py\nx\nFILE: b.py\n").is_empty());
        assert!(ex.finish("anything").is_empty());
    }
}
