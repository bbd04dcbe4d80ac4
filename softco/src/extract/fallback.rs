//! Best-effort recovery when a transcript contains no `FILE:` markers at all:
//! pull labeled fenced code blocks out of the text and name them from their
//! language tag.

use std::collections::HashMap;

use super::parser::canonical_content;

/// File name synthesized for a language tag.
fn synthesized_name(lang: &str) -> String {
    let name = match lang {
        "python" | "py" => "main.py",
        "javascript" | "js" | "node" => "main.js",
        "typescript" | "ts" => "main.ts",
        "jsx" => "App.jsx",
        "tsx" => "App.tsx",
        "html" => "index.html",
        "css" => "style.css",
        "json" => "data.json",
        "rust" | "rs" => "main.rs",
        "go" | "golang" => "main.go",
        "java" => "Main.java",
        "c" => "main.c",
        "cpp" | "c++" | "cc" => "main.cpp",
        "bash" | "sh" | "shell" | "zsh" => "run.sh",
        "yaml" | "yml" => "config.yaml",
        "toml" => "config.toml",
        "sql" => "schema.sql",
        "markdown" | "md" => "README.md",
        "dockerfile" | "docker" => "Dockerfile",
        "text" | "txt" | "plaintext" => "notes.txt",
        other => {
            let ext: String = other.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            return if ext.is_empty() {
                "main.txt".to_string()
            } else {
                format!("main.{ext}")
            };
        }
    };
    name.to_string()
}

/// `main.py` → `main_2.py`, `Dockerfile` → `Dockerfile_2`.
fn numbered(name: &str, n: usize) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{name}_{n}"),
    }
}

/// Parse a fence info string into `(language, explicit path)`.
fn parse_info(info: &str) -> Option<(String, Option<String>)> {
    let info = info.trim();
    if info.is_empty() {
        return None;
    }
    let (lang, path) = match info.split_once(':') {
        Some((lang, path)) => (lang.trim(), Some(path.trim()).filter(|p| !p.is_empty())),
        None => (info.split_whitespace().next().unwrap_or(info), None),
    };
    if lang.is_empty() {
        return None;
    }
    Some((lang.to_ascii_lowercase(), path.map(str::to_string)))
}

/// Extract `(raw path, content)` pairs from labeled fenced blocks, in order.
///
/// Unlabeled fences are skipped. An unterminated block at end of text is
/// still returned. Repeated synthesized names are numbered rather than
/// overwriting each other; explicit paths are kept as written.
pub fn fenced_blocks(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut name_counts: HashMap<String, usize> = HashMap::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(info) = line.trim_start().strip_prefix("```") else {
            continue;
        };
        let label = parse_info(info);

        let mut body = String::new();
        for inner in lines.by_ref() {
            if inner.trim() == "```" {
                break;
            }
            body.push_str(inner);
            body.push('\n');
        }

        let Some((lang, path)) = label else {
            continue;
        };
        let name = match path {
            Some(path) => path,
            None => {
                let base = synthesized_name(&lang);
                let count = name_counts.entry(base.clone()).or_insert(0);
                *count += 1;
                if *count == 1 { base } else { numbered(&base, *count) }
            }
        };
        out.push((name, canonical_content(&body)));
    }
    out
}
