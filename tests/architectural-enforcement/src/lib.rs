//! Architectural Enforcement Integration Tests
//!
//! Source scans that keep the conversation core honest:
//! - No sleep() calls in production code (turns wait on I/O and signals)
//! - No blocking file or network I/O inside async functions
//!
//! Test modules are ignored: everything from the first `#[cfg(test)]` of a
//! file onwards is treated as test code.

use std::fs;
use std::path::{Path, PathBuf};

/// One offending source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the line belongs to
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The trimmed line
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// `conductor/core/src` of this workspace
pub fn core_src_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("conductor")
        .join("core")
        .join("src")
}

/// Every `.rs` file under `dir`
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect()
}

/// Lines before the file's test module
pub fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| line.trim() != "#[cfg(test)]")
        .collect()
}

/// Code part of a line, without its `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether the nearest enclosing `fn` above `idx` is async
pub fn in_async_function(lines: &[&str], idx: usize) -> bool {
    for line in lines[..=idx].iter().rev() {
        let code = code_part(line).trim();
        if let Some(pos) = code.find("fn ") {
            let is_declaration = pos == 0
                || code[..pos].ends_with(' ')
                    && code[..pos]
                        .split_whitespace()
                        .all(|w| matches!(w, "pub" | "pub(crate)" | "async" | "const" | "unsafe"));
            if is_declaration {
                return code[..pos].contains("async");
            }
        }
    }
    false
}

/// Scan the production lines of every file under `dir` with `check`
pub fn scan<F>(dir: &Path, check: F) -> Vec<Violation>
where
    F: Fn(&[&str], usize) -> bool,
{
    let mut violations = Vec::new();
    for path in rust_files(dir) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let lines = production_lines(&content);
        for idx in 0..lines.len() {
            if check(&lines, idx) {
                violations.push(Violation {
                    path: path.clone(),
                    line: idx + 1,
                    text: lines[idx].trim().to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(production_lines(content), vec!["fn a() {}", ""]);
    }

    #[test]
    fn test_async_function_detection() {
        let code = vec![
            "pub fn load() -> String {",
            "    std::fs::read_to_string(\"x\").unwrap()",
            "}",
            "",
            "pub(crate) async fn fetch() {",
            "    let data = std::fs::read(\"x\");",
            "}",
        ];
        assert!(!in_async_function(&code, 1));
        assert!(in_async_function(&code, 5));
    }

    #[test]
    fn test_fn_pointer_types_are_not_declarations() {
        let code = vec![
            "async fn run() {",
            "    let f: Box<dyn Fn() -> u8> = Box::new(|| 1);",
            "    std::fs::read(\"x\");",
            "}",
        ];
        assert!(in_async_function(&code, 2));
    }

    #[test]
    fn test_core_src_dir_exists() {
        assert!(core_src_dir().join("lib.rs").exists());
    }
}
