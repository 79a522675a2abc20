//! Production Code Enforcement
//!
//! Library sources must propagate errors instead of unwrapping them, and
//! must not silence dead code warnings. Everything from the first
//! `#[cfg(test)]` line of a file onwards is test code and exempt.

use std::fs;
use std::path::{Path, PathBuf};

/// Source roots of the library crates, relative to this crate.
const SOURCE_ROOTS: &[&str] = &["../faultline-core/src", "../faultline-harness/src"];

#[derive(Debug)]
struct Violation {
    file_path: String,
    line_number: usize,
    rule: &'static str,
    context: String,
}

fn find_rust_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            find_rust_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
    Ok(())
}

fn check_source(file_path: &str, content: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed == "#[cfg(test)]" {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }

        let rule = if trimmed.contains("#[allow(") && trimmed.contains("dead_code") {
            Some("dead code allowance")
        } else if trimmed.contains(".unwrap()") {
            Some("unwrap in production code")
        } else {
            None
        };
        if let Some(rule) = rule {
            violations.push(Violation {
                file_path: file_path.to_string(),
                line_number: index + 1,
                rule,
                context: trimmed.to_string(),
            });
        }
    }
    violations
}

#[test]
fn test_production_code_rules() {
    let mut files = Vec::new();
    for root in SOURCE_ROOTS {
        find_rust_files(Path::new(root), &mut files).unwrap();
    }
    assert!(!files.is_empty(), "no sources found under {SOURCE_ROOTS:?}");

    let violations: Vec<Violation> = files
        .iter()
        .flat_map(|path| {
            let content = fs::read_to_string(path).unwrap();
            check_source(&path.display().to_string(), &content)
        })
        .collect();

    if !violations.is_empty() {
        for v in &violations {
            eprintln!("{}:{}: {}: {}", v.file_path, v.line_number, v.rule, v.context);
        }
        panic!("{} production code violations found", violations.len());
    }
}

#[test]
fn test_checker_exempts_test_modules() {
    let source = "\
fn run() -> Result<(), Error> {
    // .unwrap() would panic here
    step()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_run() {
        run().unwrap();
    }
}
";
    assert!(check_source("lib.rs", source).is_empty());
}

#[test]
fn test_checker_flags_violations() {
    let source = "\
#[allow(dead_code)]
fn unused() {}

fn run() {
    step().unwrap();
}
";
    let violations = check_source("lib.rs", source);
    let rules: Vec<_> = violations.iter().map(|v| (v.line_number, v.rule)).collect();
    assert_eq!(
        rules,
        [(1, "dead code allowance"), (5, "unwrap in production code")]
    );
}
