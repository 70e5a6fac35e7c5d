//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in the conversation core MUST NOT use blocking
//! I/O. Audio files are read and removed with `tokio::fs`.
//! **Acceptable**: non-async functions (configuration loading happens before
//! any turn runs) and test code.

use architectural_enforcement::{code_part, core_src_dir, in_async_function, scan};

const BLOCKING: &[&str] = &["std::fs::", "std::net::", "std::process::", "std::thread::spawn"];

fn is_blocking_io_in_async(lines: &[&str], idx: usize) -> bool {
    let code = code_part(lines[idx]);
    BLOCKING.iter().any(|pattern| code.contains(pattern)) && in_async_function(lines, idx)
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(&core_src_dir(), is_blocking_io_in_async);

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async functions:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse instead:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::remove_file().await");
        eprintln!("  - tokio::task::spawn_blocking for CPU-bound decoding");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.",
            violations.len()
        );
    }
}

#[test]
fn test_sync_config_loading_is_allowed() {
    let code = vec![
        "pub fn load_config_from_path(path: Option<PathBuf>) -> Result<Config, ConfigError> {",
        "    let toml_content = std::fs::read_to_string(config_path)?;",
        "}",
        "pub async fn prepare(path: &Path) -> Vec<u8> {",
        "    std::fs::read(path).unwrap_or_default()",
        "}",
    ];
    assert!(!is_blocking_io_in_async(&code, 1));
    assert!(is_blocking_io_in_async(&code, 4));
}
