//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the conversation core MUST NOT call sleep
//! methods. Turns wait on channels, cancellation tokens and timeouts, never
//! on the clock.
//! **Exceptions**: test code

use architectural_enforcement::{code_part, core_src_dir, scan};

fn is_sleep_call(lines: &[&str], idx: usize) -> bool {
    let code = code_part(lines[idx]);
    code.contains("::sleep(") || code.contains(".sleep(")
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(&core_src_dir(), is_sleep_call);

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse instead:");
        eprintln!("  - tokio::time::timeout around the awaited event");
        eprintln!("  - CancellationToken::cancelled() for interrupts");
        eprintln!("  - oneshot / mpsc channels for ordering");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_sleep_detection() {
    let code = vec![
        "async fn poll() {",
        "    tokio::time::sleep(Duration::from_millis(10)).await;",
        "    // std::thread::sleep(d) is also caught when not commented out",
        "}",
    ];
    assert!(!is_sleep_call(&code, 0));
    assert!(is_sleep_call(&code, 1));
    assert!(!is_sleep_call(&code, 2));
}
