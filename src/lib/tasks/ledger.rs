//! Exit-code ledger written by the in-container script runner.
//!
//! The runner appends one exit code per line after each command. Reads come
//! back through a terminal and may carry stray bytes, so anything that is
//! not a digit is dropped before parsing and lines left without a number
//! are skipped.

/// Parses the raw ledger bytes into the exit codes they record.
pub fn exit_codes(raw: &[u8]) -> Vec<i32> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(|line| {
            let digits: String = line.chars().filter(|c| c.is_ascii_digit()).collect();
            digits.parse::<i32>().ok()
        })
        .collect()
}

/// Number of commands the ledger says have completed.
pub fn completed_commands(raw: &[u8]) -> usize {
    exit_codes(raw).len()
}
