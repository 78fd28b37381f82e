//! Result analysis: pass/fail counts and the per-case report.

pub mod report;

use std::io::{self, Write};

use colored::Colorize;

use crate::matrix::Batch;

/// Aggregate counts of a completed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl Summary {
    /// Count a batch. Cases that never ran count as failed.
    pub fn of(batch: &Batch) -> Self {
        let passed = batch.iter().filter(|c| c.outcome.is_pass()).count();
        Self {
            passed,
            failed: batch.len() - passed,
            total: batch.len(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Write the report for `batch` to `out` and return its summary.
///
/// Failed cases are always listed, passed cases only when `verbose`.
/// Failure details are shown in verbose mode.
pub fn analyze(batch: &Batch, verbose: bool, out: &mut impl Write) -> io::Result<Summary> {
    for case in batch {
        let line = report::describe(case);
        if !case.outcome.is_pass() {
            if verbose {
                writeln!(out, "{} {}: {}", "FAIL!".red(), line, case.outcome.detail())?;
            } else {
                writeln!(out, "{} {}", "FAIL!".red(), line)?;
            }
        } else if verbose {
            writeln!(out, "{} {}", "PASS!".green(), line)?;
        }
    }

    let summary = Summary::of(batch);
    let counts = format!(
        "{} | {} | {}",
        format!("RUN: {}", summary.total).yellow(),
        format!("PASSED: {}", summary.passed).green(),
        format!("FAILED: {}", summary.failed).red()
    );
    let verdict = if summary.is_success() {
        "SUCCESS!".green()
    } else {
        "FAIL!".red()
    };
    writeln!(out, "----------")?;
    writeln!(out, "{verdict} -- {counts}")?;
    Ok(summary)
}
