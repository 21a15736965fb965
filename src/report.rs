//! Result aggregation and the text report.
//!
//! The reporter is the only writer of results. Sections nest through
//! [`Reporter::enter_section`]/[`Reporter::leave_section`]; a section's tally
//! is folded into its parent when it is left, so every ancestor's counts are
//! the sum of its children's.

use std::fmt;
use std::io::Write;

use facet::Facet;
use owo_colors::OwoColorize;

use crate::testcase::{Outcome, Verdict};

/// Pass/fail/skip counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Facet)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    fn absorb(&mut self, other: Tally) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Final counts for one section, including everything below it.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct SectionSummary {
    pub id: String,
    pub title: String,
    pub depth: usize,
    pub tally: Tally,
}

/// One executed case.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct CaseSummary {
    pub id: String,
    pub description: String,
    pub passed: bool,
    /// Requirement text, present on failure.
    pub requirement: Option<String>,
    /// What matched on success, why it failed otherwise.
    pub detail: String,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Sections in the order they were entered.
    pub sections: Vec<SectionSummary>,
    pub cases: Vec<CaseSummary>,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    /// 0 when nothing failed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 { 0 } else { 1 }
    }

    pub fn to_json(&self) -> String {
        facet_json::to_string(self)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tests, {} passed, {} skipped, {} failed",
            self.total(),
            self.passed,
            self.skipped,
            self.failed
        )
    }
}

struct Open {
    /// Index into `sections`; `None` for the implicit root.
    index: Option<usize>,
    depth: usize,
    tally: Tally,
}

/// Accumulates outcomes and writes the indented text report to `out`.
pub struct Reporter<W> {
    out: W,
    color: bool,
    quiet: bool,
    stack: Vec<Open>,
    sections: Vec<SectionSummary>,
    cases: Vec<CaseSummary>,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            color: true,
            quiet: false,
            stack: vec![Open {
                index: None,
                depth: 0,
                tally: Tally::default(),
            }],
            sections: Vec::new(),
            cases: Vec::new(),
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Collect results without writing any text.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn enter_section(&mut self, id: &str, title: &str, depth: usize) {
        let heading = format!("{}{}. {}", indent(depth), id, title);
        self.line(format_args!("{heading}"));

        self.sections.push(SectionSummary {
            id: id.to_string(),
            title: title.to_string(),
            depth,
            tally: Tally::default(),
        });
        self.stack.push(Open {
            index: Some(self.sections.len() - 1),
            depth,
            tally: Tally::default(),
        });
    }

    /// Close the innermost section and fold its counts into the parent.
    pub fn leave_section(&mut self) {
        if self.stack.len() <= 1 {
            tracing::warn!("leave_section without a matching enter_section");
            return;
        }
        let Some(open) = self.stack.pop() else {
            return;
        };
        if let Some(index) = open.index {
            self.sections[index].tally = open.tally;
        }
        self.current().absorb(open.tally);

        if open.depth == 0 {
            self.line(format_args!(""));
        }
    }

    /// Record one case result under the current section.
    pub fn record(&mut self, outcome: &Outcome, depth: usize) {
        let pad = indent(depth + 1);
        match &outcome.verdict {
            Verdict::Pass { matched } => {
                self.current().passed += 1;
                let mark = self.paint_pass("✓");
                self.line(format_args!("{pad}{mark} {}", outcome.description));
                self.cases.push(CaseSummary {
                    id: outcome.id.clone(),
                    description: outcome.description.to_string(),
                    passed: true,
                    requirement: None,
                    detail: matched.clone(),
                });
            }
            Verdict::Fail(reason) => {
                self.current().failed += 1;
                let mark = self.paint_fail("✗");
                let requirement = self.paint_fail(&format!("- {}", outcome.requirement));
                let detail = reason.to_string();
                let pad2 = indent(depth + 2);
                self.line(format_args!("{pad}{mark} {}", outcome.description));
                self.line(format_args!("{pad2}{requirement}"));
                self.line(format_args!("{pad2}  {detail}"));
                self.cases.push(CaseSummary {
                    id: outcome.id.clone(),
                    description: outcome.description.to_string(),
                    passed: false,
                    requirement: Some(outcome.requirement.to_string()),
                    detail,
                });
            }
        }
    }

    /// Count `n` cases that the filter excluded.
    pub fn skip(&mut self, n: usize) {
        self.current().skipped += n;
    }

    /// Tally of the innermost open section (the root when none is open).
    pub fn tally(&self) -> Tally {
        self.stack.last().map(|open| open.tally).unwrap_or_default()
    }

    /// Close any sections still open, print the summary line and return it.
    pub fn finish(mut self) -> Summary {
        while self.stack.len() > 1 {
            self.leave_section();
        }
        let root = self.tally();
        let summary = Summary {
            passed: root.passed,
            failed: root.failed,
            skipped: root.skipped,
            sections: std::mem::take(&mut self.sections),
            cases: std::mem::take(&mut self.cases),
        };
        let text = if summary.failed == 0 {
            self.paint_pass(&summary.to_string())
        } else {
            self.paint_fail(&summary.to_string())
        };
        self.line(format_args!("{text}"));
        let _ = self.out.flush();
        summary
    }

    /// Borrow the output, e.g. to inspect a `Vec<u8>` in tests.
    pub fn output(&self) -> &W {
        &self.out
    }

    fn current(&mut self) -> &mut Tally {
        // the root entry is never popped
        let last = self.stack.len() - 1;
        &mut self.stack[last].tally
    }

    fn paint_pass(&self, text: &str) -> String {
        if self.color {
            text.green().to_string()
        } else {
            text.to_string()
        }
    }

    fn paint_fail(&self, text: &str) -> String {
        if self.color {
            text.red().to_string()
        } else {
            text.to_string()
        }
    }

    // A broken stdout must not abort the run.
    fn line(&mut self, args: fmt::Arguments<'_>) {
        if !self.quiet {
            let _ = writeln!(self.out, "{args}");
        }
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testcase::FailReason;

    fn pass(id: &str) -> Outcome {
        Outcome {
            id: id.to_string(),
            description: "Sends invalid header block fragment",
            requirement: "The endpoint MUST terminate the connection with a connection error of type COMPRESSION_ERROR.",
            verdict: Verdict::Pass {
                matched: "GOAWAY(COMPRESSION_ERROR)".to_string(),
            },
        }
    }

    fn fail(id: &str, reason: FailReason) -> Outcome {
        Outcome {
            verdict: Verdict::Fail(reason),
            ..pass(id)
        }
    }

    fn text(reporter: &Reporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.output().clone()).unwrap()
    }

    #[test]
    fn nested_counts_roll_up() {
        let mut reporter = Reporter::new(Vec::new()).with_color(false);

        reporter.enter_section("8.1", "HTTP Request/Response Exchange", 0);
        reporter.enter_section("8.1.2", "HTTP Header Fields", 1);
        reporter.record(&pass("8.1.2#1"), 1);
        reporter.enter_section("8.1.2.1", "Pseudo-Header Fields", 2);
        reporter.record(&fail("8.1.2.1#1", FailReason::ConnectionClosed), 2);
        reporter.record(&pass("8.1.2.1#2"), 2);
        reporter.leave_section();
        reporter.skip(2);
        reporter.leave_section();
        reporter.leave_section();

        let summary = reporter.finish();
        assert_eq!((summary.passed, summary.failed, summary.skipped), (2, 1, 2));
        assert_eq!(summary.exit_code(), 1);

        let by_id = |id: &str| summary.sections.iter().find(|s| s.id == id).unwrap().tally;
        assert_eq!(by_id("8.1.2.1"), Tally { passed: 1, failed: 1, skipped: 0 });
        assert_eq!(by_id("8.1.2"), Tally { passed: 2, failed: 1, skipped: 2 });
        assert_eq!(by_id("8.1"), by_id("8.1.2"));
    }

    #[test]
    fn failure_lines_carry_requirement_and_diagnostic() {
        let mut reporter = Reporter::new(Vec::new()).with_color(false);
        reporter.enter_section("4.3", "Header Compression and Decompression", 0);
        reporter.record(&fail("4.3#1", FailReason::ConnectionClosed), 0);
        reporter.leave_section();

        let out = text(&reporter);
        let expected = "\
4.3. Header Compression and Decompression
  ✗ Sends invalid header block fragment
    - The endpoint MUST terminate the connection with a connection error of type COMPRESSION_ERROR.
      connection closed before match

";
        assert_eq!(out, expected);
    }

    #[test]
    fn passing_run_exits_zero() {
        let mut reporter = Reporter::new(Vec::new()).with_color(false);
        reporter.enter_section("4.3", "Header Compression and Decompression", 0);
        reporter.record(&pass("4.3#1"), 0);
        reporter.leave_section();
        let summary = reporter.finish();

        assert_eq!(summary.exit_code(), 0);
        assert_eq!(summary.to_string(), "1 tests, 1 passed, 0 skipped, 0 failed");
    }

    #[test]
    fn finish_closes_open_sections() {
        let mut reporter = Reporter::new(Vec::new()).with_color(false);
        reporter.enter_section("4.2", "Frame Size", 0);
        reporter.record(
            &fail("4.2#1", FailReason::Timeout(Duration::from_secs(2))),
            0,
        );
        let summary = reporter.finish();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.sections[0].tally.failed, 1);
    }

    #[test]
    fn stray_leave_is_ignored() {
        let mut reporter = Reporter::new(Vec::new()).with_color(false);
        reporter.leave_section();
        reporter.record(&pass("x#1"), 0);
        assert_eq!(reporter.tally().passed, 1);
    }

    #[test]
    fn quiet_reporter_writes_nothing() {
        let mut reporter = Reporter::new(Vec::new()).quiet(true);
        reporter.enter_section("4.2", "Frame Size", 0);
        reporter.record(&pass("4.2#1"), 0);
        let summary = reporter.finish();
        assert_eq!(summary.passed, 1);
    }

    #[test]
    fn json_summary_mentions_failures() {
        let mut reporter = Reporter::new(Vec::new()).quiet(true);
        reporter.record(&fail("4.2#1", FailReason::ConnectionClosed), 0);
        let json = reporter.finish().to_json();
        assert!(json.contains("\"failed\":1"), "{json}");
        assert!(json.contains("connection closed before match"), "{json}");
    }
}
