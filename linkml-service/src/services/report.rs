//! Streaming serialization of lint findings into report documents.

use crate::models::LintProblem;
use serde::Deserialize;
use std::io::{self, Write};

/// Receives a report as a sequence of events: one start, one call per
/// finding, one end.
pub trait ReportFormatter {
    fn start_report(&mut self) -> io::Result<()>;
    fn handle_problem(&mut self, problem: &LintProblem) -> io::Result<()>;
    fn end_report(&mut self) -> io::Result<()>;
}

/// Writes findings as a JSON array, one object per element.
pub struct JsonFormatter<W: Write> {
    out: W,
    emitted: usize,
}

impl<W: Write> JsonFormatter<W> {
    pub fn new(out: W) -> Self {
        Self { out, emitted: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportFormatter for JsonFormatter<W> {
    fn start_report(&mut self) -> io::Result<()> {
        self.out.write_all(b"[")
    }

    fn handle_problem(&mut self, problem: &LintProblem) -> io::Result<()> {
        let separator: &[u8] = if self.emitted == 0 { b"\n  " } else { b",\n  " };
        self.out.write_all(separator)?;
        serde_json::to_writer(&mut self.out, problem)?;
        self.emitted += 1;
        Ok(())
    }

    fn end_report(&mut self) -> io::Result<()> {
        if self.emitted > 0 {
            self.out.write_all(b"\n")?;
        }
        self.out.write_all(b"]\n")?;
        self.out.flush()
    }
}

/// Writes findings as tab-separated rows under a header line.
pub struct TsvFormatter<W: Write> {
    out: W,
}

impl<W: Write> TsvFormatter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn tsv_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

impl<W: Write> ReportFormatter for TsvFormatter<W> {
    fn start_report(&mut self) -> io::Result<()> {
        self.out.write_all(b"level\tschema_name\trule_name\tmessage\n")
    }

    fn handle_problem(&mut self, problem: &LintProblem) -> io::Result<()> {
        writeln!(
            self.out,
            "{}\t{}\t{}\t{}",
            problem.level,
            tsv_field(problem.schema_name.as_deref().unwrap_or_default()),
            tsv_field(&problem.rule_name),
            tsv_field(&problem.message)
        )
    }

    fn end_report(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Report encodings offered by the validate endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Tsv,
}

impl ReportFormat {
    pub fn file_name(self) -> &'static str {
        match self {
            ReportFormat::Json => "validation_report.json",
            ReportFormat::Tsv => "validation_report.tsv",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            ReportFormat::Json => "application/json",
            ReportFormat::Tsv => "text/tab-separated-values; charset=utf-8",
        }
    }
}

/// Drives `formatter` over `problems` in order.
pub fn write_report<F: ReportFormatter>(
    formatter: &mut F,
    problems: &[LintProblem],
) -> io::Result<()> {
    formatter.start_report()?;
    for problem in problems {
        formatter.handle_problem(problem)?;
    }
    formatter.end_report()
}

/// Renders `problems` into an in-memory document.
pub fn render_report(problems: &[LintProblem], format: ReportFormat) -> io::Result<Vec<u8>> {
    match format {
        ReportFormat::Json => {
            let mut formatter = JsonFormatter::new(Vec::new());
            write_report(&mut formatter, problems)?;
            Ok(formatter.into_inner())
        }
        ReportFormat::Tsv => {
            let mut formatter = TsvFormatter::new(Vec::new());
            write_report(&mut formatter, problems)?;
            Ok(formatter.into_inner())
        }
    }
}
