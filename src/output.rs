use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    CacheRefreshResult, CacheTestResult, CacheUpdateResult, OntologyFetchResult, ProgressEvent,
    ProgressSink,
};
use crate::match_cache::MatchSummary;
use crate::transform::TransformReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_update(result: &CacheUpdateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_refresh(result: &CacheRefreshResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_test(result: &CacheTestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_summary(summary: &MatchSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_transform(report: &TransformReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_ontology(result: &OntologyFetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct ConsoleOutput;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

impl ConsoleOutput {
    pub fn print_match_summary(summary: &MatchSummary) {
        println!("{CYAN}UniProt match cache{RESET}");
        println!("{GREEN}  primary:   {}{RESET}", summary.primary);
        println!("{YELLOW}  secondary: {}{RESET}", summary.secondary);
        println!("{RED}  none:      {}{RESET}", summary.none);
        println!(
            "  total:     {} ({:.1}% primary)",
            summary.total(),
            summary.primary_percent()
        );
    }

    pub fn print_update(result: &CacheUpdateResult) {
        println!(
            "{CYAN}requested {}, fetched {}, missing {}{RESET}",
            result.reload.requested, result.reload.fetched, result.reload.missing
        );
        Self::print_refresh_outcome(&result.refresh);
        println!("  reference records: {}", result.references);
        Self::print_match_summary(&result.summary);
    }

    pub fn print_refresh(result: &CacheRefreshResult) {
        Self::print_refresh_outcome(&result.refresh);
        Self::print_match_summary(&result.summary);
    }

    pub fn print_test(result: &CacheTestResult) {
        println!(
            "{GREEN}cache accepted: {} records, {:.1}% primary{RESET}",
            result.summary.total(),
            result.primary_percent
        );
    }

    pub fn print_transform(report: &TransformReport) {
        let color = if report.ok && report.failed.is_empty() {
            GREEN
        } else {
            YELLOW
        };
        let mode = if report.dry_run { " (dry run)" } else { "" };
        println!(
            "{color}{}{mode}: processed {}, changed {}, written {}, failed {}{RESET}",
            report.collection,
            report.processed,
            report.changed,
            report.written,
            report.failed.len()
        );
        for key in &report.failed {
            println!("{RED}  failed: {key}{RESET}");
        }
        if !report.ok {
            println!("{RED}  write-back failed{RESET}");
        }
    }

    pub fn print_ontology(result: &OntologyFetchResult) {
        println!(
            "{GREEN}gene ontology {} -> {}{RESET}",
            result.go_version.as_deref().unwrap_or("unknown version"),
            result.go_path
        );
        println!("{GREEN}enzyme classes -> {}{RESET}", result.enzyme_path);
    }

    fn print_refresh_outcome(refresh: &crate::match_cache::RefreshOutcome) {
        let color = if refresh.purged.is_empty() && refresh.failed.is_empty() {
            GREEN
        } else {
            YELLOW
        };
        println!(
            "{color}expired {}, failed {}, purged {}{RESET}",
            refresh.expired,
            refresh.failed.len(),
            refresh.purged.len()
        );
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        let mut stderr = io::stderr();
        let _ = match event.elapsed {
            Some(elapsed) => writeln!(
                stderr,
                "{CYAN}{}{RESET} ({:.1}s)",
                event.message,
                elapsed.as_secs_f64()
            ),
            None => writeln!(stderr, "{CYAN}{}{RESET}", event.message),
        };
    }
}
