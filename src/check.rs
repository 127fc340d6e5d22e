//! Live diagnostics for one source unit.
//!
//! The unit is opened in the analysis engine if needed, re-analysis is
//! requested, and the marker count is polled until two consecutive readings
//! agree with the first or the timeout expires. Error markers are then
//! harvested with their surrounding source lines. A timeout is not a
//! failure: the report carries whatever was harvested plus a caveat.

use crate::config::Config;
use crate::error::{ProbeError, ProbeResult};
use crate::host::{AnalysisEngine, SourceText};
use crate::model::{
    CheckState, Declaration, Diagnostic, DiagnosticsReport, IndexState, Marker, Resolution,
    Severity, SourceUnit,
};
use crate::resolve;
use crate::txn::{Coordinator, ProjectModel};
use crate::util::{CONTEXT_RADIUS, clean_message, context_window};
use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Consecutive equal readings that count as settled.
const STABLE_READINGS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    pub timeout: Duration,
    pub poll: Duration,
    pub open_delay: Duration,
    pub trigger_delay: Duration,
}

impl CheckOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.check_timeout(),
            poll: config.check_poll(),
            open_delay: config.open_delay(),
            trigger_delay: config.trigger_delay(),
        }
    }
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Tracks marker counts across polls.
#[derive(Debug, Default)]
struct Stability {
    last: Option<usize>,
    streak: u32,
}

impl Stability {
    /// Record a reading; true once it settles.
    fn observe(&mut self, count: usize) -> bool {
        if self.last == Some(count) {
            self.streak += 1;
        } else {
            self.streak = 0;
            self.last = Some(count);
        }
        self.streak >= STABLE_READINGS
    }
}

pub fn check_errors<M: ProjectModel>(
    coordinator: &Coordinator<M>,
    input: &str,
    options: CheckOptions,
) -> ProbeResult<DiagnosticsReport> {
    let started = Instant::now();
    let project = coordinator.project()?;
    let engine = project.engine();
    if engine.index_state() == IndexState::Building {
        return Err(ProbeError::IndexBuilding);
    }

    let decl = coordinator.run_read(|txn| -> ProbeResult<Declaration> {
        match resolve::resolve(txn, input)? {
            Resolution::Single(decl) => Ok(decl),
            Resolution::Ambiguous(matches) => Err(ProbeError::ambiguous(input, matches)),
            Resolution::NotFound => Err(ProbeError::not_found(input)),
        }
    })??;
    let unit = decl.unit.clone();

    let mut notes = Vec::new();
    let mut caveat = None;
    let mut polls = 0;
    let state = if engine.is_unit_open(&unit) {
        notes.push("unit already open; harvested current analysis".to_string());
        CheckState::AlreadyOpen
    } else {
        open_unit(engine, &unit, options, &mut notes);
        request_analysis(engine, &unit, options, &mut notes);
        let (state, readings) = wait_for_stable(coordinator, engine, &unit, options);
        polls = readings;
        if state == CheckState::TimedOut {
            caveat = Some(format!(
                "analysis did not settle within {} ms; results may be incomplete",
                options.timeout.as_millis()
            ));
        }
        state
    };

    // Markers and source text come from one snapshot so context lines match.
    let (errors, warning_count, info_count) = coordinator.run_read(|txn| {
        let markers = match engine.diagnostic_markers(txn, &unit) {
            Ok(markers) => markers,
            Err(err) => {
                warn!(path = %unit.path, "reading markers failed: {err:#}");
                notes.push(format!("reading markers failed: {err:#}"));
                Vec::new()
            }
        };
        harvest(txn, &unit, &markers, &mut notes)
    })?;

    let report = DiagnosticsReport {
        class: decl.qualname,
        file_name: unit.name,
        path: unit.path,
        state,
        errors,
        warning_count,
        info_count,
        notes,
        caveat,
        polls,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        path = %report.path,
        state = report.state.as_str(),
        errors = report.errors.len(),
        polls = report.polls,
        elapsed_ms = report.elapsed_ms,
        "diagnostics check finished"
    );
    Ok(report)
}

/// Best effort: an unconfirmed open is noted and the check carries on.
fn open_unit(
    engine: &dyn AnalysisEngine,
    unit: &SourceUnit,
    options: CheckOptions,
    notes: &mut Vec<String>,
) {
    if let Err(err) = engine.open_unit(unit) {
        notes.push(format!("open request failed: {err:#}; continuing best effort"));
        return;
    }
    thread::sleep(options.open_delay);
    if engine.is_unit_open(unit) {
        notes.push("opened unit".to_string());
        return;
    }
    thread::sleep(options.open_delay);
    if engine.is_unit_open(unit) {
        notes.push("opened unit after retry".to_string());
    } else {
        notes.push("open not confirmed; continuing best effort".to_string());
    }
}

fn request_analysis(
    engine: &dyn AnalysisEngine,
    unit: &SourceUnit,
    options: CheckOptions,
    notes: &mut Vec<String>,
) {
    if let Err(err) = engine.trigger_analysis(unit) {
        notes.push(format!("analysis request failed: {err:#}"));
    }
    thread::sleep(options.trigger_delay);
}

/// Returns the terminal state and the number of counted readings. Each
/// reading takes its own read transaction.
fn wait_for_stable<M: ProjectModel>(
    coordinator: &Coordinator<M>,
    engine: &dyn AnalysisEngine,
    unit: &SourceUnit,
    options: CheckOptions,
) -> (CheckState, u32) {
    let started = Instant::now();
    let mut stability = Stability::default();
    let mut readings = 0;
    while started.elapsed() < options.timeout {
        if engine.index_state() == IndexState::Building {
            thread::sleep(options.poll);
            continue;
        }
        if !engine.is_document_committed(unit) {
            thread::sleep(options.poll);
            continue;
        }
        match coordinator.run_read(|txn| engine.diagnostic_markers(txn, unit)) {
            Ok(Ok(markers)) => {
                readings += 1;
                if stability.observe(markers.len()) {
                    return (CheckState::Stable, readings);
                }
            }
            Ok(Err(err)) => debug!(path = %unit.path, "marker poll failed: {err:#}"),
            Err(err) => debug!(path = %unit.path, "marker poll failed: {err}"),
        }
        thread::sleep(options.poll);
    }
    (CheckState::TimedOut, readings)
}

/// Error diagnostics plus warning and info counts. With no error markers the
/// unit's text is scanned for parse errors instead.
fn harvest(
    source: &impl SourceText,
    unit: &SourceUnit,
    markers: &[Marker],
    notes: &mut Vec<String>,
) -> (Vec<Diagnostic>, usize, usize) {
    let warning_count = markers
        .iter()
        .filter(|m| m.severity == Severity::Warning)
        .count();
    let info_count = markers
        .iter()
        .filter(|m| m.severity == Severity::Info)
        .count();
    let has_errors = markers.iter().any(|m| m.severity == Severity::Error);
    let fallback = if has_errors {
        Vec::new()
    } else {
        match source.parse_errors(unit) {
            Ok(found) => {
                notes.push(format!(
                    "no error markers; structural parse scan found {}",
                    found.len()
                ));
                found
            }
            Err(err) => {
                notes.push(format!("structural parse scan failed: {err:#}"));
                Vec::new()
            }
        }
    };
    let errors = markers
        .iter()
        .chain(fallback.iter())
        .filter(|m| m.severity == Severity::Error);

    let text = match source.unit_text(unit) {
        Ok(text) => text,
        Err(err) => {
            notes.push(format!("source text unavailable: {err:#}"));
            String::new()
        }
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for marker in errors {
        let message = clean_message(&marker.message);
        if !seen.insert((marker.line, message.clone())) {
            continue;
        }
        out.push(Diagnostic {
            severity: Severity::Error,
            line: marker.line,
            message,
            context: context_window(&text, marker.line, CONTEXT_RADIUS),
        });
    }
    out.sort_by_key(|d| d.line);
    (out, warning_count, info_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};

    #[test]
    fn settles_on_the_second_equal_reading() {
        let mut stability = Stability::default();
        assert!(!stability.observe(5));
        assert!(!stability.observe(5));
        assert!(stability.observe(5));
    }

    #[test]
    fn a_changed_count_restarts_the_streak() {
        let mut stability = Stability::default();
        let readings = [5, 6, 6, 7, 7, 7];
        let settled: Vec<bool> = readings.iter().map(|c| stability.observe(*c)).collect();
        assert_eq!(settled, vec![false, false, false, false, false, true]);
    }

    struct Source {
        text: &'static str,
        parse: Vec<Marker>,
    }

    impl SourceText for Source {
        fn unit_text(&self, _unit: &SourceUnit) -> Result<String> {
            Ok(self.text.to_string())
        }

        fn markers(&self, _unit: &SourceUnit) -> Result<Vec<Marker>> {
            Ok(Vec::new())
        }

        fn parse_errors(&self, _unit: &SourceUnit) -> Result<Vec<Marker>> {
            if self.parse.is_empty() {
                return Err(anyhow!("parser unavailable"));
            }
            Ok(self.parse.clone())
        }
    }

    fn marker(severity: Severity, line: i64, message: &str) -> Marker {
        Marker {
            severity,
            line,
            start_byte: 0,
            end_byte: 0,
            message: message.to_string(),
        }
    }

    fn unit() -> SourceUnit {
        SourceUnit {
            path: "src/A.java".to_string(),
            name: "A.java".to_string(),
            exists: true,
        }
    }

    #[test]
    fn harvest_renders_errors_and_counts_the_rest() {
        let source = Source {
            text: "a\nb\nc\nd\ne\n",
            parse: Vec::new(),
        };
        let markers = vec![
            marker(Severity::Warning, 1, "Unused import statement"),
            marker(Severity::Error, 4, "Error: ';' expected"),
            marker(Severity::Error, 4, "';' expected"),
            marker(Severity::Error, 2, "cannot find symbol"),
        ];
        let mut notes = Vec::new();
        let (errors, warnings, infos) = harvest(&source, &unit(), &markers, &mut notes);
        assert_eq!((warnings, infos), (1, 0));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].line, 2);
        assert_eq!(errors[1].message, "';' expected");
        let lines: Vec<i64> = errors[1].context.iter().map(|c| c.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4, 5]);
        assert!(notes.is_empty());
    }

    #[test]
    fn harvest_falls_back_to_parse_scan() {
        let source = Source {
            text: "x\ny\n",
            parse: vec![marker(Severity::Error, 2, "illegal start of expression")],
        };
        let mut notes = Vec::new();
        let (errors, _, _) = harvest(&source, &unit(), &[], &mut notes);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].context.iter().any(|c| c.marked && c.line == 2));
        assert!(notes[0].contains("structural parse scan found 1"));
    }
}
