use rollcall_core::{AttendanceRecord, Enrollment, LogOutcome, Progress, ProgressSink, Verification};
use std::io::Write;

/// Prints collection progress to stderr.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    skipped: usize,
}

impl ProgressSink for ConsoleProgress {
    fn report(&mut self, progress: &Progress) {
        let mut err = std::io::stderr().lock();
        let _ = match progress {
            Progress::Frame {
                index,
                total,
                identity,
                similarity,
                liveness,
            } => writeln!(
                err,
                "  frame {index}/{total}: {:<16} sim={similarity:.3} live={liveness:.3}",
                identity.as_deref().unwrap_or("UNKNOWN")
            ),
            Progress::Sample {
                collected,
                total,
                accepted,
                liveness,
            } => {
                if *accepted {
                    writeln!(err, "  sample {collected}/{total} live={liveness:.3}")
                } else {
                    writeln!(err, "  sample discarded (live={liveness:.3} too low), keep looking at the camera")
                }
            }
            Progress::Skipped { faces } => {
                self.skipped += 1;
                if *faces > 1 && self.skipped % 10 == 1 {
                    writeln!(err, "  {faces} faces in view, only one person at a time")
                } else {
                    Ok(())
                }
            }
        };
    }
}

pub fn verification_line(v: &Verification) -> String {
    let d = &v.decision;
    let mut line = format!(
        "{:<8} {:<16} {:<3} sim={:.3} live={:.3} conf={:.3}",
        d.status.as_str(),
        d.identity.as_deref().unwrap_or("-"),
        v.action.as_str(),
        d.avg_similarity,
        d.avg_liveness,
        d.final_confidence,
    );
    if let Some(reason) = d.rejection {
        line.push_str(&format!(" reason={reason}"));
    }
    if v.log == LogOutcome::DuplicateSuppressed {
        line.push_str(" (duplicate, not logged)");
    }
    line
}

pub fn enrollment_line(e: &Enrollment) -> String {
    format!(
        "{} {} from {} samples ({} dimensions)",
        if e.replaced { "Re-enrolled" } else { "Enrolled" },
        e.name,
        e.samples,
        e.template.dim()
    )
}

pub fn record_line(r: &AttendanceRecord) -> String {
    format!(
        "{}  {:<16} {:<3} {:<8} conf={:.3}{}",
        r.timestamp.format("%Y-%m-%d %H:%M:%S"),
        r.name.as_deref().unwrap_or("-"),
        r.action.as_str(),
        r.status.as_str(),
        r.confidence,
        r.rejection_kind
            .as_deref()
            .map(|k| format!(" reason={k}"))
            .unwrap_or_default(),
    )
}
