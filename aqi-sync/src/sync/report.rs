//! Human-readable run summaries

use colored::*;

use super::result::SyncRunResult;

/// Failures listed per run before the rest are elided
pub const MAX_LISTED_FAILURES: usize = 20;

/// Multi-line summary of one run
pub fn render_run(result: &SyncRunResult) -> String {
    let mut out = String::new();

    let status = if result.is_clean() {
        "ok".bright_green().bold()
    } else {
        "with failures".yellow().bold()
    };
    out.push_str(&format!(
        "{} {} {}\n",
        result.entity_type.bright_cyan().bold(),
        status,
        format!("({:.2?})", result.elapsed).dimmed()
    ));
    out.push_str(&format!("  source:   {}\n", result.url.dimmed()));

    let fetched = match result.reported {
        Some(reported) if reported != result.fetched as u64 => {
            format!("{} (feed reports {})", result.fetched, reported.to_string().yellow())
        }
        _ => result.fetched.to_string(),
    };
    out.push_str(&format!("  fetched:  {}\n", fetched));
    out.push_str(&format!(
        "  upserted: {} ({} created, {} updated)\n",
        result.upserted,
        result.created.to_string().green(),
        result.updated()
    ));

    if result.is_clean() {
        return out;
    }

    out.push_str(&format!(
        "  failures: {} record, {} relation\n",
        result.record_failures().count().to_string().red(),
        result.relation_failures().count().to_string().yellow()
    ));
    for failure in result.failures.iter().take(MAX_LISTED_FAILURES) {
        out.push_str(&format!("    - {}\n", failure));
    }
    if result.failures.len() > MAX_LISTED_FAILURES {
        out.push_str(&format!(
            "    ... and {} more\n",
            result.failures.len() - MAX_LISTED_FAILURES
        ));
    }

    out
}
