//! Status command handler

use anyhow::Result;
use colored::*;

use super::StatusArgs;
use crate::config::AppConfig;
use crate::store::{EntityCounts, RunSummary, SqliteStore};

pub async fn handle_status_command(args: StatusArgs, config: &AppConfig) -> Result<()> {
    let path = args.db.unwrap_or_else(|| config.database_path());
    if !path.exists() {
        println!(
            "{} {}",
            "No database at".yellow(),
            path.display().to_string().yellow()
        );
        return Ok(());
    }

    let store = SqliteStore::open(&path).await?;
    let counts = store.counts_by_type().await?;
    let runs = store.latest_runs().await?;

    println!("Database: {}", path.display().to_string().cyan());
    println!();
    print!("{}", render_status(&counts, &runs));

    Ok(())
}

fn render_status(counts: &[EntityCounts], runs: &[RunSummary]) -> String {
    if counts.is_empty() && runs.is_empty() {
        return format!("{}\n", "Nothing synchronized yet.".dimmed());
    }

    let mut out = format!(
        "{:<30} {:>9} {:>9}\n",
        "ENTITY TYPE".bold(),
        "RECORDS".bold(),
        "LINKS".bold()
    );
    for count in counts {
        out.push_str(&format!(
            "{:<30} {:>9} {:>9}\n",
            count.entity_type, count.records, count.links
        ));
    }

    if !runs.is_empty() {
        out.push_str(&format!("\n{}\n", "Last runs".bold()));
        for run in runs {
            let failures = if run.failures == 0 {
                "0 failures".green()
            } else {
                format!("{} failures", run.failures).yellow()
            };
            out.push_str(&format!(
                "  {:<28} {}  {} fetched, {} created, {}  ({} ms)\n",
                run.entity_type,
                run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
                run.fetched,
                run.created,
                failures,
                run.elapsed_ms
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_render_status() {
        let counts = vec![EntityCounts {
            entity_type: "Site".to_string(),
            records: 42,
            links: 7,
        }];
        let runs = vec![RunSummary {
            run_id: Uuid::new_v4(),
            entity_type: "Site".to_string(),
            url: "http://example.test/Sites".to_string(),
            started_at: Utc::now(),
            elapsed_ms: 250,
            fetched: 42,
            upserted: 42,
            created: 2,
            failures: 1,
        }];

        let text = render_status(&counts, &runs);
        assert!(text.contains("42"));
        assert!(text.contains("Last runs"));
        assert!(text.contains("1 failures"));
    }

    #[test]
    fn test_render_empty_status() {
        assert!(render_status(&[], &[]).contains("Nothing synchronized yet"));
    }
}
