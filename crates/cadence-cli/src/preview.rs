use anyhow::{bail, Context};
use cadence_scheduler::cron::CronExpr;
use cadence_scheduler::{parse_timestamp, Schedule, Scheduler};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::cli::NextArgs;

/// `cadence next`: print upcoming occurrences, one RFC 3339 instant per line.
pub fn run(args: &NextArgs) -> anyhow::Result<()> {
    let schedule = schedule_from_args(args)?;
    let after = match &args.after {
        Some(text) => parse_timestamp(text).with_context(|| format!("invalid --after {text:?}"))?,
        None => Utc::now().timestamp_millis(),
    };

    let upcoming = Scheduler::preview(&schedule, after, args.count);
    if upcoming.is_empty() {
        println!("no upcoming occurrences");
    }
    for ms in upcoming {
        println!("{}", format_ms(ms));
    }
    Ok(())
}

fn schedule_from_args(args: &NextArgs) -> anyhow::Result<Schedule> {
    if let Some(expression) = &args.cron {
        // Surface the parse error here; the engine itself would just report
        // "no next occurrence".
        CronExpr::parse(expression)
            .with_context(|| format!("invalid cron expression {expression:?}"))?;
        return Ok(Schedule::Cron {
            expression: expression.clone(),
        });
    }
    if let Some(interval_ms) = args.every {
        if interval_ms <= 0 {
            bail!("--every must be a positive number of milliseconds");
        }
        return Ok(Schedule::Every {
            interval_ms,
            anchor_ms: args.anchor,
        });
    }
    if let Some(timestamp) = &args.at {
        if parse_timestamp(timestamp).is_none() {
            bail!("invalid --at timestamp {timestamp:?}");
        }
        return Ok(Schedule::At {
            timestamp: timestamp.clone(),
        });
    }
    bail!("one of --cron, --every or --at is required")
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}
