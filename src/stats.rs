//! History statistics and terminal formatting.
//!
//! Used by `hl history stats` and the other human-readable CLI output.

use std::path::Path;

use crate::error::PipelineError;
use crate::history::HistoryStats;
use crate::models::{HistoryEntry, Polarity, Verdict};

pub fn print_stats(stats: &HistoryStats, db_path: &Path) {
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    println!("HealthLens: History Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Analyses:    {}", stats.total);
    println!("  This week:   {}", stats.this_week);
    match stats.average_score {
        Some(avg) => println!("  Avg score:   {:.1}", avg),
        None => println!("  Avg score:   -"),
    }

    if stats.total > 0 {
        println!();
        println!("  By band:");
        for (band, count) in stats.by_band.iter().rev() {
            let pct = (count * 100) / stats.total;
            println!("  {:<8} {:>6}  {:>3}%", band, count, pct);
        }
    }
    println!();
}

pub fn print_verdict(verdict: &Verdict) {
    println!(
        "{}  {}/100  {}",
        verdict.product_name, verdict.final_score, verdict.band
    );
    println!(
        "  Nutri-Score {} ({} points), source confidence {}{}",
        verdict.nutri_score.grade,
        verdict.nutri_score.points,
        verdict.source_confidence.as_str(),
        if verdict.ai_assessed { "" } else { ", rule-based only" }
    );
    println!();
    println!("  {}", verdict.explanation);

    if !verdict.drivers.is_empty() {
        println!();
        for d in &verdict.drivers {
            let mark = match d.polarity {
                Polarity::Positive => '+',
                Polarity::Negative => '-',
            };
            println!("  {} {}", mark, d.text);
        }
    }

    if !verdict.evidence.is_empty() {
        println!();
        println!("  Evidence:");
        for e in &verdict.evidence {
            println!("    {} ({}: {})", e.claim, e.guideline_source, e.comparison);
        }
    }

    if !verdict.missing_data_notes.is_empty() {
        println!();
        println!("  Notes:");
        for n in &verdict.missing_data_notes {
            println!("    {}", n);
        }
    }
}

pub fn print_entries(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("No analyses recorded.");
        return;
    }
    println!(
        "  {:<20} {:<32} {:>5} {:<7} {:<12} {}",
        "IDENTITY", "PRODUCT", "SCORE", "BAND", "INPUT", "WHEN"
    );
    println!("  {}", "-".repeat(92));
    for e in entries {
        println!(
            "  {:<20} {:<32} {:>5} {:<7} {:<12} {}",
            truncate(&e.product_identity, 20),
            truncate(&e.verdict.product_name, 32),
            e.verdict.final_score,
            e.verdict.band,
            e.input_kind.as_str(),
            format_ts_relative(e.verdict.timestamp.timestamp())
        );
    }
}

pub fn print_error(err: &PipelineError) {
    eprintln!("Error [{}]: {}", err.code(), err);
    if let PipelineError::AmbiguousMatch { candidates, .. } = err {
        for c in candidates {
            eprintln!(
                "  {}  {}{}  ({:.2})",
                c.code.as_deref().unwrap_or("-"),
                c.name,
                c.brand
                    .as_deref()
                    .map(|b| format!(" / {}", b))
                    .unwrap_or_default(),
                c.confidence
            );
        }
    }
    if let Some(hint) = err.hint() {
        eprintln!("Hint: {}", hint);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 || delta >= 86400 * 30 {
        return chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| ts.to_string());
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}
