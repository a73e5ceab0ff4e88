//! Output formatting utilities for CLI commands
//!
//! Provides consistent formatting for:
//! - Tables with column alignment
//! - Timestamps (relative and absolute)
//! - Colors for lifecycle states and risk levels

use chrono::{DateTime, Local, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use std::time::Duration;
use tessera_db::{EntityStatus, ScriptStatus};
use tessera_schema::RiskLevel;

/// Format a timestamp relative to now, falling back to an absolute date
/// after a week.
pub fn format_time(time: DateTime<Utc>) -> String {
    match (Utc::now() - time).to_std() {
        Ok(duration) => format_duration_ago(duration, time),
        Err(_) => "just now".to_string(),
    }
}

fn format_duration_ago(duration: Duration, time: DateTime<Utc>) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{} second{} ago", secs, if secs == 1 { "" } else { "s" })
    } else if secs < 3600 {
        let mins = secs / 60;
        format!("{} minute{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if secs < 86400 {
        let hours = secs / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if secs < 604800 {
        let days = secs / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_time_absolute(time)
    }
}

pub fn format_time_absolute(time: DateTime<Utc>) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// First line of a SQL script, shortened for table cells.
pub fn sql_summary(sql: &str, max_chars: usize) -> String {
    let first = sql.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if first.chars().count() <= max_chars {
        first.to_string()
    } else {
        let cut: String = first.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Print a table with headers and rows
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = new_table(headers);
    for row in rows {
        table.add_row(row);
    }
    println!("{}", table);
}

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = new_table(headers);
    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| match color {
                Some(c) => Cell::new(text).fg(c),
                None => Cell::new(text),
            })
            .collect();
        table.add_row(cells);
    }
    println!("{}", table);
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    let header_cells: Vec<Cell> = headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)).collect();
    table.set_header(header_cells);
    table
}

pub fn color_for_status(status: EntityStatus) -> Color {
    match status {
        EntityStatus::Draft => Color::Grey,
        EntityStatus::Published => Color::Green,
        EntityStatus::Modified => Color::Yellow,
        EntityStatus::Withdrawn => Color::DarkGrey,
    }
}

pub fn color_for_script(status: ScriptStatus) -> Color {
    match status {
        ScriptStatus::Success => Color::Green,
        ScriptStatus::Failed => Color::Red,
        ScriptStatus::RolledBack => Color::Yellow,
        ScriptStatus::Pending => Color::Grey,
    }
}

pub fn color_for_risk(risk: RiskLevel) -> Color {
    match risk {
        RiskLevel::Low => Color::Green,
        RiskLevel::Medium => Color::Yellow,
        RiskLevel::High => Color::Magenta,
        RiskLevel::Critical => Color::Red,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_ago() {
        let now = Utc::now();
        assert_eq!(format_duration_ago(Duration::from_secs(5), now), "5 seconds ago");
        assert_eq!(format_duration_ago(Duration::from_secs(1), now), "1 second ago");
        assert_eq!(format_duration_ago(Duration::from_secs(120), now), "2 minutes ago");
        assert_eq!(format_duration_ago(Duration::from_secs(3600), now), "1 hour ago");
        assert_eq!(format_duration_ago(Duration::from_secs(86400), now), "1 day ago");
    }

    #[test]
    fn test_future_time_is_just_now() {
        let future = Utc::now() + chrono::Duration::minutes(5);
        assert_eq!(format_time(future), "just now");
    }

    #[test]
    fn test_sql_summary() {
        let sql = "\nCREATE TABLE \"Orders\" (\n  \"Id\" TEXT\n);";
        assert_eq!(sql_summary(sql, 80), "CREATE TABLE \"Orders\" (");
        assert_eq!(sql_summary("ALTER TABLE x ADD COLUMN y", 12), "ALTER TAB...");
        assert_eq!(sql_summary("", 10), "");
    }
}
