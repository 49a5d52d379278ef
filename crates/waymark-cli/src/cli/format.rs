//! Shared output formatting for CLI commands.

use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color};
use uuid::Uuid;
use waymark_types::definition::CompensationStrategy;
use waymark_types::execution::{ExecutionStatus, StepStatus};

/// First 8 hex digits of an ID, as shown in tables.
pub fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

pub fn status_cell(status: ExecutionStatus) -> Cell {
    let color = match status {
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Running | ExecutionStatus::Pending => Color::Yellow,
        ExecutionStatus::Compensating | ExecutionStatus::Compensated => Color::Magenta,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Cancelled => Color::DarkGrey,
    };
    Cell::new(status.as_str()).fg(color)
}

pub fn step_status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Compensated => "compensated",
    }
}

pub fn step_status_cell(status: StepStatus) -> Cell {
    let color = match status {
        StepStatus::Completed => Color::Green,
        StepStatus::Running => Color::Yellow,
        StepStatus::Failed => Color::Red,
        StepStatus::Compensated => Color::Magenta,
        StepStatus::Pending => Color::DarkGrey,
    };
    Cell::new(step_status_label(status)).fg(color)
}

pub fn strategy_label(strategy: CompensationStrategy) -> &'static str {
    match strategy {
        CompensationStrategy::Backward => "backward",
        CompensationStrategy::Forward => "forward",
        CompensationStrategy::Parallel => "parallel",
    }
}

pub fn format_time(at: Option<&DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Human-readable duration: `850ms`, `12.4s`, `3m 05s`.
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        let secs = ms / 1_000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// Shorten `text` to at most `max` characters, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        let id: Uuid = "0192f1d2-7a3b-7c00-8000-000000000001".parse().unwrap();
        assert_eq!(short_id(&id), "0192f1d2");
    }

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(850), "850ms");
        assert_eq!(format_duration_ms(12_400), "12.4s");
        assert_eq!(format_duration_ms(185_000), "3m 05s");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("connection refused", 8), "connect…");
    }

    #[test]
    fn test_format_time_absent() {
        assert_eq!(format_time(None), "-");
    }
}
