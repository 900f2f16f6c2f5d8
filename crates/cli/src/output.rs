//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use gauntlet_engine::events::RunEvent;
use gauntlet_engine::{AttemptStatus, Outcome, Report};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No items found.");
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(items).unwrap_or_default());
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✔".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✘".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "!".yellow(), message);
}

/// One line per live event; `None` for events that print nothing
pub fn event_line(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::RunStarted {
            work_items,
            workers,
        } => Some(format!(
            "Running {} work items using {} workers",
            work_items, workers
        )),
        RunEvent::AttemptFinished {
            item,
            attempt,
            will_retry,
        } => {
            let mark = match attempt.status {
                AttemptStatus::Passed => "✔".green(),
                AttemptStatus::Failed => "✘".red(),
                AttemptStatus::TimedOut => "⏱".red(),
                AttemptStatus::Skipped => "-".dimmed(),
            };
            let retry = if attempt.number > 1 {
                format!(" (retry #{})", attempt.number - 1)
            } else {
                String::new()
            };
            let mut line = format!(
                "  {} {}{} {}",
                mark,
                item,
                retry,
                format!("({}ms)", attempt.duration_ms).dimmed()
            );
            if let Some(error) = &attempt.error {
                line.push_str(&format!("\n      {}", error.message.red()));
            }
            if *will_retry {
                line.push_str(&format!("\n      {}", "retrying".yellow()));
            }
            Some(line)
        }
        RunEvent::DeadlineReached => Some(format!("  {}", "run deadline reached".red().bold())),
        RunEvent::AttemptStarted { .. } | RunEvent::RunFinished { .. } => None,
    }
}

fn outcome_cell(outcome: Outcome) -> Cell {
    let color = match outcome {
        Outcome::Passed => Color::Green,
        Outcome::Flaky => Color::Yellow,
        Outcome::Failed | Outcome::TimedOut => Color::Red,
        Outcome::Skipped => Color::Grey,
    };
    Cell::new(outcome.to_string()).fg(color)
}

/// Print the end-of-run summary: failing and flaky items, then totals
pub fn print_report(report: &Report, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
            return;
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(report).unwrap_or_default());
            return;
        }
        OutputFormat::Table => {}
    }

    let notable: Vec<_> = report
        .items
        .iter()
        .filter(|i| i.outcome.is_failure() || i.outcome == Outcome::Flaky)
        .collect();

    if !notable.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Project", "Test", "Outcome", "Attempts", "Last error"]);
        for item in notable {
            let error = item
                .final_attempt()
                .and_then(|a| a.error.as_ref())
                .map(|e| e.message.lines().next().unwrap_or_default().to_string())
                .unwrap_or_default();
            table.add_row(vec![
                Cell::new(&item.project_name),
                Cell::new(&item.test_id),
                outcome_cell(item.outcome),
                Cell::new(item.attempts.len()),
                Cell::new(error),
            ]);
        }
        println!("{table}");
    }

    let s = &report.summary;
    let mut parts = vec![format!("{} passed", s.passed - s.flaky).green().to_string()];
    if s.flaky > 0 {
        parts.push(format!("{} flaky", s.flaky).yellow().to_string());
    }
    if s.failed > 0 {
        parts.push(format!("{} failed", s.failed).red().to_string());
    }
    if s.timed_out > 0 {
        parts.push(format!("{} timed out", s.timed_out).red().to_string());
    }
    if s.skipped > 0 {
        parts.push(format!("{} skipped", s.skipped).dimmed().to_string());
    }
    if s.not_run > 0 {
        parts.push(format!("{} did not run", s.not_run).dimmed().to_string());
    }
    println!(
        "\n  {} ({} items, {:.1}s)",
        parts.join(", "),
        s.total,
        s.duration_ms as f64 / 1000.0
    );

    if let Some(error) = &report.engine_error {
        print_error(&format!("Run aborted: {}", error));
    }
}
