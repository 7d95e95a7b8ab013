//! Output renderers: bordered ASCII tables and pretty JSON.

use std::io::Write;

use anyhow::anyhow;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use serde_json::{Value, json};
use teamcity_api_models::{Record, ResultSet, lookup};

use crate::client::{CliError, CliResult};

/// Placeholder for missing or null fields.
pub(crate) const MISSING: &str = "N/A";

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

/// Resolved output preferences for one invocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct OutputSettings {
    /// Explicit `--output-format`, if any.
    pub(crate) format: Option<OutputFormat>,
    pub(crate) color: bool,
}

impl OutputSettings {
    /// Lists default to tables.
    pub(crate) fn list_format(self) -> OutputFormat {
        self.format.unwrap_or(OutputFormat::Table)
    }

    /// Single records default to JSON.
    pub(crate) fn record_format(self) -> OutputFormat {
        self.format.unwrap_or(OutputFormat::Json)
    }
}

/// Write a result set: `count: N` followed by a table, or the JSON envelope.
pub(crate) fn render_result_set(
    out: &mut impl Write,
    set: &ResultSet,
    item_key: &str,
    columns: &[String],
    settings: OutputSettings,
) -> CliResult<()> {
    match settings.list_format() {
        OutputFormat::Json => {
            let envelope = json!({ "count": set.count(), item_key: set.records() });
            write_json(out, &envelope)
        }
        OutputFormat::Table => {
            writeln!(out, "count: {}", set.count())?;
            let rows = table_rows(columns, set.records());
            out.write_all(format_table(columns, &rows, settings.color).as_bytes())?;
            Ok(())
        }
    }
}

/// Write a single record as pretty JSON or a `field`/`value` table.
pub(crate) fn render_record(
    out: &mut impl Write,
    record: &Record,
    settings: OutputSettings,
) -> CliResult<()> {
    match settings.record_format() {
        OutputFormat::Json => write_json(out, record),
        OutputFormat::Table => {
            let headers = ["field".to_string(), "value".to_string()];
            let rows: Vec<Vec<String>> = record
                .iter()
                .map(|(field, value)| vec![field.clone(), cell_text(Some(value))])
                .collect();
            out.write_all(format_table(&headers, &rows, settings.color).as_bytes())?;
            Ok(())
        }
    }
}

pub(crate) fn write_json<T: Serialize + ?Sized>(out: &mut impl Write, value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
    writeln!(out, "{text}")?;
    Ok(())
}

/// Extract one row of cell strings per record.
///
/// A record whose `state` is `running` shows `RUNNING` as its status.
pub(crate) fn table_rows(columns: &[String], records: &[Record]) -> Vec<Vec<String>> {
    records
        .iter()
        .map(|record| {
            let running = record.get("state").and_then(Value::as_str) == Some("running");
            columns
                .iter()
                .map(|column| {
                    if running && column == "status" {
                        "RUNNING".to_string()
                    } else {
                        cell_text(lookup(record, column))
                    }
                })
                .collect()
        })
        .collect()
}

/// Render a JSON value as a single-line cell.
pub(crate) fn cell_text(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => MISSING.to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };
    if text.contains(['\n', '\r']) {
        text.split(['\n', '\r'])
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        text
    }
}

/// Format a bordered table; every line, including the last, ends in `\n`.
///
/// Column width is the widest of the header and all cells in characters.
pub(crate) fn format_table(headers: &[String], rows: &[Vec<String>], color: bool) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            rows.iter()
                .filter_map(|row| row.get(index))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let border = widths
        .iter()
        .fold(String::from("+"), |mut line, width| {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
            line
        });

    let mut out = String::new();
    out.push_str(&border);
    out.push('\n');
    push_row(&mut out, headers, &widths, false);
    out.push_str(&border);
    out.push('\n');
    for row in rows {
        push_row(&mut out, row, &widths, color);
    }
    out.push_str(&border);
    out.push('\n');
    out
}

fn push_row(out: &mut String, cells: &[String], widths: &[usize], color: bool) {
    out.push('|');
    for (index, width) in widths.iter().enumerate() {
        let cell = cells.get(index).map_or("", String::as_str);
        let padding = width.saturating_sub(cell.chars().count());
        out.push(' ');
        out.push_str(&paint(cell, color));
        out.push_str(&" ".repeat(padding));
        out.push_str(" |");
    }
    out.push('\n');
}

fn paint(cell: &str, color: bool) -> String {
    if !color {
        return cell.to_string();
    }
    match cell {
        "SUCCESS" => cell.green().to_string(),
        "FAILURE" | "ERROR" => cell.red().to_string(),
        "RUNNING" => cell.yellow().to_string(),
        _ => cell.to_string(),
    }
}
