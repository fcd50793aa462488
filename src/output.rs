//! Output rendering for tasklink commands.
//!
//! `--json` prints one [`Envelope`] per invocation on stdout, for success and
//! failure alike. Human mode prints a header with optional sections; errors
//! go to stderr with a single hint.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, JsonError, Result};

pub const SCHEMA_VERSION: &str = "tasklink.v1";

/// Subcommand groups whose second word is part of the command name.
const GROUPED_COMMANDS: [&str; 2] = ["task", "link"];

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Machine-readable result of one command.
#[derive(Serialize)]
pub struct Envelope<'a, T: Serialize> {
    pub schema_version: &'static str,
    pub command: &'a str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonError>,
    #[serde(skip_serializing_if = "no_items")]
    pub warnings: &'a [String],
    #[serde(skip_serializing_if = "no_items")]
    pub next_steps: &'a [String],
}

fn no_items(items: &&[String]) -> bool {
    items.is_empty()
}

/// Human rendering: header, then `Summary`, `Details`, `Warnings` and
/// `Next steps` sections, each skipped when empty.
#[derive(Debug, Clone, Default)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Self::default()
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }

    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

impl fmt::Display for HumanOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header)?;

        if !self.summary.is_empty() {
            f.write_str("\n\nSummary:")?;
            for (key, value) in &self.summary {
                match value.as_str() {
                    "" => write!(f, "\n- {key}")?,
                    value => write!(f, "\n- {key}: {value}")?,
                }
            }
        }

        let sections = [
            ("Details", &self.details),
            ("Warnings", &self.warnings),
            ("Next steps", &self.next_steps),
        ];
        for (title, items) in sections {
            if items.is_empty() {
                continue;
            }
            write!(f, "\n\n{title}:")?;
            for item in items {
                write!(f, "\n- {item}")?;
            }
        }
        Ok(())
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data: Some(data),
            error: None,
            warnings: human.map_or(&[][..], |h| h.warnings.as_slice()),
            next_steps: human.map_or(&[][..], |h| h.next_steps.as_slice()),
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else if let Some(human) = human.filter(|_| !options.quiet) {
        println!("{human}");
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);

    if json {
        let envelope: Envelope<'_, ()> = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            data: None,
            error: Some(JsonError::from(err)),
            warnings: &[],
            next_steps: &next_steps,
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

/// Command name for error envelopes, read before clap parses (and possibly
/// rejects) the arguments.
pub fn infer_command_name_from_args() -> String {
    command_name(std::env::args().skip(1))
}

/// First positional word, plus the second for grouped commands.
/// Values of `--root` are skipped.
fn command_name(args: impl IntoIterator<Item = String>) -> String {
    let mut words: Vec<String> = Vec::with_capacity(2);
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--root" {
            args.next();
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        words.push(arg);
        let grouped = GROUPED_COMMANDS.contains(&words[0].as_str());
        if words.len() == 2 || !grouped {
            break;
        }
    }

    if words.is_empty() {
        "tasklink".to_string()
    } else {
        words.join(" ")
    }
}

fn error_next_steps(err: &Error) -> Vec<String> {
    let step = match err {
        Error::NotFound(_) => "tasklink task ls".to_string(),
        Error::MultipleParents {
            task, requested, ..
        } => format!("tasklink link move-parent {task} {requested}"),
        Error::CycleDetected { .. } => {
            "remove an edge on the reported path, then retry".to_string()
        }
        Error::NotReady { pending, .. } => {
            return pending
                .iter()
                .map(|dep| format!("tasklink task complete {dep}"))
                .collect();
        }
        Error::CorruptGraph(_) => "tasklink check --json".to_string(),
        Error::LegacySchema { .. } => "tasklink migrate --dry-run".to_string(),
        Error::MigrationConflict(_) => {
            "fix the listed records by hand, then rerun tasklink migrate".to_string()
        }
        Error::ConcurrentModification { .. } | Error::LockFailed(_) => {
            "retry the command".to_string()
        }
        Error::InvalidConfig(_) => "fix .tasklink.toml then retry".to_string(),
        Error::StoreNotFound(_) => "tasklink init".to_string(),
        _ => return Vec::new(),
    };
    vec![step]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn human_output_lists_sections_in_order() {
        let mut out = HumanOutput::new("Linked");
        out.push_summary("a", "depends_on b");
        out.push_detail("b blocks a");
        out.push_next_step("tasklink link ls a");

        assert_eq!(
            out.to_string(),
            "Linked\n\nSummary:\n- a: depends_on b\n\nDetails:\n- b blocks a\n\nNext steps:\n- tasklink link ls a"
        );
        assert_eq!(HumanOutput::new("tasklink check").to_string(), "tasklink check");
    }

    #[test]
    fn command_name_covers_groups_and_root_values() {
        assert_eq!(
            command_name(args(&["link", "add", "parent", "a", "b"])),
            "link add"
        );
        assert_eq!(
            command_name(args(&["--root", "/tmp/x", "--json", "task", "claim", "a"])),
            "task claim"
        );
        assert_eq!(command_name(args(&["check", "--json"])), "check");
        assert_eq!(command_name(args(&["--json"])), "tasklink");
    }

    #[test]
    fn error_envelope_embeds_kind_and_details() {
        let err = Error::NotReady {
            task: "a".to_string(),
            pending: vec!["b".to_string()],
        };
        let steps = error_next_steps(&err);
        let envelope: Envelope<'_, ()> = Envelope {
            schema_version: SCHEMA_VERSION,
            command: "task claim",
            status: "error",
            data: None,
            error: Some(JsonError::from(&err)),
            warnings: &[],
            next_steps: &steps,
        };
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["error"]["kind"], "not_ready");
        assert_eq!(value["error"]["code"], 3);
        assert_eq!(value["error"]["details"]["pending"][0], "b");
        assert_eq!(value["next_steps"][0], "tasklink task complete b");
        assert!(value.get("data").is_none());
        assert!(value.get("warnings").is_none());
    }

    #[test]
    fn policy_errors_suggest_a_followup() {
        let err = Error::MultipleParents {
            task: "c".to_string(),
            existing: "p1".to_string(),
            requested: "p2".to_string(),
        };
        assert_eq!(
            error_next_steps(&err),
            vec!["tasklink link move-parent c p2".to_string()]
        );
        assert!(error_next_steps(&Error::OperationFailed("x".to_string())).is_empty());
    }
}
