// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration diagnostics.
//!
//! Figment extraction failures become miette reports that point at the
//! offending line of `relaydesk.toml`. Unknown keys get a hint: the closest
//! valid key in the same table, or the table the key actually lives in when
//! it was written under the wrong `[section]`.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::model::RelaydeskConfig;

/// Minimum Jaro-Winkler similarity score to suggest a correction.
const SUGGESTION_THRESHOLD: f64 = 0.75;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key, or a whole `[section]`, the relay does not know.
    #[error("unknown key `{key}` in {location}")]
    #[diagnostic(code(relaydesk::config::unknown_key), help("{hint}"))]
    UnknownKey {
        key: String,
        /// `[chat]`-style table name, or "the top level".
        location: String,
        /// Closest valid key in the same table.
        suggestion: Option<String>,
        hint: String,
        #[label("not a relaydesk setting")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` has the wrong type: found {found}")]
    #[diagnostic(code(relaydesk::config::invalid_type), help("`{key}` expects {expected}"))]
    InvalidType {
        key: String,
        found: String,
        expected: String,
    },

    #[error("validation error: {message}")]
    #[diagnostic(code(relaydesk::config::validation))]
    Validation { message: String },

    /// Unreadable files, TOML syntax errors, and anything else figment reports.
    #[error("could not load configuration: {0}")]
    #[diagnostic(code(relaydesk::config::load))]
    Load(String),
}

/// Converts a `figment::Error` into diagnostics.
///
/// `toml_sources` holds `(path, content)` pairs used to attach source spans
/// to unknown-key errors.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    use figment::error::Kind;

    let tables = config_tables();
    err.into_iter()
        .map(|error| match &error.kind {
            Kind::UnknownField(field, expected) => {
                unknown_key(&error, field, expected, &tables, toml_sources)
            }
            Kind::InvalidType(actual, expected) => ConfigError::InvalidType {
                key: dotted_path(&error.path),
                found: actual.to_string(),
                expected: expected.to_string(),
            },
            _ => ConfigError::Load(error.to_string()),
        })
        .collect()
}

fn dotted_path(path: &[String]) -> String {
    path.join(".")
}

fn unknown_key(
    error: &figment::error::Error,
    field: &str,
    expected: &[&str],
    tables: &[(String, Vec<String>)],
    toml_sources: &[(String, String)],
) -> ConfigError {
    let section = error.path.first().map(String::as_str);
    let suggestion = suggest_key(field, expected);

    let mut hint = match (&suggestion, section) {
        (Some(key), None) => format!("did you mean `[{key}]`?"),
        (Some(key), Some(_)) => format!("did you mean `{key}`?"),
        (None, Some(section)) => match home_table(field, section, tables) {
            Some(home) => format!("`{field}` belongs in `[{home}]`, not `[{section}]`"),
            None => format!("valid keys in `[{section}]`: {}", expected.join(", ")),
        },
        (None, None) => format!("valid sections: {}", expected.join(", ")),
    };
    if let Some(origin) = env_origin(error) {
        hint.push_str(&format!(" (set by {origin})"));
    }

    let (span, src) = find_source_span(error, field, section.is_none(), toml_sources);
    ConfigError::UnknownKey {
        key: field.to_string(),
        location: section.map_or_else(|| "the top level".to_string(), |s| format!("[{s}]")),
        suggestion,
        hint,
        span,
        src,
    }
}

/// Table names and their keys, read off the serialized defaults.
fn config_tables() -> Vec<(String, Vec<String>)> {
    let Ok(toml::Value::Table(root)) = toml::Value::try_from(RelaydeskConfig::default()) else {
        return Vec::new();
    };
    root.into_iter()
        .filter_map(|(name, value)| match value {
            toml::Value::Table(table) => Some((name, table.keys().cloned().collect())),
            _ => None,
        })
        .collect()
}

/// The other table that defines `field`, if exactly one does.
fn home_table<'a>(
    field: &str,
    section: &str,
    tables: &'a [(String, Vec<String>)],
) -> Option<&'a str> {
    let mut homes = tables
        .iter()
        .filter(|(name, keys)| name != section && keys.iter().any(|k| k == field))
        .map(|(name, _)| name.as_str());
    let home = homes.next()?;
    homes.next().is_none().then_some(home)
}

fn env_origin(error: &figment::error::Error) -> Option<String> {
    let metadata = error.metadata.as_ref()?;
    metadata
        .name
        .contains("environment")
        .then(|| metadata.name.to_string())
}

fn find_source_span(
    error: &figment::error::Error,
    field: &str,
    is_section: bool,
    toml_sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let file = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| match s {
            figment::Source::File(path) => Some(path.display().to_string()),
            _ => None,
        });

    // Inline strings have no file source; fall back to the only source given.
    let source = match file {
        Some(path) => toml_sources.iter().find(|(p, _)| *p == path),
        None if env_origin(error).is_none() && toml_sources.len() == 1 => toml_sources.first(),
        None => None,
    };
    let Some((path, content)) = source else {
        return (None, None);
    };

    let offset = if is_section {
        find_section_offset(content, field)
    } else {
        find_key_offset(content, &error.path, field)
    };
    match offset {
        Some(offset) => (
            Some(SourceSpan::new(offset.into(), field.len())),
            Some(NamedSource::new(path, content.clone())),
        ),
        None => (None, None),
    }
}

/// Byte offset of the name inside a `[section]` header.
pub fn find_section_offset(content: &str, section: &str) -> Option<usize> {
    let header = format!("[{section}]");
    content.find(&header).map(|at| at + 1)
}

/// Byte offset of `field` in TOML content, after the `[section]` header
/// named by the first element of `path`.
pub fn find_key_offset(content: &str, path: &[String], field: &str) -> Option<usize> {
    let start = match path.first() {
        None => 0,
        Some(section) => find_section_offset(content, section)? + section.len() + 1,
    };

    let mut offset = start;
    for line in content[start..].split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') {
            // The next table starts; the key is not in this one.
            return None;
        }
        let is_key = trimmed
            .strip_prefix(field)
            .is_some_and(|after| after.starts_with([' ', '\t', '=']));
        if is_key {
            return Some(offset + line.len() - trimmed.len());
        }
        offset += line.len();
    }
    None
}

/// Best valid key above the similarity threshold, if any.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|&key| (strsim::jaro_winkler(unknown, key), key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Writes each error to stderr as a graphical miette report.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut report = String::new();
        match handler.render_report(&mut report, error as &dyn Diagnostic) {
            Ok(()) => eprint!("{report}"),
            Err(_) => eprintln!("error: {error}"),
        }
    }
}
