//! Load and parse action-list files (spec §4.8 "Loading").

use std::path::Path;

use crate::error::FlatpakEngineError;
use crate::types::{ActionList, FlatpakActionKind, FlatpakRefAction, LocationRef};

/// Parse one line: `<action> <remote>:<ref> <serial>`.
fn parse_line(file: &str, line_no: usize, line: &str) -> Result<FlatpakRefAction, FlatpakEngineError> {
    let mut parts = line.split_whitespace();
    let malformed = |reason: &str| FlatpakEngineError::MalformedSpec {
        file: file.to_string(),
        line: line_no,
        reason: reason.to_string(),
    };

    let kind = parts
        .next()
        .ok_or_else(|| malformed("missing action"))?
        .parse::<FlatpakActionKind>()
        .map_err(|e| malformed(&e.to_string()))?;

    let remote_ref = parts.next().ok_or_else(|| malformed("missing remote:ref"))?;
    let (remote, ref_name) = remote_ref
        .split_once(':')
        .ok_or_else(|| malformed("remote:ref is missing a ':' separator"))?;
    if remote.is_empty() || ref_name.is_empty() {
        return Err(malformed("remote:ref has an empty remote or ref"));
    }

    let serial: u32 = parts
        .next()
        .ok_or_else(|| malformed("missing serial"))?
        .parse()
        .map_err(|_| malformed("serial is not a valid unsigned integer"))?;

    if parts.next().is_some() {
        return Err(malformed("too many fields"));
    }

    Ok(FlatpakRefAction {
        kind,
        location_ref: LocationRef {
            ref_name: ref_name.to_string(),
            remote: Some(remote.to_string()),
            collection_id: None,
        },
        source_file: file.to_string(),
        serial,
    })
}

/// Parse a whole action-list file's contents.
fn parse_file(file: &str, contents: &str) -> Result<Vec<FlatpakRefAction>, FlatpakEngineError> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| parse_line(file, idx + 1, line))
        .collect()
}

/// Scan `dirs` (highest priority first) for action-list files, load and
/// parse each, and keep only the highest-priority copy of each filename
/// (spec §4.8: "a single source_file wins per filename by highest
/// priority").
pub fn load_action_lists(dirs: &[&Path]) -> anyhow::Result<Vec<ActionList>> {
    let mut by_name: std::collections::BTreeMap<String, ActionList> = std::collections::BTreeMap::new();

    for (priority, dir) in dirs.iter().enumerate() {
        let priority = -(priority as i32);
        if !dir.is_dir() {
            continue;
        }
        let mut names: Vec<String> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();

        for name in names {
            if by_name.contains_key(&name) {
                continue;
            }
            let contents = std::fs::read_to_string(dir.join(&name))?;
            let actions = parse_file(&name, &contents)?;
            by_name.insert(
                name.clone(),
                ActionList {
                    source_file: name,
                    priority,
                    actions,
                },
            );
        }
    }

    Ok(by_name.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_line() {
        let action = parse_line("myapp.txt", 1, "install eos:app/com.example.App/x86_64/stable 3").unwrap();
        assert_eq!(action.kind, FlatpakActionKind::Install);
        assert_eq!(action.location_ref.remote.as_deref(), Some("eos"));
        assert_eq!(action.serial, 3);
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(parse_line("f", 1, "frobnicate eos:app/x 1").is_err());
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(parse_line("f", 1, "install eos:app/x").is_err());
    }

    #[test]
    fn skips_blank_lines() {
        let actions = parse_file("f", "install eos:app/x 1\n\n  \nupdate eos:app/x 2\n").unwrap();
        assert_eq!(actions.len(), 2);
    }
}
