// src/gcode/mod.rs - Extended command parsing
pub mod move_sync;

use thiserror::Error;

use crate::motion::SyncError;

#[derive(Debug, Error)]
pub enum GCodeError {
    #[error("Malformed command '{line}': {reason}")]
    Parse { line: String, reason: String },
    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),
    #[error("Unable to parse '{value}' as an integer for '{name}'")]
    InvalidInteger { name: String, value: String },
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Unknown printer object '{0}'")]
    UnknownObject(String),
    #[error("Printer object '{0}' has no steppers")]
    NotAStepper(String),
    #[error("{0} requires at least one STEPPER parameter")]
    NoSteppers(String),
    #[error("Synchronized move failed: {0}")]
    Sync(#[from] SyncError),
}

/// A parsed command line: `NAME KEY=VALUE KEY="quoted value" ...`.
///
/// Command and parameter names are upper-cased; parameters keep the order
/// they were written in.
#[derive(Debug, Clone, PartialEq)]
pub struct GCodeCommand {
    pub command: String,
    pub parameters: Vec<(String, String)>,
}

impl GCodeCommand {
    /// Parse one line. Blank lines and comment-only lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, GCodeError> {
        let line = match line.find(';') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let parse_error = |reason: &str| GCodeError::Parse {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let (command, mut rest) = match line.find(char::is_whitespace) {
            Some(idx) => (&line[..idx], line[idx..].trim_start()),
            None => (line, ""),
        };
        let mut parameters = Vec::new();
        while !rest.is_empty() {
            let eq = rest.find('=').ok_or_else(|| parse_error("expected KEY=VALUE"))?;
            let key = &rest[..eq];
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(parse_error("expected KEY=VALUE"));
            }
            let after = &rest[eq + 1..];
            let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
                let end = quoted.find('"').ok_or_else(|| parse_error("unterminated quote"))?;
                (&quoted[..end], &quoted[end + 1..])
            } else {
                let end = after.find(char::is_whitespace).unwrap_or(after.len());
                (&after[..end], &after[end..])
            };
            parameters.push((key.to_ascii_uppercase(), value.to_string()));
            rest = remaining.trim_start();
        }

        Ok(Some(Self {
            command: command.to_ascii_uppercase(),
            parameters,
        }))
    }

    /// Parameter names in the order given.
    pub fn command_parameters(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|(k, _)| k.as_str())
    }

    /// Value of `name`; the last occurrence wins.
    pub fn get_opt(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get(&self, name: &str) -> Result<&str, GCodeError> {
        self.get_opt(name)
            .ok_or_else(|| GCodeError::MissingParameter(name.to_string()))
    }

    /// Integer value of `name`, or `default` when absent.
    pub fn get_int(&self, name: &str, default: Option<i64>) -> Result<i64, GCodeError> {
        match (self.get_opt(name), default) {
            (Some(value), _) => value.trim().parse().map_err(|_| GCodeError::InvalidInteger {
                name: name.to_string(),
                value: value.to_string(),
            }),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(GCodeError::MissingParameter(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extended_command() {
        let cmd = GCodeCommand::parse("move_sync stepper1=\"manual_stepper a\" Stepper2=z DIST=10 ; go")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.command, "MOVE_SYNC");
        let names: Vec<&str> = cmd.command_parameters().collect();
        assert_eq!(names, vec!["STEPPER1", "STEPPER2", "DIST"]);
        assert_eq!(cmd.get("STEPPER1").unwrap(), "manual_stepper a");
        assert_eq!(cmd.get_int("DIST", None).unwrap(), 10);
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert!(GCodeCommand::parse("   ").unwrap().is_none());
        assert!(GCodeCommand::parse("; just a comment").unwrap().is_none());
    }

    #[test]
    fn test_bare_command() {
        let cmd = GCodeCommand::parse("M400").unwrap().unwrap();
        assert_eq!(cmd.command, "M400");
        assert!(cmd.parameters.is_empty());
    }

    #[test]
    fn test_get_int_defaults_and_errors() {
        let cmd = GCodeCommand::parse("X DIST=-5 SPEED=2.5").unwrap().unwrap();
        assert_eq!(cmd.get_int("DIST", None).unwrap(), -5);
        assert_eq!(cmd.get_int("ACCEL", Some(0)).unwrap(), 0);
        assert!(matches!(cmd.get_int("SPEED", Some(0)), Err(GCodeError::InvalidInteger { .. })));
        assert!(matches!(cmd.get_int("MISSING", None), Err(GCodeError::MissingParameter(_))));
    }

    #[test]
    fn test_malformed_parameters() {
        assert!(matches!(GCodeCommand::parse("MOVE_SYNC DIST"), Err(GCodeError::Parse { .. })));
        assert!(matches!(GCodeCommand::parse("MOVE_SYNC A=\"open"), Err(GCodeError::Parse { .. })));
    }

    #[test]
    fn test_last_duplicate_wins() {
        let cmd = GCodeCommand::parse("X DIST=1 DIST=2").unwrap().unwrap();
        assert_eq!(cmd.get_int("DIST", None).unwrap(), 2);
    }
}
