//! Structured command lines and the single quoting routine.
//!
//! Processes are always spawned with an argv vector, never through a shell.
//! Quoting only matters where a command line has to travel as text: the
//! payload of an admin `-e` invocation, command lines written in scenario
//! plans, and log output. [`quote_arg`] and [`split_command_line`] are exact
//! inverses for every argument that passes [`validate_argument`].
//!
//! # Example
//!
//! ```
//! use stagehand_core::command::{CommandLine, split_command_line};
//!
//! let line = CommandLine::new("icepackadmin")
//!     .arg("-e")
//!     .arg(r"application add C:\test dir\app.xml");
//!
//! let rendered = line.render();
//! let words = split_command_line(&rendered)?;
//! assert_eq!(words[2], r"application add C:\test dir\app.xml");
//! # Ok::<(), stagehand_core::HarnessError>(())
//! ```

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Characters that are never allowed in command arguments.
const FORBIDDEN_CHARS: &[char] = &[
    '\0', // Null byte
    '\n', // Newline (breaks line-oriented protocols)
    '\r', // Carriage return
];

/// Punctuation that never needs quoting.
const SAFE_PUNCTUATION: &[char] = &['_', '@', '%', '+', '=', ':', ',', '.', '/', '-'];

/// Validate a command argument.
///
/// # Errors
///
/// Returns an error if the argument contains forbidden characters.
pub fn validate_argument(arg: &str, field_name: &str) -> Result<()> {
    if let Some(c) = arg.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(HarnessError::invalid_command(format!(
            "{field_name} contains forbidden character {c:?}"
        )));
    }
    Ok(())
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || SAFE_PUNCTUATION.contains(&c)
}

/// Quote a single argument so that [`split_command_line`] yields it back.
///
/// Arguments made only of safe characters are returned unchanged. Anything
/// else, the empty string included, is wrapped in double quotes with `\` and
/// `"` escaped.
#[must_use]
pub fn quote_arg(arg: &str) -> Cow<'_, str> {
    if !arg.is_empty() && arg.chars().all(is_safe_char) {
        return Cow::Borrowed(arg);
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '\\' || c == '"' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

/// Quote every argument and join them with single spaces.
#[must_use]
pub fn join_args<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|arg| quote_arg(arg.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a command line into words.
///
/// Whitespace separates words. Double quotes group and honour `\\` and `\"`
/// (any other backslash is kept literally, so hand-written Windows paths
/// survive). Single quotes group literally. A backslash outside quotes escapes
/// the next character.
///
/// # Errors
///
/// Returns an error on unterminated quotes or a trailing backslash.
pub fn split_command_line(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('\\' | '"')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => {
                                return Err(HarnessError::invalid_command(format!(
                                    "unterminated double quote in {line:?}"
                                )));
                            }
                        },
                        Some(other) => current.push(other),
                        None => {
                            return Err(HarnessError::invalid_command(format!(
                                "unterminated double quote in {line:?}"
                            )));
                        }
                    }
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(other) => current.push(other),
                        None => {
                            return Err(HarnessError::invalid_command(format!(
                                "unterminated single quote in {line:?}"
                            )));
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(HarnessError::invalid_command(format!(
                            "trailing backslash in {line:?}"
                        )));
                    }
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// A program plus its argument vector.
///
/// Deserializes from a single pre-quoted string, so scenario plans can write
/// command lines the way they would type them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Create a command line for the given program.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Parse a pre-quoted command line; the first word is the program.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is malformed or empty.
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = split_command_line(line)?.into_iter();
        let program = words
            .next()
            .ok_or_else(|| HarnessError::invalid_command("empty command line"))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    /// Add a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The argument vector, without the program.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Check that the program is set and no part contains forbidden characters.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.program.is_empty() {
            return Err(HarnessError::invalid_command("program cannot be empty"));
        }
        validate_argument(&self.program, "program")?;
        for arg in &self.args {
            validate_argument(arg, "argument")?;
        }
        Ok(())
    }

    /// Render as a single quoted string.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = quote_arg(&self.program).into_owned();
        if !self.args.is_empty() {
            rendered.push(' ');
            rendered.push_str(&join_args(&self.args));
        }
        rendered
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl TryFrom<String> for CommandLine {
    type Error = HarnessError;

    fn try_from(line: String) -> Result<Self> {
        Self::parse(&line)
    }
}

impl From<CommandLine> for String {
    fn from(line: CommandLine) -> Self {
        line.render()
    }
}
