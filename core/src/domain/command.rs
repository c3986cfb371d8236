//! Ready-to-run command handed to the engine by the command builder.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A program name plus its ordered argument list.
///
/// The engine never rewrites a command; it only spawns it as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCommand {
    /// Program to execute (looked up on `PATH` when not absolute).
    pub program: String,
    /// Arguments in the order they are passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ScanCommand {
    /// Create a command from a program and its arguments.
    pub fn new<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line into program and arguments.
    ///
    /// Whitespace separates words except inside double quotes; the quotes
    /// themselves are dropped, so `--script "safe and vuln"` yields the two
    /// arguments `--script` and `safe and vuln`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut has_word = false;

        for ch in line.chars() {
            match ch {
                '"' => {
                    in_quotes = !in_quotes;
                    has_word = true;
                }
                c if c.is_whitespace() && !in_quotes => {
                    if has_word {
                        words.push(std::mem::take(&mut current));
                        has_word = false;
                    }
                }
                c => {
                    current.push(c);
                    has_word = true;
                }
            }
        }
        if has_word {
            words.push(current);
        }

        let mut words = words.into_iter();
        let program = words.next().ok_or(Error::EmptyCommand)?;
        if program.is_empty() {
            return Err(Error::EmptyCommand);
        }

        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    /// Check that there is a program to run.
    pub fn ensure_runnable(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::EmptyCommand);
        }
        Ok(())
    }
}

impl fmt::Display for ScanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote_word(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote_word(arg))?;
        }
        Ok(())
    }
}

fn quote_word(word: &str) -> String {
    if word.is_empty() || word.chars().any(char::is_whitespace) {
        format!("\"{}\"", word)
    } else {
        word.to_string()
    }
}
