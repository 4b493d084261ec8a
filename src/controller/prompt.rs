use anyhow::Result;
use std::io::{self, BufRead, Write};

use crate::theme::Theme;
use crate::verify::VerificationResult;
use crate::workflow::PlannedStep;

/// Where the controller asks the user for decisions.
pub trait Prompter {
    /// Whether step `index` (0-based) of `total` may run.
    fn confirm(&mut self, step: &PlannedStep, index: usize, total: usize) -> Result<bool>;

    /// A new request after a failed workflow, `None` to stop.
    fn follow_up(&mut self, failure: &VerificationResult) -> Result<Option<String>>;
}

/// Reads answers line by line from a terminal (or any buffered reader).
pub struct TerminalPrompter<R> {
    input: R,
    theme: Theme,
}

impl TerminalPrompter<io::BufReader<io::Stdin>> {
    pub fn stdin(theme: Theme) -> Self {
        Self::new(io::BufReader::new(io::stdin()), theme)
    }
}

impl<R: BufRead> TerminalPrompter<R> {
    pub fn new(input: R, theme: Theme) -> Self {
        Self { input, theme }
    }

    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        print!("{} ", question);
        io::stdout().flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            // EOF
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

impl<R: BufRead> Prompter for TerminalPrompter<R> {
    fn confirm(&mut self, step: &PlannedStep, index: usize, total: usize) -> Result<bool> {
        let question = if step.is_dangerous {
            self.theme
                .warning
                .apply(&format!("Run dangerous step {}/{}? [y/N]", index + 1, total))
        } else {
            self.theme
                .header
                .apply(&format!("Run step {}/{}? [y/N]", index + 1, total))
        };
        let answer = self.ask(&question.to_string())?;
        Ok(matches!(
            answer.as_deref().map(str::to_lowercase).as_deref(),
            Some("y") | Some("yes")
        ))
    }

    fn follow_up(&mut self, _failure: &VerificationResult) -> Result<Option<String>> {
        let question = self
            .theme
            .header
            .apply("What should happen next? (empty to stop)")
            .to_string();
        Ok(self.ask(&question)?.filter(|a| !a.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn prompter(input: &str) -> TerminalPrompter<Cursor<Vec<u8>>> {
        TerminalPrompter::new(Cursor::new(input.as_bytes().to_vec()), Theme::monochrome())
    }

    #[test]
    fn only_yes_confirms() {
        let step = PlannedStep::new("status", "look", "nothing changes");
        assert!(prompter("y\n").confirm(&step, 0, 1).unwrap());
        assert!(prompter("YES\n").confirm(&step, 0, 1).unwrap());
        assert!(!prompter("\n").confirm(&step, 0, 1).unwrap());
        assert!(!prompter("nope\n").confirm(&step, 0, 1).unwrap());
        assert!(!prompter("").confirm(&step, 0, 1).unwrap());
    }

    #[test]
    fn empty_follow_up_stops() {
        let failure = VerificationResult::semantic_failure("branch exists");
        assert_eq!(prompter("\n").follow_up(&failure).unwrap(), None);
        assert_eq!(prompter("").follow_up(&failure).unwrap(), None);
        assert_eq!(
            prompter("  use another name \n").follow_up(&failure).unwrap(),
            Some("use another name".to_string())
        );
    }
}
