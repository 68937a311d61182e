//! Interactive yes/no confirmation.

use std::io::{BufRead, Write};

use tend_supervisor::Confirm;

/// Asks on `output` and reads the answer from `input`.
///
/// Only `y` or `yes` (any case) accepts. End of input, read errors and any
/// other answer decline.
pub(crate) struct PromptConfirm<'a, R, W> {
    input: &'a mut R,
    output: &'a mut W,
}

impl<'a, R: BufRead, W: Write> PromptConfirm<'a, R, W> {
    pub(crate) fn new(input: &'a mut R, output: &'a mut W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Confirm for PromptConfirm<'_, R, W> {
    fn confirm(&mut self, prompt: &str) -> bool {
        if write!(self.output, "{prompt} [y/n]: ")
            .and_then(|()| self.output.flush())
            .is_err()
        {
            return false;
        }
        let mut answer = String::new();
        let accepted = match self.input.read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => is_affirmative(&answer),
        };
        if answer.is_empty() {
            // Keep later output off the prompt line when input ends.
            let _ = writeln!(self.output);
        }
        accepted
    }
}

fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}
