//! Interactive confirmation and selection prompts.

use std::io::{BufRead, IsTerminal, Write};

/// Decision points in a release run.
///
/// The pipeline asks questions through this trait so tests can script
/// answers without a terminal.
pub trait Decider {
    /// Yes/no question. Empty input takes `default`; a closed input
    /// stream answers `false`.
    fn confirm(&mut self, question: &str, default: bool) -> bool;

    /// Pick one option by number. `None` means the user aborted or the
    /// input stream closed.
    fn choose(
        &mut self,
        question: &str,
        options: &[String],
        default_index: Option<usize>,
    ) -> Option<String>;

    /// Informational line shown between questions.
    fn message(&mut self, text: &str);
}

/// Terminal-backed decider. When stdin is not a terminal every question
/// resolves to its non-interactive fallback, so a piped invocation never
/// hangs waiting for input.
pub struct PromptEngine {
    interactive: bool,
}

impl PromptEngine {
    pub fn new() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal(),
        }
    }

    fn read_line(&self) -> Option<String> {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(_) => None,
        }
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Decider for PromptEngine {
    fn confirm(&mut self, question: &str, default: bool) -> bool {
        if !self.interactive {
            return default;
        }
        let suffix = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            eprint!("{question} {suffix} ");
            let _ = std::io::stderr().flush();
            let Some(answer) = self.read_line() else {
                return false;
            };
            match parse_yes_no(&answer) {
                Some(choice) => return choice,
                None if answer.is_empty() => return default,
                None => eprintln!("Please answer y or n."),
            }
        }
    }

    fn choose(
        &mut self,
        question: &str,
        options: &[String],
        default_index: Option<usize>,
    ) -> Option<String> {
        if options.is_empty() {
            return None;
        }
        if !self.interactive {
            return default_index.and_then(|i| options.get(i)).cloned();
        }
        eprintln!("{question}");
        for (i, option) in options.iter().enumerate() {
            let marker = if Some(i) == default_index { "*" } else { " " };
            eprintln!(" {marker} {}) {}", i + 1, option);
        }
        loop {
            eprint!("Enter a number (or q to quit): ");
            let _ = std::io::stderr().flush();
            let answer = self.read_line()?;
            if answer.eq_ignore_ascii_case("q") {
                return None;
            }
            if answer.is_empty() {
                if let Some(option) = default_index.and_then(|i| options.get(i)) {
                    return Some(option.clone());
                }
            }
            if let Some(option) = answer
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| options.get(i))
            {
                return Some(option.clone());
            }
            eprintln!("Pick a number between 1 and {}.", options.len());
        }
    }

    fn message(&mut self, text: &str) {
        if self.interactive {
            eprintln!("{text}");
        }
    }
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
