use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use client_core::{ConfirmationPrompt, PromptDecision};
use shared::protocol::ConflictNotice;
use tracing::warn;

/// Asks on the terminal and waits for an explicit `s` or `n`.
pub struct TerminalPrompt;

#[async_trait]
impl ConfirmationPrompt for TerminalPrompt {
    async fn confirm(&self, notice: &ConflictNotice) -> PromptDecision {
        let notice = notice.clone();
        let answer = tokio::task::spawn_blocking(move || {
            ask(&notice, &mut io::stdin().lock(), &mut io::stdout())
        })
        .await;

        match answer {
            Ok(Ok(decision)) => decision,
            Ok(Err(err)) => {
                warn!(error = %err, "could not read confirmation; cancelling");
                PromptDecision::Cancel
            }
            Err(err) => {
                warn!(error = %err, "confirmation prompt aborted; cancelling");
                PromptDecision::Cancel
            }
        }
    }
}

pub fn ask(
    notice: &ConflictNotice,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> io::Result<PromptDecision> {
    writeln!(output)?;
    writeln!(output, "{}", notice.message)?;
    writeln!(output, "Ação sugerida: {}", notice.suggested_action)?;

    loop {
        write!(output, "Confirmar? [s/n]: ")?;
        output.flush()?;

        let mut line = String::new();
        // Closed input means nobody can confirm.
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            return Ok(PromptDecision::Cancel);
        }
        match parse_answer(&line) {
            Some(decision) => return Ok(decision),
            None => writeln!(output, "Responda 's' ou 'n'.")?,
        }
    }
}

fn parse_answer(raw: &str) -> Option<PromptDecision> {
    match raw.trim().to_lowercase().as_str() {
        "s" => Some(PromptDecision::Confirm),
        "n" => Some(PromptDecision::Cancel),
        _ => None,
    }
}
