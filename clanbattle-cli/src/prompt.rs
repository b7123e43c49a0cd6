use clanbattle_core::{ClanError, Selection, with_selection_async};
use colored::Colorize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Ask on stdin which candidate to use, giving up after `wait`.
pub async fn ask(prompt: &str, candidates: &[String], wait: Duration) -> Selection {
    eprintln!("{}", prompt.bright_cyan().bold());
    for (index, candidate) in candidates.iter().enumerate() {
        eprintln!("  {}. {candidate}", index + 1);
    }
    eprintln!("choice (1-{}, anything else cancels):", candidates.len());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match tokio::time::timeout(wait, lines.next_line()).await {
        Ok(Ok(Some(line))) => parse_choice(&line, candidates.len()),
        Ok(Ok(None) | Err(_)) => Selection::Cancelled,
        Err(_) => {
            log::warn!("selection timed out after {wait:?}");
            Selection::Cancelled
        }
    }
}

/// One-based answer to a zero-based selection.
pub fn parse_choice(line: &str, len: usize) -> Selection {
    match line.trim().parse::<usize>() {
        Ok(choice) if (1..=len).contains(&choice) => Selection::Chosen(choice - 1),
        _ => Selection::Cancelled,
    }
}

/// Run `op`, prompting once if it needs a choice between candidates.
///
/// A `preset` choice skips the first attempt and the prompt entirely.
pub async fn with_prompt<T>(
    preset: Option<usize>,
    wait: Duration,
    mut op: impl FnMut(Option<usize>) -> Result<T, ClanError>,
) -> Result<T, ClanError> {
    if preset.is_some() {
        return op(preset);
    }
    with_selection_async(
        |prompt, candidates| async move { ask(&prompt, &candidates, wait).await },
        op,
    )
    .await
}
