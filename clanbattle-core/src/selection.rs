//! Interactive disambiguation between several candidates.
//!
//! Prompts never run while a clan is locked: the operation first fails with
//! [`ClanError::AmbiguousSelection`], the host asks the member, and the
//! operation is retried with the chosen index.
use std::future::Future;

use crate::error::ClanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Chosen(usize),
    /// The member declined or did not answer in time.
    Cancelled,
}

/// Asks a member to pick one of several candidates.
pub trait SelectOne {
    fn select_one(&self, candidates: &[String], prompt: &str) -> Selection;
}

impl<F> SelectOne for F
where
    F: Fn(&[String], &str) -> Selection,
{
    fn select_one(&self, candidates: &[String], prompt: &str) -> Selection {
        self(candidates, prompt)
    }
}

/// Run `op` without a selection, prompting and retrying once if it needs one.
///
/// # Errors
///
/// Returns [`ClanError::SelectionCancelled`] if the prompt is cancelled, and
/// otherwise whatever `op` returns.
pub fn with_selection<T, S, F>(selector: &S, mut op: F) -> Result<T, ClanError>
where
    S: SelectOne + ?Sized,
    F: FnMut(Option<usize>) -> Result<T, ClanError>,
{
    match op(None) {
        Err(ClanError::AmbiguousSelection { prompt, candidates }) => {
            retry(selector.select_one(&candidates, &prompt), op)
        }
        other => other,
    }
}

/// [`with_selection`] for hosts whose prompt is asynchronous.
///
/// # Errors
///
/// As [`with_selection`].
pub async fn with_selection_async<T, A, Fut, F>(ask: A, mut op: F) -> Result<T, ClanError>
where
    A: FnOnce(String, Vec<String>) -> Fut,
    Fut: Future<Output = Selection>,
    F: FnMut(Option<usize>) -> Result<T, ClanError>,
{
    match op(None) {
        Err(ClanError::AmbiguousSelection { prompt, candidates }) => {
            retry(ask(prompt, candidates).await, op)
        }
        other => other,
    }
}

fn retry<T>(
    selection: Selection,
    op: impl FnOnce(Option<usize>) -> Result<T, ClanError>,
) -> Result<T, ClanError> {
    match selection {
        Selection::Chosen(index) => op(Some(index)),
        Selection::Cancelled => Err(ClanError::SelectionCancelled),
    }
}
