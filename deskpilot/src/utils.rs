//! Text folding and polling helpers shared across the crate.

use crate::AutomationError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Lowercases and strips Spanish diacritics so captions compare loosely.
pub fn fold_text(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'Á' | 'À' | 'Ä' => 'a',
            'é' | 'è' | 'ë' | 'É' | 'È' | 'Ë' => 'e',
            'í' | 'ì' | 'ï' | 'Í' | 'Ì' | 'Ï' => 'i',
            'ó' | 'ò' | 'ö' | 'Ó' | 'Ò' | 'Ö' => 'o',
            'ú' | 'ù' | 'ü' | 'Ú' | 'Ù' | 'Ü' => 'u',
            'ñ' | 'Ñ' => 'n',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .collect()
}

/// Menu and button captions: accelerator marks and tab-separated shortcuts
/// dropped, whitespace collapsed, folded.
pub fn normalize_caption(value: &str) -> String {
    let visible = value.split('\t').next().unwrap_or_default().replace('&', "");
    fold_text(&visible.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// True when `haystack` contains any of `needles` after folding both sides.
pub fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let folded = fold_text(haystack);
    needles.iter().any(|needle| folded.contains(&fold_text(needle)))
}

/// Sleeps in short slices so a cancellation is honoured promptly.
pub fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), AutomationError> {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return Err(AutomationError::Cancelled(
                "stop requested while waiting".to_string(),
            ));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

/// Polls `probe` every `interval` until it yields a value or `timeout`
/// elapses. The probe always runs at least once.
///
/// Returns `Ok(None)` on timeout and `Err(Cancelled)` when the token fires.
pub fn poll_until<T>(
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut probe: impl FnMut() -> Option<T>,
) -> Result<Option<T>, AutomationError> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(AutomationError::Cancelled(
                "stop requested while polling".to_string(),
            ));
        }
        if let Some(found) = probe() {
            return Ok(Some(found));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(interval.min(deadline - now));
    }
}
