//! Typewriter-style reveal of shell output.

use std::time::Duration;

/// Delay between revealed characters.
pub const CHAR_INTERVAL: Duration = Duration::from_millis(20);

/// Iterates over `text` one character at a time, as string slices.
#[derive(Debug, Clone)]
pub struct Typewriter<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Typewriter<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    /// Everything revealed so far.
    pub fn shown(&self) -> &'a str {
        &self.text[..self.pos]
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.text.len()
    }
}

impl<'a> Iterator for Typewriter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let c = self.text[self.pos..].chars().next()?;
        let start = self.pos;
        self.pos += c.len_utf8();
        Some(&self.text[start..self.pos])
    }
}

/// Reveal `text` through `emit`, pausing `interval` after each character.
///
/// Returns once the whole text has been emitted; that is the line's
/// completion signal. A zero interval emits everything without sleeping.
pub async fn type_out<F>(text: &str, interval: Duration, mut emit: F)
where
    F: FnMut(&str),
{
    for piece in Typewriter::new(text) {
        emit(piece);
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
}
