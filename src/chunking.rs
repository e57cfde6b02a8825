//! Splitting extracted document text into overlapping windows.
//!
//! Windows are counted in characters, not bytes or tokens, so multi-byte
//! text is never cut inside a code point. Consecutive windows share
//! exactly `overlap` characters; only the final window may be shorter
//! than `chunk_size`.

use crate::error::{Error, Result};

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default number of characters shared by consecutive windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Window size and overlap used when splitting documents.
///
/// # Examples
///
/// ```
/// use docchat::chunking::ChunkingConfig;
///
/// assert!(ChunkingConfig::default().validate().is_ok());
/// assert!(ChunkingConfig { chunk_size: 10, overlap: 10 }.validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum window size in characters.
    pub chunk_size: usize,
    /// Characters shared by adjacent windows.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    /// Reject settings that would stop the window from advancing.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfiguration(
                "chunk size must be greater than zero".into(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::InvalidConfiguration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Number of characters the window start moves between chunks.
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    pub fn split(&self, text: &str) -> Result<Vec<String>> {
        chunk_text(text, self.chunk_size, self.overlap)
    }
}

/// Split text into overlapping character windows.
///
/// Returns an empty vector for empty input. Fails with
/// [`Error::InvalidConfiguration`] when `overlap >= chunk_size`, since the
/// window would never advance.
///
/// # Examples
///
/// ```
/// use docchat::chunking::chunk_text;
///
/// let chunks = chunk_text("abcdefghij", 4, 1).unwrap();
/// assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
///
/// assert!(chunk_text("", 1000, 200).unwrap().is_empty());
/// assert!(chunk_text("abc", 5, 5).is_err());
/// ```
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>> {
    let config = ChunkingConfig {
        chunk_size,
        overlap,
    };
    config.validate()?;

    if text.is_empty() {
        return Ok(Vec::new());
    }

    // char index -> byte index, with a trailing entry for text.len()
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;

    let step = config.step();
    let mut chunks = Vec::with_capacity(char_count.div_ceil(step));
    let mut start_char = 0;

    loop {
        let end_char = (start_char + chunk_size).min(char_count);
        let window = &text[char_to_byte[start_char]..char_to_byte[end_char]];
        chunks.push(window.to_string());

        if end_char == char_count {
            break;
        }
        start_char += step;
    }

    Ok(chunks)
}
