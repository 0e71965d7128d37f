//! Now-playing metadata parsing.
//!
//! The metadata file holds exactly two lines: artist, then title. Updates
//! that do not match that shape are discarded and the previous metadata is
//! kept.

use serde::{Deserialize, Serialize};

use crate::error::MalformedMetadata;

/// Artist and title currently advertised by every destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub artist: String,
    pub title: String,
}

impl NowPlaying {
    /// Parse the raw content of the metadata file.
    ///
    /// Both lines are trimmed and transliterated to ASCII.
    ///
    /// # Errors
    /// Returns the reason the content was rejected.
    pub fn parse(content: &[u8]) -> Result<Self, MalformedMetadata> {
        if content.first().is_none_or(|b| *b == 0) {
            return Err(MalformedMetadata::Empty);
        }

        let text = std::str::from_utf8(content).map_err(|_| MalformedMetadata::NotText)?;
        if text.contains('\0') {
            return Err(MalformedMetadata::NotText);
        }

        let text = text.trim();
        if !text.contains('\n') {
            return Err(MalformedMetadata::NoSeparator);
        }

        let lines: Vec<&str> = text.split('\n').collect();
        let [artist, title] = lines.as_slice() else {
            return Err(MalformedMetadata::LineCount(lines.len()));
        };

        Ok(Self { artist: to_ascii(artist.trim()), title: to_ascii(title.trim()) })
    }
}

/// Last successfully parsed metadata.
#[derive(Debug, Clone, Default)]
pub struct MetadataState {
    current: Option<NowPlaying>,
}

impl MetadataState {
    #[must_use]
    pub fn current(&self) -> Option<&NowPlaying> {
        self.current.as_ref()
    }

    /// Replace the current metadata with `content` if it parses.
    ///
    /// # Errors
    /// Returns the rejection reason; the current metadata is left unchanged.
    pub fn update(&mut self, content: &[u8]) -> Result<&NowPlaying, MalformedMetadata> {
        let parsed = NowPlaying::parse(content)?;
        Ok(self.current.insert(parsed))
    }
}

/// Transliterate `input` to printable ASCII.
///
/// Latin letters lose their diacritics, typographic punctuation maps to its
/// plain equivalent and anything else becomes `?`.
#[must_use]
pub fn to_ascii(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii() {
            out.push(c);
        } else if let Some(base) = latin_base(c) {
            if c.is_uppercase() {
                out.push_str(&base.to_ascii_uppercase());
            } else {
                out.push_str(base);
            }
        } else {
            out.push_str(punctuation(c).unwrap_or("?"));
        }
    }
    out
}

fn latin_base(c: char) -> Option<&'static str> {
    let base = match c {
        'À'..='Å' | 'à'..='å' | 'Ā'..='ą' => "a",
        'Æ' | 'æ' => "ae",
        'Ç' | 'ç' | 'Ć'..='č' => "c",
        'Ð' | 'ð' | 'Ď'..='đ' => "d",
        'È'..='Ë' | 'è'..='ë' | 'Ē'..='ě' => "e",
        'Ĝ'..='ģ' => "g",
        'Ĥ'..='ħ' => "h",
        'Ì'..='Ï' | 'ì'..='ï' | 'Ĩ'..='ı' => "i",
        'Ĳ' | 'ĳ' => "ij",
        'Ĵ' | 'ĵ' => "j",
        'Ķ'..='ĸ' => "k",
        'Ĺ'..='ł' => "l",
        'Ñ' | 'ñ' | 'Ń'..='ŋ' => "n",
        'Ò'..='Ö' | 'Ø' | 'ò'..='ö' | 'ø' | 'Ō'..='ő' => "o",
        'Œ' | 'œ' => "oe",
        'Ŕ'..='ř' => "r",
        'Ś'..='š' | 'ſ' => "s",
        'ß' => "ss",
        'Ţ'..='ŧ' => "t",
        'Þ' | 'þ' => "th",
        'Ù'..='Ü' | 'ù'..='ü' | 'Ũ'..='ų' => "u",
        'Ŵ' | 'ŵ' => "w",
        'Ý' | 'ý' | 'ÿ' | 'Ŷ'..='Ÿ' => "y",
        'Ź'..='ž' => "z",
        _ => return None,
    };
    Some(base)
}

fn punctuation(c: char) -> Option<&'static str> {
    let plain = match c {
        '\u{00A0}' | '\u{2002}'..='\u{200A}' => " ",
        '‘' | '’' | '‚' | '′' => "'",
        '“' | '”' | '„' | '″' => "\"",
        '‐' | '‑' | '‒' | '–' | '—' | '−' => "-",
        '…' => "...",
        '«' => "<<",
        '»' => ">>",
        '·' | '•' => ".",
        '×' => "x",
        _ => return None,
    };
    Some(plain)
}
