//! Canonical text form for curated fields.

use unicode_normalization::UnicodeNormalization;

/// Rewrites a field in place. Implementations must be deterministic.
pub trait DocumentModifier: Send + Sync {
    fn name(&self) -> &'static str;
    fn modify(&self, text: &str) -> String;
}

/// Repairs mojibake, unifies line endings, strips control characters and
/// applies NFC. Runs to a fixed point, so `normalize(normalize(x)) == normalize(x)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextNormalizer;

impl TextNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, text: &str) -> String {
        // after the first pass the text is NFC, so any further change shortens it
        let mut cur = single_pass(text);
        loop {
            let next = single_pass(&cur);
            if next == cur {
                return cur;
            }
            cur = next;
        }
    }
}

impl DocumentModifier for TextNormalizer {
    fn name(&self) -> &'static str {
        "unicode_reformatter"
    }

    fn modify(&self, text: &str) -> String {
        self.normalize(text)
    }
}

fn single_pass(text: &str) -> String {
    let fixed = fix_mojibake(text);
    let unified = unify_newlines(&fixed);
    let stripped: String = unified
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    stripped.nfc().collect()
}

fn unify_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Re-decodes UTF-8 sequences that were mis-read as Windows-1252.
fn fix_mojibake(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some((decoded, used)) = decode_sequence(&chars[i..]) {
            out.push(decoded);
            i += used;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn decode_sequence(chars: &[char]) -> Option<(char, usize)> {
    let lead = cp1252_byte(*chars.first()?)?;
    let width = match lead {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    if chars.len() < width {
        return None;
    }

    let mut buf = [0u8; 4];
    buf[0] = lead;
    for (k, c) in chars[1..width].iter().enumerate() {
        let b = cp1252_byte(*c)?;
        if !(0x80..=0xBF).contains(&b) {
            return None;
        }
        buf[k + 1] = b;
    }

    let s = std::str::from_utf8(&buf[..width]).ok()?;
    s.chars().next().map(|c| (c, width))
}

/// Byte a char would have had under Windows-1252 (Latin-1 for the gaps).
fn cp1252_byte(c: char) -> Option<u8> {
    let b = match c {
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        c if (c as u32) <= 0xFF => c as u32 as u8,
        _ => return None,
    };
    Some(b)
}
