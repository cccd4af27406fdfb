//! Glyph widths and character decoding for the fonts a page uses.

use std::collections::HashMap;

use lazy_static::lazy_static;
use lopdf::{Dictionary, Document, Encoding, Object};

/// Advance widths of the printable ASCII range of Helvetica (codes 32..=126).
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 222, 333, 333, 389, 584, 278, 333, 278, 278, // space../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A..M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N..Z
    278, 278, 278, 469, 556, 222, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a..m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n..z
    334, 260, 334, 584, // {..~
];

fn encoding_font(encoding: &str) -> Dictionary {
    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    font.set("Encoding", Object::Name(encoding.as_bytes().to_vec()));
    font
}

lazy_static! {
    static ref STANDARD_FONT: Dictionary = encoding_font("StandardEncoding");
    static ref WIN_ANSI_FONT: Dictionary = encoding_font("WinAnsiEncoding");
    static ref MAC_ROMAN_FONT: Dictionary = encoding_font("MacRomanEncoding");
}

/// Advance widths in thousandths of text space units.
#[derive(Debug, Clone)]
enum GlyphWidths {
    /// `/FirstChar` + `/Widths` of a simple font.
    Table {
        first_char: u32,
        widths: Vec<f32>,
        missing: f32,
    },
    /// `/DW` + `/W` of a CID font.
    Cid { default: f32, widths: HashMap<u32, f32> },
    Monospace(f32),
    Helvetica,
    Estimated(f32),
}

impl GlyphWidths {
    fn width(&self, code: u32) -> f32 {
        match self {
            Self::Table {
                first_char,
                widths,
                missing,
            } => code
                .checked_sub(*first_char)
                .and_then(|i| widths.get(i as usize))
                .copied()
                .unwrap_or(*missing),
            Self::Cid { default, widths } => widths.get(&code).copied().unwrap_or(*default),
            Self::Monospace(width) | Self::Estimated(width) => *width,
            Self::Helvetica => code
                .checked_sub(32)
                .and_then(|i| HELVETICA_WIDTHS.get(i as usize))
                .map(|&w| f32::from(w))
                .unwrap_or(556.0),
        }
    }
}

/// A font resource of a page: how its codes decode and how far they advance.
pub(crate) struct PageFont<'a> {
    encoding: Option<Encoding<'a>>,
    /// Code overrides from an `/Encoding` `/Differences` array; `None` for
    /// glyph names with no known character.
    differences: HashMap<u8, Option<char>>,
    two_byte: bool,
    widths: GlyphWidths,
}

impl<'a> PageFont<'a> {
    /// Font with no dictionary: single-byte Latin-1 and a fixed advance.
    pub(crate) fn estimated(glyph_width_ratio: f32) -> Self {
        Self {
            encoding: None,
            differences: HashMap::new(),
            two_byte: false,
            widths: GlyphWidths::Estimated(glyph_width_ratio * 1000.0),
        }
    }

    pub(crate) fn from_dictionary(doc: &'a Document, font: &'a Dictionary, glyph_width_ratio: f32) -> Self {
        let subtype = font.get(b"Subtype").and_then(Object::as_name).unwrap_or(b"");
        let two_byte = subtype == b"Type0";
        let encoding_dict = font
            .get_deref(b"Encoding", doc)
            .and_then(Object::as_dict)
            .ok();

        let (encoding, differences) = match encoding_dict {
            Some(dict) if !two_byte && !font.has(b"ToUnicode") => {
                (base_encoding(doc, dict), parse_differences(doc, dict))
            }
            _ => (font.get_font_encoding(doc).ok(), HashMap::new()),
        };

        let widths = if two_byte {
            cid_widths(doc, font)
        } else {
            simple_widths(doc, font, glyph_width_ratio)
        };

        Self {
            encoding,
            differences,
            two_byte,
            widths,
        }
    }

    /// Character codes of a string operand.
    pub(crate) fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        if self.two_byte {
            bytes
                .chunks(2)
                .map(|pair| pair.iter().fold(0u32, |code, &b| code << 8 | u32::from(b)))
                .collect()
        } else {
            bytes.iter().map(|&b| u32::from(b)).collect()
        }
    }

    /// Whether word spacing applies to `code`.
    pub(crate) fn is_word_space(&self, code: u32) -> bool {
        !self.two_byte && code == 32
    }

    /// Advance of `code` in text space units per unit of font size.
    pub(crate) fn advance(&self, code: u32) -> f32 {
        self.widths.width(code) / 1000.0
    }

    /// Unicode text of a string operand.
    ///
    /// Returns `None` when most codes have no known character, which is what
    /// subset fonts without a `/ToUnicode` map look like.
    pub(crate) fn decode(&self, bytes: &[u8]) -> Option<String> {
        let (text, unmapped, total) = if self.two_byte {
            let text = match &self.encoding {
                Some(encoding) => Document::decode_text(encoding, bytes).ok()?,
                None => return None,
            };
            let unmapped = text.chars().filter(|&c| c == char::REPLACEMENT_CHARACTER).count();
            (text, unmapped, bytes.len().div_ceil(2))
        } else {
            self.decode_simple(bytes)
        };

        let control = text.chars().filter(|c| c.is_control()).count();
        if total > 0 && (unmapped * 2 > total || control * 2 > total) {
            return None;
        }

        Some(
            text.chars()
                .filter(|&c| !c.is_control() && c != char::REPLACEMENT_CHARACTER)
                .collect(),
        )
    }

    fn decode_simple(&self, bytes: &[u8]) -> (String, usize, usize) {
        let mut text = String::new();
        let mut unmapped = 0;

        for &byte in bytes {
            if let Some(mapped) = self.differences.get(&byte) {
                match mapped {
                    Some(c) => text.push(*c),
                    None => unmapped += 1,
                }
                continue;
            }

            match &self.encoding {
                Some(encoding) => match Document::decode_text(encoding, &[byte]) {
                    Ok(s) if !s.is_empty() && !s.contains(char::REPLACEMENT_CHARACTER) => {
                        text.push_str(&s)
                    }
                    _ => unmapped += 1,
                },
                None => text.push(char::from(byte)),
            }
        }

        (text, unmapped, bytes.len())
    }
}

fn base_encoding(doc: &Document, encoding: &Dictionary) -> Option<Encoding<'static>> {
    let holder: &'static Dictionary = match encoding.get(b"BaseEncoding").and_then(Object::as_name) {
        Ok(b"WinAnsiEncoding") => &*WIN_ANSI_FONT,
        Ok(b"MacRomanEncoding") => &*MAC_ROMAN_FONT,
        _ => &*STANDARD_FONT,
    };
    holder.get_font_encoding(doc).ok()
}

fn parse_differences(doc: &Document, encoding: &Dictionary) -> HashMap<u8, Option<char>> {
    let mut differences = HashMap::new();
    let Ok(items) = encoding
        .get_deref(b"Differences", doc)
        .and_then(Object::as_array)
    else {
        return differences;
    };

    let mut code: i64 = 0;
    for item in items {
        match item {
            Object::Integer(start) => code = *start,
            Object::Name(name) => {
                if let Ok(byte) = u8::try_from(code) {
                    differences.insert(byte, glyph_char(&String::from_utf8_lossy(name)));
                }
                code += 1;
            }
            _ => {}
        }
    }

    differences
}

fn number(doc: &Document, obj: &Object) -> Option<f32> {
    doc.dereference(obj).ok().and_then(|(_, o)| o.as_float().ok())
}

fn simple_widths(doc: &Document, font: &Dictionary, glyph_width_ratio: f32) -> GlyphWidths {
    let missing = font
        .get_deref(b"FontDescriptor", doc)
        .and_then(Object::as_dict)
        .ok()
        .and_then(|descriptor| descriptor.get(b"MissingWidth").ok())
        .and_then(|w| number(doc, w))
        .filter(|w| *w > 0.0)
        .unwrap_or(glyph_width_ratio * 1000.0);

    let first_char = font.get(b"FirstChar").ok().and_then(|o| number(doc, o));
    let widths = font.get_deref(b"Widths", doc).and_then(Object::as_array).ok();
    if let (Some(first_char), Some(widths)) = (first_char, widths) {
        return GlyphWidths::Table {
            first_char: first_char.max(0.0) as u32,
            widths: widths
                .iter()
                .map(|w| number(doc, w).unwrap_or(missing))
                .collect(),
            missing,
        };
    }

    // Standard fonts may omit their widths
    let base_font = font.get(b"BaseFont").and_then(Object::as_name).unwrap_or(b"");
    let base_font = String::from_utf8_lossy(base_font);
    let family = base_font.split_once('+').map_or(&*base_font, |(_, name)| name);
    if family.starts_with("Courier") {
        GlyphWidths::Monospace(600.0)
    } else if family.starts_with("Helvetica") || family.starts_with("Arial") {
        GlyphWidths::Helvetica
    } else {
        GlyphWidths::Estimated(missing)
    }
}

fn cid_widths(doc: &Document, font: &Dictionary) -> GlyphWidths {
    let descendant = font
        .get_deref(b"DescendantFonts", doc)
        .and_then(Object::as_array)
        .ok()
        .and_then(|fonts| fonts.first())
        .and_then(|f| doc.dereference(f).ok())
        .and_then(|(_, f)| f.as_dict().ok());

    let Some(descendant) = descendant else {
        return GlyphWidths::Cid {
            default: 1000.0,
            widths: HashMap::new(),
        };
    };

    let default = descendant
        .get(b"DW")
        .ok()
        .and_then(|w| number(doc, w))
        .unwrap_or(1000.0);

    // `c [w1 w2 ...]` lists consecutive codes, `c_first c_last w` a range
    let mut widths = HashMap::new();
    if let Ok(entries) = descendant.get_deref(b"W", doc).and_then(Object::as_array) {
        let mut i = 0;
        while i < entries.len() {
            let Some(first) = number(doc, &entries[i]) else {
                break;
            };
            let first = first.max(0.0) as u32;

            match entries.get(i + 1).and_then(|o| doc.dereference(o).ok()) {
                Some((_, Object::Array(list))) => {
                    for (offset, w) in list.iter().enumerate() {
                        if let Some(w) = number(doc, w) {
                            widths.insert(first + offset as u32, w);
                        }
                    }
                    i += 2;
                }
                Some((_, last)) => {
                    let (Some(last), Some(w)) = (
                        last.as_float().ok(),
                        entries.get(i + 2).and_then(|w| number(doc, w)),
                    ) else {
                        break;
                    };
                    for code in first..=last.max(0.0) as u32 {
                        widths.insert(code, w);
                    }
                    i += 3;
                }
                None => break,
            }
        }
    }

    GlyphWidths::Cid { default, widths }
}

/// Character of an Adobe glyph name.
fn glyph_char(name: &str) -> Option<char> {
    // Variant suffixes such as `.sc` or `.alt` name the same character
    let name = name.split('.').next().unwrap_or(name);

    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return c.is_ascii_alphabetic().then_some(c);
    }

    let hex = name
        .strip_prefix("uni")
        .filter(|h| h.len() == 4)
        .or_else(|| name.strip_prefix('u').filter(|h| (4..=6).contains(&h.len())));
    if let Some(c) = hex
        .and_then(|h| u32::from_str_radix(h, 16).ok())
        .and_then(char::from_u32)
    {
        return Some(c);
    }

    let c = match name {
        "space" | "nbspace" => ' ',
        "exclam" => '!',
        "quotedbl" => '"',
        "numbersign" => '#',
        "dollar" => '$',
        "percent" => '%',
        "ampersand" => '&',
        "quotesingle" => '\'',
        "parenleft" => '(',
        "parenright" => ')',
        "asterisk" => '*',
        "plus" => '+',
        "comma" => ',',
        "hyphen" | "minus" => '-',
        "period" => '.',
        "slash" => '/',
        "zero" => '0',
        "one" => '1',
        "two" => '2',
        "three" => '3',
        "four" => '4',
        "five" => '5',
        "six" => '6',
        "seven" => '7',
        "eight" => '8',
        "nine" => '9',
        "colon" => ':',
        "semicolon" => ';',
        "less" => '<',
        "equal" => '=',
        "greater" => '>',
        "question" => '?',
        "at" => '@',
        "bracketleft" => '[',
        "backslash" => '\\',
        "bracketright" => ']',
        "asciicircum" => '^',
        "underscore" => '_',
        "grave" => '`',
        "braceleft" => '{',
        "bar" => '|',
        "braceright" => '}',
        "asciitilde" => '~',
        "quoteleft" => '\u{2018}',
        "quoteright" => '\u{2019}',
        "quotedblleft" => '\u{201C}',
        "quotedblright" => '\u{201D}',
        "bullet" => '\u{2022}',
        "endash" => '\u{2013}',
        "emdash" => '\u{2014}',
        "ellipsis" => '\u{2026}',
        "Euro" => '\u{20AC}',
        "sterling" => '\u{A3}',
        "cent" => '\u{A2}',
        "yen" => '\u{A5}',
        "section" => '\u{A7}',
        "degree" => '\u{B0}',
        "multiply" => '\u{D7}',
        "divide" => '\u{F7}',
        "copyright" => '\u{A9}',
        "registered" => '\u{AE}',
        "trademark" => '\u{2122}',
        "eacute" => '\u{E9}',
        "egrave" => '\u{E8}',
        "aacute" => '\u{E1}',
        "agrave" => '\u{E0}',
        "ntilde" => '\u{F1}',
        "ccedilla" => '\u{E7}',
        "odieresis" => '\u{F6}',
        "udieresis" => '\u{FC}',
        "adieresis" => '\u{E4}',
        "germandbls" => '\u{DF}',
        _ => return None,
    };
    Some(c)
}
