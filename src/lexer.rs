//! Splits a template string into an ordered sequence of [`Component`]s.
//!
//! Reproduces the classic "brace field" split (`string.Formatter.parse`)
//! bit-for-bit: literal runs delimited by `{...}` placeholders, `{{`/`}}`
//! escaping, and one level of nested braces inside a format spec.

use memchr::memchr2;

use crate::error::{MextError, SourceLocation};

/// One token in the parsed template stream: the literal text preceding a
/// placeholder, plus the placeholder's parsed parts. The final component
/// in a stream always has `field_name == None` and holds the trailing
/// literal text.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub literal_text: String,
    pub field_name: Option<String>,
    pub format_spec: String,
    pub conversion: Option<char>,
}

pub fn split_components(template: &str) -> Result<Vec<Component>, MextError> {
    let chars: Vec<char> = template.chars().collect();
    let n = chars.len();
    // A byte offset per char index, so a fast byte-level memchr scan for the
    // next brace can be mapped back onto the char-indexed placeholder parser
    // below without re-decoding UTF-8.
    let byte_offsets: Vec<usize> = {
        let mut offsets = Vec::with_capacity(n + 1);
        let mut pos = 0;
        for &c in &chars {
            offsets.push(pos);
            pos += c.len_utf8();
        }
        offsets.push(pos);
        offsets
    };
    let bytes = template.as_bytes();

    let mut components = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < n {
        // Copy the run of plain (non-brace) text in one memchr2 scan
        // instead of pushing char by char; braces are single-byte ASCII so
        // a byte offset found this way always lands on a char boundary.
        if chars[i] != '{' && chars[i] != '}' {
            let start_byte = byte_offsets[i];
            let end_byte = match memchr2(b'{', b'}', &bytes[start_byte..]) {
                Some(rel) => start_byte + rel,
                None => bytes.len(),
            };
            literal.push_str(&template[start_byte..end_byte]);
            i = byte_offsets[i..].iter().position(|&b| b == end_byte).map(|p| p + i).unwrap_or(n);
            continue;
        }

        match chars[i] {
            '{' if i + 1 < n && chars[i + 1] == '{' => {
                literal.push('{');
                i += 2;
            }
            '}' if i + 1 < n && chars[i + 1] == '}' => {
                literal.push('}');
                i += 2;
            }
            '{' => {
                i += 1;
                let (field_name, conversion, format_spec, next) = parse_placeholder(&chars, i)?;
                i = next;
                components.push(Component {
                    literal_text: std::mem::take(&mut literal),
                    field_name: Some(field_name),
                    format_spec,
                    conversion,
                });
            }
            '}' => {
                return Err(MextError::syntax(
                    "Single '}' encountered in format string",
                    SourceLocation::unknown(),
                ));
            }
            _ => unreachable!(),
        }
    }

    components.push(Component {
        literal_text: literal,
        field_name: None,
        format_spec: String::new(),
        conversion: None,
    });
    Ok(components)
}

/// Parses the body of a placeholder starting just past its opening `{`.
/// Returns `(field_name, conversion, format_spec, index_past_closing_brace)`.
fn parse_placeholder(
    chars: &[char],
    mut i: usize,
) -> Result<(String, Option<char>, String, usize), MextError> {
    let n = chars.len();

    let mut field_name = String::new();
    while i < n && chars[i] != '!' && chars[i] != ':' && chars[i] != '}' {
        field_name.push(chars[i]);
        i += 1;
    }
    if i >= n {
        return Err(MextError::syntax(
            "Single '{' encountered in format string (unterminated placeholder)",
            SourceLocation::unknown(),
        ));
    }

    let mut conversion = None;
    if chars[i] == '!' {
        i += 1;
        if i >= n {
            return Err(MextError::syntax(
                "Missing conversion after '!'",
                SourceLocation::unknown(),
            ));
        }
        conversion = Some(chars[i]);
        i += 1;
    }

    let mut format_spec = String::new();
    if i < n && chars[i] == ':' {
        i += 1;
        let mut depth: u32 = 0;
        loop {
            if i >= n {
                return Err(MextError::syntax(
                    "Single '{' encountered in format string (unterminated format spec)",
                    SourceLocation::unknown(),
                ));
            }
            match chars[i] {
                '{' => {
                    if depth >= 1 {
                        return Err(MextError::syntax(
                            "Max string recursion exceeded (nested braces more than one level deep)",
                            SourceLocation::unknown(),
                        ));
                    }
                    depth += 1;
                    format_spec.push('{');
                    i += 1;
                }
                '}' if depth > 0 => {
                    depth -= 1;
                    format_spec.push('}');
                    i += 1;
                }
                '}' => break,
                c => {
                    format_spec.push(c);
                    i += 1;
                }
            }
        }
    }

    if i >= n || chars[i] != '}' {
        return Err(MextError::syntax(
            "expected '}' to close placeholder",
            SourceLocation::unknown(),
        ));
    }
    i += 1;

    Ok((field_name, conversion, format_spec, i))
}
