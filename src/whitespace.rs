//! The whitespace controller: suppresses the indentation and trailing
//! newline that surround directive-only lines so templates read as clean
//! text, implemented as the explicit `pending`/`trim_stack` state machine
//! from §4.5.

use smallvec::SmallVec;

/// Declared by `@trim_newline`: the nesting level at declaration time and
/// the length of `results` at that moment, used to tell whether the block
/// that followed produced any output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimNewlineState {
    pub level: i64,
    pub pos_mark: usize,
}

#[derive(Default)]
pub struct WhitespaceController {
    pending: Option<String>,
    // `@trim_newline` rarely nests more than a couple of levels deep.
    trim_stack: SmallVec<[TrimNewlineState; 4]>,
}

impl WhitespaceController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generic append (the Python `append_text(text, flush_pending=True)`
    /// path): flushes any pending whitespace ahead of new, non-literal
    /// output (a field value, a formatter result, an included render).
    pub fn append(&mut self, text: &str) -> (Option<String>, String) {
        if text.is_empty() {
            return (None, String::new());
        }
        let flush = self.pending.take().filter(|s| !s.is_empty());
        (flush, text.to_string())
    }

    /// Takes whatever is currently pending so the caller can flush it
    /// directly to `results` (the `flush_pending=False` path, used only by
    /// `@trim_newline`).
    pub fn take_pending_for_flush(&mut self) -> Option<String> {
        self.pending.take().filter(|s| !s.is_empty())
    }

    /// Declares a trim point: the nesting level and current output length
    /// at `@trim_newline` time. A following blank run at the same level and
    /// mark is suppressed once the matching block closes without output.
    pub fn begin_trim_newline(&mut self, level: i64, results_len: usize) {
        self.pending = Some(String::new());
        self.trim_stack.push(TrimNewlineState {
            level,
            pos_mark: results_len,
        });
    }

    /// Runs the four-step algorithm over one component's literal text.
    /// Returns `(flush, text)`: both should be appended (in that order) to
    /// `results` only when `text` is non-empty (mirroring `append_text`'s
    /// gate), and `flush` only when it is `Some` and non-empty.
    pub fn process_literal(
        &mut self,
        mut text: String,
        pos_index: usize,
        level: i64,
        has_field_name: bool,
        results_len: usize,
    ) -> (Option<String>, String) {
        // Step 1: flush-merge with pending whitespace.
        if let Some(pending) = self.pending.clone() {
            if let Some(stripped) = strip_leading_ws_newline(&text) {
                text = stripped;
                let mut p = pending.trim_end_matches([' ', '\t']).to_string();
                if p.ends_with('\n') {
                    text = format!("\n{text}");
                    p.pop();
                }
                self.pending = Some(p);
            }
        }

        // Step 2: trim-newline consumption.
        if !self.trim_stack.is_empty() && !text.is_empty() {
            loop {
                let Some(top) = self.trim_stack.last().copied() else {
                    break;
                };
                if top.level < level {
                    break;
                }
                if top.level == level && top.pos_mark == results_len {
                    text = text.trim_start_matches('\n').to_string();
                    if text.is_empty() {
                        break;
                    }
                }
                self.trim_stack.pop();
                if self.trim_stack.is_empty() {
                    break;
                }
            }
        }

        // The candidate for flushing is whatever pending looks like right
        // now, before step 3 decides the *next* pending value.
        let flush_candidate = self.pending.clone();

        // Step 3: tail-capture / carry-forward.
        let new_pending = if pos_index != 0 && text.is_empty() {
            self.pending.clone()
        } else if has_field_name {
            if let Some(match_len) = trailing_newline_run(&text) {
                let split_at = text.len() - match_len;
                let tail = text[split_at..].to_string();
                text.truncate(split_at);
                Some(tail)
            } else if pos_index == 0 && is_all_ws(&text) {
                let tail = text.clone();
                text.clear();
                Some(tail)
            } else {
                None
            }
        } else {
            None
        };

        let out = if !text.is_empty() {
            (flush_candidate.filter(|s| !s.is_empty()), text)
        } else {
            (None, text)
        };

        self.pending = new_pending;
        out
    }

    pub fn is_empty_state(&self) -> bool {
        self.pending.is_none() && self.trim_stack.is_empty()
    }
}

fn strip_leading_ws_newline(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'\n' {
        Some(text[i + 1..].to_string())
    } else {
        None
    }
}

fn trailing_newline_run(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = bytes.len();
    while i > 0 && (bytes[i - 1] == b' ' || bytes[i - 1] == b'\t') {
        i -= 1;
    }
    if i > 0 && bytes[i - 1] == b'\n' {
        Some(bytes.len() - (i - 1))
    } else {
        None
    }
}

fn is_all_ws(text: &str) -> bool {
    text.bytes().all(|b| b == b' ' || b == b'\t')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_only_line_is_fully_suppressed() {
        let mut wc = WhitespaceController::new();
        // "Start.\n" literal before a directive.
        let (flush, text) = wc.process_literal("Start.\n".to_string(), 0, 0, true, 0);
        assert_eq!(flush, None);
        assert_eq!(text, "Start.");
        // the trailing "\n" became pending.

        // literal between the directive and the next one is just "\n".
        let (flush, text) = wc.process_literal("\n".to_string(), 1, 0, true, 0);
        assert_eq!(flush, None);
        assert_eq!(text, "");
    }

    #[test]
    fn no_pending_means_text_passes_through() {
        let mut wc = WhitespaceController::new();
        let (flush, text) = wc.process_literal("hello".to_string(), 0, 0, false, 0);
        assert_eq!(flush, None);
        assert_eq!(text, "hello");
    }
}
