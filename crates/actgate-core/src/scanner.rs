//! Incremental extraction of action tags from streamed model output.
//!
//! Two dialects are recognised:
//!
//! ```text
//! [ACTION:RUN_CMD:ls -la[/ACTION]          terminator form
//! [ACTION:READ_FILE:/etc/hosts]            legacy form (single line, no `]` inside)
//! [ACTION:WRITE_FILE:/tmp/a.txt:body[/ACTION]
//! ```
//!
//! Input is processed one character at a time through an explicit state
//! machine, so the display text and the recovered actions are identical no
//! matter how the stream is fragmented.
//!
//! A tag is closed by the terminator when one appears before the next opener.
//! Otherwise (next opener reached, or end of stream) it is resolved as a
//! legacy tag ending at the first `]` of its first line, and whatever follows
//! that `]` is scanned again as ordinary text. A tag that fits neither form is
//! dropped from the display and counted in [`ScanOutput::discarded`].
//!
//! Latency: while a tag is open the scanner cannot yet tell the two forms
//! apart, so display text after a legacy-form tag is held back until a
//! terminator, the next opener, or end of stream. A reply that uses a legacy
//! tag early therefore shows nothing live after it and is released in one
//! piece when the tag resolves.

use crate::types::{ActionDescriptor, ActionKind};

/// Explicit end marker for the terminator form.
pub const TERMINATOR: &str = "[/ACTION]";

/// Shared head of every opener.
const OPENER_HEAD: &str = "[ACTION:";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum ScanState {
    /// Emitting text verbatim.
    #[default]
    Idle,
    /// Holding back text that is still a prefix of some opener.
    Prefix(String),
    /// Inside a tag; everything is suppressed until it closes.
    Inside { kind: ActionKind, payload: String },
}

/// Result of a completed scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutput {
    /// Display text not yet returned by [`StreamTagScanner::push`].
    pub display: String,
    pub actions: Vec<ActionDescriptor>,
    /// Malformed or unterminated tags removed from the display.
    pub discarded: usize,
}

// ---------------------------------------------------------------------------
// StreamTagScanner
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StreamTagScanner {
    state: ScanState,
    actions: Vec<ActionDescriptor>,
    discarded: usize,
}

impl StreamTagScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns the display text that can be shown now.
    pub fn push(&mut self, fragment: &str) -> String {
        let mut out = String::with_capacity(fragment.len());
        for ch in fragment.chars() {
            self.step(ch, &mut out);
        }
        out
    }

    /// Actions completed so far, in stream order.
    pub fn actions(&self) -> &[ActionDescriptor] {
        &self.actions
    }

    /// True when no text is being held back.
    pub fn is_idle(&self) -> bool {
        self.state == ScanState::Idle
    }

    /// End of stream: resolve whatever is still open.
    pub fn finish(mut self) -> ScanOutput {
        let mut out = String::new();
        self.flush_end(&mut out);
        ScanOutput {
            display: out,
            actions: self.actions,
            discarded: self.discarded,
        }
    }

    fn step(&mut self, ch: char, out: &mut String) {
        self.state = match std::mem::take(&mut self.state) {
            ScanState::Idle => {
                if ch == '[' {
                    ScanState::Prefix(String::from('['))
                } else {
                    out.push(ch);
                    ScanState::Idle
                }
            }
            ScanState::Prefix(mut buf) => {
                buf.push(ch);
                if let Some(kind) = full_opener(&buf) {
                    ScanState::Inside {
                        kind,
                        payload: String::new(),
                    }
                } else if is_opener_prefix(&buf) {
                    ScanState::Prefix(buf)
                } else {
                    // Openers hold a single `[`, so only `ch` itself can begin a new one.
                    buf.pop();
                    out.push_str(&buf);
                    if ch == '[' {
                        ScanState::Prefix(String::from('['))
                    } else {
                        out.push(ch);
                        ScanState::Idle
                    }
                }
            }
            ScanState::Inside { kind, mut payload } => {
                payload.push(ch);
                if let Some(body) = payload.strip_suffix(TERMINATOR) {
                    self.close(kind, body);
                    ScanState::Idle
                } else if let Some(next) = trailing_opener(&payload) {
                    let body_len = payload.len() - next.opener().len();
                    payload.truncate(body_len);
                    if let Some(rest) = self.close_legacy(kind, &payload) {
                        // `rest` holds no complete opener; re-scan it as text.
                        for c in rest.chars() {
                            self.step(c, out);
                        }
                        // Whatever `rest` left pending is cut short by the new opener.
                        if let ScanState::Prefix(buf) = std::mem::take(&mut self.state) {
                            out.push_str(&buf);
                        }
                    }
                    ScanState::Inside {
                        kind: next,
                        payload: String::new(),
                    }
                } else {
                    ScanState::Inside { kind, payload }
                }
            }
        };
    }

    fn flush_end(&mut self, out: &mut String) {
        match std::mem::take(&mut self.state) {
            ScanState::Idle => {}
            ScanState::Prefix(buf) => {
                if buf.starts_with(OPENER_HEAD) {
                    self.discarded += 1;
                } else {
                    out.push_str(&buf);
                }
            }
            ScanState::Inside { kind, payload } => {
                if let Some(rest) = self.close_legacy(kind, &payload) {
                    for c in rest.chars() {
                        self.step(c, out);
                    }
                    self.flush_end(out);
                }
            }
        }
    }

    /// Close `payload` as a legacy tag. Returns the text after the closing
    /// `]`, or `None` (and counts a discard) when there is no legacy close.
    fn close_legacy(&mut self, kind: ActionKind, payload: &str) -> Option<String> {
        match legacy_close(payload) {
            Some(idx) => {
                self.close(kind, &payload[..idx]);
                Some(payload[idx + 1..].to_string())
            }
            None => {
                self.discarded += 1;
                None
            }
        }
    }

    fn close(&mut self, kind: ActionKind, body: &str) {
        match parse_payload(kind, body) {
            Some(descriptor) => self.actions.push(descriptor),
            None => self.discarded += 1,
        }
    }
}

/// Scan a complete text in one go.
pub fn scan(text: &str) -> ScanOutput {
    let mut scanner = StreamTagScanner::new();
    let head = scanner.push(text);
    let mut output = scanner.finish();
    output.display.insert_str(0, &head);
    output
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn full_opener(buf: &str) -> Option<ActionKind> {
    ActionKind::all()
        .iter()
        .copied()
        .find(|k| k.opener() == buf)
}

fn is_opener_prefix(buf: &str) -> bool {
    ActionKind::all().iter().any(|k| k.opener().starts_with(buf))
}

fn trailing_opener(payload: &str) -> Option<ActionKind> {
    if !payload.ends_with(':') {
        return None;
    }
    ActionKind::all()
        .iter()
        .copied()
        .find(|k| payload.ends_with(k.opener()))
}

/// Byte index of the first `]` on the first line.
fn legacy_close(payload: &str) -> Option<usize> {
    for (i, c) in payload.char_indices() {
        match c {
            '\n' => return None,
            ']' => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_payload(kind: ActionKind, body: &str) -> Option<ActionDescriptor> {
    if !kind.splits_payload() {
        let target = body.trim();
        if target.is_empty() {
            return None;
        }
        return Some(ActionDescriptor::new(kind, target, None));
    }

    let (target, rest) = split_target(body);
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    let content = match kind {
        ActionKind::WriteFile => rest.map(|c| strip_leading_newline(c).to_string()),
        _ => rest
            .map(|args| args.trim().to_string())
            .filter(|args| !args.is_empty()),
    };
    Some(ActionDescriptor::new(kind, target, content))
}

/// Split on the first `:` only. A leading drive prefix (`C:\`, `d:/`) is
/// kept with the target.
fn split_target(body: &str) -> (&str, Option<&str>) {
    let lead = body.len() - body.trim_start().len();
    let skip = if has_drive_prefix(&body[lead..]) { 2 } else { 0 };
    let search_from = lead + skip;
    match body[search_from..].find(':') {
        Some(i) => {
            let at = search_from + i;
            (&body[..at], Some(&body[at + 1..]))
        }
        None => (body, None),
    }
}

fn has_drive_prefix(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && (b[2] == b'\\' || b[2] == b'/')
}

fn strip_leading_newline(s: &str) -> &str {
    s.strip_prefix("\r\n")
        .or_else(|| s.strip_prefix('\n'))
        .unwrap_or(s)
}
