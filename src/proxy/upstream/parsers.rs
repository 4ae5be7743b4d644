// Kiro AWS event-stream parsing.
//
// Upstream frames arrive as binary AWS event-stream records whose payloads
// are small JSON objects. Frame headers vary between deployments, so the
// parser scans for known JSON prefixes instead of trusting the framing, and
// keeps incomplete frames buffered across reads.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

/// Events surfaced to the response translators.
#[derive(Debug, Clone, PartialEq)]
pub enum KiroEvent {
    ContentDelta(String),
    ToolUseStart { name: String, tool_use_id: String },
    ToolInputDelta(String),
    ToolUseStop,
}

/// JSON prefixes that identify a payload inside the binary stream.
const FRAME_PREFIXES: &[&str] = &[
    "{\"content\":",
    "{\"name\":",
    "{\"input\":",
    "{\"stop\":",
    "{\"followupPrompt\":",
];

/// The two-character escape `\n` embedded in content payloads becomes a real
/// newline; single-byte newlines are left alone.
fn unescape_newlines(text: &str) -> String {
    text.replace("\\n", "\n")
}

/// Find the closing `}` for the `{` at `start`, honoring strings and escapes.
pub fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if start >= bytes.len() || bytes[start] != b'{' {
        return None;
    }

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut i = start;

    while i < bytes.len() {
        let ch = bytes[i];
        if escape_next {
            escape_next = false;
        } else if ch == b'\\' && in_string {
            escape_next = true;
        } else if ch == b'"' {
            in_string = !in_string;
        } else if !in_string {
            if ch == b'{' {
                depth += 1;
            } else if ch == b'}' {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

/// Classify one decoded frame into zero or more events. A single frame may
/// open a tool use, carry part of its arguments, and close it.
fn classify_frame(val: &Value) -> Vec<KiroEvent> {
    if val.get("followupPrompt").is_some() {
        return Vec::new();
    }

    let mut events = Vec::new();
    let name = val.get("name").and_then(|v| v.as_str());
    let tool_use_id = val.get("toolUseId").and_then(|v| v.as_str());
    let input = val.get("input").and_then(|v| v.as_str());
    let stop = val.get("stop").and_then(|v| v.as_bool()).unwrap_or(false);

    if let (Some(name), Some(id)) = (name, tool_use_id) {
        events.push(KiroEvent::ToolUseStart {
            name: name.to_string(),
            tool_use_id: id.to_string(),
        });
        if let Some(input) = input {
            if !input.is_empty() {
                events.push(KiroEvent::ToolInputDelta(input.to_string()));
            }
        }
        if stop {
            events.push(KiroEvent::ToolUseStop);
        }
        return events;
    }

    if let Some(input) = input {
        events.push(KiroEvent::ToolInputDelta(input.to_string()));
        if stop {
            events.push(KiroEvent::ToolUseStop);
        }
        return events;
    }

    if val.get("stop").is_some() {
        if stop {
            events.push(KiroEvent::ToolUseStop);
        }
        return events;
    }

    if let Some(content) = val.get("content").and_then(|v| v.as_str()) {
        events.push(KiroEvent::ContentDelta(unescape_newlines(content)));
    }

    events
}

/// Scan the buffer for complete JSON frames. Returns the decoded frames and
/// the number of buffer bytes that are safe to drain. Bytes belonging to an
/// incomplete trailing frame are never counted as consumed.
fn scan_frames(buffer: &[u8]) -> (Vec<Value>, usize) {
    // Decode to UTF-8 skipping invalid bytes, remembering each clean byte's
    // position in the original buffer so draining stays accurate.
    let mut clean = String::new();
    let mut byte_map: Vec<usize> = Vec::new();

    let mut i = 0;
    while i < buffer.len() {
        match std::str::from_utf8(&buffer[i..]) {
            Ok(valid) => {
                for _ in 0..valid.len() {
                    byte_map.push(i);
                    i += 1;
                }
                clean.push_str(valid);
                break;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if valid_up_to > 0 {
                    let valid = std::str::from_utf8(&buffer[i..i + valid_up_to]).unwrap();
                    clean.push_str(valid);
                    for _ in 0..valid_up_to {
                        byte_map.push(i);
                        i += 1;
                    }
                }
                match e.error_len() {
                    Some(len) => i += len,
                    None => break, // truncated sequence at the tail
                }
            }
        }
    }

    let mut frames = Vec::new();
    let mut search_pos = 0;
    let mut consumed_original = 0;

    while search_pos < clean.len() {
        let frame_start = FRAME_PREFIXES
            .iter()
            .filter_map(|p| clean[search_pos..].find(p).map(|off| search_pos + off))
            .min();

        let Some(start) = frame_start else { break };
        let Some(end) = find_matching_brace(&clean, start) else {
            // Incomplete frame; leave it buffered.
            break;
        };

        if let Ok(val) = serde_json::from_str::<Value>(&clean[start..=end]) {
            frames.push(val);
        }

        search_pos = end + 1;
        if search_pos <= byte_map.len() {
            consumed_original = byte_map[search_pos - 1] + 1;
        }
    }

    // No complete frame this round: drain leading garbage, but keep an
    // incomplete frame (or a prefix split across reads) buffered.
    if frames.is_empty() && !clean.is_empty() {
        let first_prefix = FRAME_PREFIXES
            .iter()
            .filter_map(|p| clean.find(p))
            .min();
        match first_prefix {
            Some(pos) => {
                if pos > 0 {
                    consumed_original = byte_map[pos - 1] + 1;
                }
            }
            None => {
                let guard = FRAME_PREFIXES
                    .iter()
                    .map(|p| longest_suffix_prefix(&clean, p))
                    .max()
                    .unwrap_or(0);
                let keep_from = clean.len() - guard;
                if keep_from > 0 && !byte_map.is_empty() {
                    consumed_original = byte_map[keep_from - 1] + 1;
                }
            }
        }
    }

    (frames, consumed_original.min(buffer.len()))
}

/// Length of the longest suffix of `haystack` that is a proper prefix of `needle`.
fn longest_suffix_prefix(haystack: &str, needle: &str) -> usize {
    let max = needle.len().saturating_sub(1).min(haystack.len());
    for k in (1..=max).rev() {
        let at = haystack.len() - k;
        if haystack.is_char_boundary(at) && needle.as_bytes().starts_with(haystack[at..].as_bytes())
        {
            return k;
        }
    }
    0
}

/// Incremental event-stream parser. Feed network chunks as they arrive;
/// call `finish` when the stream ends to flush the legacy fallback.
pub struct EventStreamParser {
    buffer: Vec<u8>,
    raw: Vec<u8>,
    produced_any: bool,
}

impl Default for EventStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            raw: Vec::new(),
            produced_any: false,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<KiroEvent> {
        self.raw.extend_from_slice(chunk);
        self.buffer.extend_from_slice(chunk);
        let (frames, consumed) = scan_frames(&self.buffer);
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        let events: Vec<KiroEvent> = frames.iter().flat_map(classify_frame).collect();
        if !events.is_empty() {
            self.produced_any = true;
        }
        events
    }

    /// Flush remaining buffered frames. If the whole stream produced nothing
    /// structurally, fall back to the relaxed legacy scan over the raw bytes.
    pub fn finish(&mut self) -> Vec<KiroEvent> {
        let (frames, _) = scan_frames(&self.buffer);
        let mut events: Vec<KiroEvent> = frames.iter().flat_map(classify_frame).collect();
        if !events.is_empty() {
            self.produced_any = true;
        }
        if !self.produced_any {
            let text = String::from_utf8_lossy(&self.raw).into_owned();
            events = parse_legacy_events(&text);
        }
        self.buffer.clear();
        events
    }
}

static LEGACY_EVENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"event[^\{]{0,64}").unwrap());

/// Legacy framing fallback: locate each JSON object following the token
/// `event` with a relaxed delimiter and classify it like a normal frame.
pub fn parse_legacy_events(text: &str) -> Vec<KiroEvent> {
    let mut events = Vec::new();
    let mut last_end = 0;
    for m in LEGACY_EVENT_RE.find_iter(text) {
        if m.start() < last_end {
            continue;
        }
        let Some(rel) = text[m.end()..].find('{') else {
            continue;
        };
        let start = m.end() + rel;
        let Some(end) = find_matching_brace(text, start) else {
            continue;
        };
        if let Ok(val) = serde_json::from_str::<Value>(&text[start..=end]) {
            events.extend(classify_frame(&val));
        }
        last_end = end + 1;
    }
    events
}

// ===== Bracketed tool-call fallback =====

/// Tool call recovered from free-form text.
#[derive(Debug, Clone)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
    pub tool_call_id: String,
}

impl ParsedToolCall {
    /// Dedup key covering both structured and bracket-extracted calls.
    pub fn dedup_key(name: &str, arguments: &Value) -> String {
        format!(
            "{}\u{0}{}",
            name,
            serde_json::to_string(arguments).unwrap_or_default()
        )
    }
}

static BRACKET_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[Called\s+(\w+)\s+with\s+args:\s*").unwrap());

static TRAILING_COMMA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());
static BARE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).unwrap());
static BARE_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#":\s*([A-Za-z_][A-Za-z0-9_\-]*)\s*([,}\]])"#).unwrap());

/// Minor JSON repair for model-emitted argument objects: trailing commas
/// removed, bare keys and bare word values quoted. `true`/`false`/`null`
/// stay untouched.
fn repair_json(input: &str) -> String {
    let step1 = TRAILING_COMMA_RE.replace_all(input, "$1");
    let step2 = BARE_KEY_RE.replace_all(&step1, "$1\"$2\":");
    BARE_VALUE_RE
        .replace_all(&step2, |caps: &regex::Captures| {
            let word = &caps[1];
            if matches!(word, "true" | "false" | "null") {
                format!(": {}{}", word, &caps[2])
            } else {
                format!(": \"{}\"{}", word, &caps[2])
            }
        })
        .into_owned()
}

/// Parse `[Called name with args: {...}]` patterns out of text.
pub fn parse_bracket_tool_calls(text: &str) -> Vec<ParsedToolCall> {
    if text.is_empty() || !text.contains("[Called") {
        return Vec::new();
    }

    let mut results = Vec::new();
    for caps in BRACKET_CALL_RE.captures_iter(text) {
        let name = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        let match_end = caps.get(0).map(|m| m.end()).unwrap_or(0);

        let Some(rel) = text[match_end..].find('{') else {
            continue;
        };
        let json_start = match_end + rel;
        let Some(json_end) = find_matching_brace(text, json_start) else {
            continue;
        };
        let json_str = &text[json_start..=json_end];

        let arguments = match serde_json::from_str::<Value>(json_str) {
            Ok(v) => v,
            Err(_) => match serde_json::from_str::<Value>(&repair_json(json_str)) {
                Ok(v) => v,
                Err(_) => continue,
            },
        };

        let id = format!("toolu_{}", uuid::Uuid::new_v4().simple());
        results.push(ParsedToolCall {
            name,
            arguments,
            tool_call_id: id[..30].to_string(),
        });
    }
    results
}

/// Deduplicate by `(name, arguments)`, first occurrence wins.
pub fn dedup_tool_calls(calls: Vec<ParsedToolCall>) -> Vec<ParsedToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|c| seen.insert(ParsedToolCall::dedup_key(&c.name, &c.arguments)))
        .collect()
}

// ===== Streaming bracket scanner =====

const BRACKET_MARKER: &str = "[Called";

/// Withholds text that may belong to a bracketed tool invocation so the
/// visible stream never shows brackets that later become tool-use blocks.
/// Incomplete candidates are released verbatim at flush time.
#[derive(Default)]
pub struct BracketScanner {
    pending: String,
    tools: Vec<ParsedToolCall>,
}

impl BracketScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a text delta and return the part that is safe to show now.
    pub fn push(&mut self, text: &str) -> String {
        self.pending.push_str(text);
        let mut visible = String::new();

        loop {
            match self.pending.find(BRACKET_MARKER) {
                None => {
                    let guard = longest_suffix_prefix(&self.pending, BRACKET_MARKER);
                    let emit = self.pending.len() - guard;
                    visible.push_str(&self.pending[..emit]);
                    self.pending.drain(..emit);
                    break;
                }
                Some(idx) => {
                    visible.push_str(&self.pending[..idx]);
                    self.pending.drain(..idx);
                    match complete_bracket_len(&self.pending) {
                        Some(end) => {
                            let bracket: String = self.pending.drain(..end).collect();
                            let mut parsed = parse_bracket_tool_calls(&bracket);
                            if parsed.is_empty() {
                                // Looked like a call but was not one; show it.
                                visible.push_str(&bracket);
                            } else {
                                self.tools.append(&mut parsed);
                            }
                        }
                        None => break, // wait for more input
                    }
                }
            }
        }

        visible
    }

    /// End of stream: release whatever is still withheld, unmodified.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    pub fn take_tools(&mut self) -> Vec<ParsedToolCall> {
        std::mem::take(&mut self.tools)
    }
}

/// If `s` starts with a complete `[Called … {…} ]` form, return its byte length.
fn complete_bracket_len(s: &str) -> Option<usize> {
    let brace = s.find('{')?;
    let close = find_matching_brace(s, brace)?;
    let rest = &s[close + 1..];
    let rb = rest.find(']')?;
    if !rest[..rb].trim().is_empty() {
        return None;
    }
    Some(close + 1 + rb + 1)
}
