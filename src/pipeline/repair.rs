//! Deterministic JSON syntax repair for classifier output.
//!
//! Repair is a fixed pipeline of pure `&str -> String` steps applied left to
//! right. A step "applied" when its output differs from its input; the
//! report lists applied steps in order so logs show what was patched.
//!
//! Every step works on a token stream that understands both quote styles
//! and comments, so text inside strings is never touched. The structural
//! steps additionally track whether the cursor is at a key, a colon, a value
//! or after a value in the enclosing object/array.

use std::sync::atomic::{AtomicUsize, Ordering};

/// One repair step.
pub type RepairFn = fn(&str) -> String;

/// The pipeline, in application order.
pub const REPAIR_STEPS: [(&str, RepairFn); 6] = [
    ("strip_comments", strip_comments),
    ("quote_bare_keys", quote_bare_keys),
    ("insert_missing_colons", insert_missing_colons),
    ("insert_missing_commas", insert_missing_commas),
    ("strip_trailing_commas", strip_trailing_commas),
    ("single_to_double_quotes", single_to_double_quotes),
];

/// Result of running the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub output: String,
    /// Names of the steps that changed the text.
    pub applied: Vec<&'static str>,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

/// Run every step over `input`.
pub fn repair_json(input: &str) -> RepairReport {
    let mut current = input.to_string();
    let mut applied = Vec::new();
    for (name, step) in REPAIR_STEPS {
        let next = step(&current);
        if next != current {
            applied.push(name);
            current = next;
        }
    }
    RepairReport {
        output: current,
        applied,
    }
}

/// Seam for the classifier so tests can observe when repair runs.
pub trait JsonRepair: Send + Sync {
    fn repair(&self, input: &str) -> RepairReport;
}

/// The default [`JsonRepair`]: the [`REPAIR_STEPS`] pipeline.
#[derive(Debug, Default)]
pub struct SyntaxRepair {
    invocations: AtomicUsize,
}

impl SyntaxRepair {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times [`JsonRepair::repair`] has run.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }
}

impl JsonRepair for SyntaxRepair {
    fn repair(&self, input: &str) -> RepairReport {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        repair_json(input)
    }
}

// ── Lexer ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Obj,
    Arr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Open(Container),
    Close,
    Colon,
    Comma,
    Str { single: bool, terminated: bool },
    /// Bare run of non-delimiter characters: numbers, literals, unquoted keys.
    Word,
    Comment,
    Space,
}

impl Kind {
    fn is_trivia(self) -> bool {
        matches!(self, Kind::Space | Kind::Comment)
    }

    fn starts_value(self) -> bool {
        matches!(self, Kind::Str { .. } | Kind::Word | Kind::Open(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Tok<'a> {
    kind: Kind,
    text: &'a str,
}

fn is_delim(bytes: &[u8], i: usize) -> bool {
    match bytes[i] {
        b'{' | b'}' | b'[' | b']' | b':' | b',' | b'"' | b'\'' => true,
        b'/' => matches!(bytes.get(i + 1), Some(b'/') | Some(b'*')),
        c => c.is_ascii_whitespace(),
    }
}

/// Returns the end index and whether the closing quote was found.
fn scan_string(bytes: &[u8], start: usize) -> (usize, bool) {
    let quote = bytes[start];
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            c if c == quote => return (j + 1, true),
            _ => j += 1,
        }
    }
    (bytes.len(), false)
}

fn lex(input: &str) -> Vec<Tok<'_>> {
    let bytes = input.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        let kind = match bytes[i] {
            b'{' => {
                i += 1;
                Kind::Open(Container::Obj)
            }
            b'[' => {
                i += 1;
                Kind::Open(Container::Arr)
            }
            b'}' | b']' => {
                i += 1;
                Kind::Close
            }
            b':' => {
                i += 1;
                Kind::Colon
            }
            b',' => {
                i += 1;
                Kind::Comma
            }
            q @ (b'"' | b'\'') => {
                let (end, terminated) = scan_string(bytes, i);
                i = end;
                Kind::Str {
                    single: q == b'\'',
                    terminated,
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                Kind::Comment
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = input[i + 2..]
                    .find("*/")
                    .map(|p| i + 2 + p + 2)
                    .unwrap_or(bytes.len());
                Kind::Comment
            }
            c if c.is_ascii_whitespace() => {
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                Kind::Space
            }
            _ => {
                i += 1;
                while i < bytes.len() && !is_delim(bytes, i) {
                    i += 1;
                }
                Kind::Word
            }
        };
        toks.push(Tok {
            kind,
            text: &input[start..i],
        });
    }
    toks
}

fn next_significant(toks: &[Tok<'_>], after: usize) -> Option<Kind> {
    toks[after + 1..]
        .iter()
        .map(|t| t.kind)
        .find(|k| !k.is_trivia())
}

// ── Structural walker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Key,
    Colon,
    Value,
    After,
}

/// Parse position inside the innermost container (`None` = top level).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    container: Option<Container>,
    expect: Expect,
}

const ROOT: Frame = Frame {
    container: None,
    expect: Expect::Value,
};

struct Walker {
    stack: Vec<Frame>,
}

impl Walker {
    fn new() -> Self {
        Self { stack: vec![ROOT] }
    }

    fn top(&self) -> Frame {
        self.stack.last().copied().unwrap_or(ROOT)
    }

    fn set(&mut self, expect: Expect) {
        if let Some(frame) = self.stack.last_mut() {
            frame.expect = expect;
        }
    }

    fn advance(&mut self, kind: Kind) {
        let top = self.top();
        match kind {
            Kind::Open(c) => {
                self.set(Expect::After);
                self.stack.push(Frame {
                    container: Some(c),
                    expect: match c {
                        Container::Obj => Expect::Key,
                        Container::Arr => Expect::Value,
                    },
                });
            }
            Kind::Close => {
                if self.stack.len() > 1 {
                    self.stack.pop();
                }
            }
            Kind::Colon => {
                if top.expect == Expect::Colon {
                    self.set(Expect::Value);
                }
            }
            Kind::Comma => match top.container {
                Some(Container::Obj) => self.set(Expect::Key),
                Some(Container::Arr) => self.set(Expect::Value),
                None => {}
            },
            Kind::Str { .. } | Kind::Word => match (top.container, top.expect) {
                (Some(Container::Obj), Expect::Key | Expect::After) => self.set(Expect::Colon),
                _ => self.set(Expect::After),
            },
            Kind::Space | Kind::Comment => {}
        }
    }
}

enum Action {
    Keep,
    Replace(String),
    InsertBefore(Kind),
}

fn structural_rewrite(input: &str, policy: impl Fn(Frame, &Tok<'_>, Option<Kind>) -> Action) -> String {
    let toks = lex(input);
    let mut walker = Walker::new();
    let mut out = String::with_capacity(input.len() + 16);

    for (idx, tok) in toks.iter().enumerate() {
        if tok.kind.is_trivia() {
            out.push_str(tok.text);
            continue;
        }
        match policy(walker.top(), tok, next_significant(&toks, idx)) {
            Action::Keep => out.push_str(tok.text),
            Action::Replace(text) => out.push_str(&text),
            Action::InsertBefore(kind) => {
                out.push_str(if kind == Kind::Colon { ":" } else { "," });
                walker.advance(kind);
                out.push_str(tok.text);
            }
        }
        walker.advance(tok.kind);
    }
    out
}

// ── Steps ────────────────────────────────────────────────────────────────

/// Remove `// line` and `/* block */` comments outside strings.
pub fn strip_comments(input: &str) -> String {
    lex(input)
        .into_iter()
        .filter(|t| t.kind != Kind::Comment)
        .map(|t| t.text)
        .collect()
}

/// `{label: "x"}` → `{"label": "x"}`.
pub fn quote_bare_keys(input: &str) -> String {
    structural_rewrite(input, |frame, tok, next| {
        let key_position = match frame.expect {
            Expect::Key => true,
            Expect::After => next == Some(Kind::Colon),
            _ => false,
        };
        if frame.container == Some(Container::Obj) && key_position && tok.kind == Kind::Word {
            Action::Replace(format!("\"{}\"", tok.text))
        } else {
            Action::Keep
        }
    })
}

/// `{"label" "x"}` → `{"label": "x"}`.
pub fn insert_missing_colons(input: &str) -> String {
    structural_rewrite(input, |frame, tok, _| {
        if frame.container == Some(Container::Obj)
            && frame.expect == Expect::Colon
            && tok.kind.starts_value()
        {
            Action::InsertBefore(Kind::Colon)
        } else {
            Action::Keep
        }
    })
}

/// `{"a": 1 "b": 2}` → `{"a": 1, "b": 2}` and `[{..} {..}]` → `[{..}, {..}]`.
pub fn insert_missing_commas(input: &str) -> String {
    structural_rewrite(input, |frame, tok, _| {
        if frame.expect != Expect::After {
            return Action::Keep;
        }
        let missing = match frame.container {
            Some(Container::Obj) => matches!(tok.kind, Kind::Str { .. } | Kind::Word),
            Some(Container::Arr) => tok.kind.starts_value(),
            None => false,
        };
        if missing {
            Action::InsertBefore(Kind::Comma)
        } else {
            Action::Keep
        }
    })
}

/// `[1, 2,]` → `[1, 2]`.
pub fn strip_trailing_commas(input: &str) -> String {
    let toks = lex(input);
    toks.iter()
        .enumerate()
        .filter(|(idx, t)| !(t.kind == Kind::Comma && next_significant(&toks, *idx) == Some(Kind::Close)))
        .map(|(_, t)| t.text)
        .collect()
}

/// `'text'` → `"text"`, escaping embedded double quotes.
pub fn single_to_double_quotes(input: &str) -> String {
    lex(input)
        .into_iter()
        .map(|t| match t.kind {
            Kind::Str {
                single: true,
                terminated: true,
            } => requote(&t.text[1..t.text.len() - 1]),
            _ => t.text.to_string(),
        })
        .collect()
}

fn requote(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len() + 2);
    out.push('"');
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\'') => out.push('\''),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push_str("\\\\"),
            },
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn parse(s: &str) -> Value {
        serde_json::from_str(s).unwrap_or_else(|e| panic!("not JSON ({e}): {s}"))
    }

    #[test]
    fn valid_json_is_untouched() {
        let input = r#"[{"label": "Website // optional", "type": "url", "options": ["a,", "b"]}]"#;
        let report = repair_json(input);
        assert!(!report.changed(), "applied: {:?}", report.applied);
        assert_eq!(report.output, input);
    }

    #[test]
    fn repairs_js_style_object() {
        let input = "{name: 'Bob', // the name\n age 3,}";
        let report = repair_json(input);
        assert_eq!(parse(&report.output), json!({"name": "Bob", "age": 3}));
        assert_eq!(
            report.applied,
            vec![
                "strip_comments",
                "quote_bare_keys",
                "insert_missing_colons",
                "strip_trailing_commas",
                "single_to_double_quotes"
            ]
        );
    }

    #[test]
    fn inserts_commas_between_array_elements() {
        let input = r#"[{"label": "A" "type": "text"} {"label": "B", "type": "email"}]"#;
        let report = repair_json(input);
        assert_eq!(report.applied, vec!["insert_missing_commas"]);
        let v = parse(&report.output);
        assert_eq!(v[0]["type"], "text");
        assert_eq!(v[1]["label"], "B");
    }

    #[test]
    fn block_comments_and_trailing_commas_in_nested_arrays() {
        let input = r#"{"fields": [ /* first */ {"label": "X", "options": ["1", "2",],}, ]}"#;
        let v = parse(&repair_json(input).output);
        assert_eq!(v["fields"][0]["options"], json!(["1", "2"]));
    }

    #[test]
    fn single_quoted_strings_escape_double_quotes() {
        let out = single_to_double_quotes(r#"['say "hi"', 'it\'s']"#);
        assert_eq!(parse(&out), json!(["say \"hi\"", "it's"]));
    }

    #[test]
    fn steps_are_idempotent_on_their_output() {
        let input = "[{label: 'A' type: 'text',},]";
        let once = repair_json(input).output;
        let twice = repair_json(&once);
        assert!(!twice.changed());
        assert_eq!(parse(&once)[0]["label"], "A");
    }

    #[test]
    fn counting_repair_tracks_invocations() {
        let r = SyntaxRepair::new();
        r.repair("{}");
        r.repair("[]");
        assert_eq!(r.invocations(), 2);
    }
}
