//! Helper output classification
//!
//! Helpers are third-party programs that print a mix of package-manager
//! banners, spinners, debug lines and, somewhere in there, the authorization
//! URL or a token. All matching rules live here.
//!
//! Input arrives as arbitrary byte chunks. The scanner decodes UTF-8
//! incrementally, strips ANSI sequences (including ones split across
//! chunks), treats `\r` redraws as line breaks, and keeps a bounded rolling
//! window so a URL split across chunks is still found whole.

use anyhow::{Context, Result};
use authmux_core::OAuthSettings;
use lazy_static::lazy_static;
use regex::Regex;
use std::net::IpAddr;
use url::Url;

lazy_static! {
    static ref ANSI: Regex = Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]"
    )
    .unwrap();
    static ref ANSI_AT_START: Regex = Regex::new(
        r"^(?:\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_])"
    )
    .unwrap();
    static ref URL_CANDIDATE: Regex = Regex::new(r#"https?://[^\s<>"'`\x1b]+"#).unwrap();
    static ref ERROR_LINE: Regex = Regex::new(r"(?i)\b(?:error|fatal)\b|\bERR!").unwrap();
}

/// Built-in token patterns; the first capture group is the token
const DEFAULT_TOKEN_PATTERNS: &[&str] = &[
    r#"(?i)\baccess[_ ]?token["']?\s*[:=]\s*["']?([A-Za-z0-9._~+/=\-]{8,})"#,
    r"(?i)\bbearer\s+([A-Za-z0-9._~+/=\-]{16,})",
];

/// Built-in "done, but no token for you" markers
const DEFAULT_COMPLETION_PATTERNS: &[&str] = &[
    r"(?i)\bauthentication (?:was )?successful",
    r"(?i)\bauthori[sz]ation (?:completed|successful)",
    r"(?i)\bproxy established successfully",
    r"(?i)\bconnected to remote server\b",
];

const PLACEHOLDER_TOKENS: &[&str] = &["undefined", "null", "none", "redacted", "placeholder"];

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"', '>'];

/// Longest escape sequence held back waiting for its terminator
const MAX_ESCAPE_LEN: usize = 32;

/// Re-scan overlap so a scheme split across chunks (`htt` | `ps://`) is seen
const SCHEME_OVERLAP: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanSignal {
    UrlFound(String),
    TokenFound(String),
    /// Helper reported success without printing a token
    CompletionMarker,
    NoSignal,
}

impl ScanSignal {
    fn rank(&self) -> u8 {
        match self {
            Self::TokenFound(_) => 3,
            Self::CompletionMarker => 2,
            Self::UrlFound(_) => 1,
            Self::NoSignal => 0,
        }
    }

    /// Higher-ranked of two signals; ties keep `self`
    pub fn strongest(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// Compiled matching rules, shared by every session
#[derive(Debug)]
pub struct ScannerRules {
    token_patterns: Vec<Regex>,
    completion_patterns: Vec<Regex>,
    window_limit: usize,
}

impl ScannerRules {
    /// Built-ins first, then the configured extras
    pub fn from_settings(settings: &OAuthSettings) -> Result<Self> {
        let compile = |patterns: &[String], builtin: &[&str]| -> Result<Vec<Regex>> {
            builtin
                .iter()
                .map(|p| p.to_string())
                .chain(patterns.iter().cloned())
                .map(|p| Regex::new(&p).with_context(|| format!("Invalid pattern: {}", p)))
                .collect()
        };

        Ok(Self {
            token_patterns: compile(&settings.token_patterns, DEFAULT_TOKEN_PATTERNS)?,
            completion_patterns: compile(&settings.completion_patterns, DEFAULT_COMPLETION_PATTERNS)?,
            window_limit: settings.scan_window,
        })
    }
}

pub struct OutputScanner<'r> {
    rules: &'r ScannerRules,
    /// Endpoints that are never the authorization URL
    ignored_urls: Vec<Url>,

    utf8_carry: Vec<u8>,
    escape_carry: String,
    window: String,
    scan_from: usize,
    line: String,

    url: Option<String>,
    token_found: bool,
    marker_found: bool,
    error_lines: usize,
}

impl<'r> OutputScanner<'r> {
    pub fn new(rules: &'r ScannerRules) -> Self {
        Self {
            rules,
            ignored_urls: Vec::new(),
            utf8_carry: Vec::new(),
            escape_carry: String::new(),
            window: String::new(),
            scan_from: 0,
            line: String::new(),
            url: None,
            token_found: false,
            marker_found: false,
            error_lines: 0,
        }
    }

    /// Never report this endpoint (the server's own URL echoed in banners)
    pub fn ignore_url(mut self, raw: &str) -> Self {
        if let Ok(url) = Url::parse(raw) {
            self.ignored_urls.push(url);
        }
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Complete lines that looked like errors
    pub fn error_lines(&self) -> usize {
        self.error_lines
    }

    /// Unterminated text is buffered; only `flush` or `finish` settles it
    pub fn has_pending(&self) -> bool {
        !self.line.trim().is_empty()
    }

    /// Consume a chunk. Returns the strongest new signal in it.
    pub fn feed(&mut self, bytes: &[u8]) -> ScanSignal {
        let text = self.decode(bytes);
        let text = self.strip_ansi(text);
        let text = normalize_breaks(&text);
        if text.is_empty() {
            return ScanSignal::NoSignal;
        }

        let mut signal = self.scan_lines(&text);
        self.window.push_str(&text);
        signal = signal.strongest(self.scan_window(false));
        self.trim_window();
        signal
    }

    /// Treat buffered text as complete: a URL at the very end is accepted,
    /// and the unterminated line is checked for tokens and markers.
    ///
    /// Only call once the helper has gone quiet for long enough that the
    /// text cannot be the first half of a write; an early flush would
    /// accept a truncated URL.
    pub fn flush(&mut self) -> ScanSignal {
        let pending = self.line.clone();
        let signal = self.check_line(&pending, false);
        signal.strongest(self.scan_window(true))
    }

    /// End of stream
    pub fn finish(&mut self) -> ScanSignal {
        self.utf8_carry.clear();
        self.escape_carry.clear();
        let signal = self.flush();
        let last = std::mem::take(&mut self.line);
        if !last.is_empty() && ERROR_LINE.is_match(&last) {
            self.error_lines += 1;
        }
        signal
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.utf8_carry);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        None => {
                            self.utf8_carry = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn strip_ansi(&mut self, text: String) -> String {
        let mut text = std::mem::take(&mut self.escape_carry) + &text;
        if let Some(pos) = text.rfind('\x1b') {
            let tail = &text[pos..];
            if tail.len() < MAX_ESCAPE_LEN && !ANSI_AT_START.is_match(tail) {
                self.escape_carry = text.split_off(pos);
            }
        }
        ANSI.replace_all(&text, "").into_owned()
    }

    fn scan_lines(&mut self, text: &str) -> ScanSignal {
        self.line.push_str(text);
        let mut signal = ScanSignal::NoSignal;

        while let Some(pos) = self.line.find('\n') {
            let line: String = self.line.drain(..=pos).collect();
            let line = line.trim_end_matches('\n');
            signal = signal.strongest(self.check_line(line, true));
        }

        if self.line.len() > self.rules.window_limit {
            let cut = floor_char_boundary(&self.line, self.line.len() - self.rules.window_limit);
            self.line.drain(..cut);
        }
        signal
    }

    fn check_line(&mut self, line: &str, complete: bool) -> ScanSignal {
        if line.is_empty() {
            return ScanSignal::NoSignal;
        }
        if complete && ERROR_LINE.is_match(line) {
            self.error_lines += 1;
        }
        if self.token_found {
            return ScanSignal::NoSignal;
        }

        for pattern in &self.rules.token_patterns {
            let Some(token) = pattern.captures(line).and_then(|c| c.get(1)) else {
                continue;
            };
            let token = token.as_str();
            if is_placeholder(token) {
                continue;
            }
            self.token_found = true;
            return ScanSignal::TokenFound(token.to_string());
        }

        if !self.marker_found && self.rules.completion_patterns.iter().any(|p| p.is_match(line)) {
            self.marker_found = true;
            return ScanSignal::CompletionMarker;
        }
        ScanSignal::NoSignal
    }

    fn scan_window(&mut self, at_end: bool) -> ScanSignal {
        if self.url.is_some() {
            self.scan_from = self.window.len();
            return ScanSignal::NoSignal;
        }

        let mut resume = None;
        for m in URL_CANDIDATE.find_iter(&self.window[self.scan_from..]) {
            let start = self.scan_from + m.start();
            let end = self.scan_from + m.end();
            if end == self.window.len() && !at_end {
                // May continue in the next chunk
                resume = Some(start);
                break;
            }
            if let Some(url) = self.accept(m.as_str()) {
                self.scan_from = end;
                self.url = Some(url.clone());
                return ScanSignal::UrlFound(url);
            }
        }

        self.scan_from = match resume {
            Some(start) => start,
            None => floor_char_boundary(
                &self.window,
                self.window.len().saturating_sub(SCHEME_OVERLAP),
            ),
        };
        ScanSignal::NoSignal
    }

    fn accept(&self, candidate: &str) -> Option<String> {
        let trimmed = candidate.trim_end_matches(TRAILING_PUNCTUATION);
        let url = Url::parse(trimmed).ok()?;
        let host = url.host_str()?;
        if is_loopback(host) {
            return None;
        }
        if self.ignored_urls.iter().any(|ignored| same_endpoint(ignored, &url)) {
            return None;
        }
        Some(trimmed.to_string())
    }

    fn trim_window(&mut self) {
        let limit = self.rules.window_limit;
        if self.window.len() <= limit {
            return;
        }
        let cut = floor_char_boundary(&self.window, self.window.len() - limit);
        self.window.drain(..cut);
        self.scan_from = self.scan_from.saturating_sub(cut);
    }
}

fn normalize_breaks(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn is_placeholder(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    PLACEHOLDER_TOKENS.contains(&lower.as_str())
        || token.chars().all(|c| c == token.chars().next().unwrap_or('x'))
}

fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

fn same_endpoint(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}
