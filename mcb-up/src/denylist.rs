//! Denylist filter
//!
//! Fetches two remote policy pages (literal filename prefixes, and title
//! patterns in the MediaWiki blacklist dialect) and compiles them into
//! in-memory matchers. Refresh fails soft: on transport error the previously
//! parsed lists stay in place and an error string is recorded. Both lists
//! are rebuilt wholesale and assigned at completion, so readers observe
//! either the old or the new complete set.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tokio::sync::RwLock;

use mcb_common::config::ApiConfig;

/// Shared handle to the denylist.
pub type SharedDenylist = Arc<RwLock<Denylist>>;

/// Namespace prefixes whose pattern lines do not apply to file titles.
const NON_FILE_NAMESPACES: &[&str] = &[
    "talk:",
    "user:",
    "user talk:",
    "user_talk:",
    "wikipedia:",
    "project:",
    "category:",
    "template:",
    "help:",
    "portal:",
    "mediawiki:",
    "special:",
];

/// Combined prefix + pattern filename policy.
#[derive(Debug, Default)]
pub struct Denylist {
    /// Lowercased literal prefixes
    prefixes: Vec<String>,
    /// Compiled, anchored, case-insensitive title patterns
    patterns: Vec<Regex>,
    /// Last refresh failure, if any; matchers keep their previous state
    pub last_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    query: Option<QueryBody>,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default)]
    pages: Vec<PageRevisions>,
}

#[derive(Debug, Deserialize)]
struct PageRevisions {
    title: String,
    #[serde(default)]
    revisions: Vec<Revision>,
}

#[derive(Debug, Deserialize)]
struct Revision {
    slots: Option<Slots>,
}

#[derive(Debug, Deserialize)]
struct Slots {
    main: Option<SlotContent>,
}

#[derive(Debug, Deserialize)]
struct SlotContent {
    content: Option<String>,
}

impl Denylist {
    pub fn shared() -> SharedDenylist {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Build a denylist from raw page texts. Used by refresh and by tests.
    pub fn from_pages(prefix_text: &str, pattern_text: &str) -> Self {
        Self {
            prefixes: parse_prefix_page(prefix_text),
            patterns: parse_pattern_page(pattern_text),
            last_error: None,
        }
    }

    /// Fetch both policy pages in one API request and rebuild the matchers.
    /// Idempotent and safe to call repeatedly.
    pub async fn refresh(&mut self, http: &reqwest::Client, api: &ApiConfig) {
        let titles = format!("{}|{}", api.prefix_page, api.pattern_page);
        let result = http
            .get(&api.base_url)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("formatversion", "2"),
                ("prop", "revisions"),
                ("rvprop", "content"),
                ("rvslots", "main"),
                ("titles", titles.as_str()),
            ])
            .send()
            .await;

        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                self.last_error = Some(format!("denylist fetch failed: HTTP {}", r.status()));
                return;
            }
            Err(e) => {
                self.last_error = Some(format!("denylist fetch failed: {e}"));
                return;
            }
        };

        let parsed: QueryResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                self.last_error = Some(format!("denylist response malformed: {e}"));
                return;
            }
        };

        let mut prefix_text = String::new();
        let mut pattern_text = String::new();
        for page in parsed.query.map(|q| q.pages).unwrap_or_default() {
            let content = page
                .revisions
                .into_iter()
                .next()
                .and_then(|r| r.slots)
                .and_then(|s| s.main)
                .and_then(|m| m.content)
                .unwrap_or_default();
            if page.title.eq_ignore_ascii_case(&api.prefix_page) {
                prefix_text = content;
            } else if page.title.eq_ignore_ascii_case(&api.pattern_page) {
                pattern_text = content;
            }
        }

        let rebuilt = Self::from_pages(&prefix_text, &pattern_text);
        tracing::info!(
            prefixes = rebuilt.prefixes.len(),
            patterns = rebuilt.patterns.len(),
            "denylist refreshed"
        );
        *self = rebuilt;
    }

    /// True if any prefix matches the start of `filename`, or any compiled
    /// pattern matches the bare filename or the namespaced form.
    pub fn is_blacklisted(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        if self.prefixes.iter().any(|p| lower.starts_with(p.as_str())) {
            return true;
        }
        let namespaced = format!("File:{filename}");
        self.patterns
            .iter()
            .any(|re| re.is_match(filename) || re.is_match(&namespaced))
    }
}

/// Parse the literal-prefix page: one entry per non-comment, non-blank
/// line, with inline `#` comments stripped. Matching is case-insensitive.
pub fn parse_prefix_page(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = strip_comment(line).trim();
            (!line.is_empty()).then(|| line.to_lowercase())
        })
        .collect()
}

/// Parse the pattern page: one pattern per non-comment line, stripped of
/// trailing option annotations and comments, translated from the MediaWiki
/// dialect, anchored, and compiled case-insensitively. Lines scoped to a
/// non-file namespace, and lines `regex` cannot compile (lookarounds,
/// backreferences), are skipped.
pub fn parse_pattern_page(text: &str) -> Vec<Regex> {
    text.lines()
        .filter_map(|line| {
            let line = strip_options(strip_comment(line)).trim().to_string();
            if line.is_empty() || scoped_to_other_namespace(&line) {
                return None;
            }
            let pattern = anchor(&translate(&line));
            match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::debug!(pattern = %line, error = %e, "skipping uncompilable pattern");
                    None
                }
            }
        })
        .collect()
}

/// Strip a `#` comment. Full-line comments start with `#`; inline comments
/// are preceded by whitespace so a `#` inside a pattern survives.
fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Strip a trailing `<...>` option annotation (e.g. `<autoconfirmed>`).
fn strip_options(line: &str) -> &str {
    match line.find(" <") {
        Some(pos) if line[pos..].contains('>') => &line[..pos],
        _ => line,
    }
}

/// Whether the pattern is scoped to a namespace other than File.
fn scoped_to_other_namespace(pattern: &str) -> bool {
    let body = pattern.strip_prefix('^').unwrap_or(pattern).to_lowercase();
    NON_FILE_NAMESPACES.iter().any(|ns| body.starts_with(ns))
}

/// Translate the MediaWiki blacklist dialect to the `regex` crate's syntax.
/// Inline case-insensitive markers are dropped (compilation is globally
/// case-insensitive); bare two-digit hex escapes are normalized to the
/// braced form; POSIX bracket names are native and pass through.
fn translate(pattern: &str) -> String {
    let out = pattern.replace("(?i:", "(?:").replace("(?i)", "");

    let src: Vec<char> = out.chars().collect();
    let mut normalized = String::with_capacity(out.len());
    let mut i = 0;
    while i < src.len() {
        if src[i] == '\\'
            && src.get(i + 1) == Some(&'x')
            && src.get(i + 2).is_some_and(|c| c.is_ascii_hexdigit())
            && src.get(i + 3).is_some_and(|c| c.is_ascii_hexdigit())
        {
            normalized.push_str(&format!("\\x{{{}{}}}", src[i + 2], src[i + 3]));
            i += 4;
        } else {
            normalized.push(src[i]);
            i += 1;
        }
    }
    normalized
}

/// Anchor a pattern to whole-string matching unless it is already anchored
/// or written to match anywhere.
fn anchor(pattern: &str) -> String {
    if pattern.starts_with('^') || pattern.starts_with(".*") {
        pattern.to_string()
    } else {
        format!("^(?:{pattern})$")
    }
}
