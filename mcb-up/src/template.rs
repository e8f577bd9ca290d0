//! Filename template engine
//!
//! Renders a per-item destination filename from a user-authored token
//! template (`{dotted.path}` tokens over a fixed vocabulary) and validates
//! template syntax, vocabulary and extension. Pure functions, no I/O.

use thiserror::Error;

use crate::store::Item;

/// Token paths the template engine recognizes.
pub const VALID_PATHS: &[&str] = &[
    "captured.date",
    "captured.time",
    "captured.year",
    "captured.month",
    "mapillary.id",
    "mapillary.user.username",
    "location.lat",
    "location.lon",
    "index",
];

/// Accepted destination media extensions, compared case-insensitively.
pub const ACCEPTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "tif", "tiff", "webp", "svg",
];

/// Template validation failures, in the order they are user-reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("mismatched syntax")]
    MismatchedSyntax,
    #[error("empty tag")]
    EmptyTag,
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("invalid extension")]
    InvalidExtension,
}

/// One parsed template segment.
enum Segment<'a> {
    Literal(&'a str),
    Token(&'a str),
}

/// Scan a template into literal and token segments. Delimiters must be
/// balanced and non-nested; token bodies must be non-empty.
fn scan(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = template;

    while !rest.is_empty() {
        match rest.find(['{', '}']) {
            None => {
                segments.push(Segment::Literal(rest));
                break;
            }
            Some(pos) => {
                if &rest[pos..pos + 1] == "}" {
                    // Closing delimiter without an open token
                    return Err(TemplateError::MismatchedSyntax);
                }
                if pos > 0 {
                    segments.push(Segment::Literal(&rest[..pos]));
                }
                let body_and_rest = &rest[pos + 1..];
                let close = body_and_rest
                    .find('}')
                    .ok_or(TemplateError::MismatchedSyntax)?;
                let body = &body_and_rest[..close];
                if body.contains('{') {
                    return Err(TemplateError::MismatchedSyntax);
                }
                if body.trim().is_empty() {
                    return Err(TemplateError::EmptyTag);
                }
                segments.push(Segment::Token(body));
                rest = &body_and_rest[close + 1..];
            }
        }
    }

    Ok(segments)
}

/// Validate a token template. The empty template is valid. Checks run in
/// user-message order: syntax, then vocabulary, then extension.
pub fn validate(template: &str) -> Result<(), TemplateError> {
    if template.is_empty() {
        return Ok(());
    }

    let segments = scan(template)?;

    for segment in &segments {
        if let Segment::Token(body) = segment {
            let body = body.trim();
            if !VALID_PATHS.contains(&body) {
                return Err(TemplateError::UnknownVariable(body.to_string()));
            }
        }
    }

    let literal: String = segments
        .iter()
        .filter_map(|s| match s {
            Segment::Literal(text) => Some(*text),
            Segment::Token(_) => None,
        })
        .collect();
    if !has_accepted_extension(&literal) {
        return Err(TemplateError::InvalidExtension);
    }

    Ok(())
}

/// Whether `name` ends in one of the accepted media extensions.
pub fn has_accepted_extension(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    ACCEPTED_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

/// Render a template against one item. Recognized tokens substitute their
/// value; unrecognized tokens render empty (best-effort, never an error);
/// literal text passes through untouched. A template that does not scan
/// renders as empty.
pub fn render(template: &str, item: &Item) -> String {
    let segments = match scan(template) {
        Ok(segments) => segments,
        Err(_) => return String::new(),
    };

    let mut out = String::with_capacity(template.len());
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Token(body) => out.push_str(&resolve(body.trim(), item)),
        }
    }
    out
}

/// Resolve one token path against the item. Skeleton items (no image data
/// yet) resolve image-dependent paths as empty.
fn resolve(path: &str, item: &Item) -> String {
    if path == "index" {
        return item.index.to_string();
    }
    if path == "mapillary.id" {
        return item.id.clone();
    }

    let Some(image) = &item.image else {
        return String::new();
    };

    match path {
        "captured.date" => image.dates.taken.format("%Y-%m-%d").to_string(),
        "captured.time" => image.dates.taken.format("%H-%M-%S").to_string(),
        "captured.year" => image.dates.taken.format("%Y").to_string(),
        "captured.month" => image.dates.taken.format("%m").to_string(),
        "mapillary.user.username" => image.creator.username.clone(),
        "location.lat" => image
            .location
            .map(|p| format!("{:.6}", p.lat))
            .unwrap_or_default(),
        "location.lon" => image
            .location
            .map(|p| format!("{:.6}", p.lon))
            .unwrap_or_default(),
        _ => String::new(),
    }
}
