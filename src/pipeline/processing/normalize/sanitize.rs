//! HTML sanitizing and truncation for untrusted upstream text.
//!
//! Input is parsed as an HTML fragment so entity decoding and malformed markup
//! are handled by the same parser the browser side would use. `StripAll` output
//! is plain decoded text. `KeepInline` output is HTML: text is re-escaped and
//! interleaved with rebuilt `<img>`/`<br>` tags.

use crate::common::constants::ELLIPSIS;
use scraper::{ElementRef, Html, Node};

/// How much markup survives sanitizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// Keep line breaks and images, drop every other tag.
    KeepInline,
    /// Plain text only.
    StripAll,
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    Tag(String),
}

impl Piece {
    fn rendered_len(&self, markup: Markup) -> usize {
        match self {
            Piece::Text(s) => s.chars().map(|c| char_len(c, markup)).sum(),
            Piece::Tag(s) => s.chars().count(),
        }
    }
}

// Escaped form of `c` in HTML output. An entity is one unit for truncation.
fn escaped(c: char, markup: Markup) -> Option<&'static str> {
    if markup == Markup::StripAll {
        return None;
    }
    match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        _ => None,
    }
}

fn char_len(c: char, markup: Markup) -> usize {
    escaped(c, markup).map_or(1, str::len)
}

fn push_rendered(out: &mut String, c: char, markup: Markup) {
    match escaped(c, markup) {
        Some(entity) => out.push_str(entity),
        None => out.push(c),
    }
}

// Elements whose text content is never shown to users.
const DROPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Sanitize `input` and truncate it to at most `max_chars` characters,
/// counting kept tags and the trailing ellipsis.
pub fn sanitize(input: &str, markup: Markup, max_chars: usize) -> String {
    let fragment = Html::parse_fragment(input);
    let mut pieces = Vec::new();
    collect(fragment.root_element(), markup, &mut pieces);
    trim_edges(&mut pieces);
    truncate(pieces, markup, max_chars)
}

fn collect(element: ElementRef<'_>, markup: Markup, out: &mut Vec<Piece>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_text(out, text),
            Node::Element(el) => {
                let name = el.name();
                if DROPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                if markup == Markup::KeepInline {
                    match name {
                        "br" => {
                            out.push(Piece::Tag("<br>".to_string()));
                            continue;
                        }
                        "img" => {
                            if let Some(tag) = rebuild_img(el.attr("src"), el.attr("alt")) {
                                out.push(Piece::Tag(tag));
                            }
                            continue;
                        }
                        _ => {}
                    }
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect(child_el, markup, out);
                }
            }
            _ => {}
        }
    }
}

fn push_text(out: &mut Vec<Piece>, text: &str) {
    if let Some(Piece::Text(last)) = out.last_mut() {
        last.push_str(text);
    } else {
        out.push(Piece::Text(text.to_string()));
    }
}

// Only http(s) sources survive, and only src/alt are carried over.
fn rebuild_img(src: Option<&str>, alt: Option<&str>) -> Option<String> {
    let src = src?.trim();
    let lower = src.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("//")) {
        return None;
    }
    let mut tag = format!("<img src=\"{}\"", escape_attr(src));
    if let Some(alt) = alt {
        tag.push_str(&format!(" alt=\"{}\"", escape_attr(alt)));
    }
    tag.push('>');
    Some(tag)
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn trim_edges(pieces: &mut Vec<Piece>) {
    while let Some(Piece::Text(first)) = pieces.first_mut() {
        let trimmed = first.trim_start();
        if trimmed.is_empty() {
            pieces.remove(0);
        } else {
            *first = trimmed.to_string();
            break;
        }
    }
    while let Some(Piece::Text(last)) = pieces.last_mut() {
        let trimmed = last.trim_end();
        if trimmed.is_empty() {
            pieces.pop();
        } else {
            *last = trimmed.to_string();
            break;
        }
    }
}

fn truncate(pieces: Vec<Piece>, markup: Markup, max_chars: usize) -> String {
    let total: usize = pieces.iter().map(|p| p.rendered_len(markup)).sum();
    let fits = total <= max_chars;
    let ellipsis_len = ELLIPSIS.chars().count();
    let mut budget = if fits { total } else { max_chars.saturating_sub(ellipsis_len) };

    let mut out = String::new();
    'pieces: for piece in pieces {
        match piece {
            Piece::Text(text) => {
                for c in text.chars() {
                    let len = char_len(c, markup);
                    // Entities are atomic, like tags.
                    if len > budget {
                        break 'pieces;
                    }
                    budget -= len;
                    push_rendered(&mut out, c, markup);
                }
            }
            Piece::Tag(tag) => {
                let len = tag.chars().count();
                // Tags are atomic; a tag that does not fit ends the output.
                if len > budget {
                    break;
                }
                budget -= len;
                out.push_str(&tag);
            }
        }
    }
    if fits {
        return out;
    }
    let mut out = out.trim_end().to_string();
    out.push_str(ELLIPSIS);
    out
}
