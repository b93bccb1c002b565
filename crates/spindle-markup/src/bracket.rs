//! Square-bracketed markup grammar: `[[link]]` and `[img[source]]` forms.
//!
//! A concrete grammar over [`crate::lexer`]. Four states walk the markup
//! left to right (`left_meta`, `core_components`, `image_link`, `setter`);
//! [`parse_square_bracketed`] runs them and folds the item queue into a
//! [`BracketMarkup`] record. Malformed markup never aborts: the record
//! carries the error message and the caller decides what to render.
//!
//! Supported shapes:
//!
//! ```text
//! [[link]]  [[text|link]]  [[text->link]]  [[link<-text]]  [[link][setter]]
//! [img[source]]  [<img[title|source]]  [img[source][link]][setter]]
//! ```

use crate::lexer::{Lexer, NextState};

/// Image alignment requested by `[<img[` / `[>img[`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketItem {
    Error,
    DelimLtr,
    DelimRtl,
    InnerMeta,
    ImageMeta,
    LeftMeta,
    Link,
    RightMeta,
    Setter,
    Source,
    Text,
}

#[derive(Debug, Default)]
struct BracketData {
    is_link: bool,
}

/// Parsed square-bracketed markup.
///
/// `end_pos` is the offset just past the closing `]]` (or past the point
/// where scanning stopped, when `error` is set) in the original source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BracketMarkup {
    pub is_link: bool,
    pub is_image: bool,
    pub align: Option<Align>,
    pub link: Option<String>,
    pub source: Option<String>,
    pub text: Option<String>,
    pub setter: Option<String>,
    pub force_internal: bool,
    pub end_pos: usize,
    pub error: Option<String>,
}

type BLexer<'a> = Lexer<'a, BracketItem, BracketData>;
type BNext = NextState<BracketItem, BracketData>;

fn component_name(lx: &BLexer<'_>) -> &'static str {
    if lx.data.is_link {
        "link"
    } else {
        "image"
    }
}

/// Consume a quoted section, honoring backslash escapes. Returns false if
/// the input ends before the closing quote.
fn slurp_quote(lx: &mut BLexer<'_>, quote: char) -> bool {
    loop {
        match lx.next() {
            None => return false,
            Some('\\') => {
                if lx.next().is_none() {
                    return false;
                }
            }
            Some(c) if c == quote => return true,
            Some(_) => {}
        }
    }
}

fn left_meta(lx: &mut BLexer<'_>) -> BNext {
    if !lx.accept("[") {
        return lx.error(BracketItem::Error, "malformed square-bracketed markup");
    }
    if lx.accept("[") {
        lx.data.is_link = true;
        lx.emit(BracketItem::LeftMeta);
    } else {
        // Image form: optional aligner, then `img[` (any case).
        lx.accept("<>");
        if !lx.accept("Ii") || !lx.accept("Mm") || !lx.accept("Gg") || !lx.accept("[") {
            return lx.error(BracketItem::Error, "malformed square-bracketed markup");
        }
        lx.data.is_link = false;
        lx.emit(BracketItem::ImageMeta);
    }
    NextState::To(core_components)
}

fn core_components(lx: &mut BLexer<'_>) -> BNext {
    let what = component_name(lx);
    // Which delimiter, if any, has been seen. Determines how the slice
    // pending at the closing meta is classified.
    let mut delim: Option<BracketItem> = None;
    loop {
        match lx.next() {
            None => {
                return lx.error(
                    BracketItem::Error,
                    format!("unterminated {what} markup"),
                );
            }
            Some('\\') => {
                lx.forward(1);
            }
            Some('"') => {
                if !slurp_quote(lx, '"') {
                    return lx.error(
                        BracketItem::Error,
                        format!("unterminated double quoted string in {what} markup"),
                    );
                }
            }
            Some('|') => {
                if delim.is_none() {
                    delim = Some(BracketItem::DelimLtr);
                    lx.backup(1);
                    lx.emit(BracketItem::Text);
                    lx.forward(1);
                    lx.emit(BracketItem::DelimLtr);
                }
            }
            Some('-') => {
                if delim.is_none() && lx.peek() == Some('>') {
                    delim = Some(BracketItem::DelimLtr);
                    lx.backup(1);
                    lx.emit(BracketItem::Text);
                    lx.forward(2);
                    lx.emit(BracketItem::DelimLtr);
                }
            }
            Some('<') => {
                if delim.is_none() && lx.peek() == Some('-') {
                    delim = Some(BracketItem::DelimRtl);
                    lx.backup(1);
                    lx.emit(if lx.data.is_link {
                        BracketItem::Link
                    } else {
                        BracketItem::Source
                    });
                    lx.forward(2);
                    lx.emit(BracketItem::DelimRtl);
                }
            }
            Some(']') => match lx.peek() {
                Some(']') => {
                    lx.backup(1);
                    lx.emit(tail_kind(lx.data.is_link, delim));
                    lx.forward(2);
                    lx.emit(BracketItem::RightMeta);
                    return NextState::Done;
                }
                Some('[') => {
                    lx.backup(1);
                    lx.emit(tail_kind(lx.data.is_link, delim));
                    lx.forward(2);
                    lx.emit(BracketItem::InnerMeta);
                    return if lx.data.is_link {
                        NextState::To(setter)
                    } else {
                        NextState::To(image_link)
                    };
                }
                _ => {}
            },
            Some(_) => {}
        }
    }
}

/// The slice left pending when the core section closes: after a
/// right-to-left arrow it is display text, otherwise the link or source.
fn tail_kind(is_link: bool, delim: Option<BracketItem>) -> BracketItem {
    match delim {
        Some(BracketItem::DelimRtl) => BracketItem::Text,
        _ if is_link => BracketItem::Link,
        _ => BracketItem::Source,
    }
}

fn image_link(lx: &mut BLexer<'_>) -> BNext {
    loop {
        match lx.next() {
            None => return lx.error(BracketItem::Error, "unterminated image markup"),
            Some('\\') => {
                lx.forward(1);
            }
            Some('"') => {
                if !slurp_quote(lx, '"') {
                    return lx.error(
                        BracketItem::Error,
                        "unterminated double quoted string in image markup link component",
                    );
                }
            }
            Some(']') => match lx.peek() {
                Some(']') => {
                    lx.backup(1);
                    lx.emit(BracketItem::Link);
                    lx.forward(2);
                    lx.emit(BracketItem::RightMeta);
                    return NextState::Done;
                }
                Some('[') => {
                    lx.backup(1);
                    lx.emit(BracketItem::Link);
                    lx.forward(2);
                    lx.emit(BracketItem::InnerMeta);
                    return NextState::To(setter);
                }
                _ => {}
            },
            Some(_) => {}
        }
    }
}

fn setter(lx: &mut BLexer<'_>) -> BNext {
    let what = component_name(lx);
    loop {
        match lx.next() {
            None => {
                return lx.error(
                    BracketItem::Error,
                    format!("unterminated {what} markup"),
                );
            }
            Some('\\') => {
                lx.forward(1);
            }
            Some('"') => {
                if !slurp_quote(lx, '"') {
                    return lx.error(
                        BracketItem::Error,
                        format!("unterminated double quoted string in {what} markup setter component"),
                    );
                }
            }
            Some(']') => {
                if lx.peek() == Some(']') {
                    lx.backup(1);
                    lx.emit(BracketItem::Setter);
                    lx.forward(2);
                    lx.emit(BracketItem::RightMeta);
                    return NextState::Done;
                }
            }
            Some(_) => {}
        }
    }
}

/// Parse square-bracketed markup starting at `offset` within `source`.
///
/// The caller has already seen `[[` or `[img[` there; this re-scans from
/// the opening `[` so the grammar owns all delimiter handling.
pub fn parse_square_bracketed(source: &str, offset: usize) -> BracketMarkup {
    let mut markup = BracketMarkup::default();
    for item in Lexer::run(&source[offset..], left_meta, BracketData::default()) {
        markup.end_pos = offset + item.end;
        match item.kind {
            BracketItem::Error => {
                markup.error = item.message;
                return markup;
            }
            BracketItem::ImageMeta => {
                markup.is_image = true;
                match item.text.as_bytes().get(1) {
                    Some(b'<') => markup.align = Some(Align::Left),
                    Some(b'>') => markup.align = Some(Align::Right),
                    _ => {}
                }
            }
            BracketItem::LeftMeta => markup.is_link = true,
            BracketItem::Link => {
                let link = item.text.trim();
                if let Some(stripped) = link.strip_prefix('~') {
                    markup.force_internal = true;
                    markup.link = Some(stripped.to_string());
                } else {
                    markup.link = Some(link.to_string());
                }
            }
            BracketItem::Source => markup.source = Some(item.text.trim().to_string()),
            BracketItem::Text => markup.text = Some(item.text.trim().to_string()),
            BracketItem::Setter => markup.setter = Some(item.text.trim().to_string()),
            BracketItem::DelimLtr
            | BracketItem::DelimRtl
            | BracketItem::InnerMeta
            | BracketItem::RightMeta => {}
        }
    }
    if markup.is_link && markup.link.as_deref().unwrap_or("").is_empty() {
        markup.error = Some("empty link component".to_string());
    } else if markup.is_image && markup.source.as_deref().unwrap_or("").is_empty() {
        markup.error = Some("empty source component".to_string());
    }
    markup
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_link() {
        let m = parse_square_bracketed("[[Go North]]", 0);
        assert!(m.is_link);
        assert_eq!(m.link.as_deref(), Some("Go North"));
        assert_eq!(m.text, None);
        assert_eq!(m.end_pos, 12);
        assert_eq!(m.error, None);
    }

    #[test]
    fn piped_link() {
        let m = parse_square_bracketed("[[Go|North]]", 0);
        assert_eq!(m.text.as_deref(), Some("Go"));
        assert_eq!(m.link.as_deref(), Some("North"));
    }

    #[test]
    fn arrow_links_both_directions() {
        let ltr = parse_square_bracketed("[[Go->North]]", 0);
        assert_eq!(ltr.text.as_deref(), Some("Go"));
        assert_eq!(ltr.link.as_deref(), Some("North"));

        let rtl = parse_square_bracketed("[[North<-Go]]", 0);
        assert_eq!(rtl.text.as_deref(), Some("Go"));
        assert_eq!(rtl.link.as_deref(), Some("North"));
    }

    #[test]
    fn link_with_setter() {
        let m = parse_square_bracketed("[[Go|North][$dir = 1]]", 0);
        assert_eq!(m.link.as_deref(), Some("North"));
        assert_eq!(m.setter.as_deref(), Some("$dir = 1"));
        assert_eq!(m.end_pos, 22);
    }

    #[test]
    fn tilde_forces_internal() {
        let m = parse_square_bracketed("[[~http://x.test/]]", 0);
        assert!(m.force_internal);
        assert_eq!(m.link.as_deref(), Some("http://x.test/"));
    }

    #[test]
    fn image_with_align_title_and_link() {
        let m = parse_square_bracketed("[<img[A pic|pic.png][North]]", 0);
        assert!(m.is_image);
        assert!(!m.is_link);
        assert_eq!(m.align, Some(Align::Left));
        assert_eq!(m.text.as_deref(), Some("A pic"));
        assert_eq!(m.source.as_deref(), Some("pic.png"));
        assert_eq!(m.link.as_deref(), Some("North"));
    }

    #[test]
    fn image_case_insensitive_meta() {
        let m = parse_square_bracketed("[IMG[pic.png]]", 0);
        assert!(m.is_image);
        assert_eq!(m.source.as_deref(), Some("pic.png"));
    }

    #[test]
    fn unterminated_is_an_error_record() {
        let m = parse_square_bracketed("[[Go North", 0);
        assert_eq!(m.error.as_deref(), Some("unterminated link markup"));
    }

    #[test]
    fn unterminated_quote_reported() {
        let m = parse_square_bracketed("[[Go \"North]]", 0);
        assert!(m
            .error
            .as_deref()
            .unwrap()
            .contains("unterminated double quoted string"));
    }

    #[test]
    fn quoted_pipe_is_not_a_delimiter() {
        let m = parse_square_bracketed("[[\"a|b\"]]", 0);
        assert_eq!(m.text, None);
        assert_eq!(m.link.as_deref(), Some("\"a|b\""));
    }

    #[test]
    fn empty_link_is_an_error() {
        let m = parse_square_bracketed("[[]]", 0);
        assert_eq!(m.error.as_deref(), Some("empty link component"));
    }

    #[test]
    fn offset_positions_are_absolute() {
        let m = parse_square_bracketed("go [[North]] now", 3);
        assert_eq!(m.link.as_deref(), Some("North"));
        assert_eq!(m.end_pos, 12);
    }

    #[test]
    fn second_delimiter_is_plain_text() {
        let m = parse_square_bracketed("[[a|b|c]]", 0);
        assert_eq!(m.text.as_deref(), Some("a"));
        assert_eq!(m.link.as_deref(), Some("b|c"));
    }
}
