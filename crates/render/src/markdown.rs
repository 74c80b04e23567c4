//! Markdown helpers: HTML conversion for rasterizing and image-reference extraction.

use std::{ops::Range, sync::LazyLock};

use {
    base64::Engine as _,
    parley_common::types::ImageData,
    pulldown_cmark::{Options, Parser, html},
    regex::Regex,
};

const PAGE_STYLE: &str = "body{font-family:sans-serif;font-size:28px;line-height:1.5;\
margin:32px;color:#222;background:#fff}pre{background:#f5f5f5;padding:12px;\
white-space:pre-wrap}code{font-family:monospace}table{border-collapse:collapse}\
td,th{border:1px solid #ccc;padding:4px 8px}";

/// Render markdown into a standalone HTML page.
#[must_use]
pub fn to_html_page(md: &str) -> String {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_STRIKETHROUGH);
    opts.insert(Options::ENABLE_TABLES);
    opts.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(md, opts);
    let mut body = String::new();
    html::push_html(&mut body, parser);
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>{PAGE_STYLE}</style></head><body>{body}</body></html>"
    )
}

static IMAGE_REF: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"!\[[^\]]*\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#).ok());

/// A piece of mixed content in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    Image(ImageData),
}

/// Byte ranges of complete `![alt](target)` references, in order.
#[must_use]
pub fn image_spans(md: &str) -> Vec<Range<usize>> {
    IMAGE_REF
        .as_ref()
        .map(|re| re.find_iter(md).map(|m| m.range()).collect())
        .unwrap_or_default()
}

/// Split markdown into text pieces and the images it references.
///
/// `data:` URIs are decoded; `http(s)` targets become URL images. Any other
/// reference, or a data URI that fails to decode, stays in the text.
#[must_use]
pub fn extract_images(md: &str) -> Vec<Piece> {
    let Some(re) = IMAGE_REF.as_ref() else {
        return vec![Piece::Text(md.to_string())];
    };

    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut last = 0;

    for caps in re.captures_iter(md) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some(image) = resolve_image(target.as_str()) else {
            continue;
        };
        text.push_str(&md[last..whole.start()]);
        push_text(&mut pieces, std::mem::take(&mut text));
        pieces.push(Piece::Image(image));
        last = whole.end();
    }
    text.push_str(&md[last..]);
    push_text(&mut pieces, text);
    pieces
}

fn push_text(pieces: &mut Vec<Piece>, text: String) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        pieces.push(Piece::Text(trimmed.to_string()));
    }
}

fn resolve_image(target: &str) -> Option<ImageData> {
    if let Some(data_uri) = target.strip_prefix("data:") {
        let (meta, payload) = data_uri.split_once(',')?;
        let mime = meta.strip_suffix(";base64")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .ok()?;
        let mime = if mime.is_empty() {
            sniff_mime(&bytes)
        } else {
            Some(mime.to_string())
        };
        return Some(ImageData::from_bytes(bytes, mime));
    }
    if target.starts_with("http://") || target.starts_with("https://") {
        return Some(ImageData::from_url(target));
    }
    None
}

/// MIME type from magic bytes, if the format is recognised.
#[must_use]
pub fn sniff_mime(bytes: &[u8]) -> Option<String> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type().to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, parley_common::types::ImageSource};

    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

    #[test]
    fn html_page_renders_markdown() {
        let html = to_html_page("**bold** | x\n---|---\n1 | 2");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<table>"));
    }

    #[test]
    fn text_without_images_is_single_piece() {
        assert_eq!(extract_images("  hello  "), vec![Piece::Text("hello".into())]);
    }

    #[test]
    fn url_images_are_promoted_in_order() {
        let pieces = extract_images("before ![cat](https://example.com/cat.png) after");
        assert_eq!(pieces, vec![
            Piece::Text("before".into()),
            Piece::Image(ImageData::from_url("https://example.com/cat.png")),
            Piece::Text("after".into()),
        ]);
    }

    #[test]
    fn data_uri_is_decoded_and_sniffed() {
        let md = format!("![](data:;base64,{PNG_1X1})");
        let pieces = extract_images(&md);
        let [Piece::Image(image)] = pieces.as_slice() else {
            panic!("expected one image, got {pieces:?}");
        };
        assert!(matches!(image.source, ImageSource::Bytes(_)));
        assert_eq!(image.mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn image_spans_cover_whole_references() {
        let md = "a ![x](https://e.com/1.png) b ![y](data:image/png;base64,AAAA) ![z](";
        let spans = image_spans(md);
        assert_eq!(spans.len(), 2);
        assert_eq!(&md[spans[0].clone()], "![x](https://e.com/1.png)");
        assert_eq!(&md[spans[1].clone()], "![y](data:image/png;base64,AAAA)");
    }

    #[test]
    fn relative_refs_stay_as_text() {
        let pieces = extract_images("see ![x](local.png)");
        assert_eq!(pieces, vec![Piece::Text("see ![x](local.png)".into())]);
    }

    #[test]
    fn bad_base64_stays_as_text() {
        let pieces = extract_images("![](data:image/png;base64,@@@)");
        assert_eq!(pieces.len(), 1);
        assert!(matches!(pieces[0], Piece::Text(_)));
    }
}
