//! Plain-text extraction from HTML pages.

use std::borrow::Cow;

/// Elements whose content is never readable text.
const SKIPPED_ELEMENTS: [&str; 3] = ["script", "style", "noscript"];

/// Extracts the readable text of an HTML document.
///
/// Comments, declarations, `script`, `style` and `noscript` elements are
/// dropped with their content, every other tag (`meta` included) is
/// replaced by a separator, common entities are decoded and runs of
/// whitespace collapse into one space.
///
/// ```
/// use patchwork::tools::extract_text;
///
/// let html = "<p>Login fails &amp; returns <b>500</b></p>";
/// assert_eq!(extract_text(html), "Login fails & returns 500");
/// ```
pub fn extract_text(html: &str) -> String {
    // ASCII lowercasing keeps byte offsets, so indices found in `lower`
    // are valid in `html`.
    let lower = html.to_ascii_lowercase();
    let mut text = String::with_capacity(html.len() / 2);
    let mut pos = 0;

    while let Some(offset) = html[pos..].find('<') {
        let lt = pos + offset;
        text.push_str(&decode_entities(&html[pos..lt]));

        let rest = &lower[lt..];
        if rest.starts_with("<!--") {
            pos = match rest.find("-->") {
                Some(end) => lt + end + 3,
                None => html.len(),
            };
            text.push(' ');
            continue;
        }

        let name = tag_name(rest);
        let is_markup = !name.is_empty()
            || rest.starts_with("<!")
            || rest.starts_with("<?");
        if !is_markup {
            // A bare `<` in text, e.g. `a < b`.
            text.push('<');
            pos = lt + 1;
            continue;
        }

        let Some(gt) = rest.find('>') else {
            // Unterminated tag, nothing readable follows.
            pos = html.len();
            break;
        };
        pos = lt + gt + 1;
        text.push(' ');

        let is_closing = rest.starts_with("</");
        if !is_closing && SKIPPED_ELEMENTS.contains(&name) {
            let closing = format!("</{name}");
            pos = match lower[pos..].find(&closing) {
                Some(start) => {
                    let start = pos + start;
                    match lower[start..].find('>') {
                        Some(gt) => start + gt + 1,
                        None => html.len(),
                    }
                }
                None => html.len(),
            };
        }
    }
    text.push_str(&decode_entities(&html[pos..]));

    collapse_whitespace(&text)
}

/// Returns the lowercase name of the tag `rest` starts with, or an empty
/// string if `rest` doesn't start with a tag.
fn tag_name(rest: &str) -> &str {
    let after = rest
        .strip_prefix("</")
        .or_else(|| rest.strip_prefix('<'))
        .unwrap_or(rest);
    if !after.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return "";
    }
    let end = after
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '-')
        .unwrap_or(after.len());
    &after[..end]
}

/// Decodes named entities common in web pages and all numeric ones.
/// Unknown entities are kept as written.
fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let entity = rest
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| Some((decode_entity(&rest[1..semi])?, semi)));
        match entity {
            Some((ch, semi)) => {
                decoded.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }
    decoded.push_str(rest);
    Cow::Owned(decoded)
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '©',
        "reg" => '®',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        _ => return None,
    };
    Some(ch)
}

#[inline]
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_page() {
        let html = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Login bug</title>
    <style>p { color: red; }</style>
    <script>var tag = '<b>not text</b>';</script>
  </head>
  <body>
    <!-- <p>hidden</p> -->
    <h1>Issue #12</h1>
    <p>Login&nbsp;fails with <code>500</code> on&#32;/auth&#x21;</p>
    <NOSCRIPT>Enable JavaScript</NOSCRIPT>
  </body>
</html>"#;
        assert_eq!(
            extract_text(html),
            "Login bug Issue #12 Login fails with 500 on /auth!"
        );
    }

    #[test]
    fn test_tags_separate_words() {
        assert_eq!(extract_text("<li>one</li><li>two</li>"), "one two");
        assert_eq!(extract_text("a<br/>b"), "a b");
    }

    #[test]
    fn test_text_lookalikes() {
        assert_eq!(extract_text("if a < b && c > d"), "if a < b && c > d");
        assert_eq!(extract_text("&lt;script&gt;alert(1)"), "<script>alert(1)");
        assert_eq!(extract_text("AT&T &unknown; &#xZZ;"), "AT&T &unknown; &#xZZ;");
    }

    #[test]
    fn test_unterminated_markup() {
        assert_eq!(extract_text("text <p class=\"x"), "text");
        assert_eq!(extract_text("before <script>never closed"), "before");
        assert_eq!(extract_text("before <!-- never closed"), "before");
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(extract_text("  plain\n\ttext  "), "plain text");
        assert_eq!(extract_text(""), "");
    }
}
