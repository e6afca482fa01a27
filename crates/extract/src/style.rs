use canon_ir::normalize_color;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static BREAK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static NUMERIC_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9A-Fa-f]+|[0-9]+);").expect("valid regex"));

/// Splits a `key=value;flag;` style string. Bare flags map to `"true"`.
pub fn parse_style(style: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for token in style.split(';') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.split_once('=') {
            Some((key, value)) => {
                out.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => {
                out.insert(token.to_string(), "true".to_string());
            }
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    let text = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures<'_>| {
        let raw = &caps[1];
        let code = match raw.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse::<u32>().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Strips HTML markup from a label and collapses whitespace.
pub fn clean_label(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let text = BREAK_TAG.replace_all(raw, " ");
    let text = ANY_TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = text.replace('"', "'");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized fill/stroke color; drops `none`, `default` and plain white.
pub fn meaningful_color(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_ascii_lowercase();
    if matches!(lowered.as_str(), "" | "none" | "default" | "white" | "transparent") {
        return None;
    }
    let color = resolve_color(&lowered)?;
    if color == "#FFFFFF" {
        return None;
    }
    Some(color)
}

/// Hex code, `rgb()` or a named color to upper-case `#RRGGBB`.
pub fn resolve_color(raw: &str) -> Option<String> {
    let raw = raw.trim();
    normalize_color(raw).or_else(|| named_color(raw).map(str::to_string))
}

pub fn named_color(name: &str) -> Option<&'static str> {
    let hex = match name.trim().trim_start_matches('#').to_ascii_lowercase().as_str() {
        "black" => "#000000",
        "white" => "#FFFFFF",
        "red" => "#FF0000",
        "green" => "#008000",
        "blue" => "#0000FF",
        "yellow" => "#FFFF00",
        "orange" => "#FFA500",
        "purple" => "#800080",
        "gray" | "grey" => "#808080",
        "lightgray" | "lightgrey" => "#D3D3D3",
        "lightblue" => "#ADD8E6",
        "lightgreen" => "#90EE90",
        "lightyellow" => "#FFFFE0",
        "pink" => "#FFC0CB",
        "cyan" | "aqua" => "#00FFFF",
        "magenta" | "fuchsia" => "#FF00FF",
        "navy" => "#000080",
        "teal" => "#008080",
        "brown" => "#A52A2A",
        "gold" => "#FFD700",
        "salmon" => "#FA8072",
        "wheat" => "#F5DEB3",
        "lavender" => "#E6E6FA",
        "beige" => "#F5F5DC",
        "palegreen" => "#98FB98",
        "skyblue" => "#87CEEB",
        _ => return None,
    };
    Some(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn style_strings_keep_flags_and_pairs() {
        let style = parse_style("ellipse;whiteSpace=wrap;fillColor=#dae8fc;dashed=1;");
        assert_eq!(style.get("ellipse").map(String::as_str), Some("true"));
        assert_eq!(style.get("fillColor").map(String::as_str), Some("#dae8fc"));
        assert_eq!(style.get("dashed").map(String::as_str), Some("1"));
    }

    #[test]
    fn labels_lose_markup() {
        assert_eq!(
            clean_label("<b>Payment</b><br/>Service&nbsp;&amp; Co &#8594; x"),
            "Payment Service & Co \u{2192} x"
        );
        assert_eq!(clean_label("say \"hi\""), "say 'hi'");
    }

    #[test]
    fn white_and_defaults_are_not_meaningful() {
        assert_eq!(meaningful_color("#ffffff"), None);
        assert_eq!(meaningful_color("none"), None);
        assert_eq!(meaningful_color("#4472c4").as_deref(), Some("#4472C4"));
        assert_eq!(meaningful_color("LightBlue").as_deref(), Some("#ADD8E6"));
    }
}
