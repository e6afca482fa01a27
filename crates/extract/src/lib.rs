//! # Canon Extract
//!
//! Source readers that turn diagram bytes into a [`DiagramIr`].
//!
//! ## Architecture
//!
//! ```text
//! bytes ──> detect_format
//!             │
//!             ├─ Draw.io ──> xml ──> cells ──> nodes / edges / groups ─┐
//!             ├─ SVG ──────> xml ──> shapes, text, lines ──────────────┼─> enrich ─> IR (confidence 1.0)
//!             ├─ DSL ──────> line grammar (component/sequence/class/state)
//!             │
//!             └─ PNG/JPEG ─> extract_raster ─> partial IR + confidence map
//!                                (placeholders, needs repair)
//! ```
//!
//! Deterministic readers fail with [`ParseError`] on structurally broken input
//! but never on unknown style or shape codes, which fall back to defaults.

mod drawio;
mod dsl;
mod error;
mod layout;
mod raster;
mod style;
mod svg;
mod xml;

pub use drawio::{drawio_page_count, extract_drawio, extract_drawio_page};
pub use dsl::extract_dsl;
pub use error::{ParseError, Result};
pub use raster::{extract_raster, FixedSpans, NoText, TextRecognizer, TextSpan};
pub use style::{clean_label, parse_style, resolve_color};
pub use svg::{embedded_raster_payload, extract_svg};

use canon_ir::{enrich, source_hash, DiagramIr, SourceFormat};

const SNIFF_LEN: usize = 4096;

/// Guesses the source format from magic bytes and leading markup
pub fn detect_format(bytes: &[u8]) -> Option<SourceFormat> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") || bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(SourceFormat::Raster);
    }
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    let text = text.trim_start_matches('\u{feff}').trim_start();

    if text.contains("<mxfile") || text.contains("<mxgraphmodel") {
        return Some(SourceFormat::Drawio);
    }
    if text.contains("<svg") {
        return Some(SourceFormat::Svg);
    }
    if text.contains("@startuml") || text.contains("```plantuml") || text.contains("```puml") {
        return Some(SourceFormat::Dsl);
    }
    let first_line = text.lines().next().unwrap_or("").trim();
    if ["flowchart", "graph ", "sequencediagram", "classdiagram", "statediagram"]
        .iter()
        .any(|kw| first_line.starts_with(kw))
    {
        return Some(SourceFormat::Mermaid);
    }
    let arrow_lines = text
        .lines()
        .filter(|l| l.contains("->") || l.contains("..>") || l.contains("==>"))
        .count();
    (arrow_lines > 0 && !text.starts_with('<')).then_some(SourceFormat::Dsl)
}

/// Grammar parse of a vector or text source, with the source hash recorded
/// and roles, protocols, zones and legend filled in.
pub fn extract_deterministic(bytes: &[u8], format: SourceFormat) -> Result<DiagramIr> {
    let mut ir = match format {
        SourceFormat::Drawio => extract_drawio(bytes)?,
        SourceFormat::Svg => extract_svg(bytes)?,
        SourceFormat::Dsl => extract_dsl(std::str::from_utf8(bytes)?)?,
        SourceFormat::Raster | SourceFormat::Mermaid => {
            return Err(ParseError::UnsupportedFormat(format.as_str().to_string()))
        }
    };
    ir.metadata.source_hash = Some(source_hash(bytes));
    enrich(&mut ir);
    Ok(ir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn formats_are_sniffed_from_content() {
        assert_eq!(
            detect_format(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            Some(SourceFormat::Raster)
        );
        assert_eq!(detect_format(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(SourceFormat::Raster));
        assert_eq!(
            detect_format(b"<?xml version=\"1.0\"?>\n<mxfile host=\"app\">"),
            Some(SourceFormat::Drawio)
        );
        assert_eq!(
            detect_format(b"<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>"),
            Some(SourceFormat::Svg)
        );
        assert_eq!(detect_format(b"@startuml\nA -> B\n@enduml"), Some(SourceFormat::Dsl));
        assert_eq!(detect_format(b"[A] --> [B]\n"), Some(SourceFormat::Dsl));
        assert_eq!(detect_format(b"flowchart LR\n  a --> b"), Some(SourceFormat::Mermaid));
        assert_eq!(detect_format(b"just some prose"), None);
    }

    #[test]
    fn deterministic_extraction_records_hash_and_enriches() {
        let source = b"[API Gateway] -> [Orders Postgres] : HTTPS\n";
        let ir = extract_deterministic(source, SourceFormat::Dsl).unwrap();
        assert_eq!(ir.metadata.source_hash, Some(source_hash(source)));
        assert_eq!(ir.edges[0].protocol.as_deref(), Some("HTTPS"));
        assert!(ir.nodes.iter().all(|n| n.confidence == 1.0));
    }

    #[test]
    fn raster_sources_are_not_deterministic() {
        assert!(matches!(
            extract_deterministic(b"\x89PNG", SourceFormat::Raster),
            Err(ParseError::UnsupportedFormat(_))
        ));
    }
}
