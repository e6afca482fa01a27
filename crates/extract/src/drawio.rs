//! Draw.io (`mxfile` / `mxGraphModel`) reader.

use crate::style::{clean_label, meaningful_color, parse_style, resolve_color};
use crate::xml::{parse_document, Element};
use crate::{ParseError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use canon_ir::{
    Arrow, Bounds, DiagramIr, DiagramType, Edge, Group, LineStyle, Node, Shape, SourceFormat,
};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;

/// One `mxCell`, with id/label lifted from a `UserObject`/`object` wrapper when present
struct Cell<'a> {
    id: String,
    label: String,
    parent: String,
    style: BTreeMap<String, String>,
    vertex: bool,
    edge: bool,
    source: Option<String>,
    target: Option<String>,
    geometry: Option<&'a Element>,
}

pub fn extract_drawio(bytes: &[u8]) -> Result<DiagramIr> {
    extract_drawio_page(bytes, 0)
}

pub fn drawio_page_count(bytes: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(bytes)?;
    Ok(load_pages(text)?.len())
}

pub fn extract_drawio_page(bytes: &[u8], page_index: usize) -> Result<DiagramIr> {
    let text = std::str::from_utf8(bytes)?;
    let pages = load_pages(text)?;
    let total = pages.len();
    let Some((name, model)) = pages.into_iter().nth(page_index) else {
        return Err(ParseError::PageNotFound {
            index: page_index,
            total,
        });
    };

    let mut ir = graph_from_model(&model);
    ir.metadata.source_format = Some(SourceFormat::Drawio);
    ir.metadata
        .extra
        .insert("page_index".into(), page_index.to_string());
    ir.metadata.extra.insert("page_count".into(), total.to_string());
    if let Some(name) = name {
        ir.metadata.extra.insert("page_name".into(), name);
    }
    Ok(ir)
}

/// Returns `(page name, mxGraphModel element)` for every page.
fn load_pages(text: &str) -> Result<Vec<(Option<String>, Element)>> {
    let root = parse_document(text)?;
    match root.name.as_str() {
        "mxGraphModel" => Ok(vec![(None, root)]),
        "mxfile" => {
            let mut pages = Vec::new();
            for diagram in root.children.iter().filter(|c| c.name == "diagram") {
                let name = diagram.attr("name").map(str::to_string);
                if let Some(model) = diagram.child("mxGraphModel") {
                    pages.push((name, model.clone()));
                    continue;
                }
                let payload = diagram.text.trim();
                if payload.is_empty() {
                    continue;
                }
                let xml = decompress_page(payload)?;
                let model = parse_document(&xml)?;
                if model.name != "mxGraphModel" {
                    return Err(ParseError::Malformed(format!(
                        "compressed page decodes to <{}>",
                        model.name
                    )));
                }
                pages.push((name, model));
            }
            if pages.is_empty() {
                return Err(ParseError::Malformed("mxfile has no diagram pages".into()));
            }
            Ok(pages)
        }
        other => Err(ParseError::Malformed(format!(
            "expected <mxfile> or <mxGraphModel>, found <{other}>"
        ))),
    }
}

/// Draw.io page payloads are `base64(deflate_raw(encodeURIComponent(xml)))`.
/// Zlib and gzip wrappers are accepted as well.
pub(crate) fn decompress_page(payload: &str) -> Result<String> {
    let trimmed = payload.trim();
    if trimmed.starts_with('<') {
        return Ok(trimmed.to_string());
    }
    let cleaned: String = if trimmed.contains('%') {
        percent_decode(trimmed)
    } else {
        trimmed.to_string()
    };
    let compact: String = cleaned.chars().filter(|c| !c.is_whitespace()).collect();
    let raw = STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| ParseError::Decode(format!("base64: {err}")))?;

    let attempts: [fn(&[u8]) -> std::io::Result<Vec<u8>>; 3] = [
        |data| read_all(DeflateDecoder::new(data)),
        |data| read_all(ZlibDecoder::new(data)),
        |data| read_all(GzDecoder::new(data)),
    ];
    for attempt in attempts {
        let Ok(inflated) = attempt(&raw) else {
            continue;
        };
        let text = String::from_utf8_lossy(&inflated).into_owned();
        let text = if text.trim_start().starts_with('<') {
            text
        } else {
            percent_decode(&text)
        };
        if text.contains("<mxGraphModel") || text.contains("<mxCell") {
            return Ok(text);
        }
    }
    Err(ParseError::Decode("payload is not a deflated mxGraphModel".into()))
}

fn read_all(mut reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

/// `decodeURIComponent` equivalent; malformed escapes pass through unchanged.
pub(crate) fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(value) = decoded {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn collect_cells(model: &Element) -> Vec<Cell<'_>> {
    let mut cells = Vec::new();
    model.walk(&mut |element, _| {
        let (cell, wrapper) = match element.name.as_str() {
            "mxCell" => (element, None),
            "UserObject" | "object" => match element.child("mxCell") {
                Some(inner) => (inner, Some(element)),
                None => return,
            },
            _ => return,
        };
        if wrapper.is_none() && cell.attr("id").is_none() {
            return;
        }
        let id = wrapper
            .and_then(|w| w.attr("id"))
            .or_else(|| cell.attr("id"))
            .unwrap_or_default()
            .to_string();
        let raw_label = wrapper
            .and_then(|w| w.attr("label"))
            .or_else(|| cell.attr("value"))
            .unwrap_or_default();
        cells.push(Cell {
            id,
            label: clean_label(raw_label),
            parent: cell.attr("parent").unwrap_or_default().to_string(),
            style: parse_style(cell.attr("style").unwrap_or_default()),
            vertex: cell.attr("vertex") == Some("1"),
            edge: cell.attr("edge") == Some("1"),
            source: cell.attr("source").map(str::to_string),
            target: cell.attr("target").map(str::to_string),
            geometry: cell.child("mxGeometry"),
        });
    });
    cells
}

fn style_flag(style: &BTreeMap<String, String>, key: &str) -> bool {
    style
        .get(key)
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

pub(crate) fn drawio_shape(style: &BTreeMap<String, String>) -> Shape {
    let declared = style
        .get("shape")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    let keyword = [
        ("cylinder", Shape::Cylinder),
        ("database", Shape::Cylinder),
        ("datastore", Shape::Cylinder),
        ("rhombus", Shape::Diamond),
        ("diamond", Shape::Diamond),
        ("decision", Shape::Diamond),
        ("doubleellipse", Shape::Circle),
        ("ellipse", Shape::Circle),
        ("flowchart.start", Shape::Circle),
        ("hexagon", Shape::Hexagon),
    ]
    .into_iter()
    .find(|(key, _)| declared.contains(key))
    .map(|(_, shape)| shape);
    if let Some(shape) = keyword {
        return shape;
    }
    for flag in ["ellipse", "rhombus", "hexagon", "cylinder", "doubleEllipse"] {
        if style.contains_key(flag) {
            return Shape::from_code(flag);
        }
    }
    if !declared.is_empty() {
        debug!("unknown draw.io shape {declared}, using rectangle");
    }
    Shape::Rectangle
}

fn is_container_style(style: &BTreeMap<String, String>) -> bool {
    style.contains_key("swimlane")
        || style.contains_key("group")
        || style_flag(style, "container")
        || style.get("shape").is_some_and(|s| s == "swimlane")
}

pub(crate) fn drawio_line_style(style: &BTreeMap<String, String>) -> LineStyle {
    if style_flag(style, "dashed") || style_flag(style, "dotted") {
        return LineStyle::Dashed;
    }
    let width = style
        .get("strokeWidth")
        .and_then(|w| w.parse::<f64>().ok())
        .unwrap_or(1.0);
    if width >= 3.0 {
        LineStyle::Thick
    } else {
        LineStyle::Solid
    }
}

fn drawio_arrow(style: &BTreeMap<String, String>, key: &str, default_present: bool) -> Arrow {
    match style.get(key) {
        Some(value) => Arrow::from_present(!(value.is_empty() || value == "none")),
        None => Arrow::from_present(default_present),
    }
}

fn geometry_bounds(geometry: Option<&Element>) -> Option<Bounds> {
    let g = geometry?;
    let width = g.attr_f64("width")?;
    let height = g.attr_f64("height")?;
    Some(Bounds::new(
        g.attr_f64("x").unwrap_or(0.0),
        g.attr_f64("y").unwrap_or(0.0),
        width,
        height,
    ))
}

fn graph_from_model(model: &Element) -> DiagramIr {
    let cells = collect_cells(model);
    let roots: HashSet<&str> = cells
        .iter()
        .filter(|c| c.parent.is_empty())
        .map(|c| c.id.as_str())
        .chain(
            // layer cells: direct children of the root that carry no geometry
            cells
                .iter()
                .filter(|c| !c.vertex && !c.edge && c.geometry.is_none())
                .map(|c| c.id.as_str()),
        )
        .collect();

    let edge_ids: HashSet<&str> = cells
        .iter()
        .filter(|c| c.edge || (c.source.is_some() && c.target.is_some()))
        .map(|c| c.id.as_str())
        .collect();

    let mut child_count: HashMap<&str, usize> = HashMap::new();
    for cell in &cells {
        if cell.vertex && !edge_ids.contains(cell.id.as_str()) {
            *child_count.entry(cell.parent.as_str()).or_insert(0) += 1;
        }
    }

    let mut ir = DiagramIr::new(DiagramType::Flowchart);
    let mut edge_labels: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut group_ids: HashSet<&str> = HashSet::new();
    let mut placeholder = 0usize;
    let mut group_placeholder = 0usize;
    let mut skipped_connectors = 0usize;

    // containers first so children can resolve their parent group
    for cell in &cells {
        if roots.contains(cell.id.as_str()) || edge_ids.contains(cell.id.as_str()) {
            continue;
        }
        let has_children = child_count.contains_key(cell.id.as_str());
        if cell.vertex && (is_container_style(&cell.style) || has_children) {
            group_ids.insert(cell.id.as_str());
        }
    }

    for cell in &cells {
        let id = cell.id.as_str();
        if id.is_empty() || roots.contains(id) {
            continue;
        }

        if edge_ids.contains(id) {
            let (Some(source), Some(target)) = (&cell.source, &cell.target) else {
                skipped_connectors += 1;
                debug!("skipping unattached connector {id}");
                continue;
            };
            let mut edge = Edge::new(id, source.clone(), target.clone());
            edge.label = cell.label.clone();
            edge.line_style = drawio_line_style(&cell.style);
            edge.arrow_end = drawio_arrow(&cell.style, "endArrow", true);
            edge.arrow_start = drawio_arrow(&cell.style, "startArrow", false);
            edge.color = cell
                .style
                .get("strokeColor")
                .and_then(|c| meaningful_color(c));
            ir.edges.push(edge);
            continue;
        }

        if edge_ids.contains(cell.parent.as_str()) {
            if !cell.label.is_empty() {
                edge_labels
                    .entry(cell.parent.as_str())
                    .or_default()
                    .push(cell.label.as_str());
            }
            continue;
        }

        if group_ids.contains(id) {
            let label = if cell.label.is_empty() {
                group_placeholder += 1;
                format!("Group_{group_placeholder}")
            } else {
                cell.label.clone()
            };
            let mut group = Group::new(id, label);
            group.fill_color = cell.style.get("fillColor").and_then(|c| meaningful_color(c));
            group.bounds = geometry_bounds(cell.geometry);
            ir.groups.push(group);
            continue;
        }

        if !cell.vertex && cell.label.is_empty() {
            continue;
        }

        let label = if cell.label.is_empty() {
            placeholder += 1;
            format!("Node_{placeholder}")
        } else {
            cell.label.clone()
        };
        let mut node = Node::new(id, label).with_shape(drawio_shape(&cell.style));
        node.fill_color = cell.style.get("fillColor").and_then(|c| meaningful_color(c));
        node.border_color = cell
            .style
            .get("strokeColor")
            .and_then(|c| meaningful_color(c));
        node.text_color = cell.style.get("fontColor").and_then(|c| resolve_color(c));
        node.bounds = geometry_bounds(cell.geometry);
        if group_ids.contains(cell.parent.as_str()) {
            node.parent_group = Some(cell.parent.clone());
        }
        ir.nodes.push(node);
    }

    for edge in &mut ir.edges {
        if let Some(parts) = edge_labels.get(edge.id.as_str()) {
            let extra = parts.join(" ");
            edge.label = if edge.label.is_empty() {
                extra
            } else {
                format!("{} {extra}", edge.label)
            };
        }
    }

    for cell in &cells {
        if !group_ids.contains(cell.parent.as_str()) {
            continue;
        }
        let is_member = ir.has_node(&cell.id) || group_ids.contains(cell.id.as_str());
        if !is_member {
            continue;
        }
        if let Some(group) = ir.groups.iter_mut().find(|g| g.id == cell.parent) {
            group.children.push(cell.id.clone());
        }
    }

    if skipped_connectors > 0 {
        warn!("draw.io page had {skipped_connectors} unattached connector(s)");
        ir.metadata
            .extra
            .insert("skipped_connectors".into(), skipped_connectors.to_string());
    }
    ir.infer_direction();
    ir
}
