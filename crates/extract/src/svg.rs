//! SVG export reader: shapes become nodes, text is attached to the shape that
//! encloses it, and connector geometry is snapped to the nearest shapes.

use crate::layout::{containment, distance, segment_distance, unique_id};
use crate::style::{meaningful_color, parse_style};
use crate::xml::{parse_document, parse_number, Element};
use crate::{ParseError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use canon_ir::{
    Arrow, Bounds, DiagramIr, DiagramType, Edge, Group, LineStyle, Node, Shape, SourceFormat,
};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Max distance between a connector endpoint and the shape it attaches to
const ENDPOINT_TOLERANCE: f64 = 30.0;
const EDGE_LABEL_DISTANCE: f64 = 40.0;
const MIN_SHAPE_SIZE: f64 = 5.0;
const MIN_CONNECTOR_LENGTH: f64 = 10.0;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-+]?\d*\.?\d+").expect("valid regex"));
static TRANSLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"translate\(\s*([-+]?\d*\.?\d+)(?:[\s,]+([-+]?\d*\.?\d+))?\s*\)")
        .expect("valid regex")
});

struct RawShape {
    bounds: Bounds,
    shape: Shape,
    fill: Option<String>,
    stroke: Option<String>,
    label: Vec<String>,
}

struct RawText {
    text: String,
    x: f64,
    y: f64,
}

struct RawLine {
    start: (f64, f64),
    end: (f64, f64),
    style: LineStyle,
    arrow_start: bool,
    arrow_end: bool,
    color: Option<String>,
    label: Vec<String>,
}

fn presentation(element: &Element, key: &str) -> Option<String> {
    if let Some(value) = element.attr(key) {
        return Some(value.to_string());
    }
    parse_style(&element.attr("style").unwrap_or_default().replace(':', "="))
        .get(key)
        .cloned()
}

fn offset(ancestors: &[&Element], element: &Element) -> (f64, f64) {
    ancestors
        .iter()
        .copied()
        .chain(std::iter::once(element))
        .filter_map(|e| e.attr("transform"))
        .filter_map(|t| TRANSLATE.captures(t))
        .fold((0.0, 0.0), |(ox, oy), caps| {
            let dx = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()).unwrap_or(0.0);
            let dy = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok()).unwrap_or(0.0);
            (ox + dx, oy + dy)
        })
}

fn numbers(raw: &str) -> Vec<f64> {
    NUMBER
        .find_iter(raw)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

fn shape_bounds(element: &Element) -> Option<(Bounds, Shape)> {
    let num = |key: &str| element.attr_f64(key).unwrap_or(0.0);
    match element.name.as_str() {
        "rect" => Some((
            Bounds::new(num("x"), num("y"), num("width"), num("height")),
            Shape::Rectangle,
        )),
        "circle" => {
            let r = num("r");
            Some((
                Bounds::new(num("cx") - r, num("cy") - r, 2.0 * r, 2.0 * r),
                Shape::Circle,
            ))
        }
        "ellipse" => {
            let (rx, ry) = (num("rx"), num("ry"));
            Some((
                Bounds::new(num("cx") - rx, num("cy") - ry, 2.0 * rx, 2.0 * ry),
                Shape::Circle,
            ))
        }
        "polygon" => {
            let coords = numbers(element.attr("points").unwrap_or_default());
            let points: Vec<(f64, f64)> = coords.chunks_exact(2).map(|p| (p[0], p[1])).collect();
            if points.len() < 3 {
                return None;
            }
            let (min_x, max_x, min_y, max_y) = points.iter().fold(
                (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
                |(ax, bx, ay, by), (x, y)| (ax.min(*x), bx.max(*x), ay.min(*y), by.max(*y)),
            );
            let shape = match points.len() {
                4 => Shape::Diamond,
                6 => Shape::Hexagon,
                _ => Shape::Rectangle,
            };
            Some((Bounds::new(min_x, min_y, max_x - min_x, max_y - min_y), shape))
        }
        _ => None,
    }
}

fn line_endpoints(element: &Element) -> Option<((f64, f64), (f64, f64))> {
    let coords = match element.name.as_str() {
        "line" => vec![
            element.attr_f64("x1").unwrap_or(0.0),
            element.attr_f64("y1").unwrap_or(0.0),
            element.attr_f64("x2").unwrap_or(0.0),
            element.attr_f64("y2").unwrap_or(0.0),
        ],
        "path" => numbers(element.attr("d").unwrap_or_default()),
        "polyline" => numbers(element.attr("points").unwrap_or_default()),
        _ => return None,
    };
    if coords.len() < 4 {
        return None;
    }
    let n = coords.len();
    Some(((coords[0], coords[1]), (coords[n - 2], coords[n - 1])))
}

fn href(element: &Element) -> Option<&str> {
    element.attr("href").or_else(|| element.attr("xlink:href"))
}

/// True when the document is a wrapper around a PNG/JPEG data URI with no
/// vector content of its own.
fn is_embedded_raster(root: &Element) -> bool {
    let mut images = 0usize;
    let mut raster_uris = 0usize;
    let mut texts = 0usize;
    let mut rects = 0usize;
    root.walk(&mut |e, _| match e.name.as_str() {
        "image" => {
            images += 1;
            let is_bitmap = href(e).is_some_and(|h| {
                h.starts_with("data:image/png") || h.starts_with("data:image/jpeg")
            });
            if is_bitmap {
                raster_uris += 1;
            }
        }
        "text" | "tspan" if !e.text.trim().is_empty() => texts += 1,
        "rect" => rects += 1,
        _ => {}
    });
    images > 0 && raster_uris > 0 && texts == 0 && rects <= 1
}

/// Decoded bitmap of an SVG that only wraps a raster image.
pub fn embedded_raster_payload(bytes: &[u8]) -> Option<Vec<u8>> {
    let root = parse_document(std::str::from_utf8(bytes).ok()?).ok()?;
    if !is_embedded_raster(&root) {
        return None;
    }
    let mut payload = None;
    root.walk(&mut |e, _| {
        if payload.is_some() || e.name != "image" {
            return;
        }
        let data = href(e)
            .and_then(|h| h.split_once(";base64,"))
            .map(|(_, data)| data.trim().to_string());
        if let Some(data) = data {
            payload = STANDARD.decode(data.as_bytes()).ok();
        }
    });
    payload
}

pub fn extract_svg(bytes: &[u8]) -> Result<DiagramIr> {
    let root = parse_document(std::str::from_utf8(bytes)?)?;
    if root.name != "svg" {
        return Err(ParseError::Malformed(format!("expected <svg>, found <{}>", root.name)));
    }
    if is_embedded_raster(&root) {
        return Err(ParseError::EmbeddedRaster);
    }

    let mut shapes: Vec<RawShape> = Vec::new();
    let mut texts: Vec<RawText> = Vec::new();
    let mut lines: Vec<RawLine> = Vec::new();

    root.walk(&mut |e, ancestors| {
        if ancestors.iter().any(|a| a.name == "defs" || a.name == "marker") {
            return;
        }
        let (ox, oy) = offset(ancestors, e);
        match e.name.as_str() {
            "rect" | "circle" | "ellipse" | "polygon" => {
                let Some((mut bounds, shape)) = shape_bounds(e) else {
                    return;
                };
                if bounds.width <= MIN_SHAPE_SIZE || bounds.height <= MIN_SHAPE_SIZE {
                    return;
                }
                bounds.x += ox;
                bounds.y += oy;
                let fill = presentation(e, "fill").and_then(|c| meaningful_color(&c));
                let stroke = presentation(e, "stroke").and_then(|c| meaningful_color(&c));
                if fill.is_none() && stroke.is_none() {
                    return;
                }
                shapes.push(RawShape {
                    bounds,
                    shape,
                    fill,
                    stroke,
                    label: Vec::new(),
                });
            }
            "text" | "tspan" => {
                let text = e.text.trim();
                if text.is_empty() {
                    return;
                }
                let parent_text = ancestors.last().filter(|a| a.name == "text");
                let coord = |key: &str| {
                    e.attr(key)
                        .or_else(|| parent_text.and_then(|p| p.attr(key)))
                        .and_then(parse_number)
                        .unwrap_or(0.0)
                };
                texts.push(RawText {
                    text: text.to_string(),
                    x: coord("x") + ox,
                    y: coord("y") + oy,
                });
            }
            "line" | "path" | "polyline" => {
                let Some((start, end)) = line_endpoints(e) else {
                    return;
                };
                let start = (start.0 + ox, start.1 + oy);
                let end = (end.0 + ox, end.1 + oy);
                if distance(start, end) < MIN_CONNECTOR_LENGTH {
                    return;
                }
                let width = presentation(e, "stroke-width")
                    .and_then(|w| parse_number(&w))
                    .unwrap_or(1.0);
                let dashed = presentation(e, "stroke-dasharray")
                    .is_some_and(|d| !d.trim().is_empty() && d.trim() != "none");
                let style = if width > 2.5 {
                    LineStyle::Thick
                } else if dashed {
                    LineStyle::Dashed
                } else {
                    LineStyle::Solid
                };
                let has = |key: &str| presentation(e, key).is_some_and(|m| m.trim() != "none");
                lines.push(RawLine {
                    start,
                    end,
                    style,
                    arrow_start: has("marker-start"),
                    arrow_end: has("marker-end"),
                    color: presentation(e, "stroke").and_then(|c| meaningful_color(&c)),
                    label: Vec::new(),
                });
            }
            _ => {}
        }
    });

    if shapes.is_empty() {
        return Err(ParseError::Malformed("SVG contains no shapes".into()));
    }

    let bounds: Vec<Bounds> = shapes.iter().map(|s| s.bounds).collect();
    let (is_group, parent) = containment(&bounds);

    // text goes to the innermost enclosing node shape, then to the nearest
    // connector, then to an enclosing group
    for text in texts {
        let encloses = |s: &RawShape| {
            let b = s.bounds;
            text.x >= b.x
                && text.x <= b.x + b.width
                && text.y >= b.y - 10.0
                && text.y <= b.y + b.height + 10.0
        };
        let innermost = |want_group: bool| {
            shapes
                .iter()
                .enumerate()
                .filter(|(i, s)| is_group[*i] == want_group && encloses(*s))
                .min_by(|(_, a), (_, b)| a.bounds.area().total_cmp(&b.bounds.area()))
                .map(|(i, _)| i)
        };
        if let Some(i) = innermost(false) {
            shapes[i].label.push(text.text);
            continue;
        }
        let nearest_line = lines
            .iter()
            .enumerate()
            .map(|(i, l)| (i, segment_distance((text.x, text.y), l.start, l.end)))
            .filter(|(_, d)| *d <= EDGE_LABEL_DISTANCE)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        if let Some(i) = nearest_line {
            lines[i].label.push(text.text);
        } else if let Some(i) = innermost(true) {
            shapes[i].label.push(text.text);
        } else {
            debug!("dropping free-floating SVG text '{}'", text.text);
        }
    }

    let any_labeled = shapes
        .iter()
        .enumerate()
        .any(|(i, s)| !is_group[i] && !s.label.is_empty());

    let mut ir = DiagramIr::new(DiagramType::Flowchart);
    let mut used = HashSet::new();
    let mut ids: Vec<Option<String>> = vec![None; shapes.len()];
    let mut placeholder = 0usize;

    for (i, shape) in shapes.iter().enumerate() {
        let label = shape.label.join(" ");
        if is_group[i] {
            let label = if label.is_empty() {
                format!("Group {}", i + 1)
            } else {
                label
            };
            let id = unique_id(&label, &mut used);
            let mut group = Group::new(id.clone(), label);
            group.fill_color = shape.fill.clone();
            group.bounds = Some(shape.bounds);
            ir.groups.push(group);
            ids[i] = Some(id);
            continue;
        }
        let label = if label.is_empty() {
            if any_labeled {
                continue;
            }
            placeholder += 1;
            format!("Node_{placeholder}")
        } else {
            label
        };
        let id = unique_id(&label, &mut used);
        let mut node = Node::new(id.clone(), label)
            .with_shape(shape.shape)
            .with_bounds(shape.bounds);
        node.fill_color = shape.fill.clone();
        node.border_color = shape.stroke.clone();
        ir.nodes.push(node);
        ids[i] = Some(id);
    }

    for (child, parent) in parent.iter().enumerate() {
        let (Some(parent), Some(child_id)) = (parent, &ids[child]) else {
            continue;
        };
        let Some(parent_id) = ids[*parent].clone() else {
            continue;
        };
        if let Some(group) = ir.groups.iter_mut().find(|g| g.id == parent_id) {
            group.children.push(child_id.clone());
        }
    }
    ir.sync_group_membership();

    let node_shapes: Vec<(usize, &String)> = ids
        .iter()
        .enumerate()
        .filter(|(i, _)| !is_group[*i])
        .filter_map(|(i, id)| id.as_ref().map(|id| (i, id)))
        .collect();
    let attach = |point: (f64, f64)| {
        node_shapes
            .iter()
            .map(|(i, id)| (shapes[*i].bounds.distance_to(point.0, point.1), *id))
            .filter(|(d, _)| *d <= ENDPOINT_TOLERANCE)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id)| id.clone())
    };

    let mut seen: HashSet<(String, String)> = HashSet::new();
    for line in &lines {
        let (Some(source), Some(target)) = (attach(line.start), attach(line.end)) else {
            continue;
        };
        if source == target || !seen.insert((source.clone(), target.clone())) {
            continue;
        }
        let mut edge = Edge::new(ir.next_edge_id(), source, target);
        edge.label = line.label.join(" ");
        edge.line_style = line.style;
        edge.arrow_start = Arrow::from_present(line.arrow_start);
        edge.arrow_end = Arrow::from_present(line.arrow_end);
        edge.color = line.color.clone();
        ir.edges.push(edge);
    }

    ir.metadata.source_format = Some(SourceFormat::Svg);
    ir.infer_direction();
    Ok(ir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg">
      <defs><marker id="arrow"><path d="M0,0 L10,5 L0,10 z"/></marker></defs>
      <rect x="0" y="0" width="800" height="400" fill="#ffffff"/>
      <g transform="translate(10,10)">
        <rect x="0" y="0" width="400" height="200" fill="#FFE699" stroke="#999999"/>
        <text x="150" y="190">Internal Zone</text>
        <rect x="20" y="40" width="100" height="50" fill="#4472C4"/>
        <text x="40" y="70">Orders</text>
        <rect x="250" y="40" width="100" height="50" fill="#4472C4"/>
        <text x="270" y="70">Billing</text>
      </g>
      <line x1="130" y1="75" x2="260" y2="75" stroke="#333333" stroke-dasharray="4 2" marker-end="url(#arrow)"/>
      <text x="180" y="68">events</text>
      <rect x="600" y="300" width="60" height="40" fill="#cccccc"/>
    </svg>"##;

    #[test]
    fn shapes_text_and_connectors_become_ir() {
        let ir = extract_svg(SVG.as_bytes()).expect("extract");

        let labels: Vec<&str> = ir.nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["Orders", "Billing"]);
        assert_eq!(ir.nodes[0].fill_color.as_deref(), Some("#4472C4"));
        assert_eq!(ir.nodes[0].parent_group.as_deref(), Some("internal_zone"));

        assert_eq!(ir.groups.len(), 1);
        assert_eq!(ir.groups[0].label, "Internal Zone");

        assert_eq!(ir.edges.len(), 1);
        let edge = &ir.edges[0];
        assert_eq!((edge.source.as_str(), edge.target.as_str()), ("orders", "billing"));
        assert_eq!(edge.line_style, LineStyle::Dashed);
        assert_eq!(edge.arrow_end, Arrow::Arrow);
        assert_eq!(edge.label, "events");
    }

    #[test]
    fn raster_wrappers_are_reported() {
        let svg = r#"<svg xmlns:xlink="http://www.w3.org/1999/xlink"><image xlink:href="data:image/png;base64,AAAA"/></svg>"#;
        assert!(matches!(
            extract_svg(svg.as_bytes()).unwrap_err(),
            ParseError::EmbeddedRaster
        ));
        assert_eq!(embedded_raster_payload(svg.as_bytes()), Some(vec![0, 0, 0]));
    }

    #[test]
    fn unlabeled_diagrams_get_placeholders() {
        let svg = r##"<svg><rect x="0" y="0" width="50" height="50" fill="#4472C4"/></svg>"##;
        let ir = extract_svg(svg.as_bytes()).expect("extract");
        assert_eq!(ir.nodes[0].label, "Node_1");
    }
}
