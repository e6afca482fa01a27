//! Raster (PNG/JPEG) reader.
//!
//! ```text
//! bytes ─> RGB ─> ink mask ─┬─> opening ─> solid regions ──┐
//!                           ├─> enclosed background holes ─┴─> shapes ─> containment ─> groups
//!                           └─> ink outside shapes ─> connectors
//! OCR spans (TextRecognizer) ─> shapes, then connectors
//! ```
//!
//! The result is a partial IR: every element carries a confidence and
//! unreadable labels become `Node_<n>` placeholders for the repair step.

use crate::layout::{containment, distance, segment_distance};
use canon_ir::{
    Bounds, ConfidenceMap, DiagramIr, DiagramType, Edge, Group, Node, Shape, SourceFormat,
};
use image::RgbImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const MIN_AREA_FRACTION: f64 = 0.0008;
const MAX_AREA_FRACTION: f64 = 0.5;
const MIN_SHAPE_SIDE: f64 = 10.0;
const INK_THRESHOLD: i32 = 60;
const OPENING_RADIUS: usize = 2;
const OUTLINE_PAD: f64 = 3.0;
const MIN_CONNECTOR_LENGTH: f64 = 20.0;
const LABEL_PAD: f64 = 15.0;
const LABEL_RADIUS: f64 = 80.0;
const MIN_SPAN_CONFIDENCE: f64 = 0.3;
const PLACEHOLDER_CONFIDENCE: f64 = 0.3;
const ARROWHEAD_MASS_RATIO: f64 = 1.25;

/// Recognized text with its pixel box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub bounds: Bounds,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

/// OCR seam. The crate ships no engine of its own.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &RgbImage) -> Vec<TextSpan>;
}

/// Recognizer that finds nothing; every node becomes a placeholder
#[derive(Debug, Default, Clone, Copy)]
pub struct NoText;

impl TextRecognizer for NoText {
    fn recognize(&self, _image: &RgbImage) -> Vec<TextSpan> {
        Vec::new()
    }
}

/// Spans recognized ahead of time, e.g. loaded from a sidecar JSON file
#[derive(Debug, Default, Clone)]
pub struct FixedSpans(pub Vec<TextSpan>);

impl TextRecognizer for FixedSpans {
    fn recognize(&self, _image: &RgbImage) -> Vec<TextSpan> {
        self.0.clone()
    }
}

#[derive(Clone)]
struct Mask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl Mask {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
        }
    }

    fn get(&self, x: usize, y: usize) -> bool {
        self.bits[y * self.width + x]
    }

    fn set(&mut self, x: usize, y: usize, value: bool) {
        self.bits[y * self.width + x] = value;
    }

    /// Separable square min/max filter. Out-of-image pixels count as unset.
    fn filter(&self, radius: usize, all: bool) -> Mask {
        let pass = |src: &Mask, horizontal: bool| {
            let mut out = Mask::new(src.width, src.height);
            let limit = if horizontal { src.width } else { src.height };
            for y in 0..src.height {
                for x in 0..src.width {
                    let pos = if horizontal { x } else { y };
                    let lo = pos.saturating_sub(radius);
                    let hi = (pos + radius).min(limit - 1);
                    let mut window =
                        (lo..=hi).map(|p| if horizontal { src.get(p, y) } else { src.get(x, p) });
                    let value = if all {
                        hi - lo == 2 * radius && window.all(|b| b)
                    } else {
                        window.any(|b| b)
                    };
                    out.set(x, y, value);
                }
            }
            out
        };
        pass(&pass(self, true), false)
    }

    fn erode(&self, radius: usize) -> Mask {
        self.filter(radius, true)
    }

    fn dilate(&self, radius: usize) -> Mask {
        self.filter(radius, false)
    }

    /// 4-connected components of set pixels
    fn components(&self) -> Vec<Component> {
        let mut seen = vec![false; self.bits.len()];
        let mut out = Vec::new();
        for start in 0..self.bits.len() {
            if !self.bits[start] || seen[start] {
                continue;
            }
            seen[start] = true;
            let mut stack = vec![start];
            let mut component = Component {
                min_x: usize::MAX,
                min_y: usize::MAX,
                ..Default::default()
            };
            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % self.width, idx / self.width);
                component.add(x, y, self.width, self.height);
                let mut push = |nx: usize, ny: usize| {
                    let n = ny * self.width + nx;
                    if self.bits[n] && !seen[n] {
                        seen[n] = true;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    push(x - 1, y);
                }
                if x + 1 < self.width {
                    push(x + 1, y);
                }
                if y > 0 {
                    push(x, y - 1);
                }
                if y + 1 < self.height {
                    push(x, y + 1);
                }
            }
            out.push(component);
        }
        out
    }
}

#[derive(Default)]
struct Component {
    pixels: Vec<(usize, usize)>,
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    touches_border: bool,
}

impl Component {
    fn add(&mut self, x: usize, y: usize, width: usize, height: usize) {
        self.pixels.push((x, y));
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
            self.touches_border = true;
        }
    }

    fn bounds(&self) -> Bounds {
        Bounds::new(
            self.min_x as f64,
            self.min_y as f64,
            (self.max_x - self.min_x + 1) as f64,
            (self.max_y - self.min_y + 1) as f64,
        )
    }

    /// Area covered row by row between the leftmost and rightmost pixel,
    /// relative to the bounding box. Interior text does not lower it.
    fn span_fill_ratio(&self) -> f64 {
        let rows = self.max_y - self.min_y + 1;
        let mut spans: Vec<Option<(usize, usize)>> = vec![None; rows];
        for &(x, y) in &self.pixels {
            let slot = &mut spans[y - self.min_y];
            *slot = Some(match *slot {
                Some((lo, hi)) => (lo.min(x), hi.max(x)),
                None => (x, x),
            });
        }
        let covered: usize = spans.iter().flatten().map(|(lo, hi)| hi - lo + 1).sum();
        covered as f64 / self.bounds().area()
    }
}

struct RawShape {
    bounds: Bounds,
    shape: Shape,
    confidence: f64,
    fill: Option<String>,
    border: Option<String>,
    label: Vec<String>,
}

struct Connector {
    from: usize,
    to: usize,
    segment: ((f64, f64), (f64, f64)),
    confidence: f64,
    label: Vec<String>,
}

fn near_white(p: [u8; 3]) -> bool {
    p.iter().all(|&c| c > 230)
}

fn near_black(p: [u8; 3]) -> bool {
    p.iter().all(|&c| c < 30)
}

fn hex(p: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", p[0], p[1], p[2])
}

/// Most frequent color among `pixels`, ignoring near-white and near-black
fn dominant_color(image: &RgbImage, pixels: impl Iterator<Item = (usize, usize)>) -> Option<String> {
    let mut counts: HashMap<[u8; 3], usize> = HashMap::new();
    for (x, y) in pixels {
        let p = image.get_pixel(x as u32, y as u32).0;
        if !near_white(p) && !near_black(p) {
            *counts.entry(p).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(p, _)| hex(p))
}

fn background_color(image: &RgbImage) -> [u8; 3] {
    let (w, h) = image.dimensions();
    let mut counts: HashMap<[u8; 3], usize> = HashMap::new();
    let border = (0..w)
        .flat_map(|x| [(x, 0), (x, h - 1)])
        .chain((0..h).flat_map(|y| [(0, y), (w - 1, y)]));
    for (x, y) in border {
        // quantized so JPEG noise does not split the vote
        let p = image.get_pixel(x, y).0.map(|c| c & 0xF8);
        *counts.entry(p).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(p, _)| p)
        .unwrap_or([255, 255, 255])
}

fn ink_mask(image: &RgbImage) -> Mask {
    let background = background_color(image);
    let (w, h) = image.dimensions();
    let mut mask = Mask::new(w as usize, h as usize);
    for (x, y, pixel) in image.enumerate_pixels() {
        let diff = pixel
            .0
            .iter()
            .zip(background.iter())
            .map(|(&a, &b)| (a as i32 - b as i32).abs())
            .max()
            .unwrap_or(0);
        if diff > INK_THRESHOLD {
            mask.set(x as usize, y as usize, true);
        }
    }
    mask
}

/// Shape class from row-span fill ratio and aspect. `None` for line debris.
fn classify(ratio: f64, aspect: f64) -> Option<(Shape, f64)> {
    let squareish = (0.8..=1.25).contains(&aspect);
    if ratio >= 0.88 {
        Some((Shape::Rectangle, 0.8))
    } else if ratio >= 0.70 {
        Some(if squareish {
            (Shape::Circle, 0.7)
        } else {
            (Shape::Hexagon, 0.5)
        })
    } else if ratio >= 0.40 {
        Some((Shape::Diamond, 0.6))
    } else {
        None
    }
}

fn area_in_band(bounds: &Bounds, image_area: f64) -> bool {
    let area = bounds.area();
    area >= image_area * MIN_AREA_FRACTION
        && area <= image_area * MAX_AREA_FRACTION
        && bounds.width >= MIN_SHAPE_SIDE
        && bounds.height >= MIN_SHAPE_SIDE
}

fn detect_shapes(image: &RgbImage, ink: &Mask, solid: &Mask) -> Vec<RawShape> {
    let image_area = (ink.width * ink.height) as f64;
    let mut shapes = Vec::new();

    for component in solid.components() {
        let bounds = component.bounds();
        if !area_in_band(&bounds, image_area) {
            continue;
        }
        let Some((shape, confidence)) =
            classify(component.span_fill_ratio(), bounds.width / bounds.height)
        else {
            continue;
        };
        let fill = dominant_color(image, component.pixels.iter().copied());
        let rim = component.pixels.iter().copied().filter(|&(x, y)| {
            x == component.min_x || x == component.max_x || y == component.min_y || y == component.max_y
        });
        let border = dominant_color(image, rim).filter(|b| Some(b) != fill.as_ref());
        shapes.push(RawShape {
            bounds,
            shape,
            confidence,
            fill,
            border,
            label: Vec::new(),
        });
    }

    // outlined shapes: background enclosed by ink
    let mut background = ink.clone();
    background.bits.iter_mut().for_each(|b| *b = !*b);
    for component in background.components() {
        if component.touches_border {
            continue;
        }
        let inner = component.bounds();
        if !area_in_band(&inner, image_area) {
            continue;
        }
        let Some((shape, confidence)) =
            classify(component.span_fill_ratio(), inner.width / inner.height)
        else {
            continue;
        };
        let bounds = Bounds::new(
            inner.x - OUTLINE_PAD,
            inner.y - OUTLINE_PAD,
            inner.width + 2.0 * OUTLINE_PAD,
            inner.height + 2.0 * OUTLINE_PAD,
        );
        let ring = ring_pixels(ink, &bounds, &inner);
        shapes.push(RawShape {
            bounds,
            shape,
            confidence,
            fill: None,
            border: dominant_color(image, ring.into_iter()),
            label: Vec::new(),
        });
    }

    shapes.sort_by(|a, b| {
        a.bounds
            .y
            .total_cmp(&b.bounds.y)
            .then(a.bounds.x.total_cmp(&b.bounds.x))
    });
    shapes
}

/// Ink pixels inside `outer` but outside `inner`
fn ring_pixels(ink: &Mask, outer: &Bounds, inner: &Bounds) -> Vec<(usize, usize)> {
    let x0 = outer.x.max(0.0) as usize;
    let y0 = outer.y.max(0.0) as usize;
    let x1 = ((outer.x + outer.width) as usize).min(ink.width);
    let y1 = ((outer.y + outer.height) as usize).min(ink.height);
    let mut out = Vec::new();
    for y in y0..y1 {
        for x in x0..x1 {
            if ink.get(x, y) && !inner.contains_point(x as f64, y as f64, 0.0) {
                out.push((x, y));
            }
        }
    }
    out
}

/// Connectors are ink components outside every node whose two ends sit near
/// distinct shapes. The end carrying more ink holds the arrowhead and becomes
/// the target.
fn detect_connectors(ink: &Mask, shapes: &[RawShape], is_group: &[bool]) -> Vec<Connector> {
    let diagonal = ((ink.width.pow(2) + ink.height.pow(2)) as f64).sqrt();
    let tolerance = (diagonal * 0.04).max(60.0);

    let mut residue = ink.clone();
    for (shape, &group) in shapes.iter().zip(is_group) {
        let b = shape.bounds;
        let shrunk = Bounds::new(
            b.x + OUTLINE_PAD,
            b.y + OUTLINE_PAD,
            (b.width - 2.0 * OUTLINE_PAD).max(0.0),
            (b.height - 2.0 * OUTLINE_PAD).max(0.0),
        );
        let x0 = (b.x - OUTLINE_PAD).max(0.0) as usize;
        let y0 = (b.y - OUTLINE_PAD).max(0.0) as usize;
        let x1 = ((b.x + b.width + OUTLINE_PAD) as usize).min(residue.width - 1);
        let y1 = ((b.y + b.height + OUTLINE_PAD) as usize).min(residue.height - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                // group interiors keep their connectors; only the outline goes
                if !(group && shrunk.contains_point(x as f64, y as f64, 0.0)) {
                    residue.set(x, y, false);
                }
            }
        }
    }

    let mut seen_pairs = HashSet::new();
    let mut connectors = Vec::new();
    for component in residue.components() {
        let bounds = component.bounds();
        if distance((0.0, 0.0), (bounds.width, bounds.height)) < MIN_CONNECTOR_LENGTH {
            continue;
        }
        let horizontal = bounds.width >= bounds.height;
        let key = |p: &&(usize, usize)| if horizontal { (p.0, p.1) } else { (p.1, p.0) };
        let (Some(&a), Some(&b)) = (
            component.pixels.iter().min_by_key(key),
            component.pixels.iter().max_by_key(key),
        ) else {
            continue;
        };
        let a = (a.0 as f64, a.1 as f64);
        let b = (b.0 as f64, b.1 as f64);

        let nearest = |p: (f64, f64)| {
            shapes
                .iter()
                .enumerate()
                .filter(|(i, _)| !is_group[*i])
                .map(|(i, s)| (i, s.bounds.distance_to(p.0, p.1)))
                .filter(|(_, d)| *d <= tolerance)
                .min_by(|x, y| x.1.total_cmp(&y.1))
        };
        let (Some((from, d_from)), Some((to, d_to))) = (nearest(a), nearest(b)) else {
            continue;
        };
        if from == to || !seen_pairs.insert((from.min(to), from.max(to))) {
            continue;
        }

        let radius = (distance(a, b) * 0.2).max(6.0);
        let mass = |p: (f64, f64)| {
            component
                .pixels
                .iter()
                .filter(|&&(x, y)| distance(p, (x as f64, y as f64)) <= radius)
                .count() as f64
        };
        let (mass_a, mass_b) = (mass(a), mass(b));
        let (from, to, segment) = if mass_a > mass_b * ARROWHEAD_MASS_RATIO {
            (to, from, (b, a))
        } else {
            (from, to, (a, b))
        };
        connectors.push(Connector {
            from,
            to,
            segment,
            confidence: (1.0 - (d_from + d_to) / (tolerance * 4.0)).max(0.3),
            label: Vec::new(),
        });
    }
    connectors
}

/// Spans go to the innermost shape containing them, then to the nearest
/// node within reach, then to the nearest connector. The rest is dropped.
fn assign_text(
    spans: Vec<TextSpan>,
    shapes: &mut [RawShape],
    is_group: &[bool],
    connectors: &mut [Connector],
) {
    let mut spans: Vec<TextSpan> = spans
        .into_iter()
        .filter(|s| s.confidence >= MIN_SPAN_CONFIDENCE && !s.text.trim().is_empty())
        .collect();
    spans.sort_by(|a, b| {
        a.bounds
            .y
            .total_cmp(&b.bounds.y)
            .then(a.bounds.x.total_cmp(&b.bounds.x))
    });

    for span in spans {
        let (cx, cy) = span.bounds.center();
        let enclosing = shapes
            .iter()
            .enumerate()
            .filter(|(_, s)| s.bounds.contains_point(cx, cy, LABEL_PAD))
            .min_by(|a, b| a.1.bounds.area().total_cmp(&b.1.bounds.area()))
            .map(|(i, _)| i);
        let nearby = || {
            shapes
                .iter()
                .enumerate()
                .filter(|(i, _)| !is_group[*i])
                .map(|(i, s)| (i, distance((cx, cy), s.bounds.center())))
                .filter(|(_, d)| *d < LABEL_RADIUS)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i)
        };
        if let Some(i) = enclosing.or_else(nearby) {
            let shape = &mut shapes[i];
            shape.label.push(span.text.trim().to_string());
            shape.confidence = shape.confidence.max(span.confidence);
            continue;
        }
        let along = connectors
            .iter()
            .enumerate()
            .map(|(i, c)| (i, segment_distance((cx, cy), c.segment.0, c.segment.1)))
            .filter(|(_, d)| *d < LABEL_RADIUS)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        match along {
            Some(i) => connectors[i].label.push(span.text.trim().to_string()),
            None => debug!("Dropping unplaced OCR span '{}'", span.text),
        }
    }
}

fn failed(reason: &str) -> DiagramIr {
    let mut ir = DiagramIr::new(DiagramType::Flowchart);
    ir.metadata.source_format = Some(SourceFormat::Raster);
    ir.metadata.extra.insert("error".into(), reason.to_string());
    ir.metadata.extra.insert("needs_repair".into(), "true".into());
    ir
}

/// Best-effort structure from a bitmap. Never fails: undecodable input yields
/// an empty IR with `metadata.extra["error"]` set.
pub fn extract_raster(bytes: &[u8], recognizer: &dyn TextRecognizer) -> (DiagramIr, ConfidenceMap) {
    let image = match image::load_from_memory(bytes) {
        Ok(image) => image.to_rgb8(),
        Err(err) => {
            warn!("Cannot decode raster source: {err}");
            let ir = failed("image_load_failed");
            let map = ir.confidence_map();
            return (ir, map);
        }
    };
    let ir = graph_from_image(&image, recognizer);
    let map = ir.confidence_map();
    (ir, map)
}

fn graph_from_image(image: &RgbImage, recognizer: &dyn TextRecognizer) -> DiagramIr {
    let (width, height) = image.dimensions();
    if width < 2 || height < 2 {
        return failed("image_too_small");
    }

    let ink = ink_mask(image);
    // opening drops strokes thinner than the structuring element
    let solid = ink.erode(OPENING_RADIUS).dilate(OPENING_RADIUS);

    let mut shapes = detect_shapes(image, &ink, &solid);
    let bounds: Vec<Bounds> = shapes.iter().map(|s| s.bounds).collect();
    let (is_group, parent) = containment(&bounds);
    let mut connectors = detect_connectors(&ink, &shapes, &is_group);

    let spans = recognizer.recognize(image);
    let span_count = spans.len();
    assign_text(spans, &mut shapes, &is_group, &mut connectors);

    let mut ir = DiagramIr::new(DiagramType::Flowchart);
    let mut ids = Vec::with_capacity(shapes.len());
    let (mut node_seq, mut group_seq) = (0, 0);
    for (i, shape) in shapes.iter().enumerate() {
        let label = shape.label.join(" ");
        if is_group[i] {
            group_seq += 1;
            let id = format!("group_{group_seq}");
            let mut group = Group::new(
                id.clone(),
                if label.is_empty() {
                    format!("Group_{group_seq}")
                } else {
                    label
                },
            );
            group.fill_color = shape.fill.clone();
            group.bounds = Some(shape.bounds);
            ir.groups.push(group);
            ids.push(id);
        } else {
            node_seq += 1;
            let id = format!("node_{node_seq}");
            let (label, confidence) = if label.is_empty() {
                (
                    format!("Node_{node_seq}"),
                    shape.confidence.min(PLACEHOLDER_CONFIDENCE),
                )
            } else {
                (label, shape.confidence)
            };
            let mut node = Node::new(id.clone(), label)
                .with_shape(shape.shape)
                .with_bounds(shape.bounds)
                .with_confidence(confidence);
            node.fill_color = shape.fill.clone();
            node.border_color = shape.border.clone();
            ir.nodes.push(node);
            ids.push(id);
        }
    }
    for (child, parent_of) in parent.iter().enumerate() {
        if let Some(p) = parent_of {
            let (parent_id, child_id) = (ids[*p].clone(), ids[child].clone());
            if let Some(group) = ir.groups.iter_mut().find(|g| g.id == parent_id) {
                group.children.push(child_id);
            }
        }
    }
    ir.sync_group_membership();

    for connector in &connectors {
        let mut edge = Edge::new(
            ir.next_edge_id(),
            ids[connector.from].clone(),
            ids[connector.to].clone(),
        )
        .with_label(connector.label.join(" "));
        edge.confidence = (connector.confidence * 100.0).round() / 100.0;
        ir.edges.push(edge);
    }
    ir.infer_direction();

    let confidences: Vec<f64> = ir
        .nodes
        .iter()
        .map(|n| n.confidence)
        .chain(ir.edges.iter().map(|e| e.confidence))
        .collect();
    let average = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    ir.metadata.source_format = Some(SourceFormat::Raster);
    let extra = &mut ir.metadata.extra;
    extra.insert("needs_repair".into(), "true".into());
    extra.insert("avg_confidence".into(), format!("{average:.2}"));
    extra.insert("image_width".into(), width.to_string());
    extra.insert("image_height".into(), height.to_string());
    extra.insert("shapes_detected".into(), shapes.len().to_string());
    extra.insert("edges_detected".into(), connectors.len().to_string());
    extra.insert("ocr_spans".into(), span_count.to_string());
    debug!(
        "Raster extraction: {} nodes, {} groups, {} edges, avg confidence {average:.2}",
        ir.nodes.len(),
        ir.groups.len(),
        ir.edges.len()
    );
    ir
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageOutputFormat, Rgb};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    const BLUE: Rgb<u8> = Rgb([0x44, 0x72, 0xC4]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn fill(image: &mut RgbImage, x: std::ops::Range<u32>, y: std::ops::Range<u32>, color: Rgb<u8>) {
        for py in y {
            for px in x.clone() {
                image.put_pixel(px, py, color);
            }
        }
    }

    /// Two blue boxes joined by a black connector with a filled arrowhead
    fn two_boxes(head_on_right: bool) -> Vec<u8> {
        let mut image = RgbImage::from_pixel(400, 200, Rgb([255, 255, 255]));
        fill(&mut image, 40..140, 60..140, BLUE);
        fill(&mut image, 260..360, 60..140, BLUE);
        fill(&mut image, 140..260, 99..102, BLACK);
        for dx in 0..8u32 {
            let half = 6 - (dx * 6 / 8);
            let x = if head_on_right { 250 + dx } else { 149 - dx };
            fill(&mut image, x..x + 1, 100 - half..101 + half, BLACK);
        }
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn boxes_and_connector_without_text() {
        let (ir, confidence) = extract_raster(&two_boxes(true), &NoText);
        assert_eq!(ir.nodes.len(), 2);
        assert_eq!(ir.nodes[0].label, "Node_1");
        assert_eq!(ir.nodes[0].shape, Shape::Rectangle);
        assert_eq!(ir.nodes[0].fill_color.as_deref(), Some("#4472C4"));
        assert!(ir.nodes.iter().all(|n| n.confidence <= PLACEHOLDER_CONFIDENCE));

        assert_eq!(ir.edges.len(), 1);
        assert_eq!(ir.edges[0].source, "node_1");
        assert_eq!(ir.edges[0].target, "node_2");
        assert!(ir.edges[0].confidence > 0.9);
        assert_eq!(confidence.len(), 3);
        assert_eq!(ir.metadata.source_format, Some(SourceFormat::Raster));
        assert_eq!(
            ir.metadata.extra.get("needs_repair").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn arrowhead_mass_picks_the_target() {
        let (ir, _) = extract_raster(&two_boxes(false), &NoText);
        assert_eq!(ir.edges.len(), 1);
        assert_eq!(ir.edges[0].source, "node_2");
        assert_eq!(ir.edges[0].target, "node_1");
    }

    #[test]
    fn recognized_text_labels_nodes_then_edges() {
        let spans = FixedSpans(vec![
            TextSpan {
                text: "Orders".into(),
                bounds: Bounds::new(70.0, 90.0, 40.0, 12.0),
                confidence: 0.9,
            },
            TextSpan {
                text: "Billing".into(),
                bounds: Bounds::new(290.0, 90.0, 40.0, 12.0),
                confidence: 0.9,
            },
            TextSpan {
                text: "events".into(),
                bounds: Bounds::new(180.0, 78.0, 40.0, 12.0),
                confidence: 0.8,
            },
            TextSpan {
                text: "smudge".into(),
                bounds: Bounds::new(10.0, 10.0, 10.0, 10.0),
                confidence: 0.1,
            },
        ]);
        let (ir, _) = extract_raster(&two_boxes(true), &spans);
        let labels: Vec<&str> = ir.nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["Orders", "Billing"]);
        assert_eq!(ir.nodes[0].confidence, 0.9);
        assert_eq!(ir.edges[0].label, "events");
    }

    #[test]
    fn undecodable_bytes_give_an_empty_ir() {
        let (ir, confidence) = extract_raster(b"definitely not a bitmap", &NoText);
        assert!(ir.is_empty());
        assert!(confidence.is_empty());
        assert_eq!(
            ir.metadata.extra.get("error").map(String::as_str),
            Some("image_load_failed")
        );
    }

    #[test]
    fn fill_ratio_separates_shape_classes() {
        assert_eq!(classify(0.98, 2.0).map(|c| c.0), Some(Shape::Rectangle));
        assert_eq!(classify(0.79, 1.0).map(|c| c.0), Some(Shape::Circle));
        assert_eq!(classify(0.5, 1.2).map(|c| c.0), Some(Shape::Diamond));
        assert_eq!(classify(0.1, 8.0), None);
    }

    #[test]
    fn opening_removes_thin_strokes() {
        let mut mask = Mask::new(30, 30);
        for y in 5..20 {
            for x in 5..20 {
                mask.set(x, y, true);
            }
        }
        for x in 20..30 {
            mask.set(x, 12, true);
        }
        let opened = mask.erode(2).dilate(2);
        assert!(opened.get(10, 10));
        assert!(!opened.get(25, 12));
        assert_eq!(opened.components().len(), 1);
    }
}
