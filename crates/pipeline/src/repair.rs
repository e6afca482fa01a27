//! Gap-fill contract for raster extractions.
//!
//! An external reader proposes a [`Patch`]; only allow-listed operations with
//! valid preconditions are applied, in a canonical order, to a copy of the
//! partial IR. There is no delete or move operation.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use canon_ir::{
    is_generic_label, normalize_color, Bounds, DiagramIr, Edge, LineStyle, Node, Shape,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Confidence given to elements a repair patch introduced or relabelled
pub const REPAIRED_CONFIDENCE: f64 = 0.6;

/// Where a proposed addition was seen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Evidence {
    pub ocr_text: Option<String>,
    pub region: Option<Bounds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    AddNode {
        id: String,
        label: String,
        #[serde(default)]
        shape: Shape,
        evidence: Evidence,
    },
    AddEdge {
        source: String,
        target: String,
        #[serde(default)]
        label: String,
        #[serde(default)]
        line_style: LineStyle,
        evidence: Evidence,
    },
    Relabel {
        node: String,
        label: String,
    },
    Reshape {
        node: String,
        shape: Shape,
    },
    Recolor {
        node: String,
        #[serde(default)]
        fill_color: Option<String>,
        #[serde(default)]
        border_color: Option<String>,
        #[serde(default)]
        text_color: Option<String>,
    },
    SetEdgeLabel {
        edge: String,
        label: String,
    },
    FlipArrow {
        edge: String,
    },
}

impl PatchOp {
    /// Additions first so later ops can reference new nodes
    fn rank(&self) -> u8 {
        match self {
            Self::AddNode { .. } => 0,
            Self::AddEdge { .. } => 1,
            Self::Relabel { .. } => 2,
            Self::Reshape { .. } => 3,
            Self::Recolor { .. } => 4,
            Self::SetEdgeLabel { .. } => 5,
            Self::FlipArrow { .. } => 6,
        }
    }

    fn target(&self) -> String {
        match self {
            Self::AddNode { id, .. } => id.clone(),
            Self::AddEdge { source, target, .. } => format!("{source}->{target}"),
            Self::Relabel { node, .. } | Self::Reshape { node, .. } | Self::Recolor { node, .. } => {
                node.clone()
            }
            Self::SetEdgeLabel { edge, .. } | Self::FlipArrow { edge } => edge.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default)]
    pub ops: Vec<PatchOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedOp {
    pub op: PatchOp,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub ir: DiagramIr,
    pub applied: Vec<PatchOp>,
    pub rejected: Vec<RejectedOp>,
}

/// What the repairer is asked to fill in
#[derive(Debug, Clone, Serialize)]
pub struct RepairRequest {
    pub source_hash: String,
    pub attempt: usize,
    pub partial: DiagramIr,
    /// Violations left by the previous attempt
    pub feedback: Vec<String>,
}

/// External gap-fill reader
#[async_trait]
pub trait Repairer: Send + Sync {
    async fn propose(&self, request: &RepairRequest) -> Result<Patch>;
}

/// Proposes nothing; raster conversions stay best effort
pub struct NoRepair;

#[async_trait]
impl Repairer for NoRepair {
    async fn propose(&self, _request: &RepairRequest) -> Result<Patch> {
        Ok(Patch::default())
    }
}

/// Reads patches an external agent left as `<source_hash>.patch.json`, or
/// `<source_hash>.<attempt>.patch.json` for a specific retry.
pub struct PatchDirRepairer {
    dir: PathBuf,
}

impl PatchDirRepairer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Repairer for PatchDirRepairer {
    async fn propose(&self, request: &RepairRequest) -> Result<Patch> {
        let candidates = [
            self.dir
                .join(format!("{}.{}.patch.json", request.source_hash, request.attempt)),
            self.dir.join(format!("{}.patch.json", request.source_hash)),
        ];
        for path in candidates {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    debug!("Loaded patch {}", path.display());
                    return serde_json::from_slice(&bytes).map_err(|err| {
                        PipelineError::ExternalService(format!(
                            "unreadable patch {}: {err}",
                            path.display()
                        ))
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
        }
        debug!("No patch for {}", request.source_hash);
        Ok(Patch::default())
    }
}

/// Calls the repairer with a deadline; a timeout is an external service failure
pub async fn request_patch(
    repairer: &dyn Repairer,
    request: &RepairRequest,
    timeout: Duration,
) -> Result<Patch> {
    match tokio::time::timeout(timeout, repairer.propose(request)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::ExternalService(format!(
            "repair timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

fn image_bounds(ir: &DiagramIr) -> Option<Bounds> {
    let dim = |key: &str| ir.metadata.extra.get(key)?.parse::<f64>().ok();
    Some(Bounds::new(0.0, 0.0, dim("image_width")?, dim("image_height")?))
}

fn check_evidence(ir: &DiagramIr, evidence: &Evidence) -> std::result::Result<(), String> {
    if evidence
        .ocr_text
        .as_deref()
        .is_some_and(|text| !text.trim().is_empty())
    {
        return Ok(());
    }
    let Some(region) = evidence.region else {
        return Err("addition without OCR text or an image region".to_string());
    };
    let Some(image) = image_bounds(ir) else {
        return Err("image region given but image size is unknown".to_string());
    };
    if region.width <= 0.0 || region.height <= 0.0 || !image.contains(&region) {
        return Err(format!(
            "region ({}, {}, {}x{}) lies outside the image",
            region.x, region.y, region.width, region.height
        ));
    }
    Ok(())
}

fn check_label(label: &str) -> std::result::Result<(), String> {
    if label.trim().is_empty() {
        return Err("empty label".to_string());
    }
    if is_generic_label(label) {
        return Err(format!("placeholder label {label}"));
    }
    Ok(())
}

fn apply_op(
    ir: &mut DiagramIr,
    op: &PatchOp,
    confidence_threshold: f64,
) -> std::result::Result<(), String> {
    match op {
        PatchOp::AddNode {
            id,
            label,
            shape,
            evidence,
        } => {
            check_evidence(ir, evidence)?;
            check_label(label)?;
            if id.trim().is_empty() || ir.has_node(id) || ir.group(id).is_some() {
                return Err(format!("id {id:?} is empty or already taken"));
            }
            let mut node = Node::new(id.clone(), label.clone())
                .with_shape(*shape)
                .with_confidence(REPAIRED_CONFIDENCE);
            node.bounds = evidence.region;
            ir.nodes.push(node);
        }
        PatchOp::AddEdge {
            source,
            target,
            label,
            line_style,
            evidence,
        } => {
            check_evidence(ir, evidence)?;
            for end in [source, target] {
                if !ir.has_node(end) {
                    return Err(format!("unknown node {end}"));
                }
            }
            if ir
                .edges
                .iter()
                .any(|e| e.source == *source && e.target == *target && e.label == *label)
            {
                return Err(format!("edge {source} -> {target} already exists"));
            }
            let mut edge = Edge::new(ir.next_edge_id(), source.clone(), target.clone())
                .with_label(label.clone())
                .with_style(*line_style);
            edge.confidence = REPAIRED_CONFIDENCE;
            ir.edges.push(edge);
        }
        PatchOp::Relabel { node, label } => {
            check_label(label)?;
            let existing = ir
                .node_mut(node)
                .ok_or_else(|| format!("unknown node {node}"))?;
            if !is_generic_label(&existing.label) && existing.confidence >= confidence_threshold {
                return Err(format!(
                    "node {node} is confident ({:.2}) and not a placeholder",
                    existing.confidence
                ));
            }
            existing.label = label.clone();
            existing.confidence = existing.confidence.max(REPAIRED_CONFIDENCE);
        }
        PatchOp::Reshape { node, shape } => {
            ir.node_mut(node)
                .ok_or_else(|| format!("unknown node {node}"))?
                .shape = *shape;
        }
        PatchOp::Recolor {
            node,
            fill_color,
            border_color,
            text_color,
        } => {
            let normalize = |raw: &Option<String>| -> std::result::Result<Option<String>, String> {
                match raw {
                    None => Ok(None),
                    Some(raw) => normalize_color(raw)
                        .map(Some)
                        .ok_or_else(|| format!("invalid color {raw}")),
                }
            };
            let (fill, border, text) = (
                normalize(fill_color)?,
                normalize(border_color)?,
                normalize(text_color)?,
            );
            let existing = ir
                .node_mut(node)
                .ok_or_else(|| format!("unknown node {node}"))?;
            if fill.is_some() {
                existing.fill_color = fill;
            }
            if border.is_some() {
                existing.border_color = border;
            }
            if text.is_some() {
                existing.text_color = text;
            }
        }
        PatchOp::SetEdgeLabel { edge, label } => {
            check_label(label)?;
            ir.edge_mut(edge)
                .ok_or_else(|| format!("unknown edge {edge}"))?
                .label = label.clone();
        }
        PatchOp::FlipArrow { edge } => {
            let existing = ir
                .edge_mut(edge)
                .ok_or_else(|| format!("unknown edge {edge}"))?;
            std::mem::swap(&mut existing.arrow_start, &mut existing.arrow_end);
        }
    }
    Ok(())
}

/// Applies the allowed subset of `patch` to a copy of `partial`
pub fn apply_patch(partial: &DiagramIr, patch: &Patch, confidence_threshold: f64) -> RepairOutcome {
    let mut ops: Vec<&PatchOp> = patch.ops.iter().collect();
    ops.sort_by_cached_key(|op| (op.rank(), op.target()));

    let mut ir = partial.clone();
    let mut applied = Vec::new();
    let mut rejected = Vec::new();
    for op in ops {
        match apply_op(&mut ir, op, confidence_threshold) {
            Ok(()) => applied.push(op.clone()),
            Err(reason) => {
                warn!("Rejected {} on {}: {reason}", op_name(op), op.target());
                rejected.push(RejectedOp {
                    op: op.clone(),
                    reason,
                });
            }
        }
    }
    if applied.is_empty() {
        debug!("Patch applied nothing");
    } else {
        info!(
            "Patch applied {} op(s), rejected {}",
            applied.len(),
            rejected.len()
        );
        ir.metadata.extra.remove("needs_repair");
    }
    RepairOutcome {
        ir,
        applied,
        rejected,
    }
}

fn op_name(op: &PatchOp) -> &'static str {
    match op {
        PatchOp::AddNode { .. } => "add_node",
        PatchOp::AddEdge { .. } => "add_edge",
        PatchOp::Relabel { .. } => "relabel",
        PatchOp::Reshape { .. } => "reshape",
        PatchOp::Recolor { .. } => "recolor",
        PatchOp::SetEdgeLabel { .. } => "set_edge_label",
        PatchOp::FlipArrow { .. } => "flip_arrow",
    }
}
