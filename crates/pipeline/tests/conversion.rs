use async_trait::async_trait;
use canon_extract::NoText;
use canon_ir::DiagramIr;
use canon_pipeline::{
    eval_json, CacheConfig, Converter, Evidence, Method, NoRepair, Patch, PatchDirRepairer,
    PatchOp, PipelineConfig, RepairRequest, Repairer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TWO_SERVICES: &str = r##"<mxfile host="app.diagrams.net">
  <diagram id="p1" name="Overview">
    <mxGraphModel>
      <root>
        <mxCell id="0"/>
        <mxCell id="1" parent="0"/>
        <mxCell id="a" value="Orders Service" style="rounded=1;fillColor=#4472C4;" vertex="1" parent="1">
          <mxGeometry x="40" y="40" width="120" height="60" as="geometry"/>
        </mxCell>
        <mxCell id="b" value="Billing Service" style="rounded=1;fillColor=#4472C4;" vertex="1" parent="1">
          <mxGeometry x="320" y="40" width="120" height="60" as="geometry"/>
        </mxCell>
        <mxCell id="e" value="order events" style="endArrow=classic;dashed=1;" edge="1" parent="1" source="a" target="b">
          <mxGeometry relative="1" as="geometry"/>
        </mxCell>
      </root>
    </mxGraphModel>
  </diagram>
</mxfile>"##;

fn converter(cache_dir: &std::path::Path) -> Converter {
    converter_with(cache_dir, Arc::new(NoRepair))
}

fn converter_with(cache_dir: &std::path::Path, repairer: Arc<dyn Repairer>) -> Converter {
    let cache = CacheConfig {
        dir: cache_dir.to_path_buf(),
        ..Default::default()
    };
    Converter::new(PipelineConfig::default(), cache, repairer, Arc::new(NoText))
}

/// Two blue boxes with nothing drawn between them
fn unconnected_boxes_png() -> Vec<u8> {
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    let mut img = RgbImage::from_pixel(400, 200, Rgb([255, 255, 255]));
    let blue = Rgb([0x44, 0x72, 0xC4]);
    for (xs, ys) in [(40..140u32, 60..140u32), (260..360, 60..140)] {
        for y in ys {
            for x in xs.clone() {
                img.put_pixel(x, y, blue);
            }
        }
    }
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Names both boxes and supplies the connector the image lacks
struct ConnectingRepairer {
    calls: AtomicUsize,
}

impl ConnectingRepairer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Repairer for ConnectingRepairer {
    async fn propose(&self, _request: &RepairRequest) -> canon_pipeline::Result<Patch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Patch {
            ops: vec![
                PatchOp::Relabel {
                    node: "node_1".into(),
                    label: "Orders".into(),
                },
                PatchOp::Relabel {
                    node: "node_2".into(),
                    label: "Billing".into(),
                },
                PatchOp::AddEdge {
                    source: "node_1".into(),
                    target: "node_2".into(),
                    label: "invoice".into(),
                    line_style: Default::default(),
                    evidence: Evidence {
                        ocr_text: Some("invoice".into()),
                        region: None,
                    },
                },
            ],
        })
    }
}

#[tokio::test]
async fn vector_conversion_keeps_fill_and_dashed_edge() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = converter(dir.path())
        .convert(TWO_SERVICES.as_bytes(), None)
        .await
        .unwrap();

    assert_eq!(out.record.method, Method::Xml);
    assert!(out.record.valid, "{:?}", out.record.violations);
    assert!(out.rendered.contains("classDef c1 fill:#4472C4"), "{}", out.rendered);
    assert!(out.rendered.contains("-.->"), "{}", out.rendered);

    let ir_json = std::fs::read_to_string(&out.record.ir_ref).unwrap();
    let ir = DiagramIr::from_json(&ir_json).unwrap();
    assert_eq!(ir.nodes.len(), 2);
    assert_eq!(ir.edges.len(), 1);
    assert_eq!(
        ir.metadata.extra.get("extraction_method").map(String::as_str),
        Some("xml")
    );
    assert_eq!(
        std::fs::read_to_string(&out.record.rendered_ref).unwrap(),
        out.rendered
    );
}

#[tokio::test]
async fn conversion_is_idempotent_across_fresh_caches() {
    let first = tempfile::TempDir::new().unwrap();
    let second = tempfile::TempDir::new().unwrap();
    let a = converter(first.path())
        .convert(TWO_SERVICES.as_bytes(), None)
        .await
        .unwrap();
    let b = converter(second.path())
        .convert(TWO_SERVICES.as_bytes(), None)
        .await
        .unwrap();
    assert_eq!(a.rendered, b.rendered);
    assert_eq!(a.record.source_hash, b.record.source_hash);
    assert_eq!(
        std::fs::read_to_string(&a.record.ir_ref).unwrap(),
        std::fs::read_to_string(&b.record.ir_ref).unwrap()
    );
}

#[tokio::test]
async fn patch_directory_repairer_plugs_into_the_converter() {
    let cache = tempfile::TempDir::new().unwrap();
    let patches = tempfile::TempDir::new().unwrap();
    let conv = Converter::new(
        PipelineConfig::default(),
        CacheConfig {
            dir: cache.path().to_path_buf(),
            ..Default::default()
        },
        Arc::new(PatchDirRepairer::new(patches.path())),
        Arc::new(NoText),
    );
    // deterministic sources never consult the repairer
    let out = conv.convert(TWO_SERVICES.as_bytes(), None).await.unwrap();
    assert_eq!(out.record.attempts, 0);
}

#[test]
fn eval_gate_rejects_placeholder_labels_from_json() {
    let raw = r#"{
        "diagram_type": "flowchart",
        "nodes": [{"id": "n1", "label": "Node_3"}, {"id": "n2", "label": "Billing"}],
        "edges": [{"id": "e1", "source": "n1", "target": "n2"}]
    }"#;
    let report = eval_json(raw, None, 0.5);
    assert!(!report.ok);
    assert_eq!(report.summary.generic_labels_remaining, 1);
}

#[tokio::test]
async fn raster_gap_fill_adds_the_missing_connector() {
    let dir = tempfile::TempDir::new().unwrap();
    let repairer = Arc::new(ConnectingRepairer::new());
    let conv = converter_with(dir.path(), repairer.clone());

    let out = conv.convert(&unconnected_boxes_png(), None).await.unwrap();
    assert_eq!(out.record.method, Method::CvRepair);
    assert!(out.record.valid, "{:?}", out.record.violations);
    assert!(out.rejected_ops.is_empty(), "{:?}", out.rejected_ops);

    let ir = DiagramIr::from_json(&std::fs::read_to_string(&out.record.ir_ref).unwrap()).unwrap();
    assert_eq!(ir.edges.len(), 1);
    assert_eq!(ir.edges[0].source, "node_1");
    assert_eq!(ir.edges[0].target, "node_2");
    assert!(out.rendered.contains("invoice"), "{}", out.rendered);
}

#[tokio::test]
async fn repaired_raster_is_served_from_cache_without_asking_again() {
    let dir = tempfile::TempDir::new().unwrap();
    let repairer = Arc::new(ConnectingRepairer::new());
    let conv = converter_with(dir.path(), repairer.clone());
    let png = unconnected_boxes_png();

    let first = conv.convert(&png, None).await.unwrap();
    assert!(first.record.valid);
    assert!(!first.cached);
    let calls = repairer.calls.load(Ordering::SeqCst);
    assert_eq!(calls, 1);

    let second = conv.convert(&png, None).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.record, first.record);
    assert_eq!(second.rendered, first.rendered);
    assert_eq!(repairer.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_conversions_of_one_source_share_the_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let conv = Arc::new(converter(dir.path()));

    for _ in 0..5 {
        let mut handles = Vec::new();
        for _ in 0..16 {
            let conv = conv.clone();
            handles.push(tokio::spawn(async move {
                conv.convert(TWO_SERVICES.as_bytes(), None).await
            }));
        }
        for handle in handles {
            let out = handle.await.unwrap().unwrap();
            assert!(out.record.valid);
        }
    }
    let ir_files = std::fs::read_dir(dir.path().join("ir")).unwrap().count();
    assert_eq!(ir_files, 1);
}
