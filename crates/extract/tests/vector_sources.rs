use canon_extract::{detect_format, extract_deterministic, ParseError};
use canon_ir::{check_schema, Arrow, LineStyle, NodeRole, SourceFormat};
use pretty_assertions::assert_eq;

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

#[test]
fn drawio_pair_with_dashed_edge() {
    let bytes = TWO_SERVICES.as_bytes();
    assert_eq!(detect_format(bytes), Some(SourceFormat::Drawio));

    let ir = extract_deterministic(bytes, SourceFormat::Drawio).unwrap();
    assert!(check_schema(&ir).is_empty());
    assert_eq!(ir.nodes.len(), 2);
    assert!(ir
        .nodes
        .iter()
        .all(|n| n.fill_color.as_deref() == Some("#4472C4") && n.confidence == 1.0));
    assert!(ir.nodes.iter().all(|n| n.role == Some(NodeRole::Service)));

    let edge = &ir.edges[0];
    assert_eq!((edge.source.as_str(), edge.target.as_str()), ("a", "b"));
    assert_eq!(edge.line_style, LineStyle::Dashed);
    assert_eq!(edge.arrow_end, Arrow::Arrow);
    assert_eq!(edge.arrow_start, Arrow::None);
    assert_eq!(edge.label, "order events");

    assert_eq!(
        ir.metadata.legend.colors.get("#4472C4").map(String::as_str),
        Some("service")
    );
    assert!(ir.metadata.legend.line_styles.contains_key("dashed"));
}

#[test]
fn extraction_is_deterministic() {
    let first = extract_deterministic(TWO_SERVICES.as_bytes(), SourceFormat::Drawio).unwrap();
    let second = extract_deterministic(TWO_SERVICES.as_bytes(), SourceFormat::Drawio).unwrap();
    assert_eq!(
        first.to_canonical_json().unwrap(),
        second.to_canonical_json().unwrap()
    );
}

#[test]
fn malformed_xml_is_a_parse_error() {
    let err = extract_deterministic(b"<mxfile><diagram>", SourceFormat::Drawio).unwrap_err();
    assert!(matches!(err, ParseError::Malformed(_) | ParseError::Xml { .. }));
}

#[test]
fn dsl_sources_share_the_same_ir_shape() {
    let source = "@startuml\n[Orders Service] #4472C4\n[Billing Service] #4472C4\n[Orders Service] ..> [Billing Service] : order events\n@enduml\n";
    let ir = extract_deterministic(source.as_bytes(), SourceFormat::Dsl).unwrap();
    assert_eq!(ir.nodes.len(), 2);
    assert_eq!(ir.edges[0].line_style, LineStyle::Dashed);
    assert_eq!(ir.edges[0].label, "order events");
    assert!(check_schema(&ir).is_empty());
}
