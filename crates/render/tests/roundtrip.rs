use canon_extract::extract_deterministic;
use canon_ir::{LineStyle, SourceFormat};
use canon_render::{graph_differences, parse_rendered, render};
use pretty_assertions::assert_eq;

const ZONED: &str = r##"<mxfile host="app.diagrams.net">
  <diagram id="p1" name="Overview">
    <mxGraphModel>
      <root>
        <mxCell id="0"/>
        <mxCell id="1" parent="0"/>
        <mxCell id="zone" value="Internal Zone" style="swimlane;fillColor=#F2F2F2;" vertex="1" parent="1">
          <mxGeometry x="0" y="0" width="600" height="300" as="geometry"/>
        </mxCell>
        <mxCell id="a" value="Orders Service" style="rounded=1;fillColor=#4472C4;" vertex="1" parent="zone">
          <mxGeometry x="40" y="60" width="120" height="60" as="geometry"/>
        </mxCell>
        <mxCell id="b" value="Billing Service" style="rounded=1;fillColor=#4472C4;" vertex="1" parent="zone">
          <mxGeometry x="320" y="60" width="120" height="60" as="geometry"/>
        </mxCell>
        <mxCell id="db" value="Orders DB" style="shape=cylinder;fillColor=#70AD47;" vertex="1" parent="1">
          <mxGeometry x="320" y="400" width="80" height="80" as="geometry"/>
        </mxCell>
        <mxCell id="e1" value="order events" style="endArrow=classic;dashed=1;" edge="1" parent="1" source="a" target="b">
          <mxGeometry relative="1" as="geometry"/>
        </mxCell>
        <mxCell id="e2" value="SQL" style="endArrow=classic;" edge="1" parent="1" source="b" target="db">
          <mxGeometry relative="1" as="geometry"/>
        </mxCell>
      </root>
    </mxGraphModel>
  </diagram>
</mxfile>"##;

#[test]
fn vector_diagram_renders_colors_and_dashed_connector() {
    let ir = extract_deterministic(ZONED.as_bytes(), SourceFormat::Drawio).unwrap();
    let text = render(&ir);
    assert!(text.contains("#4472C4"), "{text}");
    assert!(text.contains("-.->"), "{text}");
    assert!(text.contains("subgraph"), "{text}");
    assert!(text.contains("%% Legend"), "{text}");
    assert_eq!(text.matches("fill:#4472C4").count(), 1, "{text}");
}

#[test]
fn rendered_text_parses_back_to_the_same_graph() {
    let ir = extract_deterministic(ZONED.as_bytes(), SourceFormat::Drawio).unwrap();
    let parsed = parse_rendered(&render(&ir)).unwrap();
    assert_eq!(graph_differences(&ir, &parsed), Vec::<String>::new());
    let dashed = parsed
        .edges
        .iter()
        .find(|e| e.label == "order events")
        .unwrap();
    assert_eq!(dashed.line_style, LineStyle::Dashed);
}

#[test]
fn dsl_sources_round_trip_too() {
    let source = "@startuml\npackage \"Backend\" {\n  [Orders Service]\n  database \"Orders DB\" as db\n}\n[Orders Service] --> db : SQL\n@enduml\n";
    let ir = extract_deterministic(source.as_bytes(), SourceFormat::Dsl).unwrap();
    let parsed = parse_rendered(&render(&ir)).unwrap();
    assert_eq!(graph_differences(&ir, &parsed), Vec::<String>::new());
}
