use crate::types::{Arrow, DiagramIr};

/// Escapes pipes so a value stays inside one Markdown table cell.
pub fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn arrow_direction(start: Arrow, end: Arrow) -> &'static str {
    match (start.is_present(), end.is_present()) {
        (true, true) => "both",
        (false, true) => "forward",
        (true, false) => "back",
        (false, false) => "none",
    }
}

/// Tabular summary of an IR suitable for embedding in a source document.
pub fn to_markdown_tables(ir: &DiagramIr, source_name: &str) -> String {
    let mut out = Vec::new();
    if source_name.is_empty() {
        out.push("#### Diagram".to_string());
    } else {
        out.push(format!("#### Diagram: {source_name}"));
    }
    out.push(String::new());
    out.push(format!(
        "**Type:** {} | **Direction:** {}",
        ir.diagram_type.as_str(),
        ir.direction.as_str()
    ));
    out.push(String::new());

    if !ir.metadata.legend.colors.is_empty() {
        out.push("**Color Legend:**".to_string());
        for (color, meaning) in &ir.metadata.legend.colors {
            out.push(format!("- {color} = {meaning}"));
        }
        out.push(String::new());
    }

    if !ir.nodes.is_empty() {
        out.push("##### Nodes".to_string());
        out.push(String::new());
        out.push("| ID | Label | Role | Shape | Fill | Stroke | Group |".to_string());
        out.push("|----|-------|------|-------|------|--------|-------|".to_string());
        for n in &ir.nodes {
            out.push(format!(
                "| {} | {} | {} | {} | {} | {} | {} |",
                escape_cell(&n.id),
                escape_cell(&n.label),
                n.role.map(|r| r.as_str()).unwrap_or_default(),
                n.shape.as_str(),
                n.fill_color.as_deref().unwrap_or_default(),
                n.border_color.as_deref().unwrap_or_default(),
                escape_cell(n.parent_group.as_deref().unwrap_or_default()),
            ));
        }
        out.push(String::new());
    }

    if !ir.edges.is_empty() {
        out.push("##### Edges".to_string());
        out.push(String::new());
        out.push("| Source | Target | Label | Protocol | Style | Direction |".to_string());
        out.push("|--------|--------|-------|----------|-------|-----------|".to_string());
        for e in &ir.edges {
            out.push(format!(
                "| {} | {} | {} | {} | {} | {} |",
                escape_cell(&e.source),
                escape_cell(&e.target),
                escape_cell(&e.label),
                e.protocol.as_deref().unwrap_or_default(),
                e.line_style.as_str(),
                arrow_direction(e.arrow_start, e.arrow_end),
            ));
        }
        out.push(String::new());
    }

    if !ir.groups.is_empty() {
        out.push("##### Groups".to_string());
        out.push(String::new());
        out.push("| ID | Label | Zone Type | Children |".to_string());
        out.push("|----|-------|-----------|----------|".to_string());
        for g in &ir.groups {
            out.push(format!(
                "| {} | {} | {} | {} |",
                escape_cell(&g.id),
                escape_cell(&g.label),
                g.zone_type.map(|z| z.as_str()).unwrap_or_default(),
                escape_cell(&g.children.join(", ")),
            ));
        }
        out.push(String::new());
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Edge, Node};

    #[test]
    fn tables_list_nodes_and_edge_direction() {
        let mut ir = DiagramIr::default();
        ir.nodes.push(Node::new("a", "Web | Edge"));
        ir.nodes.push(Node::new("b", "Core"));
        ir.edges.push(Edge::new("e1", "a", "b").with_label("HTTPS"));

        let md = to_markdown_tables(&ir, "context.drawio");
        assert!(md.starts_with("#### Diagram: context.drawio"));
        assert!(md.contains("| a | Web \\| Edge |  | rectangle |"));
        assert!(md.contains("| a | b | HTTPS |  | solid | forward |"));
    }
}
