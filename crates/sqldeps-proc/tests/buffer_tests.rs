//! Buffer-table analysis over procedure DDL

use pretty_assertions::assert_eq;
use sqldeps_core::{DependencyGraph, OperationKind};
use sqldeps_proc::{build_dependencies, extract_procedures, find_buffer_tables, BufferAnalyzer};

const LOADERS: &str = r#"
CREATE OR REPLACE PROCEDURE stage_orders()
LANGUAGE plpgsql
AS $$
BEGIN
    DELETE FROM orders_buffer;
    INSERT INTO orders_buffer (id, amount)
    SELECT o.id, o.amount FROM raw_orders o WHERE o.status = 'new';
END;
$$;

CREATE OR REPLACE PROCEDURE publish_orders()
LANGUAGE plpgsql
AS $$
BEGIN
    INSERT INTO orders_mart SELECT * FROM orders_buffer;
    UPDATE orders_mart SET amount = 0 WHERE amount IS NULL;
END;
$$;
"#;

#[test]
fn buffer_table_links_two_procedures() {
    let procedures = extract_procedures(LOADERS);
    assert_eq!(procedures.len(), 2);

    let (tables, edges) = find_buffer_tables(&procedures, Vec::new());
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["orders_buffer"]);

    let map = build_dependencies(&tables, edges);
    assert!(map.contains("$stage_orders$", "orders_buffer", OperationKind::BufferWrite));
    assert!(map.contains("orders_buffer", "$publish_orders$", OperationKind::BufferRead));
    assert!(map.contains("raw_orders (o)", "orders_buffer", OperationKind::Insert));
    assert!(map.contains("orders_buffer", "orders_mart", OperationKind::Insert));
}

#[test]
fn procedure_chain_is_traversable() {
    let mut analyzer = BufferAnalyzer::default();
    analyzer.add_sql(LOADERS, Some("loaders.sql"));

    let graph = DependencyGraph::from_dependencies(&analyzer.dependencies());
    assert!(graph.has_path("$stage_orders$", "$publish_orders$"));
    assert!(analyzer.diagnostics().is_empty());
}

#[test]
fn writer_and_reader_in_separate_files() {
    let mut analyzer = BufferAnalyzer::default();
    analyzer.add_sql(
        "CREATE PROCEDURE w() LANGUAGE sql AS $$ INSERT INTO hand_off SELECT * FROM src $$;",
        Some("writer.sql"),
    );
    assert!(analyzer.buffer_tables().is_empty());

    analyzer.add_sql(
        "CREATE PROCEDURE r() LANGUAGE sql AS $$ INSERT INTO dst SELECT * FROM hand_off $$;",
        Some("reader.sql"),
    );

    let tables = analyzer.buffer_tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "hand_off");
    assert_eq!(analyzer.procedures_analyzed(), 2);
}
