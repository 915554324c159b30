use pretty_assertions::assert_eq;
use sqlbind_error::{ErrorKind, Location};
use sqlbind_parser::ast::{
    FromNodeBody,
    GroupByExpr,
    GroupByNode,
    QueryNodeBody,
    SelectAs,
    SetOperation,
};
use sqlbind_parser::parse_query;

fn select_body(sql: &str) -> Box<sqlbind_parser::ast::SelectNode> {
    match parse_query(sql).unwrap().body {
        QueryNodeBody::Select(select) => select,
        other => panic!("not a select: {other:?}"),
    }
}

#[test]
fn full_select_clauses() {
    let select = select_body(
        "SELECT DISTINCT a, sum(b) AS s FROM t WHERE c > 1 GROUP BY a HAVING s > 2 QUALIFY row_number() OVER (PARTITION BY a) = 1",
    );
    assert!(select.distinct);
    assert_eq!(2, select.projections.len());
    assert!(select.from.is_some());
    assert!(select.where_expr.is_some());
    assert!(select.having.is_some());
    assert!(select.qualify.is_some());
}

#[test]
fn with_recursive_union() {
    let query = parse_query(
        "WITH RECURSIVE t AS (SELECT 1 AS n UNION ALL SELECT n + 1 FROM t WHERE n < 10) SELECT * FROM t",
    )
    .unwrap();
    let ctes = query.ctes.unwrap();
    assert!(ctes.recursive);
    assert_eq!("t", ctes.ctes[0].alias.as_str());
    match &ctes.ctes[0].body.body {
        QueryNodeBody::Set(set) => assert_eq!(SetOperation::Union, set.operation),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn grouping_sets_and_rollup() {
    let select = select_body("SELECT a, b FROM t GROUP BY ROLLUP(a, b)");
    match select.group_by {
        Some(GroupByNode::Exprs { exprs }) => {
            assert!(matches!(exprs[0], GroupByExpr::Rollup(ref elems, _) if elems.len() == 2))
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn select_as_value_with_unnest() {
    let select = select_body("SELECT AS VALUE x FROM UNNEST([1, 2, 3]) AS x WITH OFFSET");
    assert_eq!(Some(SelectAs::Value), select.select_as);
    match &select.from.as_ref().unwrap().body {
        FromNodeBody::Unnest(unnest) => {
            let offset = unnest.with_offset.as_ref().unwrap();
            assert!(offset.alias.is_none());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn correlated_subqueries_in_expressions() {
    parse_query("SELECT (SELECT max(x) FROM u WHERE u.k = t.k), EXISTS(SELECT 1), ARRAY(SELECT 1) FROM t")
        .unwrap();
    parse_query("SELECT a FROM t WHERE a IN (SELECT b FROM u)").unwrap();
    parse_query("SELECT ((SELECT 1) + 1)").unwrap();
    parse_query("SELECT ((SELECT 1) UNION ALL (SELECT 2))").unwrap();
}

#[test]
fn error_locations() {
    let err = parse_query("SELECT a\nFROM t\nWHERE").unwrap_err();
    assert_eq!(ErrorKind::InvalidQuery, err.kind());
    assert_eq!(3, err.location().unwrap().line);

    let err = parse_query("SELECT 1 UNION SELECT 2").unwrap_err();
    assert!(err.message().contains("ALL or DISTINCT"), "{err}");
}

#[test]
fn deeply_nested_subqueries_exhaust_depth() {
    let mut sql = "SELECT 1".to_string();
    for _ in 0..300 {
        sql = format!("SELECT * FROM ({sql})");
    }
    let err = parse_query(&sql).unwrap_err();
    assert_eq!(ErrorKind::ResourceExhausted, err.kind());
}

#[test]
fn comments_and_quoted_identifiers() {
    let select = select_body("SELECT `select` -- trailing\n, \"from\" /* block */ FROM `my table`");
    assert_eq!(2, select.projections.len());
    match &select.from.as_ref().unwrap().body {
        FromNodeBody::BaseTable(table) => {
            assert_eq!(vec!["my table".to_string()], table.reference.parts());
            assert_eq!(Location::new(2, 27, 54), table.reference.location());
        }
        other => panic!("unexpected: {other:?}"),
    }
}
