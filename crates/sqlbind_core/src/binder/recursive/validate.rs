use sqlbind_error::{Result, SqlError};

use crate::logical::scan::{JoinType, Scan};

/// Where the walk currently is, relative to places a recursive reference
/// may not appear.
#[derive(Debug, Clone, Copy, Default)]
struct Restriction {
    reason: Option<&'static str>,
}

impl Restriction {
    /// Restrict everything below. The outermost restriction is reported.
    fn within(self, reason: &'static str) -> Self {
        Restriction {
            reason: self.reason.or(Some(reason)),
        }
    }
}

#[derive(Debug)]
struct RecursiveTermValidator<'a> {
    unique_alias: &'a str,
    references: usize,
}

/// Check that the recursive term of a WITH RECURSIVE entry references the
/// entry exactly where it's allowed to.
///
/// A term without any reference is accepted.
pub fn validate_recursive_term(scan: &Scan, unique_alias: &str) -> Result<()> {
    let mut validator = RecursiveTermValidator {
        unique_alias,
        references: 0,
    };
    validator.visit(scan, Restriction::default())
}

impl RecursiveTermValidator<'_> {
    fn visit(&mut self, scan: &Scan, restriction: Restriction) -> Result<()> {
        self.visit_subqueries(scan, restriction)?;

        match scan {
            Scan::RecursiveRef(reference) => {
                if reference.unique_alias != self.unique_alias {
                    return Err(SqlError::new(format!(
                        "Recursive reference to {} is not allowed within the definition of {}",
                        reference.unique_alias, self.unique_alias
                    )));
                }
                if let Some(reason) = restriction.reason {
                    return Err(SqlError::new(format!(
                        "A recursive reference may not appear {reason}"
                    )));
                }
                self.references += 1;
                if self.references > 1 {
                    return Err(SqlError::new(format!(
                        "Multiple recursive references to {} are not allowed",
                        self.unique_alias
                    )));
                }
                Ok(())
            }
            Scan::Aggregate(agg) => {
                self.visit(&agg.input, restriction.within("inside an aggregation"))
            }
            Scan::Analytic(analytic) => self.visit(
                &analytic.input,
                restriction.within("inside an analytic function"),
            ),
            Scan::Sample(sample) => {
                self.visit(&sample.input, restriction.within("inside TABLESAMPLE"))
            }
            Scan::OrderBy(order_by) => {
                self.visit(&order_by.input, restriction.within("inside ORDER BY"))
            }
            Scan::LimitOffset(limit) => {
                self.visit(&limit.input, restriction.within("inside LIMIT or OFFSET"))
            }
            Scan::SetOperation(setop) => {
                for (idx, input) in setop.inputs.iter().enumerate() {
                    let restriction = if setop.op_type.is_distinct() {
                        restriction.within("inside a set operation with DISTINCT")
                    } else if setop.op_type.is_except() && idx > 0 {
                        restriction.within("on the right side of EXCEPT")
                    } else {
                        restriction
                    };
                    self.visit(&input.scan, restriction)?;
                }
                Ok(())
            }
            Scan::Join(join) => {
                let (left, right) = match join.join_type {
                    JoinType::Left => (
                        restriction,
                        restriction.within("on the right side of a LEFT JOIN"),
                    ),
                    JoinType::Right => (
                        restriction.within("on the left side of a RIGHT JOIN"),
                        restriction,
                    ),
                    JoinType::Full => {
                        let full = restriction.within("in a FULL JOIN");
                        (full, full)
                    }
                    JoinType::Inner | JoinType::Cross => (restriction, restriction),
                };
                self.visit(&join.left, left)?;
                self.visit(&join.right, right)
            }
            Scan::With(with) => {
                for entry in &with.entries {
                    self.visit(&entry.scan, restriction.within("inside a nested WITH entry"))?;
                }
                self.visit(&with.query, restriction)
            }
            // The recursive term of a nested recursive query was checked when
            // that query was bound.
            Scan::Recursive(recursive) => {
                self.visit(&recursive.non_recursive_term.scan, restriction)
            }
            other => {
                for child in other.children() {
                    self.visit(child, restriction)?;
                }
                Ok(())
            }
        }
    }

    fn visit_subqueries(&mut self, scan: &Scan, restriction: Restriction) -> Result<()> {
        let mut subqueries = Vec::new();
        scan.for_each_expr(|expr| {
            expr.for_each_subquery(&mut |subquery| {
                subqueries.push(subquery.scan.as_ref());
                Ok(())
            })
        })?;
        let restriction = restriction.within("inside an expression subquery");
        for subquery in subqueries {
            self.visit(subquery, restriction)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::TestEnv;
    use pretty_assertions::assert_eq;

    fn recursive_error(term: &str) -> String {
        let env = TestEnv::new();
        let sql = format!("WITH RECURSIVE t AS (SELECT 1 AS n UNION ALL {term}) SELECT * FROM t");
        env.analyze(&sql).unwrap_err().message().to_string()
    }

    #[test]
    fn plain_reference_allowed() {
        let env = TestEnv::new();
        env.analyze(
            "WITH RECURSIVE t AS (SELECT 1 AS n UNION ALL SELECT n + 1 FROM t WHERE n < 10) \
             SELECT * FROM t",
        )
        .unwrap();
    }

    #[test]
    fn inner_join_allowed() {
        let env = TestEnv::new();
        env.analyze(
            "WITH RECURSIVE t AS (SELECT 1 AS n UNION ALL \
             SELECT t.n + 1 FROM t INNER JOIN KeyValue ON t.n = KeyValue.Key) SELECT * FROM t",
        )
        .unwrap();
    }

    #[test]
    fn reference_inside_aggregation() {
        assert_eq!(
            "A recursive reference may not appear inside an aggregation",
            recursive_error("SELECT COUNT(*) FROM t")
        );
    }

    #[test]
    fn reference_inside_subquery() {
        assert_eq!(
            "A recursive reference may not appear inside an expression subquery",
            recursive_error("SELECT (SELECT MAX(n) FROM t)")
        );
    }

    #[test]
    fn reference_on_outer_join_side() {
        assert_eq!(
            "A recursive reference may not appear on the right side of a LEFT JOIN",
            recursive_error("SELECT t.n FROM KeyValue LEFT JOIN t ON t.n = KeyValue.Key")
        );
        assert_eq!(
            "A recursive reference may not appear on the left side of a RIGHT JOIN",
            recursive_error("SELECT t.n FROM t RIGHT JOIN KeyValue ON t.n = KeyValue.Key")
        );
        assert_eq!(
            "A recursive reference may not appear in a FULL JOIN",
            recursive_error("SELECT t.n FROM t FULL JOIN KeyValue ON t.n = KeyValue.Key")
        );
    }

    #[test]
    fn reference_inside_limit() {
        assert_eq!(
            "A recursive reference may not appear inside LIMIT or OFFSET",
            recursive_error("(SELECT n FROM t LIMIT 1)")
        );
    }

    #[test]
    fn multiple_references() {
        let message = recursive_error("SELECT a.n FROM t AS a CROSS JOIN t AS b");
        assert_eq!("Multiple recursive references to t are not allowed", message);
    }

    #[test]
    fn outermost_restriction_wins() {
        assert_eq!(
            "A recursive reference may not appear inside an aggregation",
            recursive_error("SELECT COUNT(*) FROM (SELECT n FROM t ORDER BY n)")
        );
    }
}
