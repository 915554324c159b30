/// Try to get a keyword from a string, ignoring string casing.
pub fn keyword_from_str(s: &str) -> Option<Keyword> {
    let s = unicase::Ascii::new(s);
    let idx = match KEYWORD_STRINGS.binary_search(&s) {
        Ok(idx) => idx,
        Err(_) => return None,
    };
    Some(ALL_KEYWORDS[idx])
}

/// Generate an enum of keywords.
///
/// Keywords must be listed in sorted order.
macro_rules! define_keywords {
    ($($ident:ident),*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $($ident),*
        }

        pub const ALL_KEYWORDS: &[Keyword] = &[
            $(Keyword::$ident),*
        ];

        pub const KEYWORD_STRINGS: &[unicase::Ascii<&'static str>] = &[
            $(unicase::Ascii::new(stringify!($ident)),)*
        ];
    };
}

#[rustfmt::skip]
define_keywords!(
    ALL,
    AND,
    ARRAY,
    AS,
    ASC,
    BERNOULLI,
    BETWEEN,
    BY,
    CASE,
    CAST,
    COLLATE,
    CONNECTION,
    CORRESPONDING,
    CROSS,
    CUBE,
    DATE,
    DESC,
    DISTINCT,
    ELSE,
    END,
    EXCEPT,
    EXCLUDE,
    EXISTS,
    FALSE,
    FIRST,
    FOR,
    FROM,
    FULL,
    GROUP,
    GROUPING,
    HAVING,
    IN,
    INCLUDE,
    INNER,
    INTERSECT,
    IS,
    JOIN,
    JSON,
    LAST,
    LEFT,
    LIKE,
    LIMIT,
    MODEL,
    NOT,
    NULL,
    NULLS,
    OFFSET,
    ON,
    OR,
    ORDER,
    OUTER,
    OVER,
    PARTITION,
    PERCENT,
    PIVOT,
    QUALIFY,
    RECURSIVE,
    REPEATABLE,
    REPLACE,
    RESERVOIR,
    RIGHT,
    ROLLUP,
    ROWS,
    SELECT,
    SETS,
    STRICT,
    STRUCT,
    SYSTEM,
    TABLE,
    TABLESAMPLE,
    THEN,
    TIMESTAMP,
    TRUE,
    UNION,
    UNNEST,
    UNPIVOT,
    USING,
    VALUE,
    WHEN,
    WHERE,
    WITH
);

/// Keywords that can never be used as an unquoted identifier.
pub const RESERVED_KEYWORDS: &[Keyword] = &[
    Keyword::ALL,
    Keyword::AND,
    Keyword::ARRAY,
    Keyword::AS,
    Keyword::ASC,
    Keyword::BETWEEN,
    Keyword::BY,
    Keyword::CASE,
    Keyword::CAST,
    Keyword::COLLATE,
    Keyword::CROSS,
    Keyword::CUBE,
    Keyword::DESC,
    Keyword::DISTINCT,
    Keyword::ELSE,
    Keyword::END,
    Keyword::EXCEPT,
    Keyword::EXISTS,
    Keyword::FALSE,
    Keyword::FOR,
    Keyword::FROM,
    Keyword::FULL,
    Keyword::GROUP,
    Keyword::HAVING,
    Keyword::IN,
    Keyword::INNER,
    Keyword::INTERSECT,
    Keyword::IS,
    Keyword::JOIN,
    Keyword::LEFT,
    Keyword::LIKE,
    Keyword::LIMIT,
    Keyword::NOT,
    Keyword::NULL,
    Keyword::NULLS,
    Keyword::ON,
    Keyword::OR,
    Keyword::ORDER,
    Keyword::OUTER,
    Keyword::OVER,
    Keyword::PARTITION,
    Keyword::QUALIFY,
    Keyword::RECURSIVE,
    Keyword::RIGHT,
    Keyword::ROLLUP,
    Keyword::SELECT,
    Keyword::STRUCT,
    Keyword::TABLESAMPLE,
    Keyword::THEN,
    Keyword::TRUE,
    Keyword::UNION,
    Keyword::UNNEST,
    Keyword::USING,
    Keyword::WHEN,
    Keyword::WHERE,
    Keyword::WITH,
];

/// Additional keywords that may not be used as an implicit table alias.
pub const RESERVED_FOR_TABLE_ALIAS: &[Keyword] = &[Keyword::PIVOT, Keyword::UNPIVOT];

/// Additional keywords that may not be used as an implicit column alias.
pub const RESERVED_FOR_COLUMN_ALIAS: &[Keyword] = &[];

pub fn is_reserved(keyword: Keyword) -> bool {
    RESERVED_KEYWORDS.contains(&keyword)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive() {
        // (input, expected)
        let tests = [
            ("select", Some(Keyword::SELECT)),
            ("SeLeCt", Some(Keyword::SELECT)),
            ("SELECT", Some(Keyword::SELECT)),
            ("NOSELECT", None),
            ("corresponding", Some(Keyword::CORRESPONDING)),
            ("with", Some(Keyword::WITH)),
        ];

        for (input, expected) in tests {
            let got = keyword_from_str(input);
            assert_eq!(expected, got);
        }
    }

    #[test]
    fn keywords_sorted() {
        for pair in KEYWORD_STRINGS.windows(2) {
            assert!(pair[0] < pair[1], "{} >= {}", pair[0], pair[1]);
        }
    }
}
