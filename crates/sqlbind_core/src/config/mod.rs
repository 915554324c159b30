use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use sqlbind_error::{Result, ResultExt, SqlError};

/// Options controlling which language features the analyzer accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerOptions {
    pub enable_group_by_all: bool,
    pub enable_grouping_sets: bool,
    pub enable_corresponding: bool,
    pub enable_recursive_queries: bool,
    pub enable_qualify: bool,
    pub enable_pivot: bool,
    pub enable_unpivot: bool,
    /// Allow `FROM a.b.c` to match table `a.b` followed by field path `c`.
    pub enable_table_path_prefix_match: bool,
    pub max_nesting_depth: usize,
    /// Maximum depth of a single expression tree, counting operators,
    /// parentheses and function calls.
    pub max_expression_depth: usize,
    pub max_grouping_sets: usize,
}

pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;
pub const DEFAULT_MAX_EXPRESSION_DEPTH: usize = sqlbind_parser::parser::DEFAULT_MAX_PARSE_DEPTH;
pub const DEFAULT_MAX_GROUPING_SETS: usize = 4096;

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            enable_group_by_all: true,
            enable_grouping_sets: true,
            enable_corresponding: true,
            enable_recursive_queries: true,
            enable_qualify: true,
            enable_pivot: true,
            enable_unpivot: true,
            enable_table_path_prefix_match: false,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            max_expression_depth: DEFAULT_MAX_EXPRESSION_DEPTH,
            max_grouping_sets: DEFAULT_MAX_GROUPING_SETS,
        }
    }
}

impl AnalyzerOptions {
    /// Load options from a JSON object. Missing keys keep their defaults.
    pub fn from_json(s: &str) -> Result<Self> {
        let opts: AnalyzerOptions =
            serde_json::from_str(s).context("Failed to parse analyzer options")?;
        MaxNestingDepth::validate_value(opts.max_nesting_depth)?;
        MaxExpressionDepth::validate_value(opts.max_expression_depth)?;
        MaxGroupingSets::validate_value(opts.max_grouping_sets)?;
        Ok(opts)
    }

    pub fn set_from_value(&mut self, name: &str, value: SettingValue) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| SqlError::new(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_value(&self, name: &str) -> Result<SettingValue> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| SqlError::new(format!("Missing setting for '{name}'")))?;

        Ok((func.get)(self))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_opts = Self::default();

        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| SqlError::new(format!("Missing setting for '{name}'")))?;

        let value = (func.get)(&def_opts);
        (func.set)(value, self)
    }

    /// Names of all settings along with their descriptions.
    pub fn describe_all() -> Vec<(&'static str, &'static str)> {
        let mut settings: Vec<_> = GET_SET_FUNCTIONS
            .iter()
            .map(|(name, funcs)| (*name, funcs.description))
            .collect();
        settings.sort_unstable();
        settings
    }
}

/// Value of a single setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
}

impl SettingValue {
    pub fn try_as_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            other => Err(SqlError::new(format!("Expected a boolean, got {other}"))),
        }
    }

    pub fn try_as_usize(&self) -> Result<usize> {
        match self {
            Self::Int(v) => usize::try_from(*v)
                .map_err(|_| SqlError::new(format!("Expected a non-negative integer, got {v}"))),
            other => Err(SqlError::new(format!("Expected an integer, got {other}"))),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<usize> for SettingValue {
    fn from(value: usize) -> Self {
        SettingValue::Int(value as i64)
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
        }
    }
}

struct SettingFunctions {
    description: &'static str,
    set: fn(value: SettingValue, opts: &mut AnalyzerOptions) -> Result<()>,
    get: fn(opts: &AnalyzerOptions) -> SettingValue,
}

impl SettingFunctions {
    const fn new<S: AnalyzerSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_value as _,
            get: S::get_as_value as _,
        }
    }
}

fn insert_setting<S: AnalyzerSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<EnableGroupByAll>(&mut map);
    insert_setting::<EnableGroupingSets>(&mut map);
    insert_setting::<EnableCorresponding>(&mut map);
    insert_setting::<EnableRecursiveQueries>(&mut map);
    insert_setting::<EnableQualify>(&mut map);
    insert_setting::<EnablePivot>(&mut map);
    insert_setting::<EnableUnpivot>(&mut map);
    insert_setting::<EnableTablePathPrefixMatch>(&mut map);
    insert_setting::<MaxNestingDepth>(&mut map);
    insert_setting::<MaxExpressionDepth>(&mut map);
    insert_setting::<MaxGroupingSets>(&mut map);

    map
});

pub trait AnalyzerSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_value(value: SettingValue, opts: &mut AnalyzerOptions) -> Result<()>;
    fn get_as_value(opts: &AnalyzerOptions) -> SettingValue;
}

/// Boolean settings only differ in the field they touch.
macro_rules! bool_setting {
    ($name:ident, $field:ident, $desc:literal) => {
        pub struct $name;

        impl AnalyzerSetting for $name {
            const NAME: &'static str = stringify!($field);
            const DESCRIPTION: &'static str = $desc;

            fn set_from_value(value: SettingValue, opts: &mut AnalyzerOptions) -> Result<()> {
                opts.$field = value.try_as_bool()?;
                Ok(())
            }

            fn get_as_value(opts: &AnalyzerOptions) -> SettingValue {
                opts.$field.into()
            }
        }
    };
}

bool_setting!(
    EnableGroupByAll,
    enable_group_by_all,
    "Allow GROUP BY ALL"
);
bool_setting!(
    EnableGroupingSets,
    enable_grouping_sets,
    "Allow ROLLUP, CUBE, and GROUPING SETS"
);
bool_setting!(
    EnableCorresponding,
    enable_corresponding,
    "Allow CORRESPONDING on set operations"
);
bool_setting!(
    EnableRecursiveQueries,
    enable_recursive_queries,
    "Allow WITH RECURSIVE"
);
bool_setting!(EnableQualify, enable_qualify, "Allow the QUALIFY clause");
bool_setting!(EnablePivot, enable_pivot, "Allow PIVOT in FROM");
bool_setting!(EnableUnpivot, enable_unpivot, "Allow UNPIVOT in FROM");
bool_setting!(
    EnableTablePathPrefixMatch,
    enable_table_path_prefix_match,
    "Match the longest table path prefix, treating the rest as a field path"
);

const MIN_NESTING_DEPTH: usize = 1;
const MAX_NESTING_DEPTH: usize = 4096;

pub struct MaxNestingDepth;

impl MaxNestingDepth {
    pub fn validate_value(val: usize) -> Result<()> {
        if val < MIN_NESTING_DEPTH {
            return Err(SqlError::new(format!(
                "Max nesting depth cannot be less than {MIN_NESTING_DEPTH}"
            )));
        }

        if val > MAX_NESTING_DEPTH {
            return Err(SqlError::new(format!(
                "Max nesting depth cannot be greater than {MAX_NESTING_DEPTH}"
            )));
        }

        Ok(())
    }
}

impl AnalyzerSetting for MaxNestingDepth {
    const NAME: &'static str = "max_nesting_depth";
    const DESCRIPTION: &'static str = "Maximum depth of nested queries and subqueries";

    fn set_from_value(value: SettingValue, opts: &mut AnalyzerOptions) -> Result<()> {
        let val = value.try_as_usize()?;
        Self::validate_value(val)?;
        opts.max_nesting_depth = val;
        Ok(())
    }

    fn get_as_value(opts: &AnalyzerOptions) -> SettingValue {
        opts.max_nesting_depth.into()
    }
}

pub struct MaxExpressionDepth;

impl MaxExpressionDepth {
    pub fn validate_value(val: usize) -> Result<()> {
        if !(MIN_NESTING_DEPTH..=MAX_NESTING_DEPTH).contains(&val) {
            return Err(SqlError::new(format!(
                "Max expression depth must be between {MIN_NESTING_DEPTH} and {MAX_NESTING_DEPTH}"
            )));
        }
        Ok(())
    }
}

impl AnalyzerSetting for MaxExpressionDepth {
    const NAME: &'static str = "max_expression_depth";
    const DESCRIPTION: &'static str = "Maximum depth of a single expression";

    fn set_from_value(value: SettingValue, opts: &mut AnalyzerOptions) -> Result<()> {
        let val = value.try_as_usize()?;
        Self::validate_value(val)?;
        opts.max_expression_depth = val;
        Ok(())
    }

    fn get_as_value(opts: &AnalyzerOptions) -> SettingValue {
        opts.max_expression_depth.into()
    }
}

const MAX_GROUPING_SETS_LIMIT: usize = 1 << 16;

pub struct MaxGroupingSets;

impl MaxGroupingSets {
    pub fn validate_value(val: usize) -> Result<()> {
        if val == 0 {
            return Err(SqlError::new("Max grouping sets cannot be zero"));
        }

        if val > MAX_GROUPING_SETS_LIMIT {
            return Err(SqlError::new(format!(
                "Max grouping sets cannot be greater than {MAX_GROUPING_SETS_LIMIT}"
            )));
        }

        Ok(())
    }
}

impl AnalyzerSetting for MaxGroupingSets {
    const NAME: &'static str = "max_grouping_sets";
    const DESCRIPTION: &'static str =
        "Maximum number of grouping sets a ROLLUP, CUBE, or GROUPING SETS clause may expand to";

    fn set_from_value(value: SettingValue, opts: &mut AnalyzerOptions) -> Result<()> {
        let val = value.try_as_usize()?;
        Self::validate_value(val)?;
        opts.max_grouping_sets = val;
        Ok(())
    }

    fn get_as_value(opts: &AnalyzerOptions) -> SettingValue {
        opts.max_grouping_sets.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn set_and_reset() {
        let mut opts = AnalyzerOptions::default();
        opts.set_from_value("enable_qualify", false.into()).unwrap();
        assert!(!opts.enable_qualify);
        assert_eq!(
            SettingValue::Bool(false),
            opts.get_as_value("enable_qualify").unwrap()
        );

        opts.reset("enable_qualify").unwrap();
        assert!(opts.enable_qualify);
    }

    #[test]
    fn unknown_setting() {
        let mut opts = AnalyzerOptions::default();
        let err = opts.set_from_value("enable_magic", true.into()).unwrap_err();
        assert_eq!("Missing setting for 'enable_magic'", err.message());
    }

    #[test]
    fn out_of_range() {
        let mut opts = AnalyzerOptions::default();
        opts.set_from_value("max_nesting_depth", SettingValue::Int(0))
            .unwrap_err();
        opts.set_from_value("max_nesting_depth", SettingValue::Int(-4))
            .unwrap_err();
        opts.set_from_value("max_nesting_depth", true.into())
            .unwrap_err();
        opts.set_from_value("max_nesting_depth", SettingValue::Int(8))
            .unwrap();
        assert_eq!(8, opts.max_nesting_depth);
    }

    #[test]
    fn from_json_partial() {
        let opts = AnalyzerOptions::from_json(r#"{"enable_pivot": false}"#).unwrap();
        assert!(!opts.enable_pivot);
        assert!(opts.enable_unpivot);
        assert_eq!(DEFAULT_MAX_NESTING_DEPTH, opts.max_nesting_depth);

        AnalyzerOptions::from_json(r#"{"max_grouping_sets": 0}"#).unwrap_err();
        AnalyzerOptions::from_json(r#"{"max_expression_depth": 0}"#).unwrap_err();
        AnalyzerOptions::from_json("not json").unwrap_err();
    }

    #[test]
    fn describe_lists_every_setting() {
        let names: Vec<_> = AnalyzerOptions::describe_all()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(11, names.len());
        assert!(names.contains(&"max_expression_depth"));
        assert!(names.contains(&"enable_table_path_prefix_match"));
    }
}
