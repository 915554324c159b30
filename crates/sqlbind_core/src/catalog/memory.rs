use std::sync::Arc;

use hashbrown::HashMap;
use sqlbind_error::{Result, SqlError};

use super::{Catalog, Connection, Model, Table, TableFunction};
use crate::ident::SimilarName;

/// Maps a dotted, lowercased path to some catalog entry.
#[derive(Debug)]
struct CatalogMap<T> {
    entries: HashMap<String, (String, Arc<T>)>,
}

impl<T> Default for CatalogMap<T> {
    fn default() -> Self {
        CatalogMap {
            entries: HashMap::new(),
        }
    }
}

impl<T> CatalogMap<T> {
    fn key(path: &[String]) -> String {
        path.iter()
            .map(|p| p.to_lowercase())
            .collect::<Vec<_>>()
            .join(".")
    }

    fn insert(&mut self, path: &[&str], entry: T) -> Result<()> {
        let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        let key = Self::key(&path);
        if self.entries.contains_key(&key) {
            return Err(SqlError::new(format!(
                "Duplicate catalog entry: {}",
                path.join(".")
            )));
        }
        self.entries.insert(key, (path.join("."), Arc::new(entry)));
        Ok(())
    }

    fn get(&self, path: &[String]) -> Option<Arc<T>> {
        self.entries
            .get(&Self::key(path))
            .map(|(_, entry)| entry.clone())
    }

    fn suggest(&self, path: &[String]) -> Option<String> {
        let name = path.join(".");
        SimilarName::find(self.entries.values().map(|(name, _)| name.as_str()), &name)
    }
}

/// An in-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: CatalogMap<Table>,
    functions: CatalogMap<TableFunction>,
    models: CatalogMap<Model>,
    connections: CatalogMap<Connection>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table under its own name.
    pub fn add_table(&mut self, table: Table) -> Result<()> {
        let name = table.name.clone();
        self.tables.insert(&[name.as_str()], table)
    }

    /// Register a table under a multi-part path.
    pub fn add_table_at(&mut self, path: &[&str], table: Table) -> Result<()> {
        self.tables.insert(path, table)
    }

    pub fn add_table_function(&mut self, function: TableFunction) -> Result<()> {
        let name = function.name.clone();
        self.functions.insert(&[name.as_str()], function)
    }

    pub fn add_model(&mut self, model: Model) -> Result<()> {
        let name = model.name.clone();
        self.models.insert(&[name.as_str()], model)
    }

    pub fn add_connection(&mut self, connection: Connection) -> Result<()> {
        let name = connection.name.clone();
        self.connections.insert(&[name.as_str()], connection)
    }
}

impl Catalog for MemoryCatalog {
    fn find_table(&self, path: &[String]) -> Result<Option<Arc<Table>>> {
        Ok(self.tables.get(path))
    }

    fn find_table_function(&self, path: &[String]) -> Result<Option<Arc<TableFunction>>> {
        Ok(self.functions.get(path))
    }

    fn find_model(&self, path: &[String]) -> Result<Option<Arc<Model>>> {
        Ok(self.models.get(path))
    }

    fn find_connection(&self, path: &[String]) -> Result<Option<Arc<Connection>>> {
        Ok(self.connections.get(path))
    }

    fn suggest_table(&self, path: &[String]) -> Option<String> {
        self.tables.suggest(path)
    }

    fn suggest_table_function(&self, path: &[String]) -> Option<String> {
        self.functions.suggest(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableColumn;
    use crate::types::DataType;
    use pretty_assertions::assert_eq;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut catalog = MemoryCatalog::new();
        catalog
            .add_table(Table::new("Orders", [TableColumn::new("id", DataType::Int64)]))
            .unwrap();

        let table = catalog.find_table(&path(&["orders"])).unwrap().unwrap();
        assert_eq!("Orders", table.name);
        assert!(catalog.find_table(&path(&["missing"])).unwrap().is_none());
    }

    #[test]
    fn multi_part_paths() {
        let mut catalog = MemoryCatalog::new();
        catalog
            .add_table_at(&["db", "t"], Table::new("t", []))
            .unwrap();
        assert!(catalog.find_table(&path(&["db", "t"])).unwrap().is_some());
        assert!(catalog.find_table(&path(&["t"])).unwrap().is_none());
    }

    #[test]
    fn duplicate_table() {
        let mut catalog = MemoryCatalog::new();
        catalog.add_table(Table::new("t", [])).unwrap();
        catalog.add_table(Table::new("T", [])).unwrap_err();
    }

    #[test]
    fn suggestion() {
        let mut catalog = MemoryCatalog::new();
        catalog.add_table(Table::new("customers", [])).unwrap();
        assert_eq!(
            Some("customers".to_string()),
            catalog.suggest_table(&path(&["customer"]))
        );
    }
}
