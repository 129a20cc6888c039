//! Schema Catalog
//!
//! Immutable description of the warehouse tables available for grounding
//! SQL generation. Loaded once from a tabular (CSV) description and shared
//! as `Arc<SchemaCatalog>` for the process lifetime; nested/struct columns
//! arrive flattened as dotted paths and keep a link to their parent so the
//! rendered description can re-group them.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A single (possibly nested) column of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Full dotted path of the column, e.g. `attributes.color`
    pub name: String,

    /// Warehouse data type, e.g. `STRING`, `NUMERIC`, `RECORD`
    pub data_type: String,

    /// Dotted path of the enclosing struct column, if any
    pub parent: Option<String>,
}

impl ColumnInfo {
    fn new(name: String, data_type: String) -> Self {
        let parent = name.rsplit_once('.').map(|(p, _)| p.to_string());
        Self {
            name,
            data_type,
            parent,
        }
    }

    /// Nesting depth: 0 for top-level columns.
    pub fn depth(&self) -> usize {
        self.name.matches('.').count()
    }
}

/// Ordered column list for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Fully-qualified table name as it appeared in the source description
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// Catalog of all known tables, keyed case-insensitively.
///
/// Built once at startup, never mutated afterwards.
pub struct SchemaCatalog {
    tables: HashMap<String, TableSchema>,
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    table: String,
    column: String,
    data_type: String,
}

impl SchemaCatalog {
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Load the catalog from a CSV file with `table,column,data_type` rows.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    /// Load the catalog from any CSV reader with `table,column,data_type` rows.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut tables: HashMap<String, TableSchema> = HashMap::new();

        for record in csv_reader.deserialize::<CatalogRow>() {
            let row =
                record.map_err(|e| AssistantError::Schema(format!("Invalid catalog row: {}", e)))?;
            let key = row.table.to_lowercase();
            let entry = tables.entry(key).or_insert_with(|| TableSchema {
                name: row.table.clone(),
                columns: Vec::new(),
            });
            entry
                .columns
                .push(ColumnInfo::new(row.column, row.data_type));
        }

        if tables.is_empty() {
            return Err(AssistantError::Schema(
                "Catalog description contained no columns".to_string(),
            ));
        }

        Ok(Self { tables })
    }

    /// Look up a table by name (case-insensitive). Accepts fully-qualified
    /// names; a bare name also matches a qualified entry whose last segment
    /// is equal to it, when that match is unambiguous.
    pub fn lookup(&self, table: &str) -> Option<&TableSchema> {
        let key = table.to_lowercase();
        if let Some(schema) = self.tables.get(&key) {
            return Some(schema);
        }

        let mut suffix_match: Option<&TableSchema> = None;
        for (name, schema) in &self.tables {
            let last = name.rsplit('.').next().unwrap_or(name);
            if last == key {
                if suffix_match.is_some() {
                    return None; // ambiguous bare name
                }
                suffix_match = Some(schema);
            }
        }
        suffix_match
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// All table names in the catalog, unordered.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.values().map(|t| t.name.as_str()).collect()
    }

    /// Render a compact textual description of the given tables for prompt
    /// injection. Tables missing from the catalog are skipped; nested
    /// columns are indented under their parent.
    pub fn render_for_tables<'a, I>(&self, tables: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut sections = Vec::new();
        for table in tables {
            if let Some(schema) = self.lookup(table) {
                let mut lines = vec![format!("Table {}:", schema.name)];
                for column in &schema.columns {
                    let indent = "  ".repeat(column.depth() + 1);
                    lines.push(format!("{}- {} ({})", indent, column.name, column.data_type));
                }
                sections.push(lines.join("\n"));
            }
        }
        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG_CSV: &str = "\
table,column,data_type
shop.products,name,STRING
shop.products,price,NUMERIC
shop.products,attributes,RECORD
shop.products,attributes.color,STRING
shop.orders,order_id,STRING
";

    #[test]
    fn test_load_and_lookup() {
        let catalog = SchemaCatalog::from_reader(CATALOG_CSV.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 2);

        let products = catalog.lookup("shop.products").unwrap();
        assert_eq!(products.columns.len(), 4);
        assert_eq!(
            products.columns[3].parent.as_deref(),
            Some("attributes")
        );

        // Case-insensitive and bare-name lookup
        assert!(catalog.lookup("SHOP.PRODUCTS").is_some());
        assert!(catalog.lookup("orders").is_some());
        assert!(catalog.lookup("missing").is_none());
    }

    #[test]
    fn test_render_groups_nested_columns() {
        let catalog = SchemaCatalog::from_reader(CATALOG_CSV.as_bytes()).unwrap();
        let rendered = catalog.render_for_tables(["shop.products"]);
        assert!(rendered.contains("Table shop.products:"));
        assert!(rendered.contains("    - attributes.color (STRING)"));
        assert!(!rendered.contains("order_id"));
    }

    #[test]
    fn test_empty_catalog_is_an_error() {
        let err = SchemaCatalog::from_reader("table,column,data_type\n".as_bytes());
        assert!(err.is_err());
    }
}
