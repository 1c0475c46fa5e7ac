use serde::{Deserialize, Serialize};

use crate::datum::Datum;
use crate::error::{HeronError, HeronResult};
use crate::types::DataType;

/// Column definition in a table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Value used when a read must synthesize this column.
    #[serde(default)]
    pub default_value: Option<Datum>,
    /// Materialized columns are computed on write and not accepted in
    /// inserted blocks unless the context explicitly allows them.
    #[serde(default)]
    pub materialized: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default_value: None,
            materialized: false,
            comment: None,
        }
    }

    /// The value a read emits for this column when the source lacks it.
    pub fn default_datum(&self) -> Datum {
        self.default_value
            .clone()
            .unwrap_or_else(|| Datum::default_for(self.data_type))
    }
}

/// Ordered set of column definitions for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnsDescription {
    columns: Vec<ColumnDef>,
}

impl ColumnsDescription {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Columns physically stored by the table (everything declared here;
    /// materialized columns included).
    pub fn physical(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter()
    }

    /// Columns a plain INSERT must provide.
    pub fn non_materialized(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| !c.materialized)
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn add(&mut self, column: ColumnDef) -> HeronResult<()> {
        if self.has(&column.name) {
            return Err(HeronError::ColumnAlreadyExists(column.name));
        }
        self.columns.push(column);
        Ok(())
    }

    fn modify(&mut self, column: ColumnDef) -> HeronResult<()> {
        let pos = self
            .position(&column.name)
            .ok_or_else(|| HeronError::ColumnNotFound(column.name.clone()))?;
        self.columns[pos] = column;
        Ok(())
    }

    fn drop_column(&mut self, name: &str) -> HeronResult<()> {
        let pos = self
            .position(name)
            .ok_or_else(|| HeronError::ColumnNotFound(name.to_string()))?;
        self.columns.remove(pos);
        Ok(())
    }

    fn set_comment(&mut self, name: &str, comment: String) -> HeronResult<()> {
        let pos = self
            .position(name)
            .ok_or_else(|| HeronError::ColumnNotFound(name.to_string()))?;
        self.columns[pos].comment = Some(comment);
        Ok(())
    }
}

/// Table-level constraints. Stored with the schema; evaluation happens in
/// the executor, not in the storage layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintsDescription {
    /// CHECK constraint expressions, kept as raw SQL strings.
    pub check_expressions: Vec<String>,
}

/// A single ALTER TABLE command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlterCommand {
    AddColumn { column: ColumnDef },
    ModifyColumn { column: ColumnDef },
    DropColumn { name: String },
    CommentColumn { name: String, comment: String },
    RenameColumn { from: String, to: String },
}

impl AlterCommand {
    /// Human-readable command kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            AlterCommand::AddColumn { .. } => "ADD_COLUMN",
            AlterCommand::ModifyColumn { .. } => "MODIFY_COLUMN",
            AlterCommand::DropColumn { .. } => "DROP_COLUMN",
            AlterCommand::CommentColumn { .. } => "COMMENT_COLUMN",
            AlterCommand::RenameColumn { .. } => "RENAME_COLUMN",
        }
    }

    /// Apply this command to a schema in place.
    pub fn apply(&self, columns: &mut ColumnsDescription) -> HeronResult<()> {
        match self {
            AlterCommand::AddColumn { column } => columns.add(column.clone()),
            AlterCommand::ModifyColumn { column } => columns.modify(column.clone()),
            AlterCommand::DropColumn { name } => columns.drop_column(name),
            AlterCommand::CommentColumn { name, comment } => {
                columns.set_comment(name, comment.clone())
            }
            AlterCommand::RenameColumn { from, to } => {
                let pos = columns
                    .position(from)
                    .ok_or_else(|| HeronError::ColumnNotFound(from.clone()))?;
                if columns.has(to) {
                    return Err(HeronError::ColumnAlreadyExists(to.clone()));
                }
                columns.columns[pos].name = to.clone();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_columns() -> ColumnsDescription {
        ColumnsDescription::new(vec![
            ColumnDef::new("id", DataType::Int64),
            ColumnDef::new("name", DataType::Text),
        ])
    }

    #[test]
    fn test_lookup() {
        let cols = two_columns();
        assert!(cols.has("id"));
        assert!(!cols.has("missing"));
        assert_eq!(cols.get("name").map(|c| c.data_type), Some(DataType::Text));
    }

    #[test]
    fn test_add_column() {
        let mut cols = two_columns();
        let cmd = AlterCommand::AddColumn {
            column: ColumnDef::new("score", DataType::Float64),
        };
        cmd.apply(&mut cols).unwrap();
        assert_eq!(cols.len(), 3);
        assert!(cols.has("score"));
    }

    #[test]
    fn test_add_duplicate_column_fails() {
        let mut cols = two_columns();
        let cmd = AlterCommand::AddColumn {
            column: ColumnDef::new("id", DataType::Int64),
        };
        assert!(matches!(
            cmd.apply(&mut cols),
            Err(HeronError::ColumnAlreadyExists(_))
        ));
    }

    #[test]
    fn test_modify_column_changes_type() {
        let mut cols = two_columns();
        let cmd = AlterCommand::ModifyColumn {
            column: ColumnDef::new("id", DataType::Int32),
        };
        cmd.apply(&mut cols).unwrap();
        assert_eq!(cols.get("id").map(|c| c.data_type), Some(DataType::Int32));
    }

    #[test]
    fn test_drop_column() {
        let mut cols = two_columns();
        AlterCommand::DropColumn { name: "name".into() }
            .apply(&mut cols)
            .unwrap();
        assert_eq!(cols.len(), 1);
        assert!(!cols.has("name"));
    }

    #[test]
    fn test_drop_missing_column_fails() {
        let mut cols = two_columns();
        let err = AlterCommand::DropColumn { name: "nope".into() }
            .apply(&mut cols)
            .unwrap_err();
        assert!(matches!(err, HeronError::ColumnNotFound(_)));
    }

    #[test]
    fn test_comment_column() {
        let mut cols = two_columns();
        AlterCommand::CommentColumn {
            name: "id".into(),
            comment: "surrogate key".into(),
        }
        .apply(&mut cols)
        .unwrap();
        assert_eq!(cols.get("id").unwrap().comment.as_deref(), Some("surrogate key"));
    }

    #[test]
    fn test_default_datum_falls_back_to_type_default() {
        let col = ColumnDef::new("n", DataType::Int64);
        assert_eq!(col.default_datum(), Datum::Int64(0));

        let mut with_default = ColumnDef::new("s", DataType::Text);
        with_default.default_value = Some(Datum::Text("unknown".into()));
        assert_eq!(with_default.default_datum(), Datum::Text("unknown".into()));
    }
}
