//! DDL synthesis: entity metadata to SQL text.
//!
//! Everything here is pure. The same entity and dialect always produce
//! byte-identical SQL, so the output can be compared against golden text.
//!
//! Interfaces expand into fixed column bundles ahead of the declared fields.
//! When a declared field shares a name with a bundle column, the declared
//! field's definition replaces the bundle's at the bundle position.

use crate::graph;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use tessera_db::{EntityDefinition, FieldDataType, FieldMetadata, FieldSource, InterfaceType};

/// SQL flavor to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Postgres,
    Sqlite,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// UUID generator expression, parenthesized for use after DEFAULT.
    pub fn uuid_generator(&self) -> &'static str {
        match self {
            Self::Postgres => "(gen_random_uuid())",
            Self::Sqlite => "(lower(hex(randomblob(16))))",
        }
    }

    fn json_type(&self) -> &'static str {
        match self {
            Self::Postgres => "JSONB",
            Self::Sqlite => "JSON",
        }
    }

    /// Whether `ALTER COLUMN ... TYPE` / `SET NOT NULL` exist.
    pub fn can_alter_columns(&self) -> bool {
        matches!(self, Self::Postgres)
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One column the table is expected to have.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub field: FieldMetadata,
    /// Interface that contributed the column, if any.
    pub interface: Option<InterfaceType>,
    pub primary_key: bool,
}

impl ColumnSpec {
    pub fn name(&self) -> &str {
        &self.field.property_name
    }
}

/// Quote an identifier for SQL (`"` doubled inside).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal (`'` doubled inside).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn comment_text(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Columns contributed by an interface, as interface-sourced fields.
pub fn interface_fields(interface: InterfaceType) -> Vec<FieldMetadata> {
    let column = |name: &str, data_type: FieldDataType| {
        FieldMetadata::new(name, data_type).with_source(FieldSource::Interface)
    };
    match interface {
        InterfaceType::Base => vec![column("Id", FieldDataType::Guid).required().with_default("NEWID")],
        InterfaceType::Archive => vec![
            column("Code", FieldDataType::String).with_length(100).required(),
            column("Name", FieldDataType::String).with_length(200).required(),
        ],
        InterfaceType::Audit => vec![
            column("CreatedAt", FieldDataType::DateTime).required().with_default("NOW"),
            column("CreatedBy", FieldDataType::String).with_length(100),
            column("UpdatedAt", FieldDataType::DateTime).required().with_default("NOW"),
            column("UpdatedBy", FieldDataType::String).with_length(100),
            column("Version", FieldDataType::Integer).required().with_default("1"),
        ],
        InterfaceType::Version => vec![column("Version", FieldDataType::Integer).required().with_default("1")],
        InterfaceType::TimeVersion => vec![
            column("ValidFrom", FieldDataType::DateTime).required().with_default("NOW"),
            column("ValidTo", FieldDataType::DateTime),
            column("VersionNo", FieldDataType::Integer).required().with_default("1"),
        ],
        InterfaceType::Organization => vec![column("OrganizationId", FieldDataType::Guid).required()],
    }
}

/// Pure SQL renderer for one dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct DdlSynthesizer {
    dialect: SqlDialect,
}

impl DdlSynthesizer {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// SQL type for a field.
    pub fn column_type(&self, field: &FieldMetadata) -> String {
        self.type_for(field, field.length)
    }

    fn type_for(&self, field: &FieldMetadata, length: Option<u32>) -> String {
        match field.data_type {
            FieldDataType::String => match length {
                Some(len) => format!("VARCHAR({})", len),
                None => "TEXT".to_string(),
            },
            FieldDataType::Integer => "INTEGER".to_string(),
            FieldDataType::Long => "BIGINT".to_string(),
            FieldDataType::Decimal => format!(
                "NUMERIC({},{})",
                field.precision.unwrap_or(18),
                field.scale.unwrap_or(2)
            ),
            FieldDataType::Boolean => "BOOLEAN".to_string(),
            FieldDataType::DateTime => "TIMESTAMP WITHOUT TIME ZONE".to_string(),
            FieldDataType::Date => "DATE".to_string(),
            FieldDataType::Guid => "UUID".to_string(),
            FieldDataType::Text => "TEXT".to_string(),
            FieldDataType::Json => self.dialect.json_type().to_string(),
            FieldDataType::Enum => "VARCHAR(100)".to_string(),
        }
    }

    /// Rendered DEFAULT expression, with generator sentinels translated.
    pub fn format_default(&self, field: &FieldMetadata) -> Option<String> {
        let raw = field.default_value.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }

        // Values that fail `default_value_error` are never rendered.
        let rendered = match field.data_type {
            FieldDataType::Boolean => (if parse_bool(raw)? { "TRUE" } else { "FALSE" }).to_string(),
            FieldDataType::DateTime if raw.eq_ignore_ascii_case("NOW") => "CURRENT_TIMESTAMP".to_string(),
            FieldDataType::Date if raw.eq_ignore_ascii_case("TODAY") => "CURRENT_DATE".to_string(),
            FieldDataType::Guid if raw.eq_ignore_ascii_case("NEWID") => self.dialect.uuid_generator().to_string(),
            FieldDataType::Integer | FieldDataType::Long | FieldDataType::Decimal => {
                if !is_numeric_literal(raw, field.data_type) {
                    return None;
                }
                raw.to_string()
            }
            _ => quote_literal(raw),
        };
        Some(rendered)
    }

    /// Value used to backfill existing rows when a column is added.
    ///
    /// Explicit defaults win; otherwise the type default. `None` means the
    /// column is left NULL.
    pub fn fill_value(&self, field: &FieldMetadata) -> Option<String> {
        if let Some(explicit) = self.format_default(field) {
            return Some(explicit);
        }
        match field.data_type {
            FieldDataType::String | FieldDataType::Text => Some("''".to_string()),
            FieldDataType::Integer | FieldDataType::Long => Some("0".to_string()),
            FieldDataType::Decimal => Some("0.0".to_string()),
            FieldDataType::Boolean => Some("FALSE".to_string()),
            FieldDataType::DateTime => Some("CURRENT_TIMESTAMP".to_string()),
            FieldDataType::Date => Some("CURRENT_DATE".to_string()),
            FieldDataType::Guid => Some(self.dialect.uuid_generator().to_string()),
            FieldDataType::Json => Some("'{}'".to_string()),
            FieldDataType::Enum => None,
        }
    }

    /// Full column definition: `"Name" TYPE NULL|NOT NULL [DEFAULT x]`.
    pub fn column_definition(&self, field: &FieldMetadata) -> String {
        let nullability = if field.is_required { "NOT NULL" } else { "NULL" };
        let mut def = format!(
            "{} {} {}",
            quote_ident(&field.property_name),
            self.column_type(field),
            nullability
        );
        if let Some(default) = self.format_default(field) {
            let _ = write!(def, " DEFAULT {}", default);
        }
        def
    }

    /// Columns the live table should have, interface bundles first.
    pub fn expected_columns(&self, entity: &EntityDefinition) -> Vec<ColumnSpec> {
        let mut interfaces = entity.interfaces.clone();
        interfaces.sort();
        interfaces.dedup();

        let mut columns: Vec<ColumnSpec> = Vec::new();
        for interface in interfaces {
            for field in interface_fields(interface) {
                if columns.iter().any(|c| c.field.name_matches(&field.property_name)) {
                    continue;
                }
                columns.push(ColumnSpec {
                    primary_key: interface == InterfaceType::Base,
                    interface: Some(interface),
                    field,
                });
            }
        }

        for field in entity.ordered_fields() {
            match columns.iter_mut().find(|c| c.field.name_matches(&field.property_name)) {
                Some(existing) => existing.field = field.clone(),
                None => columns.push(ColumnSpec {
                    field: field.clone(),
                    interface: None,
                    primary_key: false,
                }),
            }
        }
        columns
    }

    /// CREATE TABLE with indexes, foreign keys and (Postgres) comments.
    ///
    /// Lookup keys are not resolved against other definitions; see
    /// [`create_table_sql_in`](Self::create_table_sql_in).
    pub fn create_table_sql(&self, entity: &EntityDefinition) -> String {
        self.create_table_sql_in(entity, &[])
    }

    /// CREATE TABLE whose foreign keys point at the tables of the `catalog`
    /// entries the lookups resolve to. Unresolved keys fall back to the
    /// last segment of the key, pluralized.
    pub fn create_table_sql_in(&self, entity: &EntityDefinition, catalog: &[EntityDefinition]) -> String {
        let table = entity.table_name();
        let columns = self.expected_columns(entity);
        let mut sql = String::new();

        let _ = writeln!(
            sql,
            "-- Create table: {} ({})",
            comment_text(entity.display_label()),
            entity.entity_name
        );
        let _ = writeln!(sql, "CREATE TABLE IF NOT EXISTS {} (", quote_ident(&table));

        let mut lines: Vec<String> = columns
            .iter()
            .map(|c| format!("    {}", self.column_definition(&c.field)))
            .collect();

        let primary: Vec<String> = columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| quote_ident(c.name()))
            .collect();
        if !primary.is_empty() {
            lines.push(format!("    PRIMARY KEY ({})", primary.join(", ")));
        }
        lines.extend(
            self.foreign_keys(entity, &columns, catalog)
                .into_iter()
                .map(|fk| format!("    {}", fk)),
        );

        let _ = writeln!(sql, "{}", lines.join(",\n"));
        sql.push_str(");\n");

        for index in self.indexes(entity, &columns) {
            let _ = writeln!(sql, "{}", index);
        }

        if self.dialect == SqlDialect::Postgres {
            let _ = writeln!(
                sql,
                "COMMENT ON TABLE {} IS {};",
                quote_ident(&table),
                quote_literal(entity.display_label())
            );
            for column in &columns {
                let label = column
                    .field
                    .display_name
                    .as_deref()
                    .unwrap_or(&column.field.property_name);
                let _ = writeln!(
                    sql,
                    "COMMENT ON COLUMN {}.{} IS {};",
                    quote_ident(&table),
                    quote_ident(column.name()),
                    quote_literal(label)
                );
            }
        }

        sql
    }

    fn foreign_keys(
        &self,
        entity: &EntityDefinition,
        columns: &[ColumnSpec],
        catalog: &[EntityDefinition],
    ) -> Vec<String> {
        let mut used: HashSet<String> = HashSet::new();
        let mut constraints = Vec::new();

        for column in columns {
            let Some(key) = column.field.lookup_target() else {
                continue;
            };
            let (target, target_table) = if entity.answers_to(key) {
                (entity.entity_name.clone(), entity.table_name())
            } else {
                lookup_table(catalog, key)
            };
            let base = format!("FK_{}_{}", entity.entity_name, target);
            let mut name = base.clone();
            let mut suffix = 2;
            while !used.insert(name.to_lowercase()) {
                name = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            constraints.push(format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                quote_ident(&name),
                quote_ident(column.name()),
                quote_ident(&target_table),
                quote_ident("Id"),
                column.field.foreign_key_action.sql()
            ));
        }
        constraints
    }

    fn indexes(&self, entity: &EntityDefinition, columns: &[ColumnSpec]) -> Vec<String> {
        let table = entity.table_name();
        let mut indexes = Vec::new();

        if entity.has_interface(InterfaceType::Archive) {
            indexes.push(format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({});",
                quote_ident(&format!("UX_{}_Code", table)),
                quote_ident(&table),
                quote_ident("Code")
            ));
        }
        if entity.has_interface(InterfaceType::Organization) {
            indexes.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
                quote_ident(&format!("IX_{}_OrganizationId", table)),
                quote_ident(&table),
                quote_ident("OrganizationId")
            ));
        }
        for column in columns.iter().filter(|c| c.field.lookup_target().is_some()) {
            indexes.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
                quote_ident(&format!("IX_{}_{}", table, column.name())),
                quote_ident(&table),
                quote_ident(column.name())
            ));
        }
        indexes
    }

    /// Declarative ALTER ... ADD COLUMN for each new field.
    ///
    /// Columns are added with their final nullability and default. Use
    /// [`DdlSynthesizer::add_column_statements`] when existing rows must be
    /// backfilled first.
    pub fn add_columns_sql(&self, entity: &EntityDefinition, new_fields: &[FieldMetadata]) -> String {
        let table = entity.table_name();
        let mut fields: Vec<&FieldMetadata> = new_fields.iter().collect();
        fields.sort_by_key(|f| f.sort_order);

        let mut sql = String::new();
        let _ = writeln!(sql, "-- Alter table: {} (add columns)", table);
        let if_not_exists = match self.dialect {
            SqlDialect::Postgres => "IF NOT EXISTS ",
            SqlDialect::Sqlite => "",
        };
        for field in fields {
            let _ = writeln!(
                sql,
                "ALTER TABLE {} ADD COLUMN {}{};",
                quote_ident(&table),
                if_not_exists,
                self.column_definition(field)
            );
        }
        sql
    }

    /// ALTER COLUMN TYPE for length changes. Empty for SQLite, which does
    /// not enforce declared lengths.
    pub fn alter_column_length_sql(&self, entity: &EntityDefinition, changes: &[(FieldMetadata, u32)]) -> String {
        if !self.dialect.can_alter_columns() || changes.is_empty() {
            return String::new();
        }
        let table = entity.table_name();
        let mut sql = String::new();
        let _ = writeln!(sql, "-- Alter table: {} (column lengths)", table);
        for (field, new_length) in changes {
            let _ = writeln!(
                sql,
                "ALTER TABLE {} ALTER COLUMN {} TYPE {};",
                quote_ident(&table),
                quote_ident(&field.property_name),
                self.type_for(field, Some(*new_length))
            );
        }
        sql
    }

    /// Statements that add one column without failing on existing rows:
    /// add nullable, backfill, then enforce NOT NULL where the dialect can.
    pub fn add_column_statements(&self, entity: &EntityDefinition, field: &FieldMetadata) -> Vec<String> {
        let table = quote_ident(&entity.table_name());
        let column = quote_ident(&field.property_name);
        let mut statements = Vec::new();

        let mut add = format!("ALTER TABLE {} ADD COLUMN {} {} NULL", table, column, self.column_type(field));
        if let Some(default) = self.format_default(field) {
            if self.dialect == SqlDialect::Postgres || is_constant_expression(&default) {
                let _ = write!(add, " DEFAULT {}", default);
            }
        }
        add.push(';');
        statements.push(add);

        let fill = self.fill_value(field);
        if let Some(fill) = &fill {
            statements.push(format!(
                "UPDATE {} SET {} = {} WHERE {} IS NULL;",
                table, column, fill, column
            ));
        }

        if field.is_required && fill.is_some() && self.dialect.can_alter_columns() {
            statements.push(format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;", table, column));
        }
        statements
    }

    /// In-place column alteration, used for previews.
    pub fn alter_column_sql(&self, entity: &EntityDefinition, field: &FieldMetadata) -> String {
        let table = quote_ident(&entity.table_name());
        let column = quote_ident(&field.property_name);
        match self.dialect {
            SqlDialect::Postgres => format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {}, ALTER COLUMN {} {};",
                table,
                column,
                self.column_type(field),
                column,
                if field.is_required { "SET NOT NULL" } else { "DROP NOT NULL" }
            ),
            SqlDialect::Sqlite => format!(
                "-- SQLite cannot alter {}.{} in place; rebuild the table as {}",
                table,
                column,
                self.column_definition(field)
            ),
        }
    }

    pub fn drop_column_sql(&self, entity: &EntityDefinition, column: &str) -> String {
        let if_exists = match self.dialect {
            SqlDialect::Postgres => "IF EXISTS ",
            SqlDialect::Sqlite => "",
        };
        format!(
            "ALTER TABLE {} DROP COLUMN {}{};",
            quote_ident(&entity.table_name()),
            if_exists,
            quote_ident(column)
        )
    }

    pub fn drop_table_sql(&self, entity: &EntityDefinition) -> String {
        let cascade = match self.dialect {
            SqlDialect::Postgres => " CASCADE",
            SqlDialect::Sqlite => "",
        };
        format!(
            "-- Drop table: {} ({})\nDROP TABLE IF EXISTS {}{};\n",
            comment_text(entity.display_label()),
            entity.entity_name,
            quote_ident(&entity.table_name()),
            cascade
        )
    }
}

/// SQLite only accepts constant defaults on ADD COLUMN.
/// Why `field`'s default value cannot be used for its type, if it cannot.
///
/// Numeric defaults are emitted into DDL unquoted, so anything but a plain
/// number is refused. Booleans accept `true`/`false`/`1`/`0`.
pub fn default_value_error(field: &FieldMetadata) -> Option<String> {
    let raw = field.default_value.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    let valid = match field.data_type {
        FieldDataType::Boolean => parse_bool(raw).is_some(),
        FieldDataType::Integer | FieldDataType::Long | FieldDataType::Decimal => {
            is_numeric_literal(raw, field.data_type)
        }
        _ => true,
    };
    (!valid).then(|| {
        format!(
            "Default value '{}' of field '{}' is not a valid {}",
            raw, field.property_name, field.data_type
        )
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") || raw == "1" {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") || raw == "0" {
        Some(false)
    } else {
        None
    }
}

fn is_numeric_literal(raw: &str, data_type: FieldDataType) -> bool {
    match data_type {
        FieldDataType::Integer => raw.parse::<i32>().is_ok(),
        FieldDataType::Long => raw.parse::<i64>().is_ok(),
        _ => {
            raw.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
                && raw.parse::<f64>().map(f64::is_finite).unwrap_or(false)
        }
    }
}

/// `(entity name, table name)` a lookup key points at.
fn lookup_table(catalog: &[EntityDefinition], key: &str) -> (String, String) {
    match graph::resolve(catalog, key) {
        Some(target) => (target.entity_name.clone(), target.table_name()),
        None => {
            let name = key.rsplit('.').next().unwrap_or(key).trim();
            (name.to_string(), format!("{}s", name))
        }
    }
}

fn is_constant_expression(rendered: &str) -> bool {
    !rendered.starts_with('(') && !rendered.starts_with("CURRENT_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_db::ForeignKeyAction;

    fn order() -> EntityDefinition {
        EntityDefinition::new("Crm", "Order")
            .with_field(FieldMetadata::new("Name", FieldDataType::String).with_length(200).required())
    }

    #[test]
    fn test_type_mapping() {
        let ddl = DdlSynthesizer::new(SqlDialect::Postgres);
        let cases = [
            (FieldMetadata::new("a", FieldDataType::String).with_length(50), "VARCHAR(50)"),
            (FieldMetadata::new("a", FieldDataType::String), "TEXT"),
            (FieldMetadata::new("a", FieldDataType::Integer), "INTEGER"),
            (FieldMetadata::new("a", FieldDataType::Long), "BIGINT"),
            (FieldMetadata::new("a", FieldDataType::Decimal).with_precision(12, 4), "NUMERIC(12,4)"),
            (FieldMetadata::new("a", FieldDataType::Decimal), "NUMERIC(18,2)"),
            (FieldMetadata::new("a", FieldDataType::Boolean), "BOOLEAN"),
            (FieldMetadata::new("a", FieldDataType::DateTime), "TIMESTAMP WITHOUT TIME ZONE"),
            (FieldMetadata::new("a", FieldDataType::Date), "DATE"),
            (FieldMetadata::new("a", FieldDataType::Guid), "UUID"),
            (FieldMetadata::new("a", FieldDataType::Text), "TEXT"),
            (FieldMetadata::new("a", FieldDataType::Json), "JSONB"),
        ];
        for (field, expected) in cases {
            assert_eq!(ddl.column_type(&field), expected, "{:?}", field.data_type);
        }
        let json = FieldMetadata::new("a", FieldDataType::Json);
        assert_eq!(DdlSynthesizer::new(SqlDialect::Sqlite).column_type(&json), "JSON");
    }

    #[test]
    fn test_default_sentinels() {
        let pg = DdlSynthesizer::new(SqlDialect::Postgres);
        let lite = DdlSynthesizer::new(SqlDialect::Sqlite);

        let now = FieldMetadata::new("At", FieldDataType::DateTime).with_default("now");
        let today = FieldMetadata::new("On", FieldDataType::Date).with_default("TODAY");
        let newid = FieldMetadata::new("Key", FieldDataType::Guid).with_default("NEWID");

        assert_eq!(pg.format_default(&now).as_deref(), Some("CURRENT_TIMESTAMP"));
        assert_eq!(pg.format_default(&today).as_deref(), Some("CURRENT_DATE"));
        assert_eq!(pg.format_default(&newid).as_deref(), Some("(gen_random_uuid())"));
        assert_eq!(lite.format_default(&newid).as_deref(), Some("(lower(hex(randomblob(16))))"));
    }

    #[test]
    fn test_default_literals() {
        let ddl = DdlSynthesizer::default();
        let text = FieldMetadata::new("Note", FieldDataType::String).with_default("it's");
        let flag = FieldMetadata::new("Active", FieldDataType::Boolean).with_default("True");
        let qty = FieldMetadata::new("Qty", FieldDataType::Integer).with_default("5");
        let stamp = FieldMetadata::new("At", FieldDataType::DateTime).with_default("2024-01-01 00:00:00");

        assert_eq!(ddl.format_default(&text).as_deref(), Some("'it''s'"));
        assert_eq!(ddl.format_default(&flag).as_deref(), Some("TRUE"));
        assert_eq!(ddl.format_default(&qty).as_deref(), Some("5"));
        assert_eq!(ddl.format_default(&stamp).as_deref(), Some("'2024-01-01 00:00:00'"));
        assert_eq!(ddl.format_default(&FieldMetadata::new("x", FieldDataType::Integer)), None);
    }

    #[test]
    fn test_malformed_defaults_are_refused() {
        let ddl = DdlSynthesizer::new(SqlDialect::Sqlite);
        let hostile = FieldMetadata::new("Qty", FieldDataType::Integer).with_default("0); DROP TABLE \"X\"; --");
        let overflow = FieldMetadata::new("Qty", FieldDataType::Integer).with_default("3000000000");
        let big = FieldMetadata::new("Qty", FieldDataType::Long).with_default("3000000000");
        let price = FieldMetadata::new("Price", FieldDataType::Decimal).with_default("-12.50");
        let nan = FieldMetadata::new("Price", FieldDataType::Decimal).with_default("NaN");
        let yes = FieldMetadata::new("Active", FieldDataType::Boolean).with_default("yes");
        let off = FieldMetadata::new("Active", FieldDataType::Boolean).with_default("0");

        assert_eq!(
            default_value_error(&hostile).as_deref(),
            Some("Default value '0); DROP TABLE \"X\"; --' of field 'Qty' is not a valid Integer")
        );
        assert_eq!(ddl.format_default(&hostile), None);
        assert!(!ddl.column_definition(&hostile).contains("DROP"));

        assert!(default_value_error(&overflow).is_some());
        assert_eq!(default_value_error(&big), None);
        assert_eq!(ddl.format_default(&price).as_deref(), Some("-12.50"));
        assert!(default_value_error(&nan).is_some());

        assert_eq!(
            default_value_error(&yes).as_deref(),
            Some("Default value 'yes' of field 'Active' is not a valid Boolean")
        );
        assert_eq!(ddl.format_default(&yes), None);
        assert_eq!(ddl.format_default(&off).as_deref(), Some("FALSE"));
        assert_eq!(default_value_error(&FieldMetadata::new("Note", FieldDataType::String).with_default("yes")), None);
    }

    #[test]
    fn test_create_table_golden_postgres() {
        let sql = DdlSynthesizer::new(SqlDialect::Postgres).create_table_sql(&order());
        let expected = "\
-- Create table: Order (Order)
CREATE TABLE IF NOT EXISTS \"Orders\" (
    \"Id\" UUID NOT NULL DEFAULT (gen_random_uuid()),
    \"Name\" VARCHAR(200) NOT NULL,
    PRIMARY KEY (\"Id\")
);
COMMENT ON TABLE \"Orders\" IS 'Order';
COMMENT ON COLUMN \"Orders\".\"Id\" IS 'Id';
COMMENT ON COLUMN \"Orders\".\"Name\" IS 'Name';
";
        assert_eq!(sql, expected);
    }

    #[test]
    fn test_create_table_golden_sqlite_with_interfaces_and_lookup() {
        let entity = EntityDefinition::new("Crm", "Invoice")
            .with_interface(InterfaceType::Archive)
            .with_interface(InterfaceType::Organization)
            .with_field(
                FieldMetadata::new("CustomerId", FieldDataType::Guid)
                    .with_lookup("Customer", ForeignKeyAction::SetNull),
            );
        let sql = DdlSynthesizer::new(SqlDialect::Sqlite).create_table_sql(&entity);
        let expected = "\
-- Create table: Invoice (Invoice)
CREATE TABLE IF NOT EXISTS \"Invoices\" (
    \"Id\" UUID NOT NULL DEFAULT (lower(hex(randomblob(16)))),
    \"Code\" VARCHAR(100) NOT NULL,
    \"Name\" VARCHAR(200) NOT NULL,
    \"OrganizationId\" UUID NOT NULL,
    \"CustomerId\" UUID NULL,
    PRIMARY KEY (\"Id\"),
    CONSTRAINT \"FK_Invoice_Customer\" FOREIGN KEY (\"CustomerId\") REFERENCES \"Customers\" (\"Id\") ON DELETE SET NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS \"UX_Invoices_Code\" ON \"Invoices\" (\"Code\");
CREATE INDEX IF NOT EXISTS \"IX_Invoices_OrganizationId\" ON \"Invoices\" (\"OrganizationId\");
CREATE INDEX IF NOT EXISTS \"IX_Invoices_CustomerId\" ON \"Invoices\" (\"CustomerId\");
";
        assert_eq!(sql, expected);
    }

    #[test]
    fn test_create_table_is_deterministic() {
        let ddl = DdlSynthesizer::new(SqlDialect::Postgres);
        let entity = order()
            .with_interface(InterfaceType::Audit)
            .with_interface(InterfaceType::TimeVersion);
        assert_eq!(ddl.create_table_sql(&entity), ddl.create_table_sql(&entity.clone()));
    }

    #[test]
    fn test_interface_bundles() {
        let ddl = DdlSynthesizer::default();
        let names = |interfaces: &[InterfaceType]| {
            let mut entity = EntityDefinition::new("Crm", "Thing");
            entity.interfaces = interfaces.to_vec();
            ddl.expected_columns(&entity)
                .iter()
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>()
        };

        assert_eq!(names(&[InterfaceType::Base]), vec!["Id"]);
        assert_eq!(names(&[InterfaceType::Archive]), vec!["Code", "Name"]);
        assert_eq!(
            names(&[InterfaceType::Audit]),
            vec!["CreatedAt", "CreatedBy", "UpdatedAt", "UpdatedBy", "Version"]
        );
        assert_eq!(names(&[InterfaceType::Version]), vec!["Version"]);
        assert_eq!(names(&[InterfaceType::TimeVersion]), vec!["ValidFrom", "ValidTo", "VersionNo"]);
        assert_eq!(names(&[InterfaceType::Organization]), vec!["OrganizationId"]);
        // Audit and Version share a column.
        assert_eq!(
            names(&[InterfaceType::Version, InterfaceType::Audit]).iter().filter(|n| *n == "Version").count(),
            1
        );
    }

    #[test]
    fn test_declared_field_overrides_bundle_column_in_place() {
        let entity = EntityDefinition::new("Crm", "Product")
            .with_interface(InterfaceType::Archive)
            .with_field(
                FieldMetadata::new("code", FieldDataType::String)
                    .with_length(40)
                    .required()
                    .with_source(FieldSource::Interface),
            )
            .with_field(FieldMetadata::new("Price", FieldDataType::Decimal));
        let columns = DdlSynthesizer::default().expected_columns(&entity);
        let names: Vec<&str> = columns.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Id", "code", "Name", "Price"]);
        assert_eq!(columns[1].field.length, Some(40));
    }

    #[test]
    fn test_foreign_key_names_are_suffixed() {
        let entity = EntityDefinition::new("Crm", "Order")
            .with_field(FieldMetadata::new("ShipTo", FieldDataType::Guid).with_lookup("Address", ForeignKeyAction::Cascade))
            .with_field(FieldMetadata::new("BillTo", FieldDataType::Guid).with_lookup("Address", ForeignKeyAction::Restrict));
        let sql = DdlSynthesizer::new(SqlDialect::Sqlite).create_table_sql(&entity);
        assert!(sql.contains("CONSTRAINT \"FK_Order_Address\" FOREIGN KEY (\"ShipTo\")"));
        assert!(sql.contains("CONSTRAINT \"FK_Order_Address_2\" FOREIGN KEY (\"BillTo\")"));
        assert!(sql.contains("ON DELETE CASCADE"));
    }

    #[test]
    fn test_foreign_keys_follow_resolved_table() {
        let entity = EntityDefinition::new("Crm", "Order").with_field(
            FieldMetadata::new("CustomerId", FieldDataType::Guid).with_lookup("Crm.Customer", ForeignKeyAction::Restrict),
        );
        let ddl = DdlSynthesizer::new(SqlDialect::Sqlite);
        let expected = "CONSTRAINT \"FK_Order_Customer\" FOREIGN KEY (\"CustomerId\") REFERENCES \"Customers\" (\"Id\")";

        assert!(ddl.create_table_sql(&entity).contains(expected));
        let catalog = vec![EntityDefinition::new("Crm", "Customer")];
        assert!(ddl.create_table_sql_in(&entity, &catalog).contains(expected));
        assert!(!ddl.create_table_sql_in(&entity, &catalog).contains("Crm.Customers"));
    }

    #[test]
    fn test_add_columns_sql_per_dialect() {
        let field = FieldMetadata::new("NewField", FieldDataType::Integer);
        let pg = DdlSynthesizer::new(SqlDialect::Postgres).add_columns_sql(&order(), &[field.clone()]);
        let lite = DdlSynthesizer::new(SqlDialect::Sqlite).add_columns_sql(&order(), &[field]);
        assert_eq!(
            pg,
            "-- Alter table: Orders (add columns)\nALTER TABLE \"Orders\" ADD COLUMN IF NOT EXISTS \"NewField\" INTEGER NULL;\n"
        );
        assert_eq!(
            lite,
            "-- Alter table: Orders (add columns)\nALTER TABLE \"Orders\" ADD COLUMN \"NewField\" INTEGER NULL;\n"
        );
    }

    #[test]
    fn test_add_column_statements_backfill_and_enforce() {
        let field = FieldMetadata::new("Score", FieldDataType::Integer).required();
        let pg = DdlSynthesizer::new(SqlDialect::Postgres).add_column_statements(&order(), &field);
        assert_eq!(
            pg,
            vec![
                "ALTER TABLE \"Orders\" ADD COLUMN \"Score\" INTEGER NULL;".to_string(),
                "UPDATE \"Orders\" SET \"Score\" = 0 WHERE \"Score\" IS NULL;".to_string(),
                "ALTER TABLE \"Orders\" ALTER COLUMN \"Score\" SET NOT NULL;".to_string(),
            ]
        );

        let lite = DdlSynthesizer::new(SqlDialect::Sqlite).add_column_statements(&order(), &field);
        assert_eq!(lite.len(), 2);
    }

    #[test]
    fn test_sqlite_add_column_skips_non_constant_default() {
        let field = FieldMetadata::new("SeenAt", FieldDataType::DateTime).with_default("NOW");
        let lite = DdlSynthesizer::new(SqlDialect::Sqlite).add_column_statements(&order(), &field);
        assert_eq!(lite[0], "ALTER TABLE \"Orders\" ADD COLUMN \"SeenAt\" TIMESTAMP WITHOUT TIME ZONE NULL;");
        assert_eq!(lite[1], "UPDATE \"Orders\" SET \"SeenAt\" = CURRENT_TIMESTAMP WHERE \"SeenAt\" IS NULL;");
    }

    #[test]
    fn test_enum_without_default_is_not_backfilled() {
        let field = FieldMetadata::new("State", FieldDataType::Enum).required();
        let pg = DdlSynthesizer::new(SqlDialect::Postgres).add_column_statements(&order(), &field);
        assert_eq!(pg, vec!["ALTER TABLE \"Orders\" ADD COLUMN \"State\" VARCHAR(100) NULL;".to_string()]);
    }

    #[test]
    fn test_alter_lengths_and_drop() {
        let name = FieldMetadata::new("Name", FieldDataType::String).with_length(200);
        let pg = DdlSynthesizer::new(SqlDialect::Postgres);
        assert_eq!(
            pg.alter_column_length_sql(&order(), &[(name.clone(), 300)]),
            "-- Alter table: Orders (column lengths)\nALTER TABLE \"Orders\" ALTER COLUMN \"Name\" TYPE VARCHAR(300);\n"
        );
        assert_eq!(DdlSynthesizer::new(SqlDialect::Sqlite).alter_column_length_sql(&order(), &[(name, 300)]), "");
        assert_eq!(
            pg.drop_table_sql(&order()),
            "-- Drop table: Order (Order)\nDROP TABLE IF EXISTS \"Orders\" CASCADE;\n"
        );
        assert_eq!(
            DdlSynthesizer::new(SqlDialect::Sqlite).drop_column_sql(&order(), "Name"),
            "ALTER TABLE \"Orders\" DROP COLUMN \"Name\";"
        );
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }
}
