//! Runtime entity types and the default type compiler.
//!
//! A published entity is "compiled" into a [`RuntimeEntityType`]: a JSON
//! descriptor of its table and columns. Descriptors are loaded into an
//! explicit [`TypeRegistry`] grouped by assembly name, and rows of a loaded
//! type are read back as [`DynamicRecord`]s.
//!
//! ```rust,ignore
//! let registry = Arc::new(TypeRegistry::new());
//! let compiler = DescriptorCompiler::new(registry.clone());
//! let outcome = compiler.compile(&compiler.generate_code(&order), "Tessera.Dynamic.Order");
//! let records = registry.fetch_records(&mut conn, "Crm.Order").await?;
//! ```

use crate::ddl::{quote_ident, DdlSynthesizer, SqlDialect};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use tessera_db::{EntityDefinition, FieldDataType};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Invalid type descriptor: {0}")]
    InvalidDescriptor(#[from] serde_json::Error),

    #[error("Type '{type_name}' is invalid: {reason}")]
    InvalidType { type_name: String, reason: String },

    #[error("Type '{0}' is not loaded")]
    TypeNotLoaded(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, CompileError>;

// ============================================================================
// Descriptors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeField {
    pub name: String,
    pub data_type: FieldDataType,
    pub is_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_entity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEntityType {
    pub full_type_name: String,
    pub table_name: String,
    pub fields: Vec<RuntimeField>,
}

impl RuntimeEntityType {
    /// Descriptor for the table `entity` publishes, interface columns included.
    pub fn from_entity(entity: &EntityDefinition) -> Self {
        let fields = DdlSynthesizer::new(SqlDialect::Sqlite)
            .expected_columns(entity)
            .into_iter()
            .map(|column| RuntimeField {
                lookup_entity: column.field.lookup_target().map(str::to_string),
                name: column.field.property_name,
                data_type: column.field.data_type,
                is_required: column.field.is_required,
            })
            .collect();
        Self {
            full_type_name: entity.full_type_name(),
            table_name: entity.table_name(),
            fields,
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| CompileError::InvalidType {
            type_name: self.full_type_name.clone(),
            reason,
        };
        if self.full_type_name.trim().is_empty() {
            return Err(invalid("type name is empty".to_string()));
        }
        if self.table_name.trim().is_empty() {
            return Err(invalid("table name is empty".to_string()));
        }
        if self.fields.is_empty() {
            return Err(invalid("no fields".to_string()));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(invalid("field with empty name".to_string()));
            }
            if !seen.insert(field.name.to_lowercase()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
        }
        Ok(())
    }
}

/// Source accepted by [`DescriptorCompiler::compile`]: one descriptor or a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorSource {
    One(RuntimeEntityType),
    Many(Vec<RuntimeEntityType>),
}

// ============================================================================
// Dynamic records
// ============================================================================

/// A column value read from a dynamic table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRecord {
    pub type_name: String,
    pub values: BTreeMap<String, FieldValue>,
}

impl DynamicRecord {
    /// Case-insensitive column access.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }
}

/// SQLite storage class a column is read through.
fn select_expression(field: &RuntimeField) -> String {
    let column = quote_ident(&field.name);
    let storage = match field.data_type {
        FieldDataType::Integer | FieldDataType::Long | FieldDataType::Boolean => "INTEGER",
        FieldDataType::Decimal => "REAL",
        _ => "TEXT",
    };
    format!("CAST({} AS {})", column, storage)
}

fn read_value(row: &sqlx::sqlite::SqliteRow, index: usize, field: &RuntimeField) -> Result<FieldValue> {
    let value = match field.data_type {
        FieldDataType::Integer | FieldDataType::Long => row.try_get::<Option<i64>, _>(index)?.map(FieldValue::Int),
        FieldDataType::Boolean => row
            .try_get::<Option<i64>, _>(index)?
            .map(|v| FieldValue::Bool(v != 0)),
        FieldDataType::Decimal => row.try_get::<Option<f64>, _>(index)?.map(FieldValue::Float),
        FieldDataType::Guid => row.try_get::<Option<String>, _>(index)?.map(|s| match Uuid::parse_str(&s) {
            Ok(id) => FieldValue::Uuid(id),
            Err(_) => FieldValue::Text(s),
        }),
        FieldDataType::Json => row
            .try_get::<Option<String>, _>(index)?
            .map(|s| match serde_json::from_str(&s) {
                Ok(json) => FieldValue::Json(json),
                Err(_) => FieldValue::Text(s),
            }),
        _ => row.try_get::<Option<String>, _>(index)?.map(FieldValue::Text),
    };
    Ok(value.unwrap_or(FieldValue::Null))
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone)]
struct LoadedType {
    assembly: String,
    descriptor: RuntimeEntityType,
}

/// Loaded runtime types keyed by full type name.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, LoadedType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `descriptor` under `assembly`, replacing any earlier version.
    pub fn register(&self, assembly: &str, descriptor: RuntimeEntityType) {
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        debug!(type_name = %descriptor.full_type_name, assembly, "Type registered");
        types.insert(
            descriptor.full_type_name.clone(),
            LoadedType {
                assembly: assembly.to_string(),
                descriptor,
            },
        );
    }

    /// Drop every type loaded from `assembly`. Returns how many were removed.
    pub fn unload(&self, assembly: &str) -> usize {
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        let before = types.len();
        types.retain(|_, loaded| loaded.assembly != assembly);
        before - types.len()
    }

    pub fn clear(&self) {
        self.types.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Sorted.
    pub fn loaded_type_names(&self) -> Vec<String> {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = types.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, type_name: &str) -> Option<RuntimeEntityType> {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        types.get(type_name).map(|loaded| loaded.descriptor.clone())
    }

    /// All rows of a loaded type.
    pub async fn fetch_records(&self, conn: &mut SqliteConnection, type_name: &str) -> Result<Vec<DynamicRecord>> {
        let descriptor = self
            .get(type_name)
            .ok_or_else(|| CompileError::TypeNotLoaded(type_name.to_string()))?;

        let columns: Vec<String> = descriptor.fields.iter().map(select_expression).collect();
        let sql = format!("SELECT {} FROM {}", columns.join(", "), quote_ident(&descriptor.table_name));
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

        rows.iter()
            .map(|row| {
                let mut values = BTreeMap::new();
                for (index, field) in descriptor.fields.iter().enumerate() {
                    values.insert(field.name.clone(), read_value(row, index, field)?);
                }
                Ok(DynamicRecord {
                    type_name: descriptor.full_type_name.clone(),
                    values,
                })
            })
            .collect()
    }
}

// ============================================================================
// Compiler
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutcome {
    pub success: bool,
    pub errors: Vec<String>,
    pub loaded_type_names: Vec<String>,
}

impl CompileOutcome {
    fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            loaded_type_names: Vec::new(),
        }
    }
}

/// Turns entity metadata into loadable runtime types.
pub trait TypeCompiler: Send + Sync {
    fn generate_code(&self, entity: &EntityDefinition) -> String;

    fn compile(&self, source: &str, assembly_name: &str) -> CompileOutcome;

    /// Compile several sources as one assembly; all or nothing.
    fn compile_multiple(&self, sources: &BTreeMap<String, String>, assembly_name: &str) -> CompileOutcome;
}

/// Compiles JSON [`RuntimeEntityType`] descriptors into a [`TypeRegistry`].
#[derive(Debug, Clone)]
pub struct DescriptorCompiler {
    registry: std::sync::Arc<TypeRegistry>,
}

impl DescriptorCompiler {
    pub fn new(registry: std::sync::Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn parse(source: &str) -> Result<Vec<RuntimeEntityType>> {
        let descriptors = match serde_json::from_str::<DescriptorSource>(source)? {
            DescriptorSource::One(descriptor) => vec![descriptor],
            DescriptorSource::Many(descriptors) => descriptors,
        };
        for descriptor in &descriptors {
            descriptor.validate()?;
        }
        Ok(descriptors)
    }

    fn load(&self, descriptors: Vec<RuntimeEntityType>, assembly_name: &str) -> CompileOutcome {
        self.registry.unload(assembly_name);
        let mut loaded_type_names = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            loaded_type_names.push(descriptor.full_type_name.clone());
            self.registry.register(assembly_name, descriptor);
        }
        info!(assembly = assembly_name, types = ?loaded_type_names, "Runtime types loaded");
        CompileOutcome {
            success: true,
            errors: Vec::new(),
            loaded_type_names,
        }
    }
}

impl TypeCompiler for DescriptorCompiler {
    fn generate_code(&self, entity: &EntityDefinition) -> String {
        let descriptor = RuntimeEntityType::from_entity(entity);
        serde_json::to_string_pretty(&descriptor).unwrap_or_default()
    }

    fn compile(&self, source: &str, assembly_name: &str) -> CompileOutcome {
        match Self::parse(source) {
            Ok(descriptors) => self.load(descriptors, assembly_name),
            Err(e) => {
                warn!(assembly = assembly_name, error = %e, "Compilation failed");
                CompileOutcome::failed(vec![e.to_string()])
            }
        }
    }

    fn compile_multiple(&self, sources: &BTreeMap<String, String>, assembly_name: &str) -> CompileOutcome {
        let mut descriptors = Vec::new();
        let mut errors = Vec::new();
        for (name, source) in sources {
            match Self::parse(source) {
                Ok(parsed) => descriptors.extend(parsed),
                Err(e) => errors.push(format!("{}: {}", name, e)),
            }
        }
        if !errors.is_empty() {
            warn!(assembly = assembly_name, errors = errors.len(), "Compilation failed");
            return CompileOutcome::failed(errors);
        }
        self.load(descriptors, assembly_name)
    }
}
