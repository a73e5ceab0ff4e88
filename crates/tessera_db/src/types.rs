//! Metadata types stored by Tessera.
//!
//! These are plain values: the engine loads a snapshot, computes a new
//! snapshot, and writes it back. Nothing here tracks changes implicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Implements `as_str`, `parse`, `Display` and `FromStr` for a unit enum
/// whose stored form is its PascalCase name. Extra literals after `|` are
/// accepted on parse only.
macro_rules! impl_text_enum {
    ($name:ident { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                let s = s.trim();
                $(
                    if s.eq_ignore_ascii_case($text) $(|| s.eq_ignore_ascii_case($alias))* {
                        return Some(Self::$variant);
                    }
                )+
                None
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s).ok_or_else(|| {
                    format!("Invalid {}: '{}'", stringify!($name), s)
                })
            }
        }
    };
}

// ============================================================================
// Entity enums
// ============================================================================

/// Lifecycle status of an entity definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityStatus {
    /// Authored but never published; no table exists yet.
    #[default]
    Draft,
    /// Table exists and matches metadata.
    Published,
    /// Published, with metadata edits not yet applied to the table.
    Modified,
    /// Taken out of service; the table may still exist.
    Withdrawn,
}

impl_text_enum!(EntityStatus {
    Draft => "Draft",
    Published => "Published",
    Modified => "Modified",
    Withdrawn => "Withdrawn",
});

/// Who owns an entity definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntitySource {
    System,
    #[default]
    Custom,
}

impl_text_enum!(EntitySource {
    System => "System",
    Custom => "Custom",
});

/// Provenance of a field. Governs which field properties stay editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FieldSource {
    System,
    Interface,
    #[default]
    Custom,
}

impl_text_enum!(FieldSource {
    System => "System",
    Interface => "Interface",
    Custom => "Custom",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StructureType {
    #[default]
    Single,
    MasterDetail,
    MasterDetailGrandchild,
}

impl_text_enum!(StructureType {
    Single => "Single",
    MasterDetail => "MasterDetail",
    MasterDetailGrandchild => "MasterDetailGrandchild",
});

/// Field data types understood by the DDL synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldDataType {
    String,
    #[serde(alias = "Int32")]
    Integer,
    #[serde(alias = "Int64")]
    Long,
    Decimal,
    Boolean,
    DateTime,
    Date,
    Guid,
    Text,
    Json,
    Enum,
}

impl_text_enum!(FieldDataType {
    String => "String",
    Integer => "Integer" | "Int32",
    Long => "Long" | "Int64",
    Decimal => "Decimal",
    Boolean => "Boolean",
    DateTime => "DateTime",
    Date => "Date",
    Guid => "Guid",
    Text => "Text",
    Json => "Json",
    Enum => "Enum",
});

impl FieldDataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Long | Self::Decimal)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Self::String | Self::Text)
    }
}

/// Marker capabilities. Each one contributes a fixed bundle of columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InterfaceType {
    Base,
    Archive,
    Audit,
    Version,
    TimeVersion,
    Organization,
}

impl_text_enum!(InterfaceType {
    Base => "Base",
    Archive => "Archive",
    Audit => "Audit",
    Version => "Version",
    TimeVersion => "TimeVersion",
    Organization => "Organization",
});

/// ON DELETE behavior of a lookup's foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    #[default]
    Restrict,
    SetNull,
    Cascade,
    NoAction,
}

impl_text_enum!(ForeignKeyAction {
    Restrict => "Restrict",
    SetNull => "SetNull",
    Cascade => "Cascade",
    NoAction => "NoAction",
});

impl ForeignKeyAction {
    /// SQL keyword for ON DELETE.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::Cascade => "CASCADE",
            Self::NoAction => "NO ACTION",
        }
    }
}

// ============================================================================
// Field & entity definitions
// ============================================================================

/// A single column of an entity, as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    pub id: Uuid,
    /// Column name. Unique per entity, case-insensitive.
    pub property_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub data_type: FieldDataType,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub is_required: bool,
    /// Raw default. `NOW`, `TODAY` and `NEWID` are engine generators.
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub source: FieldSource,
    /// Entity name this field looks up, if any.
    #[serde(default)]
    pub lookup_entity_name: Option<String>,
    #[serde(default)]
    pub foreign_key_action: ForeignKeyAction,
    #[serde(default)]
    pub enum_definition_id: Option<Uuid>,
    #[serde(default)]
    pub is_multi_select: bool,
}

impl FieldMetadata {
    /// A custom, optional field.
    pub fn new(property_name: impl Into<String>, data_type: FieldDataType) -> Self {
        Self {
            id: Uuid::new_v4(),
            property_name: property_name.into(),
            display_name: None,
            data_type,
            length: None,
            precision: None,
            scale: None,
            is_required: false,
            default_value: None,
            sort_order: 0,
            source: FieldSource::Custom,
            lookup_entity_name: None,
            foreign_key_action: ForeignKeyAction::Restrict,
            enum_definition_id: None,
            is_multi_select: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_sort_order(mut self, order: i32) -> Self {
        self.sort_order = order;
        self
    }

    pub fn with_source(mut self, source: FieldSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_lookup(mut self, entity_name: impl Into<String>, action: ForeignKeyAction) -> Self {
        self.lookup_entity_name = Some(entity_name.into());
        self.foreign_key_action = action;
        self
    }

    pub fn with_enum(mut self, enum_definition_id: Option<Uuid>) -> Self {
        self.data_type = FieldDataType::Enum;
        self.enum_definition_id = enum_definition_id;
        self
    }

    /// Lookup target, trimmed, if this field is a lookup.
    pub fn lookup_target(&self) -> Option<&str> {
        self.lookup_entity_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn name_matches(&self, other: &str) -> bool {
        self.property_name.eq_ignore_ascii_case(other)
    }

    pub fn has_default(&self) -> bool {
        self.default_value
            .as_deref()
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }
}

/// An entity (table) defined as metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    pub id: Uuid,
    pub namespace: String,
    pub entity_name: String,
    pub entity_route: String,
    #[serde(default)]
    pub structure_type: StructureType,
    #[serde(default)]
    pub parent_entity_id: Option<Uuid>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default)]
    pub source: EntitySource,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub interfaces: Vec<InterfaceType>,
    #[serde(default)]
    pub fields: Vec<FieldMetadata>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

fn default_true() -> bool {
    true
}

impl EntityDefinition {
    /// A new Draft, Custom entity with the Base interface.
    pub fn new(namespace: impl Into<String>, entity_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            entity_route: entity_name.to_lowercase(),
            entity_name,
            structure_type: StructureType::Single,
            parent_entity_id: None,
            display_name: None,
            description: None,
            status: EntityStatus::Draft,
            source: EntitySource::Custom,
            is_locked: false,
            is_enabled: true,
            interfaces: vec![InterfaceType::Base],
            fields: Vec::new(),
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
        }
    }

    pub fn with_field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_interface(mut self, interface: InterfaceType) -> Self {
        if !self.interfaces.contains(&interface) {
            self.interfaces.push(interface);
        }
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.entity_route = route.into();
        self
    }

    pub fn with_source(mut self, source: EntitySource) -> Self {
        self.source = source;
        self
    }

    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_entity_id = Some(parent_id);
        self
    }

    /// Physical table name: the entity name pluralized with a trailing `s`.
    pub fn table_name(&self) -> String {
        format!("{}s", self.entity_name)
    }

    /// `Namespace.EntityName`, the key used by the type registry.
    pub fn full_type_name(&self) -> String {
        if self.namespace.is_empty() {
            self.entity_name.clone()
        } else {
            format!("{}.{}", self.namespace, self.entity_name)
        }
    }

    /// Whether a lookup key names this entity, by entity name or full type
    /// name, case-insensitive.
    pub fn answers_to(&self, key: &str) -> bool {
        let key = key.trim();
        self.entity_name.eq_ignore_ascii_case(key) || self.full_type_name().eq_ignore_ascii_case(key)
    }

    pub fn has_interface(&self, interface: InterfaceType) -> bool {
        self.interfaces.contains(&interface)
    }

    /// Case-insensitive field lookup.
    pub fn field(&self, property_name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.name_matches(property_name))
    }

    /// Distinct lookup targets in field order.
    pub fn lookup_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for field in &self.fields {
            if let Some(target) = field.lookup_target() {
                if !targets.iter().any(|t| t.eq_ignore_ascii_case(target)) {
                    targets.push(target.to_string());
                }
            }
        }
        targets
    }

    /// Fields ordered for DDL: by sort order, then declaration order.
    pub fn ordered_fields(&self) -> Vec<&FieldMetadata> {
        let mut fields: Vec<&FieldMetadata> = self.fields.iter().collect();
        fields.sort_by_key(|f| f.sort_order);
        fields
    }

    pub fn display_label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.entity_name)
    }
}

// ============================================================================
// Enum definitions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumOption {
    pub value: String,
    pub label: String,
    #[serde(default)]
    pub sort_order: i32,
}

/// A named set of options referenced by `Enum` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumDefinition {
    pub id: Uuid,
    pub code: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub options: Vec<EnumOption>,
}

impl EnumDefinition {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            display_name: None,
            is_enabled: true,
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, value: impl Into<String>, label: impl Into<String>) -> Self {
        let sort_order = self.options.len() as i32;
        self.options.push(EnumOption {
            value: value.into(),
            label: label.into(),
            sort_order,
        });
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }
}

// ============================================================================
// DDL audit
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptType {
    Create,
    Alter,
    Drop,
    Rollback,
}

impl_text_enum!(ScriptType {
    Create => "Create",
    Alter => "Alter",
    Drop => "Drop",
    Rollback => "Rollback",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScriptStatus {
    #[default]
    Pending,
    Success,
    Failed,
    RolledBack,
}

impl_text_enum!(ScriptStatus {
    Pending => "Pending",
    Success => "Success",
    Failed => "Failed",
    RolledBack => "RolledBack",
});

/// One audited DDL execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DdlScript {
    pub id: Uuid,
    pub entity_definition_id: Uuid,
    pub script_type: ScriptType,
    pub sql_script: String,
    pub status: ScriptStatus,
    pub error_message: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl DdlScript {
    pub fn pending(
        entity_definition_id: Uuid,
        script_type: ScriptType,
        sql_script: impl Into<String>,
        created_by: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_definition_id,
            script_type,
            sql_script: sql_script.into(),
            status: ScriptStatus::Pending,
            error_message: None,
            created_by: created_by.map(str::to_string),
            created_at: Utc::now(),
            executed_at: None,
        }
    }

    pub fn mark_success(&mut self) {
        self.status = ScriptStatus::Success;
        self.error_message = None;
        self.executed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ScriptStatus::Failed;
        self.error_message = Some(error.into());
        self.executed_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.status == ScriptStatus::Success
    }
}

// ============================================================================
// Provisioning records
// ============================================================================

/// A node of the function (menu) tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionNode {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub code: String,
    pub name: String,
    pub route: Option<String>,
    pub icon: Option<String>,
    pub is_menu: bool,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateUsage {
    Detail,
    Edit,
    List,
}

impl_text_enum!(TemplateUsage {
    Detail => "Detail",
    Edit => "Edit",
    List => "List",
});

impl TemplateUsage {
    pub const ALL: [TemplateUsage; 3] = [Self::Detail, Self::Edit, Self::List];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormTemplate {
    pub id: Uuid,
    pub entity_type: String,
    pub usage_type: TemplateUsage,
    pub name: String,
    pub layout_json: String,
    pub is_system_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateBinding {
    pub id: Uuid,
    pub entity_type: String,
    pub usage_type: TemplateUsage,
    pub template_id: Uuid,
}
