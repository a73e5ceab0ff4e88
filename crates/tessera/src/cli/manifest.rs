//! JSON manifests accepted by `tessera import`.
//!
//! Three shapes are accepted:
//!
//! ```json
//! { "enums": [ ... ], "entities": [ ... ] }
//! [ { "namespace": "Crm", "entityName": "Order", "fields": [ ... ] } ]
//! { "namespace": "Crm", "entityName": "Order", "fields": [ ... ] }
//! ```
//!
//! Ids are optional. Enum fields name their options by `enumCode`, which
//! resolves against the manifest's own enums.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashMap;
use tessera_db::{
    EntityDefinition, EntitySource, EnumDefinition, EnumOption, FieldDataType, FieldMetadata, FieldSource,
    ForeignKeyAction, InterfaceType, StructureType,
};
use tessera_schema::EntityUpdate;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Manifest {
    pub enums: Vec<EnumManifest>,
    pub entities: Vec<EntityManifest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumManifest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub code: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub options: Vec<EnumOption>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityManifest {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub namespace: String,
    pub entity_name: String,
    #[serde(default)]
    pub entity_route: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub structure_type: Option<StructureType>,
    /// Name of the parent entity (master-detail).
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub source: Option<EntitySource>,
    #[serde(default)]
    pub interfaces: Option<Vec<InterfaceType>>,
    #[serde(default)]
    pub fields: Vec<FieldManifest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldManifest {
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
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i32>,
    #[serde(default)]
    pub source: Option<FieldSource>,
    #[serde(default)]
    pub lookup_entity_name: Option<String>,
    #[serde(default)]
    pub foreign_key_action: Option<ForeignKeyAction>,
    #[serde(default)]
    pub enum_code: Option<String>,
    #[serde(default)]
    pub enum_definition_id: Option<Uuid>,
    #[serde(default)]
    pub is_multi_select: bool,
}

fn default_true() -> bool {
    true
}

/// Parse any of the accepted manifest shapes.
pub fn parse_manifest(text: &str) -> Result<Manifest, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let is_bundle = value
        .as_object()
        .map_or(false, |map| map.contains_key("entities") || map.contains_key("enums"));

    if is_bundle {
        serde_json::from_value(value)
    } else if value.is_array() {
        Ok(Manifest {
            enums: Vec::new(),
            entities: serde_json::from_value(value)?,
        })
    } else {
        Ok(Manifest {
            enums: Vec::new(),
            entities: vec![serde_json::from_value(value)?],
        })
    }
}

impl EnumManifest {
    pub fn to_definition(&self) -> EnumDefinition {
        EnumDefinition {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            code: self.code.clone(),
            display_name: self.display_name.clone(),
            is_enabled: self.is_enabled,
            options: self.options.clone(),
        }
    }
}

/// Enum codes (lowercased) to ids.
pub type EnumCodes = HashMap<String, Uuid>;

pub fn enum_codes(enums: &[EnumDefinition]) -> EnumCodes {
    enums.iter().map(|e| (e.code.to_lowercase(), e.id)).collect()
}

impl EntityManifest {
    /// Build the definition to store. With `existing`, the stored id,
    /// status and timestamps are kept, and field ids and sources carry
    /// over by property name.
    pub fn to_definition(
        &self,
        enums: &EnumCodes,
        parent_id: Option<Uuid>,
        existing: Option<&EntityDefinition>,
    ) -> Result<EntityDefinition> {
        let mut entity = EntityDefinition::new(self.namespace.trim(), self.entity_name.trim());
        if let Some(id) = self.id {
            entity.id = id;
        }
        if let Some(route) = &self.entity_route {
            entity.entity_route = route.clone();
        }
        entity.display_name = self.display_name.clone();
        entity.description = self.description.clone();
        entity.structure_type = self.structure_type.unwrap_or_default();
        entity.parent_entity_id = parent_id;
        entity.source = self.source.unwrap_or_default();
        if let Some(interfaces) = &self.interfaces {
            entity.interfaces = interfaces.clone();
        }

        for (index, spec) in self.fields.iter().enumerate() {
            let carried = existing.and_then(|e| e.field(&spec.property_name));
            entity.fields.push(spec.to_field(index, enums, carried)?);
        }

        if let Some(existing) = existing {
            entity.id = existing.id;
            entity.status = existing.status;
            entity.is_locked = existing.is_locked;
            entity.is_enabled = existing.is_enabled;
            entity.created_at = existing.created_at;
            entity.created_by = existing.created_by.clone();
            if self.source.is_none() {
                entity.source = existing.source;
            }
        }
        Ok(entity)
    }

    /// The edit that turns `existing` into this manifest's definition.
    /// Fields missing from the manifest are left alone.
    pub fn to_update(&self, enums: &EnumCodes, existing: &EntityDefinition) -> Result<EntityUpdate> {
        let target = self.to_definition(enums, existing.parent_entity_id, Some(existing))?;
        Ok(EntityUpdate {
            entity_route: self.entity_route.clone(),
            structure_type: self.structure_type,
            interfaces: self.interfaces.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            fields: target.fields,
            ..Default::default()
        })
    }
}

impl FieldManifest {
    fn to_field(&self, index: usize, enums: &EnumCodes, carried: Option<&FieldMetadata>) -> Result<FieldMetadata> {
        let enum_definition_id = match (&self.enum_code, self.enum_definition_id) {
            (_, Some(id)) => Some(id),
            (Some(code), None) => match enums.get(&code.trim().to_lowercase()) {
                Some(id) => Some(*id),
                None => bail!(
                    "Field '{}' references unknown enum code '{}'",
                    self.property_name,
                    code
                ),
            },
            (None, None) => None,
        };

        let mut field = FieldMetadata::new(self.property_name.trim(), self.data_type);
        field.display_name = self.display_name.clone();
        field.length = self.length;
        field.precision = self.precision;
        field.scale = self.scale;
        field.is_required = self.is_required;
        field.default_value = self.default_value.clone();
        field.sort_order = self.sort_order.unwrap_or((index as i32 + 1) * 10);
        field.lookup_entity_name = self.lookup_entity_name.clone();
        field.foreign_key_action = self.foreign_key_action.unwrap_or_default();
        field.enum_definition_id = enum_definition_id;
        field.is_multi_select = self.is_multi_select;
        field.source = self.source.unwrap_or_default();

        if let Some(previous) = carried {
            field.id = previous.id;
            if self.source.is_none() {
                field.source = previous.source;
            }
        }
        Ok(field)
    }
}
