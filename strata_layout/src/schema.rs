use std::{collections::HashMap, fs, path::Path};

use serde::{Deserialize, Serialize};
use strata_data_type::FieldType;

use crate::{CountSource, EditVersion, SchemaError, StructDef};

/// The set of struct definitions, keyed by name.
///
/// Every mutation goes through a method that gives the affected definition a new edit
/// version, so instances resolved against the old definition notice the change.
///
/// Versions come from one counter shared by all definitions and are never reused, even
/// when a definition is removed and another is inserted under the same name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    structs: HashMap<String, StructDef>,
    #[serde(skip)]
    last_version: EditVersion,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a schema from JSON.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON schema from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize the schema as pretty printed JSON.
    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Look up a struct definition.
    pub fn get(&self, name: &str) -> Option<&StructDef> {
        self.structs.get(name)
    }

    /// Look up a struct definition, returning an error if it is undefined.
    pub fn struct_def(&self, name: &str) -> Result<&StructDef, SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::UndefinedStruct(name.to_string()))
    }

    /// The current edit version of a struct definition.
    pub fn edit_version(&self, name: &str) -> Option<EditVersion> {
        self.get(name).map(StructDef::edit_version)
    }

    fn next_version(&mut self) -> EditVersion {
        // Freshly created and deserialized definitions start at version 1
        self.last_version = self.last_version.max(1).wrapping_add(1);
        self.last_version
    }

    /// Add or replace a struct definition, giving it a new edit version.
    pub fn insert(&mut self, name: impl Into<String>, mut def: StructDef) {
        def.set_edit_version(self.next_version());
        self.structs.insert(name.into(), def);
    }

    /// Edit a struct definition in place and give it a new edit version.
    pub fn edit<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut StructDef) -> R,
    ) -> Result<R, SchemaError> {
        let version = self.next_version();
        let def = self
            .structs
            .get_mut(name)
            .ok_or_else(|| SchemaError::UndefinedStruct(name.to_string()))?;
        let result = f(def);
        def.set_edit_version(version);
        Ok(result)
    }

    /// Remove a struct definition.
    pub fn remove(&mut self, name: &str) -> Option<StructDef> {
        self.structs.remove(name)
    }

    /// The defined struct names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.structs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The number of struct definitions.
    pub fn len(&self) -> usize {
        self.structs.len()
    }

    /// Return true if there are no struct definitions.
    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    /// Find references that cannot be resolved: struct-typed fields naming an undefined
    /// struct, and count or size sources naming nothing.
    ///
    /// Such a schema still resolves, with the affected values reading as 0.
    pub fn check(&self) -> Vec<SchemaError> {
        let mut problems = Vec::new();
        for struct_name in self.names() {
            let def = &self.structs[struct_name];
            let is_known = |name: &str| def.fields.contains_key(name) || def.param(name).is_some();

            for (field_name, field) in &def.fields {
                if let FieldType::Struct(type_name) = &field.field_type {
                    if !self.structs.contains_key(type_name) {
                        problems.push(SchemaError::UndefinedFieldType {
                            struct_name: struct_name.to_string(),
                            field_name: field_name.clone(),
                            type_name: type_name.clone(),
                        });
                    }
                }
                if let CountSource::Named(source) = &field.count_src {
                    if !is_known(source) {
                        problems.push(SchemaError::UndefinedSource {
                            struct_name: struct_name.to_string(),
                            field_name: Some(field_name.clone()),
                            source: source.clone(),
                        });
                    }
                }
            }
            if let Some(source) = &def.size_src {
                if !is_known(source) {
                    problems.push(SchemaError::UndefinedSource {
                        struct_name: struct_name.to_string(),
                        field_name: None,
                        source: source.clone(),
                    });
                }
            }
        }
        problems
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Field;

    #[test]
    fn test_edit_bumps_version() {
        let mut schema = Schema::new();
        schema.insert("Point", StructDef::serialized());
        let first = schema.edit_version("Point").unwrap();
        assert!(first > 1);

        schema
            .edit("Point", |def| {
                def.fields.insert("x".to_string(), Field::of_type("i32"));
            })
            .unwrap();
        let edited = schema.edit_version("Point").unwrap();
        assert!(edited > first);

        schema.insert("Point", StructDef::new());
        assert!(schema.edit_version("Point").unwrap() > edited);

        assert!(matches!(
            schema.edit("Missing", |_| ()),
            Err(SchemaError::UndefinedStruct(_))
        ));
    }

    #[test]
    fn test_versions_are_never_reused() {
        let json = r#"{ "structs": { "A": {}, "B": {} } }"#;
        let mut schema = Schema::from_json(json).unwrap();
        assert_eq!(schema.edit_version("A"), Some(1));

        let mut seen = vec![1];
        for _ in 0..3 {
            schema.remove("A");
            schema.insert("A", StructDef::new());
            seen.push(schema.edit_version("A").unwrap());
            schema.edit("B", |_| ()).unwrap();
            seen.push(schema.edit_version("B").unwrap());
        }
        let mut unique = seen.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), seen.len());
    }

    #[test]
    fn test_json_round_trip_keeps_field_order() {
        let json = r#"{
            "structs": {
                "Header": {
                    "serialized": true,
                    "fields": {
                        "magic": { "type": "char", "count": 4 },
                        "count": { "type": "u32" },
                        "entries": { "type": "Entry", "count_src": "count" }
                    }
                },
                "Entry": { "size": 8, "fields": { "id": { "type": "u32", "offset": 4 } } }
            }
        }"#;
        let schema = Schema::from_json(json).unwrap();
        let header = schema.struct_def("Header").unwrap();
        let names: Vec<&str> = header.fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["magic", "count", "entries"]);
        assert_eq!(schema.names(), vec!["Entry", "Header"]);
        assert!(schema.check().is_empty());

        let reparsed = Schema::from_json(&schema.to_json().unwrap()).unwrap();
        assert_eq!(reparsed.get("Entry"), schema.get("Entry"));
    }

    #[test]
    fn test_check_reports_dangling_names() {
        let mut schema = Schema::new();
        let mut field = Field::of_type("Missing");
        field.count_src = CountSource::Named("nowhere".to_string());
        let mut def = StructDef::new().with_field("items", field);
        def.size_src = Some("len".to_string());
        schema.insert("Table", def);

        let problems = schema.check();
        assert_eq!(problems.len(), 3);
        assert!(matches!(problems[0], SchemaError::UndefinedFieldType { .. }));
    }
}
