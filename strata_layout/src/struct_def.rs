//! Struct definitions and their fields.

use std::fmt;

use indexmap::IndexMap;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use strata_data_type::FieldType;

use crate::ExprObj;

/// The special count source naming the size of the file.
pub const FILE_SIZE_SOURCE: &str = ":file-size";

/// Monotonic counter used to invalidate anything derived from a definition.
pub type EditVersion = u32;

/// A named integer parameter of a struct, with the value used when no argument is bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// The parameter name.
    pub name: String,
    /// The default value.
    #[serde(default)]
    pub value: i64,
}

/// An argument binding passed to the child instances of a struct-typed field.
///
/// The value is `value` alone, or `value` added to the named field, argument or parameter
/// of the parent instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompArg {
    /// The argument name in the child struct.
    pub name: String,
    /// The name looked up on the parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// A literal value, or a delta when `src` is set.
    #[serde(default)]
    pub value: i64,
}

/// Where a field's element count comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CountSource {
    /// The count is the literal `count`.
    #[default]
    Literal,
    /// `count` is a delta added to a previous field, an argument or a parameter.
    Named(String),
    /// `count` is a delta added to the size of the file.
    FileSize,
}

impl CountSource {
    /// Return true for [CountSource::Literal].
    pub fn is_literal(&self) -> bool {
        matches!(self, CountSource::Literal)
    }
}

impl fmt::Display for CountSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountSource::Literal => Ok(()),
            CountSource::Named(name) => write!(f, "{}", name),
            CountSource::FileSize => write!(f, "{}", FILE_SIZE_SOURCE),
        }
    }
}

impl Serialize for CountSource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CountSource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "" => CountSource::Literal,
            FILE_SIZE_SOURCE => CountSource::FileSize,
            _ if s.starts_with(':') => {
                return Err(D::Error::custom(format!("unknown count source: {}", s)))
            }
            _ => CountSource::Named(s),
        })
    }
}

fn default_count() -> i64 {
    1
}

fn is_default_count(count: &i64) -> bool {
    *count == 1
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One member of a struct definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// The element type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Makes the field computed: a single value with no storage in the file.
    ///
    /// The constant `orig` holds the read cursor at the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_expr: Option<ExprObj>,
    /// Offset relative to the instance, for structs that are not serialized.
    #[serde(default)]
    pub offset: i64,
    /// Makes the field computed: an absolute offset given by an expression.
    ///
    /// The constants `i` (element index) and `orig` (read cursor) are available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_expr: Option<ExprObj>,
    /// The element count, or a delta for a non-literal count source.
    #[serde(default = "default_count", skip_serializing_if = "is_default_count")]
    pub count: i64,
    /// Where the count comes from.
    #[serde(default, skip_serializing_if = "CountSource::is_literal")]
    pub count_src: CountSource,
    /// The count is a byte budget rather than a number of elements.
    #[serde(default, skip_serializing_if = "is_false")]
    pub count_is_max_size: bool,
    /// Each element of a struct-typed computed field gets its own offset.
    #[serde(default, skip_serializing_if = "is_false")]
    pub individual_computed_offsets: bool,
    /// Stop reading elements after the first zero value.
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_until_zero: bool,
    /// Arguments bound on child instances of a struct-typed field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub struct_args: Vec<CompArg>,
    /// The field is present only if this evaluates to non-zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ExprObj>,
    /// Per element condition for individually offset elements.
    ///
    /// The constants `i`, `off` and `orig` are available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_condition: Option<ExprObj>,
}

impl Field {
    /// A single element field of the given type.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            value_expr: None,
            offset: 0,
            offset_expr: None,
            count: 1,
            count_src: CountSource::Literal,
            count_is_max_size: false,
            individual_computed_offsets: false,
            read_until_zero: false,
            struct_args: Vec::new(),
            condition: None,
            element_condition: None,
        }
    }

    /// A single element field, parsing the type name.
    pub fn of_type(type_name: &str) -> Self {
        Self::new(FieldType::from_name(type_name))
    }

    /// A computed field's location is not derived from the read cursor.
    pub fn is_computed(&self) -> bool {
        self.value_expr.is_some() || self.offset_expr.is_some()
    }

    /// Return true if the field has exactly one element.
    pub fn is_one(&self) -> bool {
        self.count == 1 && self.count_src.is_literal()
    }
}

/// A named record layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    /// Fields are packed back to back, rather than placed at literal offsets.
    #[serde(default)]
    pub serialized: bool,
    /// Parameters with default values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    /// Fields in layout order.
    #[serde(default)]
    pub fields: IndexMap<String, Field>,
    /// The literal size, or a delta when `size_src` is set.
    #[serde(default)]
    pub size: i64,
    /// A field, argument or parameter whose value is added to `size`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_src: Option<String>,
    #[serde(skip, default = "initial_version")]
    edit_version: EditVersion,
}

fn initial_version() -> EditVersion {
    1
}

impl Default for StructDef {
    fn default() -> Self {
        Self {
            serialized: false,
            params: Vec::new(),
            fields: IndexMap::new(),
            size: 0,
            size_src: None,
            edit_version: initial_version(),
        }
    }
}

impl StructDef {
    /// An empty struct definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty serialized struct definition.
    pub fn serialized() -> Self {
        Self {
            serialized: true,
            ..Self::default()
        }
    }

    /// Append a field, replacing any existing field with the same name in place.
    pub fn with_field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Add a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: i64) -> Self {
        self.params.push(Param {
            name: name.into(),
            value,
        });
        self
    }

    /// The current edit version.
    pub fn edit_version(&self) -> EditVersion {
        self.edit_version
    }

    pub(crate) fn set_edit_version(&mut self, version: EditVersion) {
        self.edit_version = version;
    }

    /// The number of fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// The field at `index` and its name.
    pub fn field(&self, index: usize) -> Option<(&str, &Field)> {
        self.fields
            .get_index(index)
            .map(|(name, field)| (name.as_str(), field))
    }

    /// The index of the named field.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.get_index_of(name)
    }

    /// The default value of the named parameter.
    pub fn param(&self, name: &str) -> Option<i64> {
        self.params
            .iter()
            .find(|param| param.name == name)
            .map(|param| param.value)
    }
}

#[cfg(test)]
mod test {
    use strata_data_type::{BuiltinType, IntType};

    use super::*;

    #[test]
    fn test_field_json() {
        let field: Field = serde_json::from_str(
            r#"{ "type": "u16", "count": 2, "count_src": "n", "condition": "n > 0" }"#,
        )
        .unwrap();
        assert_eq!(
            field.field_type,
            FieldType::Builtin(BuiltinType::Int(IntType::U16))
        );
        assert_eq!(field.count_src, CountSource::Named("n".to_string()));
        assert_eq!(field.condition.as_ref().map(ExprObj::source), Some("n > 0"));
        assert!(!field.is_computed());
        assert!(!field.is_one());

        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["count_src"], "n");
        assert!(json.get("offset_expr").is_none());
    }

    #[test]
    fn test_count_source() {
        let src: CountSource = serde_json::from_str("\":file-size\"").unwrap();
        assert_eq!(src, CountSource::FileSize);
        assert!(serde_json::from_str::<CountSource>("\":bogus\"").is_err());
        let field: Field = serde_json::from_str(r#"{ "type": "Point" }"#).unwrap();
        assert!(field.is_one());
        assert_eq!(field.field_type.struct_name(), Some("Point"));
    }

    #[test]
    fn test_struct_def_lookup() {
        let def = StructDef::serialized()
            .with_field("x", Field::of_type("i32"))
            .with_field("y", Field::of_type("i32"))
            .with_param("scale", 4);
        assert_eq!(def.field_index("y"), Some(1));
        assert_eq!(def.field(0).map(|(name, _)| name), Some("x"));
        assert_eq!(def.param("scale"), Some(4));
        assert_eq!(def.param("x"), None);
        assert_eq!(def.edit_version(), 1);
    }
}
