use std::collections::HashMap;

use crate::QueryFilter;

/// The context an expression is evaluated in.
///
/// A variable source bridges names in an expression to instance fields, arguments and
/// parameters, to file bytes, and to the instance directory for queries. Anything that
/// cannot be resolved is reported as `None` or an empty set, and evaluates to 0.
pub trait VariableSource {
    /// A handle to a struct instance.
    type Instance: Clone;

    /// Look up `name` on `inst`.
    ///
    /// `index` selects an element of a repeated field. If `want_offset` is set, the
    /// element's file offset is returned instead of its value.
    fn get_variable(
        &self,
        inst: &Self::Instance,
        name: &str,
        index: i64,
        want_offset: bool,
    ) -> Option<i64>;

    /// The instances that an unqualified name refers to, normally just the evaluation root.
    fn initial_set(&self) -> Vec<Self::Instance>;

    /// The child instances of the struct-typed field `field` in each of `src`.
    fn subquery(
        &self,
        src: &[Self::Instance],
        field: &str,
        filter: &QueryFilter<'_>,
    ) -> Vec<Self::Instance>;

    /// The live instances of the struct type `type_name`.
    ///
    /// Unless `global` is set, only instances in the evaluation root's file are returned.
    fn root_query(
        &self,
        type_name: &str,
        global: bool,
        filter: &QueryFilter<'_>,
    ) -> Vec<Self::Instance>;

    /// Read bytes from the evaluation root's file, returning the number of bytes read.
    ///
    /// Bytes past the returned count are left untouched.
    fn read_file(&self, offset: i64, buf: &mut [u8]) -> usize;

    /// The file offset of an instance.
    fn instance_offset(&self, inst: &Self::Instance) -> i64;

    /// The id of an instance.
    fn instance_id(&self, inst: &Self::Instance) -> i64;

    /// The joined preview text of a field.
    fn field_preview(&self, inst: &Self::Instance, name: &str) -> Option<String>;
}

/// A variable source without instances.
///
/// Names resolve from a map of constants and raw reads come from a byte buffer.
/// Queries are always empty.
#[derive(Debug, Clone, Default)]
pub struct MapVariableSource {
    /// Named values.
    pub variables: HashMap<String, i64>,
    /// The bytes read by `$i32` and friends.
    pub bytes: Vec<u8>,
}

impl MapVariableSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named value.
    pub fn with_variable(mut self, name: impl Into<String>, value: i64) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Set the bytes that raw reads come from.
    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = bytes;
        self
    }
}

impl VariableSource for MapVariableSource {
    type Instance = ();

    fn get_variable(&self, _inst: &(), name: &str, index: i64, want_offset: bool) -> Option<i64> {
        if index != 0 || want_offset {
            return None;
        }
        self.variables.get(name).copied()
    }

    fn initial_set(&self) -> Vec<()> {
        vec![()]
    }

    fn subquery(&self, _src: &[()], _field: &str, _filter: &QueryFilter<'_>) -> Vec<()> {
        Vec::new()
    }

    fn root_query(&self, _type_name: &str, _global: bool, _filter: &QueryFilter<'_>) -> Vec<()> {
        Vec::new()
    }

    fn read_file(&self, offset: i64, buf: &mut [u8]) -> usize {
        let start = match usize::try_from(offset) {
            Ok(start) if start < self.bytes.len() => start,
            _ => return 0,
        };
        let end = self.bytes.len().min(start + buf.len());
        buf[..end - start].copy_from_slice(&self.bytes[start..end]);
        end - start
    }

    fn instance_offset(&self, _inst: &()) -> i64 {
        0
    }

    fn instance_id(&self, _inst: &()) -> i64 {
        -1
    }

    fn field_preview(&self, _inst: &(), name: &str) -> Option<String> {
        self.variables.get(name).map(|value| value.to_string())
    }
}
