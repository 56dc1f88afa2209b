use strata_layout::EditVersion;

/// The edit versions a cached result was computed against: the instance's, then its
/// definition's.
pub(crate) type Stamp = (EditVersion, EditVersion);

/// One decoded element of a field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ElementValue {
    pub(crate) offset: i64,
    pub(crate) int: i64,
    pub(crate) preview: String,
}

/// What is known about one field of an instance.
#[derive(Debug, Clone)]
pub(crate) struct FieldCache {
    pub(crate) present: bool,
    /// The read cursor when the field was reached.
    pub(crate) origin: i64,
    pub(crate) offset: Option<i64>,
    pub(crate) count: Option<i64>,
    pub(crate) total_size: Option<i64>,
    pub(crate) read_cursor: Option<i64>,
    pub(crate) values: Vec<ElementValue>,
    pub(crate) preview: Option<String>,
}

impl FieldCache {
    pub(crate) fn new(present: bool, origin: i64) -> Self {
        Self {
            present,
            origin,
            offset: None,
            count: None,
            total_size: None,
            read_cursor: None,
            values: Vec::new(),
            preview: None,
        }
    }
}

/// Per instance resolution state.
///
/// `fields` only grows while its stamp matches. Entry `k` is only ever added after
/// entries `0..k`, and `read_cursor` has moved past every present, non-computed entry.
#[derive(Debug)]
pub(crate) struct InstanceCache {
    pub(crate) fields_stamp: Option<Stamp>,
    pub(crate) read_cursor: i64,
    pub(crate) fields: Vec<FieldCache>,
    /// The field currently being measured, if any.
    pub(crate) in_progress: Option<usize>,
    pub(crate) size_stamp: Option<Stamp>,
    pub(crate) size: Option<i64>,
}

impl InstanceCache {
    pub(crate) fn new(offset: i64) -> Self {
        Self {
            fields_stamp: None,
            read_cursor: offset,
            fields: Vec::new(),
            in_progress: None,
            size_stamp: None,
            size: None,
        }
    }

    /// Drop cached fields unless they were computed against `stamp`.
    ///
    /// Returns true if anything was dropped.
    pub(crate) fn validate_fields(&mut self, stamp: Stamp, offset: i64) -> bool {
        if self.fields_stamp == Some(stamp) {
            return false;
        }
        let stale = self.fields_stamp.is_some();
        self.fields_stamp = Some(stamp);
        self.read_cursor = offset;
        self.fields.clear();
        self.in_progress = None;
        stale
    }

    /// The cached size, if it was computed against `stamp`.
    pub(crate) fn size(&self, stamp: Stamp) -> Option<i64> {
        if self.size_stamp == Some(stamp) {
            self.size
        } else {
            None
        }
    }

    pub(crate) fn set_size(&mut self, stamp: Stamp, size: i64) {
        self.size_stamp = Some(stamp);
        self.size = Some(size);
    }
}
