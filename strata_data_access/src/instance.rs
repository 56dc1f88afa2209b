use std::{
    cell::{Ref, RefCell},
    fmt,
};

use strata_layout::EditVersion;

use crate::cache::InstanceCache;

/// The stable id of a struct instance within a [Directory](crate::Directory).
pub type InstanceId = i64;

/// Identifies a data source opened in a [Workspace](crate::Workspace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub usize);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why an instance exists, ordered from most to least intentional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CreationReason {
    /// Placed explicitly by the user.
    UserDefined,
    /// Created by the user expanding a field or chain.
    ManualExpand,
    /// Created by an automatic expand pass.
    AutoExpand,
    /// Created on demand while running a query or measuring a field.
    Query,
}

impl CreationReason {
    /// Return true for reasons that an auto-created cleanup pass keeps.
    pub fn is_manual(self) -> bool {
        self <= CreationReason::ManualExpand
    }
}

impl fmt::Display for CreationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CreationReason::UserDefined => "user",
            CreationReason::ManualExpand => "manual expand",
            CreationReason::AutoExpand => "auto expand",
            CreationReason::Query => "query",
        };
        write!(f, "{}", name)
    }
}

/// A named integer bound on an instance, shadowing the struct parameter of that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    /// The argument name.
    pub name: String,
    /// The bound value.
    pub value: i64,
}

/// The description of an instance to add to a directory.
#[derive(Debug, Clone)]
pub struct NewInstance {
    /// The struct definition name.
    pub def_name: String,
    /// The file the instance lives in.
    pub file: FileId,
    /// The absolute offset in the file.
    pub offset: i64,
    /// Free-form notes.
    pub notes: String,
    /// Why the instance is created.
    pub reason: CreationReason,
    /// Whether expand passes may create children of this instance.
    pub allow_auto_expand: bool,
    /// The number of instances (or bytes) left in the sequential chain, this one included.
    pub remaining_count: i64,
    /// `remaining_count` is a byte budget.
    pub remaining_count_is_size: bool,
    /// The stride to the next instance in the chain, instead of the measured size.
    pub size_override: Option<i64>,
    /// Bound arguments.
    pub args: Vec<Arg>,
}

impl NewInstance {
    /// A single instance with no notes and no arguments.
    pub fn new(
        def_name: impl Into<String>,
        file: FileId,
        offset: i64,
        reason: CreationReason,
    ) -> Self {
        Self {
            def_name: def_name.into(),
            file,
            offset,
            notes: String::new(),
            reason,
            allow_auto_expand: true,
            remaining_count: 1,
            remaining_count_is_size: false,
            size_override: None,
            args: Vec::new(),
        }
    }

    /// Set the sequential chain budget.
    pub fn with_remaining_count(mut self, count: i64, is_size: bool) -> Self {
        self.remaining_count = count;
        self.remaining_count_is_size = is_size;
        self
    }

    /// Bind an argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: i64) -> Self {
        self.args.push(Arg {
            name: name.into(),
            value,
        });
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InstanceProps {
    pub(crate) notes: String,
    pub(crate) reason: CreationReason,
    pub(crate) allow_auto_expand: bool,
    pub(crate) remaining_count: i64,
    pub(crate) remaining_count_is_size: bool,
    pub(crate) size_override: Option<i64>,
    pub(crate) args: Vec<Arg>,
    pub(crate) edit_version: EditVersion,
}

/// A struct definition placed at an offset in a file.
///
/// The identity (id, definition, file and offset) never changes. Everything else is
/// editable through setters, each of which bumps the instance's edit version and so
/// invalidates what was resolved from it.
///
/// Most callers use the [Instance](crate::Instance) handle, which pairs an instance
/// with the workspace it resolves against.
pub struct StructInstance {
    id: InstanceId,
    def_name: String,
    file: FileId,
    offset: i64,
    props: RefCell<InstanceProps>,
    pub(crate) cache: RefCell<InstanceCache>,
}

impl StructInstance {
    pub(crate) fn new(id: InstanceId, new: NewInstance) -> Self {
        Self {
            id,
            def_name: new.def_name,
            file: new.file,
            offset: new.offset,
            props: RefCell::new(InstanceProps {
                notes: new.notes,
                reason: new.reason,
                allow_auto_expand: new.allow_auto_expand,
                remaining_count: new.remaining_count,
                remaining_count_is_size: new.remaining_count_is_size,
                size_override: new.size_override,
                args: new.args,
                edit_version: 1,
            }),
            cache: RefCell::new(InstanceCache::new(new.offset)),
        }
    }

    /// The instance id.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The struct definition name.
    pub fn def_name(&self) -> &str {
        &self.def_name
    }

    /// The file the instance lives in.
    pub fn file(&self) -> FileId {
        self.file
    }

    /// The absolute offset in the file.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub(crate) fn props(&self) -> Ref<'_, InstanceProps> {
        self.props.borrow()
    }

    fn edit(&self, f: impl FnOnce(&mut InstanceProps)) {
        let mut props = self.props.borrow_mut();
        f(&mut props);
        props.edit_version = props.edit_version.wrapping_add(1);
    }

    /// The current edit version.
    pub fn edit_version(&self) -> EditVersion {
        self.props.borrow().edit_version
    }

    /// The notes.
    pub fn notes(&self) -> String {
        self.props.borrow().notes.clone()
    }

    /// Replace the notes.
    pub fn set_notes(&self, notes: impl Into<String>) {
        let notes = notes.into();
        self.edit(|props| props.notes = notes);
    }

    /// The creation reason.
    pub fn reason(&self) -> CreationReason {
        self.props.borrow().reason
    }

    /// Change the creation reason.
    ///
    /// The reason does not affect layout, so the edit version is unchanged.
    pub fn set_reason(&self, reason: CreationReason) {
        self.props.borrow_mut().reason = reason;
    }

    /// Whether expand passes may create children of this instance.
    pub fn allow_auto_expand(&self) -> bool {
        self.props.borrow().allow_auto_expand
    }

    /// Allow or forbid automatic expansion.
    pub fn set_allow_auto_expand(&self, allow: bool) {
        self.edit(|props| props.allow_auto_expand = allow);
    }

    /// The remaining sequential chain budget.
    pub fn remaining_count(&self) -> i64 {
        self.props.borrow().remaining_count
    }

    /// Whether the remaining budget is counted in bytes.
    pub fn remaining_count_is_size(&self) -> bool {
        self.props.borrow().remaining_count_is_size
    }

    /// Set the remaining sequential chain budget.
    pub fn set_remaining_count(&self, count: i64, is_size: bool) {
        self.edit(|props| {
            props.remaining_count = count;
            props.remaining_count_is_size = is_size;
        });
    }

    /// The chain stride override.
    pub fn size_override(&self) -> Option<i64> {
        self.props.borrow().size_override
    }

    /// Set or clear the chain stride override.
    pub fn set_size_override(&self, size: Option<i64>) {
        self.edit(|props| props.size_override = size);
    }

    /// The bound arguments.
    pub fn args(&self) -> Vec<Arg> {
        self.props.borrow().args.clone()
    }

    /// The value of a bound argument.
    pub fn arg(&self, name: &str) -> Option<i64> {
        self.props
            .borrow()
            .args
            .iter()
            .find(|arg| arg.name == name)
            .map(|arg| arg.value)
    }

    /// Bind an argument, replacing any existing binding of the same name.
    pub fn set_arg(&self, name: &str, value: i64) {
        self.edit(|props| match props.args.iter_mut().find(|arg| arg.name == name) {
            Some(arg) => arg.value = value,
            None => props.args.push(Arg {
                name: name.to_string(),
                value,
            }),
        });
    }

    /// Remove a bound argument.
    pub fn remove_arg(&self, name: &str) {
        self.edit(|props| props.args.retain(|arg| arg.name != name));
    }

    pub(crate) fn bind_args(&self, args: Vec<Arg>) {
        self.props.borrow_mut().args.extend(args);
    }

    pub(crate) fn merge(&self, reason: CreationReason, remaining_count: i64, is_size: bool) {
        let mut props = self.props.borrow_mut();
        props.reason = props.reason.min(reason);
        props.remaining_count = remaining_count;
        props.remaining_count_is_size = is_size;
    }
}

impl fmt::Debug for StructInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructInstance")
            .field("id", &self.id)
            .field("def_name", &self.def_name)
            .field("file", &self.file)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}
