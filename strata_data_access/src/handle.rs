use std::{fmt, rc::Rc};

use strata_layout::{CompArg, StructDef};

use crate::{resolve, CreationReason, StructInstance, Workspace};

/// A struct instance together with the workspace it resolves against.
///
/// Field accessors take the field's index in its definition. Accessors with a `lazy`
/// flag report `None` instead of reading field values or measuring child instances.
/// Everything computed is cached in the instance until it or its definition is edited.
#[derive(Clone)]
pub struct Instance<'w> {
    ws: &'w Workspace,
    inst: Rc<StructInstance>,
}

impl fmt::Debug for Instance<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inst, f)
    }
}

impl<'w> Instance<'w> {
    pub(crate) fn new(ws: &'w Workspace, inst: Rc<StructInstance>) -> Self {
        Self { ws, inst }
    }

    /// The workspace.
    pub fn workspace(&self) -> &'w Workspace {
        self.ws
    }

    /// The underlying instance, for reading and editing its properties.
    pub fn inst(&self) -> &Rc<StructInstance> {
        &self.inst
    }

    /// The struct definition, if it is defined.
    pub fn def(&self) -> Option<&'w StructDef> {
        resolve::struct_def(self.ws, &self.inst)
    }

    /// The number of fields in the definition.
    pub fn field_count(&self) -> usize {
        self.def().map_or(0, StructDef::field_count)
    }

    /// The index of the named field.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.def()?.field_index(name)
    }

    /// The name of field `i`.
    pub fn field_name(&self, i: usize) -> Option<&'w str> {
        self.def()?.field(i).map(|(name, _)| name)
    }

    /// Lay out at least the first `up_to` fields.
    pub fn enumerate_fields(&self, up_to: usize, lazy: bool) {
        resolve::enumerate_fields(self.ws, &self.inst, up_to, lazy);
    }

    /// The number of fields laid out so far.
    pub fn cached_field_count(&self) -> usize {
        resolve::cached_field_count(&self.inst)
    }

    /// Whether field `i`'s condition holds.
    pub fn is_field_present(&self, i: usize, lazy: bool) -> Option<bool> {
        resolve::is_field_present(self.ws, &self.inst, i, lazy)
    }

    /// The absolute offset of field `i`.
    pub fn field_offset(&self, i: usize, lazy: bool) -> Option<i64> {
        resolve::field_offset(self.ws, &self.inst, i, lazy)
    }

    /// The absolute offset of element `n` of field `i`.
    ///
    /// Only the first element of a struct-typed field has a known offset.
    pub fn field_value_offset(&self, i: usize, n: usize, lazy: bool) -> Option<i64> {
        resolve::field_value_offset(self.ws, &self.inst, i, n, lazy)
    }

    /// The element count of field `i`, or its byte budget if the count is a maximum size.
    pub fn field_element_count(&self, i: usize, lazy: bool) -> Option<i64> {
        resolve::field_element_count(self.ws, &self.inst, i, lazy)
    }

    /// The number of bytes field `i` occupies.
    pub fn field_total_size(&self, i: usize, lazy: bool) -> Option<i64> {
        resolve::field_total_size(self.ws, &self.inst, i, lazy)
    }

    /// The joined preview of field `i`'s elements.
    pub fn field_preview(&self, i: usize, lazy: bool) -> String {
        resolve::field_preview(self.ws, &self.inst, i, lazy)
    }

    /// The preview of element `n` of field `i`.
    pub fn field_value_preview(&self, i: usize, n: usize) -> Option<String> {
        resolve::field_value_preview(self.ws, &self.inst, i, n)
    }

    /// The integer value of element `n` of field `i`, or 0.
    pub fn field_int_value(&self, i: usize, n: usize) -> i64 {
        resolve::field_int_value(self.ws, &self.inst, i, n)
    }

    /// A one line description of field `i`: `name: type[count]@offset=preview`.
    pub fn field_summary(&self, i: usize) -> String {
        resolve::field_summary(self.ws, &self.inst, i)
    }

    /// The size of the instance in bytes.
    pub fn size(&self, lazy: bool) -> Option<i64> {
        resolve::size(self.ws, &self.inst, lazy)
    }

    /// Whether the sequential chain continues after this instance.
    ///
    /// In loose mode any remaining budget other than exactly zero counts, so an
    /// overshooting byte budget still continues.
    pub fn can_create_next_instance(&self, lazy: bool, loose: bool) -> Option<bool> {
        resolve::can_create_next_instance(self.ws, &self.inst, lazy, loose)
    }

    /// A description of where the next instance in the chain would go.
    pub fn next_instance_info(&self, lazy: bool) -> String {
        resolve::next_instance_info(self.ws, &self.inst, lazy)
    }

    /// Create the next instance in the sequential chain.
    ///
    /// The new instance starts right after this one, or after the size override, and
    /// inherits the notes, arguments and the rest of the budget. Returns `None` if the
    /// budget is used up or the instance has size 0.
    pub fn create_next_instance(&self, reason: CreationReason) -> Option<Instance<'w>> {
        resolve::create_next_instance(self.ws, &self.inst, reason).map(|inst| Self::new(self.ws, inst))
    }

    /// Create or reuse the child instances of struct-typed field `i`, calling `on_each`
    /// with each until it returns false.
    ///
    /// Returns the child that stopped the walk, or element `up_to_n` if the walk got
    /// that far.
    pub fn create_field_instances(
        &self,
        i: usize,
        up_to_n: usize,
        reason: CreationReason,
        mut on_each: impl FnMut(&Instance<'w>) -> bool,
    ) -> Option<Instance<'w>> {
        let ws = self.ws;
        resolve::create_field_instances(ws, &self.inst, i, up_to_n, reason, &mut |child| {
            on_each(&Self::new(ws, Rc::clone(child)))
        })
        .map(|inst| Self::new(ws, inst))
    }

    /// The value an argument binding would get on a child of this instance.
    pub fn comp_arg_value(&self, arg: &CompArg) -> i64 {
        resolve::comp_arg_value(self.ws, &self.inst, arg)
    }

    /// Evaluate an expression with this instance as the root.
    pub fn evaluate(&self, source: &str) -> i64 {
        self.ws.evaluate(source, self)
    }
}

impl std::ops::Deref for Instance<'_> {
    type Target = StructInstance;

    fn deref(&self) -> &StructInstance {
        &self.inst
    }
}
