use std::rc::Rc;

use strata_expr::{QueryFilter, VariableSource};

use crate::{query, resolve, StructInstance, Workspace};

/// The names visible to an expression evaluated with `root` as the root.
struct Scope<'a> {
    ws: &'a Workspace,
    root: &'a Rc<StructInstance>,
    constants: &'a [(&'a str, i64)],
    until_field: Option<usize>,
}

impl Scope<'_> {
    /// Look up `name` on `inst`: constants (root only), then arguments, then fields,
    /// then parameter defaults.
    ///
    /// Fields of the root at or after `until_field` are refused.
    fn lookup(
        &self,
        inst: &Rc<StructInstance>,
        name: &str,
        index: i64,
        want_offset: bool,
    ) -> Option<i64> {
        let is_root = Rc::ptr_eq(inst, self.root);
        let value = |value: i64| if want_offset { 0 } else { value };

        if is_root {
            let constant = self.constants.iter().find(|(constant, _)| *constant == name);
            if let Some(&(_, constant)) = constant {
                return Some(value(constant));
            }
        }
        if let Some(arg) = inst.arg(name) {
            return Some(value(arg));
        }
        let def = resolve::struct_def(self.ws, inst)?;
        if let Some(i) = def.field_index(name) {
            if is_root && self.until_field.map_or(false, |until| i >= until) {
                return None;
            }
            let index = usize::try_from(index).ok()?;
            return if want_offset {
                resolve::field_value_offset(self.ws, inst, i, index, false)
            } else {
                Some(resolve::field_int_value(self.ws, inst, i, index))
            };
        }
        def.param(name).map(value)
    }
}

/// Resolves expressions against a workspace, with a struct instance as the root.
///
/// Field references are resolved fully, instantiating child structs where needed, and
/// queries run against the instance directory.
#[derive(Debug)]
pub struct FullVariableSource<'a> {
    ws: &'a Workspace,
    root: Rc<StructInstance>,
    constants: &'a [(&'a str, i64)],
}

impl<'a> FullVariableSource<'a> {
    /// Create a source rooted at `root`.
    pub fn new(ws: &'a Workspace, root: Rc<StructInstance>) -> Self {
        Self::with_constants(ws, root, &[])
    }

    /// Create a source rooted at `root`, with named constants that shadow the root's
    /// arguments and fields.
    pub fn with_constants(
        ws: &'a Workspace,
        root: Rc<StructInstance>,
        constants: &'a [(&'a str, i64)],
    ) -> Self {
        Self {
            ws,
            root,
            constants,
        }
    }
}

impl VariableSource for FullVariableSource<'_> {
    type Instance = Rc<StructInstance>;

    fn get_variable(
        &self,
        inst: &Rc<StructInstance>,
        name: &str,
        index: i64,
        want_offset: bool,
    ) -> Option<i64> {
        let scope = Scope {
            ws: self.ws,
            root: &self.root,
            constants: self.constants,
            until_field: None,
        };
        scope.lookup(inst, name, index, want_offset)
    }

    fn initial_set(&self) -> Vec<Rc<StructInstance>> {
        vec![Rc::clone(&self.root)]
    }

    fn subquery(
        &self,
        src: &[Rc<StructInstance>],
        field: &str,
        filter: &QueryFilter<'_>,
    ) -> Vec<Rc<StructInstance>> {
        query::subquery(self.ws, src, field, filter)
    }

    fn root_query(
        &self,
        type_name: &str,
        global: bool,
        filter: &QueryFilter<'_>,
    ) -> Vec<Rc<StructInstance>> {
        let file = if global { None } else { Some(self.root.file()) };
        query::root_query(self.ws, type_name, file, filter)
    }

    fn read_file(&self, offset: i64, buf: &mut [u8]) -> usize {
        self.ws.read_file(self.root.file(), offset, buf)
    }

    fn instance_offset(&self, inst: &Rc<StructInstance>) -> i64 {
        inst.offset()
    }

    fn instance_id(&self, inst: &Rc<StructInstance>) -> i64 {
        inst.id()
    }

    fn field_preview(&self, inst: &Rc<StructInstance>, name: &str) -> Option<String> {
        let i = resolve::struct_def(self.ws, inst)?.field_index(name)?;
        Some(resolve::field_preview(self.ws, inst, i, false))
    }
}

/// Resolves field conditions while the root's fields are still being enumerated.
///
/// Only the fields before `until_field` may be referenced, and queries are always
/// empty, so evaluation cannot depend on anything that is not yet laid out.
#[derive(Debug)]
pub struct InParseVariableSource<'a> {
    ws: &'a Workspace,
    root: Rc<StructInstance>,
    until_field: usize,
}

impl<'a> InParseVariableSource<'a> {
    /// Create a source rooted at `root` that sees fields `0..until_field`.
    pub fn new(ws: &'a Workspace, root: Rc<StructInstance>, until_field: usize) -> Self {
        Self {
            ws,
            root,
            until_field,
        }
    }
}

impl VariableSource for InParseVariableSource<'_> {
    type Instance = Rc<StructInstance>;

    fn get_variable(
        &self,
        inst: &Rc<StructInstance>,
        name: &str,
        index: i64,
        want_offset: bool,
    ) -> Option<i64> {
        let scope = Scope {
            ws: self.ws,
            root: &self.root,
            constants: &[],
            until_field: Some(self.until_field),
        };
        scope.lookup(inst, name, index, want_offset)
    }

    fn initial_set(&self) -> Vec<Rc<StructInstance>> {
        vec![Rc::clone(&self.root)]
    }

    fn subquery(
        &self,
        _src: &[Rc<StructInstance>],
        _field: &str,
        _filter: &QueryFilter<'_>,
    ) -> Vec<Rc<StructInstance>> {
        Vec::new()
    }

    fn root_query(
        &self,
        _type_name: &str,
        _global: bool,
        _filter: &QueryFilter<'_>,
    ) -> Vec<Rc<StructInstance>> {
        Vec::new()
    }

    fn read_file(&self, offset: i64, buf: &mut [u8]) -> usize {
        self.ws.read_file(self.root.file(), offset, buf)
    }

    fn instance_offset(&self, inst: &Rc<StructInstance>) -> i64 {
        inst.offset()
    }

    fn instance_id(&self, inst: &Rc<StructInstance>) -> i64 {
        inst.id()
    }

    fn field_preview(&self, inst: &Rc<StructInstance>, name: &str) -> Option<String> {
        let i = resolve::struct_def(self.ws, inst)?.field_index(name)?;
        if Rc::ptr_eq(inst, &self.root) && i >= self.until_field {
            return None;
        }
        Some(resolve::field_preview(self.ws, inst, i, false))
    }
}
