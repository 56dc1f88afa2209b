use std::{cell::Cell, fmt, path::Path, rc::Rc};

use strata_expr::ExprCache;
use strata_layout::Schema;
use strata_memory::{DataSource, FileSource};

use crate::{
    resolve, CreationReason, Directory, Error, FileId, FullVariableSource, Instance, InstanceId,
    NewInstance, ResolveLimits,
};

/// The schema, the opened files, and the instances placed in them.
///
/// Resolution only needs a shared reference. Editing the schema needs a mutable one,
/// which guarantees no resolution is in flight while definitions change.
pub struct Workspace {
    schema: Schema,
    files: Vec<Box<dyn DataSource>>,
    directory: Directory,
    limits: ResolveLimits,
    exprs: ExprCache,
    depth: Cell<usize>,
    depth_refusals: Cell<u64>,
    limit_hits: Cell<u64>,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("structs", &self.schema.len())
            .field("files", &self.files)
            .field("instances", &self.directory.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Create a workspace with the default limits.
    pub fn new(schema: Schema) -> Self {
        Self::with_limits(schema, ResolveLimits::default())
    }

    /// Create a workspace with the given limits.
    pub fn with_limits(schema: Schema, limits: ResolveLimits) -> Self {
        Self {
            schema,
            files: Vec::new(),
            directory: Directory::new(),
            limits,
            exprs: ExprCache::new(),
            depth: Cell::new(0),
            depth_refusals: Cell::new(0),
            limit_hits: Cell::new(0),
        }
    }

    /// The schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Mutable access to the schema.
    ///
    /// Use the [Schema] editing methods so the affected definitions get new versions.
    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    /// The resolution limits.
    pub fn limits(&self) -> ResolveLimits {
        self.limits
    }

    /// Change the resolution limits.
    pub fn set_limits(&mut self, limits: ResolveLimits) {
        self.limits = limits;
    }

    /// The number of times a resolution limit was hit.
    pub fn limit_hits(&self) -> u64 {
        self.limit_hits.get()
    }

    /// Open a file, or return the id of the source already open on the same file.
    pub fn open_file(&mut self, path: impl AsRef<Path>) -> Result<FileId, Error> {
        let source = FileSource::open(path)?;
        if let Some(handle) = source.file_handle() {
            let existing = self
                .files
                .iter()
                .position(|file| file.file_handle() == Some(handle));
            if let Some(index) = existing {
                return Ok(FileId(index));
            }
        }
        Ok(self.add_source(source))
    }

    /// Add a data source, such as an in-memory buffer.
    pub fn add_source(&mut self, source: impl DataSource + 'static) -> FileId {
        log::debug!("file {}: {}", self.files.len(), source.name());
        self.files.push(Box::new(source));
        FileId(self.files.len() - 1)
    }

    /// Look up an open data source.
    pub fn file(&self, file: FileId) -> Option<&dyn DataSource> {
        self.files.get(file.0).map(|source| &**source)
    }

    /// The size of a data source, or 0 if it is not open.
    pub fn file_size(&self, file: FileId) -> u64 {
        self.file(file).map_or(0, |source| source.size())
    }

    /// Read bytes at `offset`, zero filling anything outside the file.
    ///
    /// Returns the number of bytes that came from the file.
    pub fn read_file(&self, file: FileId, offset: i64, buf: &mut [u8]) -> usize {
        buf.fill(0);
        match (self.file(file), u64::try_from(offset)) {
            (Some(source), Ok(offset)) => source.read_zero_filled(offset, buf),
            _ => 0,
        }
    }

    /// The instance directory.
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Add an instance, or return the existing one at the same location.
    pub fn add_instance(&self, new: NewInstance) -> Instance<'_> {
        let added = self.directory.add_instance(new);
        Instance::new(self, added.instance)
    }

    /// Place a user-defined instance of a struct definition.
    pub fn create_instance(
        &self,
        def_name: &str,
        file: FileId,
        offset: i64,
    ) -> Result<Instance<'_>, Error> {
        self.schema.struct_def(def_name)?;
        if self.file(file).is_none() {
            return Err(Error::UndefinedFile(file));
        }
        Ok(self.add_instance(NewInstance::new(
            def_name,
            file,
            offset,
            CreationReason::UserDefined,
        )))
    }

    /// Look up an instance by id.
    pub fn instance(&self, id: InstanceId) -> Option<Instance<'_>> {
        self.directory
            .find_by_id(id)
            .map(|inst| Instance::new(self, inst))
    }

    /// Every instance in creation order.
    pub fn instances(&self) -> Vec<Instance<'_>> {
        self.directory
            .snapshot()
            .into_iter()
            .map(|inst| Instance::new(self, inst))
            .collect()
    }

    /// Remove an instance.
    pub fn delete_instance(&self, id: InstanceId) -> bool {
        self.directory.delete_instance(id).is_some()
    }

    /// Remove every instance that was not placed or expanded by the user.
    pub fn delete_all_auto_created(&self) -> usize {
        self.directory.delete_all_auto_created()
    }

    /// Evaluate an expression with `instance` as the root.
    ///
    /// Compiled expressions are cached by source text.
    pub fn evaluate(&self, source: &str, instance: &Instance<'_>) -> i64 {
        let expr = self.exprs.get(source);
        expr.evaluate(&FullVariableSource::new(self, Rc::clone(instance.inst())))
    }

    /// Create the sequential successors and struct-typed field children of every
    /// instance that allows automatic expansion, repeating for the new instances.
    ///
    /// If `file` is given, only instances in that file are expanded. Stops after
    /// [ResolveLimits::max_expand_instances] new instances. Returns the number of new
    /// instances.
    pub fn expand_all(&self, file: Option<FileId>) -> usize {
        let start = self.directory.len();
        let budget = self.limits.max_expand_instances;
        let created = || self.directory.len().saturating_sub(start);

        let mut index = 0;
        while let Some(inst) = self.directory.get_index(index) {
            index += 1;
            if file.map_or(false, |file| inst.file() != file) || !inst.allow_auto_expand() {
                continue;
            }
            if created() >= budget {
                self.note_limit_hit("max_expand_instances");
                break;
            }
            if resolve::can_create_next_instance(self, &inst, false, false) == Some(true) {
                resolve::create_next_instance(self, &inst, CreationReason::AutoExpand);
            }
            let field_count = self
                .schema
                .get(inst.def_name())
                .map_or(0, |def| def.field_count());
            for i in 0..field_count {
                if resolve::is_struct_field(self, &inst, i)
                    && resolve::is_field_present(self, &inst, i, false) == Some(true)
                {
                    resolve::create_field_instances(
                        self,
                        &inst,
                        i,
                        usize::MAX,
                        CreationReason::AutoExpand,
                        &mut |_| created() < budget,
                    );
                }
            }
        }
        created()
    }

    pub(crate) fn enter_frame(&self) -> Option<FrameGuard<'_>> {
        let depth = self.depth.get();
        if depth >= self.limits.max_depth {
            self.depth_refusals.set(self.depth_refusals.get() + 1);
            self.note_limit_hit("max_depth");
            return None;
        }
        self.depth.set(depth + 1);
        Some(FrameGuard { depth: &self.depth })
    }

    /// The number of frames refused by [ResolveLimits::max_depth].
    pub(crate) fn depth_refusals(&self) -> u64 {
        self.depth_refusals.get()
    }

    pub(crate) fn note_limit_hit(&self, limit: &str) {
        log::warn!("resolution limit hit: {}", limit);
        self.limit_hits.set(self.limit_hits.get() + 1);
    }
}

/// Holds one level of resolution depth until dropped.
pub(crate) struct FrameGuard<'w> {
    depth: &'w Cell<usize>,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}
