use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{CreationReason, FileId, InstanceId, NewInstance, StructInstance};

/// The result of [Directory::add_instance].
#[derive(Debug, Clone)]
pub struct AddedInstance {
    /// The new instance, or the existing one at the same location.
    pub instance: Rc<StructInstance>,
    /// Whether a new instance was created.
    pub inserted: bool,
}

/// The live struct instances, in creation order.
///
/// At most one instance exists per (definition, file, offset). Adding a duplicate
/// returns the existing instance after merging in the new creation reason and chain
/// budget.
///
/// Adding and removing only needs a shared reference, so resolution may create
/// instances while callers hold instance handles. Iteration goes through snapshots.
#[derive(Debug, Default)]
pub struct Directory {
    instances: RefCell<IndexMap<InstanceId, Rc<StructInstance>>>,
    by_location: RefCell<HashMap<(String, FileId, i64), InstanceId>>,
    next_id: Cell<InstanceId>,
}

impl Directory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance, or return the existing instance at the same location.
    ///
    /// When the instance exists, its reason becomes the more intentional of the two and
    /// its chain budget is replaced. Neither change bumps its edit version.
    pub fn add_instance(&self, new: NewInstance) -> AddedInstance {
        let key = (new.def_name.clone(), new.file, new.offset);
        let existing = self.by_location.borrow().get(&key).copied();
        if let Some(id) = existing {
            if let Some(instance) = self.find_by_id(id) {
                instance.merge(
                    new.reason,
                    new.remaining_count,
                    new.remaining_count_is_size,
                );
                return AddedInstance {
                    instance,
                    inserted: false,
                };
            }
        }

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        log::debug!(
            "instance {}: {} at {}:{} ({})",
            id,
            new.def_name,
            new.file,
            new.offset,
            new.reason
        );
        let instance = Rc::new(StructInstance::new(id, new));
        self.instances.borrow_mut().insert(id, Rc::clone(&instance));
        self.by_location.borrow_mut().insert(key, id);
        AddedInstance {
            instance,
            inserted: true,
        }
    }

    /// Look up an instance by id.
    pub fn find_by_id(&self, id: InstanceId) -> Option<Rc<StructInstance>> {
        self.instances.borrow().get(&id).cloned()
    }

    /// Look up the instance at a location.
    pub fn find_at(&self, def_name: &str, file: FileId, offset: i64) -> Option<Rc<StructInstance>> {
        let key = (def_name.to_string(), file, offset);
        let id = self.by_location.borrow().get(&key).copied()?;
        self.find_by_id(id)
    }

    /// Remove an instance, keeping the order of the others.
    pub fn delete_instance(&self, id: InstanceId) -> Option<Rc<StructInstance>> {
        let instance = self.instances.borrow_mut().shift_remove(&id)?;
        self.by_location.borrow_mut().remove(&(
            instance.def_name().to_string(),
            instance.file(),
            instance.offset(),
        ));
        Some(instance)
    }

    /// Remove every instance that was not placed or expanded by the user.
    ///
    /// Returns the number of removed instances.
    pub fn delete_all_auto_created(&self) -> usize {
        let removed: Vec<InstanceId> = self
            .instances
            .borrow()
            .values()
            .filter(|instance| !instance.reason().is_manual())
            .map(|instance| instance.id())
            .collect();
        for &id in &removed {
            self.delete_instance(id);
        }
        removed.len()
    }

    /// The instance at a position in creation order.
    pub fn get_index(&self, index: usize) -> Option<Rc<StructInstance>> {
        self.instances
            .borrow()
            .get_index(index)
            .map(|(_, instance)| Rc::clone(instance))
    }

    /// A snapshot of every instance in creation order.
    pub fn snapshot(&self) -> Vec<Rc<StructInstance>> {
        self.instances.borrow().values().cloned().collect()
    }

    /// The instances of a struct definition, optionally restricted to one file.
    pub fn instances_of(&self, def_name: &str, file: Option<FileId>) -> Vec<Rc<StructInstance>> {
        self.instances
            .borrow()
            .values()
            .filter(|instance| {
                instance.def_name() == def_name && file.map_or(true, |file| instance.file() == file)
            })
            .cloned()
            .collect()
    }

    /// The number of instances.
    pub fn len(&self) -> usize {
        self.instances.borrow().len()
    }

    /// Return true if there are no instances.
    pub fn is_empty(&self) -> bool {
        self.instances.borrow().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn point(offset: i64, reason: CreationReason) -> NewInstance {
        NewInstance::new("Point", FileId(0), offset, reason)
    }

    #[test]
    fn test_dedup_and_merge() {
        let directory = Directory::new();
        let first = directory.add_instance(point(8, CreationReason::Query));
        assert!(first.inserted);

        let again = directory.add_instance(
            point(8, CreationReason::ManualExpand).with_remaining_count(3, false),
        );
        assert!(!again.inserted);
        assert_eq!(again.instance.id(), first.instance.id());
        assert_eq!(again.instance.reason(), CreationReason::ManualExpand);
        assert_eq!(again.instance.remaining_count(), 3);

        let other_file = directory.add_instance(NewInstance::new(
            "Point",
            FileId(1),
            8,
            CreationReason::Query,
        ));
        assert!(other_file.inserted);
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.instances_of("Point", Some(FileId(0))).len(), 1);
        assert_eq!(directory.instances_of("Point", None).len(), 2);
    }

    #[test]
    fn test_delete_keeps_order() {
        let directory = Directory::new();
        let a = directory.add_instance(point(0, CreationReason::UserDefined)).instance;
        let b = directory.add_instance(point(8, CreationReason::AutoExpand)).instance;
        let c = directory.add_instance(point(16, CreationReason::ManualExpand)).instance;
        let d = directory.add_instance(point(24, CreationReason::Query)).instance;

        assert_eq!(directory.delete_all_auto_created(), 2);
        let ids: Vec<InstanceId> = directory.snapshot().iter().map(|inst| inst.id()).collect();
        assert_eq!(ids, vec![a.id(), c.id()]);
        assert!(directory.find_by_id(b.id()).is_none());
        assert!(directory.find_at("Point", FileId(0), 24).is_none());

        // Ids are never reused
        let e = directory.add_instance(point(24, CreationReason::Query)).instance;
        assert!(e.id() > d.id());

        assert!(directory.delete_instance(a.id()).is_some());
        assert!(directory.delete_instance(a.id()).is_none());
        assert_eq!(directory.get_index(0).map(|inst| inst.id()), Some(c.id()));
    }
}
