//! Execution of root and field queries against a workspace.

use std::rc::Rc;

use strata_expr::QueryFilter;

use crate::{resolve, CreationReason, FileId, StructInstance, Workspace};

/// The value an expression filter compares against: a field, then an argument, then
/// a parameter default.
fn condition_value(ws: &Workspace, inst: &Rc<StructInstance>, name: &str) -> Option<i64> {
    let def = resolve::struct_def(ws, inst)?;
    if let Some(i) = def.field_index(name) {
        Some(resolve::field_int_value(ws, inst, i, 0))
    } else if let Some(value) = inst.arg(name) {
        Some(value)
    } else {
        def.param(name)
    }
}

/// Return true if `inst` passes every condition in `filter`.
///
/// Literal conditions compare the field's preview text. Naming a field the instance
/// does not have never matches.
pub(crate) fn matches(ws: &Workspace, inst: &Rc<StructInstance>, filter: &QueryFilter<'_>) -> bool {
    if filter.is_empty() {
        return true;
    }
    let def = match resolve::struct_def(ws, inst) {
        Some(def) => def,
        None => return false,
    };
    let literal_match = filter.conditions.iter().all(|condition| {
        def.field_index(&condition.field).map_or(false, |i| {
            resolve::field_preview(ws, inst, i, false) == condition.value
        })
    });
    literal_match
        && filter
            .int_conditions
            .iter()
            .all(|condition| condition_value(ws, inst, &condition.name) == Some(condition.value))
}

/// The live instances of `type_name` that pass `filter`, in creation order.
pub(crate) fn root_query(
    ws: &Workspace,
    type_name: &str,
    file: Option<FileId>,
    filter: &QueryFilter<'_>,
) -> Vec<Rc<StructInstance>> {
    ws.directory()
        .instances_of(type_name, file)
        .into_iter()
        .filter(|inst| matches(ws, inst, filter))
        .collect()
}

/// The child instances of field `field_name` in each of `src` that pass `filter`.
///
/// Children are created as needed. Each instance appears once, in the order it was
/// first reached.
pub(crate) fn subquery(
    ws: &Workspace,
    src: &[Rc<StructInstance>],
    field_name: &str,
    filter: &QueryFilter<'_>,
) -> Vec<Rc<StructInstance>> {
    let mut found: Vec<Rc<StructInstance>> = Vec::new();
    for parent in src {
        let i = match resolve::struct_def(ws, parent).and_then(|def| def.field_index(field_name)) {
            Some(i) => i,
            None => continue,
        };
        if !resolve::is_struct_field(ws, parent, i)
            || resolve::is_field_present(ws, parent, i, false) != Some(true)
        {
            continue;
        }
        resolve::create_field_instances(
            ws,
            parent,
            i,
            usize::MAX,
            CreationReason::Query,
            &mut |child| {
                let seen = found.iter().any(|inst| Rc::ptr_eq(inst, child));
                if !seen && matches(ws, child, filter) {
                    found.push(Rc::clone(child));
                }
                true
            },
        );
    }
    found
}

#[cfg(test)]
mod test {
    use strata_layout::Schema;
    use strata_memory::BufferSource;

    use crate::{Instance, NewInstance};

    use super::*;

    const SCHEMA: &str = r#"{ "structs": {
        "Point": { "size": 8, "fields": {
            "x": { "type": "i32" },
            "y": { "type": "i32", "offset": 4 }
        } },
        "Pair": { "size": 16, "fields": {
            "first": { "type": "Point" },
            "second": { "type": "Point", "offset": 8 }
        } }
    } }"#;

    fn points(bytes: &mut Vec<u8>, points: &[(usize, i32, i32)]) {
        for &(offset, x, y) in points {
            bytes[offset..offset + 4].copy_from_slice(&x.to_le_bytes());
            bytes[offset + 4..offset + 8].copy_from_slice(&y.to_le_bytes());
        }
    }

    fn setup() -> (Workspace, FileId, FileId) {
        let mut bytes = vec![0; 320];
        points(&mut bytes, &[(300, 1, 10), (100, 5, -3), (200, 3, 30)]);
        let mut other = vec![0; 16];
        points(&mut other, &[(0, 5, 50)]);

        let mut ws = Workspace::new(Schema::from_json(SCHEMA).unwrap());
        let file = ws.add_source(BufferSource::new("main", bytes));
        let other_file = ws.add_source(BufferSource::new("other", other));
        for offset in [300, 100, 200] {
            ws.create_instance("Point", file, offset).unwrap();
        }
        ws.create_instance("Point", other_file, 0).unwrap();
        (ws, file, other_file)
    }

    fn first(ws: &Workspace) -> Instance<'_> {
        ws.instances().remove(0)
    }

    #[test]
    fn test_selector() {
        let (ws, _, _) = setup();
        let root = first(&ws);
        assert_eq!(root.offset(), 300);

        assert_eq!(root.evaluate("@#Point[#=0]"), 100);
        assert_eq!(root.evaluate("@#Point[#=1]"), 200);
        assert_eq!(root.evaluate("@#Point[#=2]"), 300);
        assert_eq!(root.evaluate("@#Point[#=3]"), 0);
        assert_eq!(root.evaluate("$iid(#Point[#=-1])"), -1);
        assert_eq!(root.evaluate("$iid(#Point[#=1 + 1])"), root.id());
        assert_eq!(root.evaluate("#Point[#=1].y"), 30);
    }

    #[test]
    fn test_queries_are_deterministic() {
        let (ws, _, _) = setup();
        let root = first(&ws);
        let sources = [
            "$iid(#Point)",
            "$iid(#Point[#=0])",
            "#Point[x=3].y",
            "@##Point[#=0]",
            "$iid(#Point[#y=-3])",
        ];
        let results: Vec<i64> = sources.iter().map(|source| root.evaluate(source)).collect();
        for _ in 0..3 {
            let again: Vec<i64> = sources.iter().map(|source| root.evaluate(source)).collect();
            assert_eq!(again, results);
        }
        assert_eq!(results[0], root.id());
        assert_eq!(results[2], 30);
        assert_eq!(results[3], 0);
    }

    #[test]
    fn test_filters_and_files() {
        let (ws, file, other_file) = setup();
        let root = first(&ws);

        let found = root_query(&ws, "Point", Some(file), &QueryFilter::NONE);
        assert_eq!(found.len(), 3);
        assert_eq!(root_query(&ws, "Point", None, &QueryFilter::NONE).len(), 4);

        assert_eq!(root.evaluate("@#Point[x=5]"), 100);
        assert_eq!(root.evaluate("$iid(#Point[x=5, #=1])"), -1);
        assert_eq!(root.evaluate("$fpeqs(#Point[x=5].y, \"-3\")"), 1);
        assert_eq!(root.evaluate("$fpnes(#Point.x, \"1\")"), 1);
        assert_eq!(root.evaluate("@#Point[nope=1]"), 0);

        let other = ws.directory().instances_of("Point", Some(other_file));
        let other_root = Instance::new(&ws, Rc::clone(&other[0]));
        assert_eq!(root.evaluate("$iid(##Point[x=5, #=0])"), other_root.id());
        assert_eq!(other_root.evaluate("$iid(#Point)"), other_root.id());
        assert_eq!(other_root.evaluate("#Point[#x=5].y"), 50);
    }

    #[test]
    fn test_subquery_creates_children() {
        let (ws, file, _) = setup();
        let pair = ws.add_instance(NewInstance::new("Pair", file, 96, CreationReason::UserDefined));
        assert_eq!(pair.evaluate("@first"), 96);
        assert_eq!(pair.evaluate("@second"), 104);
        assert_eq!(pair.evaluate("@second[#=0]"), 104);
        assert_eq!(pair.evaluate("second.x"), -3);
        assert_eq!(pair.evaluate("$iid(first) == $iid(first)"), 1);

        let created = ws.directory().find_at("Point", file, 104).unwrap();
        assert_eq!(created.reason(), CreationReason::Query);
        assert_eq!(pair.evaluate("$iid(second)"), created.id());
    }
}
