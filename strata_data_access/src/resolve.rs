//! On demand computation of field offsets, counts, sizes and values.
//!
//! Every function takes the workspace and the instance being resolved. Results are
//! cached in the instance and stamped with the edit versions they were computed
//! against. No cache borrow is held across a call that may recurse.
//!
//! In lazy mode, a value that would need field values to be read or child instances
//! to be measured is reported as unknown instead.

use std::{fmt::Write, rc::Rc};

use strata_data_type::{
    join_previews, FieldType, ScalarValue, NOT_LOADED_PREVIEW, NOT_PRESENT_PREVIEW,
};
use strata_layout::{CompArg, CountSource, ExprObj, Field, StructDef};

use crate::{
    cache::{ElementValue, FieldCache, Stamp},
    Arg, CreationReason, FullVariableSource, InParseVariableSource, NewInstance, StructInstance,
    Workspace,
};

/// Callback invoked for each child instance. Returning false stops the walk.
pub(crate) type OnInstance<'a> = dyn FnMut(&Rc<StructInstance>) -> bool + 'a;

pub(crate) fn struct_def<'w>(ws: &'w Workspace, inst: &StructInstance) -> Option<&'w StructDef> {
    ws.schema().get(inst.def_name())
}

fn field_at<'w>(ws: &'w Workspace, inst: &StructInstance, i: usize) -> Option<(&'w str, &'w Field)> {
    struct_def(ws, inst)?.field(i)
}

fn stamp(inst: &StructInstance, def: &StructDef) -> Stamp {
    (inst.edit_version(), def.edit_version())
}

fn entry<T>(inst: &StructInstance, i: usize, f: impl FnOnce(&FieldCache) -> T) -> Option<T> {
    inst.cache.borrow().fields.get(i).map(f)
}

fn update_entry(inst: &StructInstance, i: usize, f: impl FnOnce(&mut FieldCache)) {
    if let Some(entry) = inst.cache.borrow_mut().fields.get_mut(i) {
        f(entry);
    }
}

/// Run `f`, reporting unknown if the depth limit refused a frame anywhere inside it.
///
/// A value cut short by the limit is never cached as if it were real.
fn unless_cut_short<T>(ws: &Workspace, f: impl FnOnce() -> Option<T>) -> Option<T> {
    let refused = ws.depth_refusals();
    let result = f();
    if ws.depth_refusals() == refused {
        result
    } else {
        None
    }
}

fn evaluate_full(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    expr: &ExprObj,
    constants: &[(&str, i64)],
) -> Option<i64> {
    let _frame = ws.enter_frame()?;
    let vs = FullVariableSource::with_constants(ws, Rc::clone(inst), constants);
    Some(expr.evaluate(&vs))
}

fn evaluate_in_parse(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    expr: &ExprObj,
    until_field: usize,
) -> Option<i64> {
    let _frame = ws.enter_frame()?;
    let vs = InParseVariableSource::new(ws, Rc::clone(inst), until_field);
    Some(expr.evaluate(&vs))
}

/// The size of every element of a type, if it does not depend on the instance.
///
/// Undefined struct types have size 0.
fn fixed_type_size(ws: &Workspace, field_type: &FieldType) -> Option<i64> {
    match field_type {
        FieldType::Builtin(builtin) => Some(builtin.size() as i64),
        FieldType::Struct(name) => match ws.schema().get(name) {
            None => Some(0),
            Some(def) if !def.serialized && def.size_src.is_none() => Some(def.size),
            Some(_) => None,
        },
    }
}

/// Return true if field `i` holds child struct instances.
pub(crate) fn is_struct_field(ws: &Workspace, inst: &StructInstance, i: usize) -> bool {
    field_at(ws, inst, i).map_or(false, |(_, field)| {
        field.value_expr.is_none() && field.field_type.struct_name().is_some()
    })
}

/// Make sure at least the first `up_to` fields have cache entries.
///
/// Stops early in lazy mode when a serialized field's size needs reading. A call made
/// while a field of the same instance is being measured never goes past that field.
pub(crate) fn enumerate_fields(ws: &Workspace, inst: &Rc<StructInstance>, up_to: usize, lazy: bool) {
    let def = match struct_def(ws, inst) {
        Some(def) => def,
        None => return,
    };
    let up_to = up_to.min(def.field_count());
    {
        let mut cache = inst.cache.borrow_mut();
        if cache.validate_fields(stamp(inst, def), inst.offset()) {
            log::debug!("instance {}: definition or instance edited", inst.id());
        }
        if cache.fields.len() >= up_to || cache.in_progress.is_some() {
            return;
        }
    }
    let _frame = match ws.enter_frame() {
        Some(frame) => frame,
        None => return,
    };

    loop {
        let (i, cursor) = {
            let cache = inst.cache.borrow();
            if cache.fields.len() >= up_to || cache.in_progress.is_some() {
                return;
            }
            (cache.fields.len(), cache.read_cursor)
        };
        let (name, field) = match def.field(i) {
            Some(field) => field,
            None => return,
        };
        inst.cache.borrow_mut().in_progress = Some(i);

        let condition = match &field.condition {
            Some(condition) => unless_cut_short(ws, || evaluate_in_parse(ws, inst, condition, i)),
            None => Some(1),
        };
        let present = match condition {
            Some(value) => value != 0,
            None => {
                inst.cache.borrow_mut().in_progress = None;
                return;
            }
        };
        let mut new_entry = FieldCache::new(present, cursor);
        if field.value_expr.is_some() {
            new_entry.offset = Some(0);
            new_entry.count = Some(1);
            new_entry.total_size = Some(0);
        } else if !field.is_computed() {
            new_entry.offset = Some(if present && !def.serialized {
                cursor.wrapping_add(field.offset)
            } else {
                cursor
            });
        }
        log::trace!(
            "instance {}: field {} ({}) at {:?}, present: {}",
            inst.id(),
            i,
            name,
            new_entry.offset,
            present
        );
        inst.cache.borrow_mut().fields.push(new_entry);

        if present && def.serialized && !field.is_computed() {
            let size = field_total_size(ws, inst, i, lazy);
            let mut cache = inst.cache.borrow_mut();
            match size {
                Some(size) => cache.read_cursor = cache.read_cursor.wrapping_add(size),
                None => {
                    if cache.fields.len() == i + 1 {
                        cache.fields.pop();
                    }
                    cache.in_progress = None;
                    return;
                }
            }
        }
        inst.cache.borrow_mut().in_progress = None;
    }
}

/// The number of fields with cache entries.
pub(crate) fn cached_field_count(inst: &StructInstance) -> usize {
    inst.cache.borrow().fields.len()
}

pub(crate) fn is_field_present(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    i: usize,
    lazy: bool,
) -> Option<bool> {
    enumerate_fields(ws, inst, i + 1, lazy);
    entry(inst, i, |entry| entry.present)
}

pub(crate) fn field_offset(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    i: usize,
    lazy: bool,
) -> Option<i64> {
    enumerate_fields(ws, inst, i + 1, lazy);
    let (offset, origin) = entry(inst, i, |entry| (entry.offset, entry.origin))?;
    if offset.is_some() || lazy {
        return offset;
    }
    let (_, field) = field_at(ws, inst, i)?;
    let offset_expr = field.offset_expr.as_ref()?;
    let offset = unless_cut_short(ws, || {
        evaluate_full(ws, inst, offset_expr, &[("i", 0), ("orig", origin)])
    })?;
    update_entry(inst, i, |entry| entry.offset = Some(offset));
    Some(offset)
}

pub(crate) fn field_value_offset(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    i: usize,
    n: usize,
    lazy: bool,
) -> Option<i64> {
    let offset = field_offset(ws, inst, i, lazy)?;
    if n == 0 {
        return Some(offset);
    }
    if !lazy {
        if is_struct_field(ws, inst, i) {
            let reason = CreationReason::Query;
            let child = create_field_instances(ws, inst, i, n, reason, &mut |_| true)?;
            return Some(child.offset());
        }
        read_field_values(ws, inst, i, n + 1);
    }
    entry(inst, i, |entry| entry.values.get(n).map(|value| value.offset)).flatten()
}

pub(crate) fn field_element_count(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    i: usize,
    lazy: bool,
) -> Option<i64> {
    enumerate_fields(ws, inst, i + 1, lazy);
    let (count, present) = entry(inst, i, |entry| (entry.count, entry.present))?;
    if count.is_some() {
        return count;
    }
    let count = if present {
        unless_cut_short(ws, || Some(calc_field_element_count(ws, inst, i)))?
    } else {
        0
    };
    let max = ws.limits().max_elements;
    if count > max {
        ws.note_limit_hit("max_elements");
    }
    let count = count.clamp(0, max);
    update_entry(inst, i, |entry| entry.count = Some(count));
    Some(count)
}

fn calc_field_element_count(ws: &Workspace, inst: &Rc<StructInstance>, i: usize) -> i64 {
    let (def, field) = match struct_def(ws, inst).and_then(|def| Some((def, def.field(i)?.1))) {
        Some(found) => found,
        None => return 0,
    };
    if field.value_expr.is_some() {
        return 1;
    }
    match &field.count_src {
        CountSource::Literal => field.count,
        CountSource::FileSize => (ws.file_size(inst.file()) as i64).wrapping_add(field.count),
        CountSource::Named(source) => {
            if let Some(at) = def.field_index(source).filter(|&at| at < i) {
                field_int_value(ws, inst, at, 0).wrapping_add(field.count)
            } else if let Some(value) = inst.arg(source) {
                value.wrapping_add(field.count)
            } else if let Some(value) = def.param(source) {
                value.wrapping_add(field.count)
            } else {
                0
            }
        }
    }
}

pub(crate) fn field_total_size(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    i: usize,
    lazy: bool,
) -> Option<i64> {
    enumerate_fields(ws, inst, i + 1, lazy);
    let cached = entry(inst, i, |entry| entry.total_size)?;
    if cached.is_some() {
        return cached;
    }
    let (_, field) = field_at(ws, inst, i)?;
    let fixed_size = fixed_type_size(ws, &field.field_type);
    if lazy && field.value_expr.is_none() && fixed_size.is_none() {
        return None;
    }

    let total = unless_cut_short(ws, || {
        Some(if field.value_expr.is_some() {
            0
        } else if let Some(element_size) = fixed_size {
            let count = field_element_count(ws, inst, i, false).unwrap_or(0);
            let elements = if field.read_until_zero {
                read_field_values(ws, inst, i, usize::MAX);
                entry(inst, i, |entry| entry.values.len() as i64).unwrap_or(0)
            } else if field.count_is_max_size {
                if element_size > 0 {
                    count / element_size
                } else {
                    0
                }
            } else {
                count
            };
            element_size.wrapping_mul(elements)
        } else {
            let mut total = 0i64;
            create_field_instances(ws, inst, i, usize::MAX, CreationReason::Query, &mut |child| {
                total = total.wrapping_add(size(ws, child, false).unwrap_or(0));
                true
            });
            total
        })
    })?;
    update_entry(inst, i, |entry| entry.total_size = Some(total));
    Some(total)
}

/// Read values of field `i` until at least `n` are cached or the field runs out.
///
/// Returns true if `n` values are available. Only builtin and value expression fields
/// have values.
pub(crate) fn read_field_values(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    i: usize,
    n: usize,
) -> bool {
    enumerate_fields(ws, inst, i + 1, false);
    let have = match entry(inst, i, |entry| entry.values.len()) {
        Some(have) => have,
        None => return false,
    };
    if have >= n {
        return true;
    }
    let field = match field_at(ws, inst, i) {
        Some((_, field)) => field,
        None => return false,
    };

    if let Some(value_expr) = &field.value_expr {
        let origin = entry(inst, i, |entry| entry.origin).unwrap_or(0);
        let value = unless_cut_short(ws, || {
            evaluate_full(ws, inst, value_expr, &[("orig", origin)])
        });
        let value = match value {
            Some(value) => value,
            None => return false,
        };
        update_entry(inst, i, |entry| {
            if entry.values.is_empty() {
                entry.values.push(ElementValue {
                    offset: 0,
                    int: value,
                    preview: value.to_string(),
                });
            }
        });
        return n <= 1;
    }

    let builtin = match field.field_type.builtin() {
        Some(builtin) => builtin,
        None => return false,
    };
    let offset = field_offset(ws, inst, i, false).unwrap_or(0);
    let count = field_element_count(ws, inst, i, false).unwrap_or(0);
    let element_size = builtin.size();

    let mut cache = inst.cache.borrow_mut();
    let entry = match cache.fields.get_mut(i) {
        Some(entry) => entry,
        None => return false,
    };
    let mut cursor = entry.read_cursor.unwrap_or(offset);
    let mut buf = [0; 8];
    while entry.values.len() < n {
        let more = if field.count_is_max_size {
            cursor.wrapping_sub(offset).wrapping_add(element_size as i64) <= count
        } else {
            count > entry.values.len() as i64
        };
        let ended = field.read_until_zero && entry.values.last().map_or(false, |v| v.int == 0);
        if !more || ended {
            break;
        }
        let bytes = &mut buf[..element_size];
        ws.read_file(inst.file(), cursor, bytes);
        let value = ScalarValue::decode(builtin, bytes);
        entry.values.push(ElementValue {
            offset: cursor,
            int: value.to_int(),
            preview: value.preview(),
        });
        cursor = cursor.wrapping_add(element_size as i64);
    }
    entry.read_cursor = Some(cursor);
    entry.values.len() >= n
}

pub(crate) fn field_int_value(ws: &Workspace, inst: &Rc<StructInstance>, i: usize, n: usize) -> i64 {
    if !read_field_values(ws, inst, i, n.saturating_add(1)) {
        return 0;
    }
    entry(inst, i, |entry| entry.values.get(n).map(|value| value.int))
        .flatten()
        .unwrap_or(0)
}

pub(crate) fn field_value_preview(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    i: usize,
    n: usize,
) -> Option<String> {
    if !read_field_values(ws, inst, i, n.saturating_add(1)) {
        return None;
    }
    entry(inst, i, |entry| entry.values.get(n).map(|value| value.preview.clone())).flatten()
}

pub(crate) fn field_preview(ws: &Workspace, inst: &Rc<StructInstance>, i: usize, lazy: bool) -> String {
    enumerate_fields(ws, inst, i + 1, lazy);
    let (present, cached) = match entry(inst, i, |entry| (entry.present, entry.preview.clone())) {
        Some(found) => found,
        None => return NOT_LOADED_PREVIEW.to_string(),
    };
    if !present {
        return NOT_PRESENT_PREVIEW.to_string();
    }
    if let Some(preview) = cached {
        return preview;
    }
    if field_offset(ws, inst, i, lazy).is_none() {
        return NOT_LOADED_PREVIEW.to_string();
    }

    let separated = field_at(ws, inst, i)
        .and_then(|(_, field)| field.field_type.builtin())
        .map_or(true, |builtin| builtin.is_separated());
    let previews = (0..).map_while(|n| field_value_preview(ws, inst, i, n));
    let preview = join_previews(separated, previews);
    update_entry(inst, i, |entry| entry.preview = Some(preview.clone()));
    preview
}

/// A one line description of field `i`, computed lazily.
pub(crate) fn field_summary(ws: &Workspace, inst: &Rc<StructInstance>, i: usize) -> String {
    let (name, field) = match field_at(ws, inst, i) {
        Some(found) => found,
        None => return String::new(),
    };
    enumerate_fields(ws, inst, i + 1, true);

    let mut text = format!("{}: {}", name, field.field_type);
    if field.count_is_max_size || !field.is_one() {
        text.push('[');
        if field.count_is_max_size {
            text.push_str("up to ");
        }
        match field_element_count(ws, inst, i, true) {
            Some(count) => {
                let _ = write!(text, "{}", count);
            }
            None => text.push('?'),
        }
        text.push(']');
    }
    match field_offset(ws, inst, i, true) {
        Some(offset) => {
            let _ = write!(text, "@{}", offset);
        }
        None => text.push_str("@?"),
    }
    text.push('=');
    text.push_str(&field_preview(ws, inst, i, true));
    text
}

pub(crate) fn size(ws: &Workspace, inst: &Rc<StructInstance>, lazy: bool) -> Option<i64> {
    let def = match struct_def(ws, inst) {
        Some(def) => def,
        None => return Some(0),
    };
    let stamp = stamp(inst, def);
    if let Some(size) = inst.cache.borrow().size(stamp) {
        return Some(size);
    }
    let size = unless_cut_short(ws, || calc_size(ws, inst, def, lazy))?;
    inst.cache.borrow_mut().set_size(stamp, size);
    Some(size)
}

fn calc_size(ws: &Workspace, inst: &Rc<StructInstance>, def: &StructDef, lazy: bool) -> Option<i64> {
    if let Some(source) = &def.size_src {
        if lazy {
            return None;
        }
        let base = if let Some(at) = def.field_index(source) {
            field_int_value(ws, inst, at, 0)
        } else if let Some(value) = inst.arg(source) {
            value
        } else {
            def.param(source).unwrap_or(0)
        };
        Some(base.wrapping_add(def.size))
    } else if def.serialized {
        if !lazy {
            enumerate_fields(ws, inst, def.field_count(), false);
        }
        let cache = inst.cache.borrow();
        if cache.fields.len() < def.field_count() || cache.in_progress.is_some() {
            return None;
        }
        Some(cache.read_cursor.wrapping_sub(inst.offset()))
    } else {
        Some(def.size)
    }
}

/// The chain budget consumed by one instance of the given size.
fn chain_step(inst: &StructInstance, size: i64) -> i64 {
    if inst.remaining_count_is_size() {
        inst.size_override().unwrap_or(size)
    } else {
        1
    }
}

pub(crate) fn can_create_next_instance(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    lazy: bool,
    loose: bool,
) -> Option<bool> {
    let size = size(ws, inst, lazy)?;
    let left = inst.remaining_count().wrapping_sub(chain_step(inst, size));
    Some(if loose { left != 0 } else { left > 0 })
}

pub(crate) fn next_instance_info(ws: &Workspace, inst: &Rc<StructInstance>, lazy: bool) -> String {
    let unit = if inst.remaining_count_is_size() {
        "size"
    } else {
        "count"
    };
    match size(ws, inst, lazy) {
        Some(size) => {
            let stride = inst.size_override().unwrap_or(size);
            format!(
                "@{}, after {}, rem. {}: {}",
                inst.offset().wrapping_add(size),
                stride,
                unit,
                inst.remaining_count().wrapping_sub(chain_step(inst, size))
            )
        }
        None => format!("@?, after ?, rem. {}: ?", unit),
    }
}

pub(crate) fn create_next_instance(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    reason: CreationReason,
) -> Option<Rc<StructInstance>> {
    let size = size(ws, inst, false)?;
    if size == 0 {
        log::warn!(
            "instance {}: {} has size 0, not creating the next instance",
            inst.id(),
            inst.def_name()
        );
        return None;
    }
    let left = inst.remaining_count().wrapping_sub(chain_step(inst, size));
    if left <= 0 {
        return None;
    }
    let props = inst.props().clone();
    let new = NewInstance {
        def_name: inst.def_name().to_string(),
        file: inst.file(),
        offset: inst.offset().wrapping_add(props.size_override.unwrap_or(size)),
        notes: props.notes,
        reason,
        allow_auto_expand: props.allow_auto_expand,
        remaining_count: left,
        remaining_count_is_size: props.remaining_count_is_size,
        size_override: None,
        args: props.args,
    };
    Some(ws.directory().add_instance(new).instance)
}

/// Create or reuse the child instances of struct-typed field `i`, calling `on_each`
/// for each in element order.
///
/// Returns the child that stopped the walk, or element `up_to_n` if the walk got that
/// far, or `None`.
pub(crate) fn create_field_instances(
    ws: &Workspace,
    inst: &Rc<StructInstance>,
    i: usize,
    up_to_n: usize,
    reason: CreationReason,
    on_each: &mut OnInstance<'_>,
) -> Option<Rc<StructInstance>> {
    let (_, field) = field_at(ws, inst, i)?;
    if field.value_expr.is_some() {
        return None;
    }
    let type_name = field.field_type.struct_name()?;
    ws.schema().get(type_name)?;
    let count = field_element_count(ws, inst, i, false).unwrap_or(0);
    if count <= 0 {
        return None;
    }

    let add = |offset: i64, remaining_count: i64, is_size: bool| {
        let new = NewInstance::new(type_name, inst.file(), offset, reason)
            .with_remaining_count(remaining_count, is_size);
        let added = ws.directory().add_instance(new);
        if added.inserted && !field.struct_args.is_empty() {
            let args = field
                .struct_args
                .iter()
                .map(|arg| Arg {
                    name: arg.name.clone(),
                    value: comp_arg_value(ws, inst, arg),
                })
                .collect();
            added.instance.bind_args(args);
        }
        added.instance
    };

    if let (true, Some(offset_expr)) = (field.individual_computed_offsets, &field.offset_expr) {
        let origin = entry(inst, i, |entry| entry.origin)?;
        let file_size = ws.file_size(inst.file());
        for n in 0..count {
            let offset = evaluate_full(ws, inst, offset_expr, &[("i", n), ("orig", origin)])?;
            if u64::try_from(offset).map_or(true, |offset| offset >= file_size) {
                continue;
            }
            if let Some(condition) = &field.element_condition {
                let constants = [("i", n), ("off", offset), ("orig", origin)];
                if evaluate_full(ws, inst, condition, &constants).unwrap_or(0) == 0 {
                    continue;
                }
            }
            let child = add(offset, 1, false);
            if !on_each(&child) || n as usize == up_to_n {
                return Some(child);
            }
        }
        return None;
    }

    let offset = field_offset(ws, inst, i, false).unwrap_or(0);
    let mut current = add(offset, count, field.count_is_max_size);
    if !on_each(&current) {
        return Some(current);
    }
    let mut n = 0;
    while n < up_to_n
        && ((n + 1) as i64) < count
        && can_create_next_instance(ws, &current, false, false) == Some(true)
    {
        current = match create_next_instance(ws, &current, reason) {
            Some(next) => next,
            None => break,
        };
        if !on_each(&current) {
            return Some(current);
        }
        n += 1;
    }
    if n == up_to_n {
        Some(current)
    } else {
        None
    }
}

/// The value bound to a child argument: the literal value, or the value added to the
/// named field, argument or parameter of `inst`.
pub(crate) fn comp_arg_value(ws: &Workspace, inst: &Rc<StructInstance>, arg: &CompArg) -> i64 {
    let source = match &arg.src {
        Some(source) => source,
        None => return arg.value,
    };
    let def = struct_def(ws, inst);
    if let Some(at) = def.and_then(|def| def.field_index(source)) {
        field_int_value(ws, inst, at, 0).wrapping_add(arg.value)
    } else if let Some(value) = inst.arg(source) {
        value.wrapping_add(arg.value)
    } else if let Some(value) = def.and_then(|def| def.param(source)) {
        value.wrapping_add(arg.value)
    } else {
        0
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;

    use strata_layout::Schema;
    use strata_memory::{BufferSource, DataSource, DataSourceError};

    use crate::{FileId, NewInstance, ResolveLimits};

    use super::*;

    fn workspace(schema: &str, bytes: Vec<u8>) -> (Workspace, FileId) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut ws = Workspace::new(Schema::from_json(schema).unwrap());
        let file = ws.add_source(BufferSource::new("data", bytes));
        (ws, file)
    }

    fn put(bytes: &mut [u8], offset: usize, data: &[u8]) {
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    const POINT: &str = r#"{ "structs": {
        "Point": { "serialized": true, "fields": { "x": { "type": "i32" }, "y": { "type": "i32" } } }
    } }"#;

    #[test]
    fn test_serialized_point() {
        let mut bytes = vec![0; 200];
        put(&mut bytes, 100, &5i32.to_le_bytes());
        put(&mut bytes, 104, &(-3i32).to_le_bytes());
        let (ws, file) = workspace(POINT, bytes);

        let point = ws.create_instance("Point", file, 100).unwrap();
        assert_eq!(point.field_offset(0, false), Some(100));
        assert_eq!(point.field_offset(1, false), Some(104));
        assert_eq!(point.size(false), Some(8));
        assert_eq!(point.field_int_value(0, 0), 5);
        assert_eq!(point.field_int_value(1, 0), -3);
        assert_eq!(point.field_preview(1, false), "-3");
        assert_eq!(point.field_summary(1), "y: i32@104=-3");
        assert_eq!(point.evaluate("x + y"), 2);
        assert_eq!(point.evaluate("@y"), 104);
        assert_eq!(point.evaluate("$i32 @y"), -3);
    }

    #[derive(Debug)]
    struct CountingSource {
        inner: BufferSource,
        reads: Rc<Cell<usize>>,
    }

    impl DataSource for CountingSource {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn size(&self) -> u64 {
            self.inner.size()
        }

        fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DataSourceError> {
            self.reads.set(self.reads.get() + 1);
            self.inner.read(offset, buf)
        }
    }

    const HEADER: &str = r#"{ "structs": {
        "Header": { "serialized": true, "fields": {
            "count": { "type": "u8" },
            "items": { "type": "i16", "count": 0, "count_src": "count" },
            "tail": { "type": "u32" }
        } }
    } }"#;

    fn header_bytes() -> Vec<u8> {
        let mut bytes = vec![3];
        for item in [1i16, -2, 3] {
            bytes.extend_from_slice(&item.to_le_bytes());
        }
        bytes.extend_from_slice(&0xdeadbeefu32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_enumeration_is_idempotent() {
        let reads = Rc::new(Cell::new(0));
        let mut ws = Workspace::new(Schema::from_json(HEADER).unwrap());
        let file = ws.add_source(CountingSource {
            inner: BufferSource::new("header", header_bytes()),
            reads: Rc::clone(&reads),
        });
        let header = ws.create_instance("Header", file, 0).unwrap();

        header.enumerate_fields(3, false);
        assert_eq!(header.cached_field_count(), 3);
        let after_first = reads.get();
        assert_eq!(after_first, 1);

        header.enumerate_fields(3, false);
        header.enumerate_fields(2, false);
        assert_eq!(header.cached_field_count(), 3);
        assert_eq!(reads.get(), after_first);

        assert_eq!(header.field_offset(2, false), Some(7));
        assert_eq!(header.field_int_value(2, 0), 0xdeadbeef);
        assert_eq!(header.field_int_value(2, 0), 0xdeadbeef);
        assert_eq!(reads.get(), after_first + 1);
        assert_eq!(header.size(false), Some(11));
    }

    #[test]
    fn test_cursor_is_monotonic() {
        let (ws, file) = workspace(HEADER, header_bytes());
        let header = ws.create_instance("Header", file, 0).unwrap();

        let mut last = 0;
        for up_to in 1..=3 {
            header.enumerate_fields(up_to, false);
            let offset = header.field_offset(up_to - 1, true).unwrap();
            assert!(offset >= last);
            last = offset;
        }
        assert_eq!(header.field_element_count(1, false), Some(3));
        assert_eq!(header.field_total_size(1, false), Some(6));
        assert_eq!(header.field_preview(1, false), "1, -2, 3");
        assert_eq!(header.field_value_offset(1, 2, false), Some(5));
        assert_eq!(header.field_summary(1), "items: i16[3]@1=1, -2, 3");
        assert_eq!(header.evaluate("$arr(items, 1)"), -2);
        assert_eq!(header.evaluate("$arr(@items, 1)"), 3);
    }

    #[test]
    fn test_definition_edit_invalidates() {
        let mut bytes = vec![0; 16];
        put(&mut bytes, 0, &7i32.to_le_bytes());
        let (mut ws, file) = workspace(POINT, bytes);
        let id = {
            let point = ws.create_instance("Point", file, 0).unwrap();
            assert_eq!(point.field_offset(1, false), Some(4));
            assert_eq!(point.size(false), Some(8));
            point.id()
        };

        ws.schema_mut()
            .edit("Point", |def| {
                def.fields["x"].field_type = strata_data_type::FieldType::from_name("i16");
            })
            .unwrap();

        let point = ws.instance(id).unwrap();
        assert_eq!(point.field_offset(1, false), Some(2));
        assert_eq!(point.size(false), Some(6));
        assert_eq!(point.field_int_value(0, 0), 7);
    }

    #[test]
    fn test_instance_edit_invalidates() {
        let schema = r#"{ "structs": {
            "Blob": { "serialized": true, "fields": {
                "data": { "type": "u8", "count": 0, "count_src": "n" }
            } }
        } }"#;
        let (ws, file) = workspace(schema, (1..=8).collect());
        let blob = ws.add_instance(
            NewInstance::new("Blob", file, 0, CreationReason::UserDefined).with_arg("n", 2),
        );
        assert_eq!(blob.size(false), Some(2));
        assert_eq!(blob.field_preview(0, false), "1, 2");

        blob.set_arg("n", 4);
        assert_eq!(blob.size(false), Some(4));
        assert_eq!(blob.field_preview(0, false), "1, 2, 3, 4");
    }

    #[test]
    fn test_lazy_stop_leaves_no_entry() {
        let schema = r#"{ "structs": {
            "Outer": { "serialized": true, "fields": {
                "a": { "type": "u8" },
                "inner": { "type": "Inner" },
                "b": { "type": "u8" }
            } },
            "Inner": { "serialized": true, "fields": { "v": { "type": "u16" } } }
        } }"#;
        let (ws, file) = workspace(schema, vec![1, 2, 0, 3]);
        let outer = ws.create_instance("Outer", file, 0).unwrap();

        outer.enumerate_fields(3, true);
        assert_eq!(outer.cached_field_count(), 1);
        assert_eq!(outer.field_offset(2, true), None);
        assert_eq!(outer.size(true), None);
        assert_eq!(outer.field_summary(2), "b: u8@?=<?>");

        assert_eq!(outer.field_offset(2, false), Some(3));
        assert_eq!(outer.field_int_value(2, 0), 3);
        assert_eq!(outer.size(true), Some(4));
        assert_eq!(outer.field_summary(1), "inner: Inner@1=...");
    }

    #[test]
    fn test_conditions_and_counts() {
        let schema = r#"{ "structs": {
            "Rec": { "serialized": true, "fields": {
                "flags": { "type": "u8" },
                "extra": { "type": "u16", "condition": "flags & 1" },
                "name": { "type": "char", "count": 4 }
            } }
        } }"#;
        let mut bytes = vec![1, 0x34, 0x12];
        bytes.extend_from_slice(b"abcd");
        bytes.push(0);
        bytes.extend_from_slice(b"wx\nz");
        let (ws, file) = workspace(schema, bytes);

        let with_extra = ws.create_instance("Rec", file, 0).unwrap();
        assert_eq!(with_extra.is_field_present(1, false), Some(true));
        assert_eq!(with_extra.field_int_value(1, 0), 0x1234);
        assert_eq!(with_extra.field_preview(2, false), "abcd");
        assert_eq!(with_extra.size(false), Some(7));

        let without = ws.create_instance("Rec", file, 7).unwrap();
        assert_eq!(without.is_field_present(1, false), Some(false));
        assert_eq!(without.field_preview(1, false), "<not present>");
        assert_eq!(without.field_element_count(1, false), Some(0));
        assert_eq!(without.field_offset(2, false), Some(8));
        assert_eq!(without.field_preview(2, false), "wx\\x0az");
        assert_eq!(without.size(false), Some(5));
    }

    #[test]
    fn test_special_counts() {
        let schema = r#"{ "structs": {
            "Whole": { "serialized": true, "fields": {
                "bytes": { "type": "u8", "count": 0, "count_src": ":file-size" }
            } },
            "Text": { "serialized": true, "fields": {
                "text": { "type": "char", "count": 16, "read_until_zero": true },
                "after": { "type": "u8" }
            } },
            "Budget": { "serialized": true, "fields": {
                "halves": { "type": "u16", "count": 5, "count_is_max_size": true },
                "after": { "type": "u8" }
            } }
        } }"#;
        let (ws, file) = workspace(schema, b"hi\0XYZ".to_vec());

        let whole = ws.create_instance("Whole", file, 0).unwrap();
        assert_eq!(whole.size(false), Some(6));

        let text = ws.create_instance("Text", file, 0).unwrap();
        assert_eq!(text.field_total_size(0, false), Some(3));
        assert_eq!(text.field_offset(1, false), Some(3));
        assert_eq!(text.field_int_value(1, 0), b'X' as i64);

        let budget = ws.create_instance("Budget", file, 0).unwrap();
        assert_eq!(budget.field_element_count(0, false), Some(5));
        assert_eq!(budget.field_total_size(0, false), Some(4));
        assert_eq!(budget.field_offset(1, false), Some(4));
        assert!(budget.field_summary(0).starts_with("halves: u16[up to 5]@0="));
    }

    #[test]
    fn test_computed_fields() {
        let schema = r#"{ "structs": {
            "V": { "serialized": true, "fields": {
                "a": { "type": "u8" },
                "b": { "type": "i32", "value_expr": "a * 2 + orig" },
                "c": { "type": "u8" }
            } },
            "Ptr": { "size": 4, "fields": {
                "ptr": { "type": "u8" },
                "target": { "type": "u8", "offset_expr": "ptr" }
            } }
        } }"#;
        let mut bytes = vec![0; 16];
        bytes[0] = 5;
        bytes[5] = 42;
        bytes[10] = 7;
        bytes[11] = 9;
        let (ws, file) = workspace(schema, bytes);

        let v = ws.create_instance("V", file, 10).unwrap();
        assert_eq!(v.field_int_value(1, 0), 25);
        assert_eq!(v.field_offset(1, false), Some(0));
        assert_eq!(v.field_total_size(1, false), Some(0));
        assert_eq!(v.field_offset(2, false), Some(11));
        assert_eq!(v.size(false), Some(2));

        let ptr = ws.create_instance("Ptr", file, 0).unwrap();
        assert_eq!(ptr.field_offset(1, true), None);
        assert_eq!(ptr.field_offset(1, false), Some(5));
        assert_eq!(ptr.field_int_value(1, 0), 42);
        assert_eq!(ptr.size(true), Some(4));
    }

    #[test]
    fn test_sequential_chain() {
        let schema = r#"{ "structs": {
            "Rec": { "size": 4, "fields": { "v": { "type": "i32" } } },
            "Empty": { "fields": {} }
        } }"#;
        let (ws, file) = workspace(schema, vec![0; 64]);

        let n = 4;
        let mut current = ws.add_instance(
            NewInstance::new("Rec", file, 0, CreationReason::UserDefined)
                .with_remaining_count(n, false),
        );
        assert_eq!(current.next_instance_info(false), "@4, after 4, rem. count: 3");
        let mut created = 0;
        while let Some(next) = current.create_next_instance(CreationReason::ManualExpand) {
            assert_eq!(next.offset(), current.offset() + 4);
            created += 1;
            current = next;
        }
        assert_eq!(created, n - 1);
        assert_eq!(current.remaining_count(), 1);
        assert_eq!(current.can_create_next_instance(false, false), Some(false));

        let bytes = ws.add_instance(
            NewInstance::new("Rec", file, 32, CreationReason::UserDefined)
                .with_remaining_count(10, true),
        );
        let second = bytes.create_next_instance(CreationReason::ManualExpand).unwrap();
        assert_eq!(second.remaining_count(), 6);
        let third = second.create_next_instance(CreationReason::ManualExpand).unwrap();
        assert_eq!(third.remaining_count(), 2);
        assert_eq!(third.can_create_next_instance(false, false), Some(false));
        assert_eq!(third.can_create_next_instance(false, true), Some(true));
        assert!(third.create_next_instance(CreationReason::ManualExpand).is_none());

        bytes.set_size_override(Some(8));
        assert_eq!(bytes.next_instance_info(false), "@36, after 8, rem. size: 2");
        let skipped = bytes.create_next_instance(CreationReason::ManualExpand).unwrap();
        assert_eq!(skipped.offset(), 40);
        assert_eq!(skipped.size_override(), None);

        let empty = ws.add_instance(
            NewInstance::new("Empty", file, 0, CreationReason::UserDefined)
                .with_remaining_count(5, false),
        );
        assert!(empty.create_next_instance(CreationReason::ManualExpand).is_none());
    }

    const TABLE: &str = r#"{ "structs": {
        "Table": { "serialized": true, "fields": {
            "n": { "type": "u8" },
            "rows": {
                "type": "Row",
                "count": 0,
                "count_src": "n",
                "struct_args": [{ "name": "width", "src": "n" }]
            },
            "end": { "type": "u8" }
        } },
        "Row": {
            "size": 0,
            "size_src": "width",
            "params": [{ "name": "width", "value": 1 }],
            "fields": { "v": { "type": "u8" } }
        }
    } }"#;

    #[test]
    fn test_struct_field_children() {
        let (ws, file) = workspace(TABLE, vec![2, 10, 11, 20, 21, 99]);
        let table = ws.create_instance("Table", file, 0).unwrap();

        assert_eq!(table.field_total_size(1, false), Some(4));
        assert_eq!(table.field_offset(2, false), Some(5));
        assert_eq!(table.field_int_value(2, 0), 99);
        assert_eq!(table.size(false), Some(6));

        let rows = ws.directory().instances_of("Row", Some(file));
        let offsets: Vec<i64> = rows.iter().map(|row| row.offset()).collect();
        assert_eq!(offsets, vec![1, 3]);
        assert!(rows.iter().all(|row| row.arg("width") == Some(2)));
        assert!(rows.iter().all(|row| row.reason() == CreationReason::Query));

        let mut seen = Vec::new();
        let second = table.create_field_instances(1, 1, CreationReason::ManualExpand, |row| {
            seen.push(row.offset());
            true
        });
        assert_eq!(seen, vec![1, 3]);
        assert_eq!(second.map(|row| row.offset()), Some(3));
        assert_eq!(ws.directory().len(), 3);
        assert_eq!(rows[0].reason(), CreationReason::ManualExpand);

        let arg = CompArg {
            name: "width".to_string(),
            src: Some("n".to_string()),
            value: 3,
        };
        assert_eq!(table.comp_arg_value(&arg), 5);
    }

    #[test]
    fn test_individual_offsets() {
        let schema = r#"{ "structs": {
            "Dir": { "size": 4, "fields": {
                "n": { "type": "u8" },
                "entries": {
                    "type": "Entry",
                    "count": 0,
                    "count_src": "n",
                    "offset_expr": "$u8 (1 + i)",
                    "individual_computed_offsets": true,
                    "element_condition": "off != 0"
                }
            } },
            "Entry": { "size": 2, "fields": { "v": { "type": "u8" } } }
        } }"#;
        let mut bytes = vec![0; 16];
        put(&mut bytes, 0, &[3, 10, 0, 12]);
        bytes[10] = 7;
        bytes[12] = 9;
        let (ws, file) = workspace(schema, bytes);
        let dir = ws.create_instance("Dir", file, 0).unwrap();

        let mut offsets = Vec::new();
        dir.create_field_instances(1, usize::MAX, CreationReason::Query, |entry| {
            offsets.push(entry.offset());
            true
        });
        assert_eq!(offsets, vec![10, 12]);
        assert_eq!(dir.evaluate("entries[#=1].v"), 9);
        assert_eq!(dir.evaluate("$iid(entries[#=2])"), -1);
    }

    #[test]
    fn test_recursion_is_bounded() {
        let schema = r#"{ "structs": {
            "Chain": { "serialized": true, "fields": {
                "a": { "type": "u8" },
                "next": { "type": "Chain" }
            } },
            "Same": { "serialized": true, "fields": { "me": { "type": "Same" } } },
            "Odd": { "size": 4, "fields": { "a": { "type": "i32", "offset_expr": "@a + 1" } } }
        } }"#;
        let _ = env_logger::builder().is_test(true).try_init();
        let limits = ResolveLimits {
            max_depth: 8,
            ..ResolveLimits::default()
        };
        let mut ws = Workspace::with_limits(Schema::from_json(schema).unwrap(), limits);
        let file = ws.add_source(BufferSource::new("data", vec![0; 64]));

        let chain = ws.create_instance("Chain", file, 0).unwrap();
        chain.size(false);
        assert!(ws.limit_hits() > 0);

        let same = ws.create_instance("Same", file, 0).unwrap();
        assert_eq!(same.size(false), Some(0));

        let hits = ws.limit_hits();
        let odd = ws.create_instance("Odd", file, 0).unwrap();
        odd.field_offset(0, false);
        assert!(ws.limit_hits() > hits);
    }

    #[test]
    fn test_redefinition_invalidates() {
        let (mut ws, file) = workspace(POINT, vec![0; 16]);
        let id = {
            let point = ws.create_instance("Point", file, 0).unwrap();
            assert_eq!(point.field_offset(1, false), Some(4));
            assert_eq!(point.size(false), Some(8));
            point.id()
        };

        ws.schema_mut().remove("Point");
        ws.schema_mut().insert(
            "Point",
            StructDef::serialized()
                .with_field("x", Field::of_type("i16"))
                .with_field("y", Field::of_type("i32")),
        );

        let point = ws.instance(id).unwrap();
        assert_eq!(point.field_offset(1, false), Some(2));
        assert_eq!(point.size(false), Some(6));
    }

    #[test]
    fn test_byte_budget_reads_whole_elements() {
        let schema = r#"{ "structs": {
            "Budget": { "serialized": true, "fields": {
                "halves": { "type": "u16", "count": 5, "count_is_max_size": true },
                "after": { "type": "u8" }
            } }
        } }"#;
        let (ws, file) = workspace(schema, vec![1, 0, 2, 0, 3, 0, 4, 0]);
        let budget = ws.create_instance("Budget", file, 0).unwrap();

        assert_eq!(budget.field_element_count(0, false), Some(5));
        assert_eq!(budget.field_total_size(0, false), Some(4));
        assert_eq!(budget.field_preview(0, false), "1, 2");
        assert_eq!(budget.field_value_preview(0, 1).as_deref(), Some("2"));
        assert_eq!(budget.field_value_preview(0, 2), None);
        assert_eq!(budget.field_value_offset(0, 2, false), None);
        assert_eq!(budget.field_offset(1, false), Some(4));
        assert_eq!(budget.field_int_value(1, 0), 3);
    }

    #[test]
    fn test_struct_element_offsets() {
        let (ws, file) = workspace(TABLE, vec![2, 10, 11, 20, 21, 99]);
        let table = ws.create_instance("Table", file, 0).unwrap();

        assert_eq!(table.field_value_offset(1, 0, false), Some(1));
        assert_eq!(table.field_value_offset(1, 1, false), Some(3));
        assert_eq!(table.field_value_offset(1, 2, false), None);
        assert_eq!(table.field_value_offset(1, 1, true), None);
        assert_eq!(table.evaluate("$arr(@rows, 0)"), 1);
        assert_eq!(table.evaluate("$arr(@rows, 1)"), 3);
        assert_eq!(table.evaluate("$arr(@rows, 2)"), 0);
        assert_eq!(table.evaluate("@rows[#=1]"), 3);
    }

    #[test]
    fn test_depth_limit_is_not_cached() {
        let schema = r#"{ "structs": {
            "Rec": { "serialized": true, "fields": {
                "flags": { "type": "u8" },
                "extra": { "type": "u8", "condition": "flags & 1" }
            } },
            "Outer": { "serialized": true, "fields": {
                "inner": { "type": "Inner" },
                "b": { "type": "u8" }
            } },
            "Inner": { "serialized": true, "fields": { "v": { "type": "u16" } } }
        } }"#;
        let _ = env_logger::builder().is_test(true).try_init();
        let limits = ResolveLimits {
            max_depth: 1,
            ..ResolveLimits::default()
        };
        let mut ws = Workspace::with_limits(Schema::from_json(schema).unwrap(), limits);
        let file = ws.add_source(BufferSource::new("data", vec![1, 2, 0, 3]));

        let (rec_id, outer_id) = {
            let rec = ws.create_instance("Rec", file, 0).unwrap();
            assert_eq!(rec.is_field_present(1, false), None);
            assert_eq!(rec.cached_field_count(), 1);

            let outer = ws.create_instance("Outer", file, 1).unwrap();
            assert_eq!(outer.size(false), None);
            assert_eq!(outer.field_offset(1, false), None);
            assert_eq!(outer.cached_field_count(), 0);
            (rec.id(), outer.id())
        };
        assert!(ws.limit_hits() > 0);

        ws.set_limits(ResolveLimits::default());
        let rec = ws.instance(rec_id).unwrap();
        assert_eq!(rec.is_field_present(1, false), Some(true));
        assert_eq!(rec.field_int_value(1, 0), 2);

        let outer = ws.instance(outer_id).unwrap();
        assert_eq!(outer.size(false), Some(3));
        assert_eq!(outer.field_offset(1, false), Some(3));
        assert_eq!(outer.field_int_value(1, 0), 3);
    }
}
