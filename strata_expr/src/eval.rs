use strata_data_type::IntType;

use crate::{query::Query, Expr, VariableSource};

pub(crate) fn evaluate<V: VariableSource>(expr: &Expr, vs: &V) -> i64 {
    match expr {
        Expr::Constant(value) => *value,
        Expr::Unary(op, a) => op.apply(evaluate(a, vs)),
        Expr::Binary(op, a, b) => {
            let a = evaluate(a, vs);
            let b = evaluate(b, vs);
            op.apply(a, b)
        }
        Expr::RawRead(int_type, offset) => raw_read(*int_type, evaluate(offset, vs), vs),
        Expr::MemberField {
            query,
            name,
            index,
            is_offset,
        } => {
            let insts = instances(query.as_deref(), vs);
            let inst = match insts.first() {
                Some(inst) => inst,
                None => return 0,
            };
            let index = index.as_ref().map(|index| evaluate(index, vs)).unwrap_or(0);
            vs.get_variable(inst, name, index, *is_offset).unwrap_or(0)
        }
        Expr::StructOffset(query) => query
            .execute(vs)
            .first()
            .map(|inst| vs.instance_offset(inst))
            .unwrap_or(0),
        Expr::FieldPreviewEqualsString {
            query,
            name,
            text,
            invert,
        } => {
            let insts = instances(query.as_deref(), vs);
            let found = insts.iter().any(|inst| {
                let equal = vs.field_preview(inst, name).as_deref() == Some(text.as_str());
                equal != *invert
            });
            found as i64
        }
        Expr::InstanceId(query) => instances(query.as_deref(), vs)
            .first()
            .map(|inst| vs.instance_id(inst))
            .unwrap_or(-1),
        Expr::Error => 0,
    }
}

fn instances<V: VariableSource>(query: Option<&Query>, vs: &V) -> Vec<V::Instance> {
    match query {
        Some(query) => query.execute(vs),
        None => vs.initial_set(),
    }
}

fn raw_read<V: VariableSource>(int_type: IntType, offset: i64, vs: &V) -> i64 {
    let mut buf = [0; 8];
    vs.read_file(offset, &mut buf[..int_type.size()]);
    int_type.decode(&buf)
}
