//! Value Marshaller (component A): VM values ↔ JSON, bounded recursion,
//! cycle-safe opaque placeholders.

use glint_vm::{VmContract, VmValue};
use serde_json::{Map, Number, Value as Json};

/// Converts one VM value to JSON at the given expansion depth. `depth == 0`
/// means every aggregate is left opaque; each recursion into a nested
/// aggregate decrements it by one.
pub fn to_json(vm: &dyn VmContract, value: &VmValue, depth: u32) -> Json {
    match value {
        VmValue::Nil => Json::Null,
        VmValue::Bool(b) => Json::Bool(*b),
        VmValue::Int(i) => Json::Number((*i).into()),
        VmValue::Float(f) => float_to_json(*f),
        VmValue::Str(s) => Json::String(s.clone()),
        VmValue::Table(_) => {
            if depth == 0 {
                opaque(vm, value)
            } else {
                table_to_json(vm, value, depth)
            }
        },
        VmValue::UserData(_) => {
            if let Some(table) = vm.meta_to_table(value) {
                to_json(vm, &table, depth)
            } else if let Some(s) = vm.meta_to_string(value) {
                Json::String(s)
            } else {
                opaque(vm, value)
            }
        },
        VmValue::Function(_) | VmValue::Thread(_) | VmValue::LightUserData(_) => opaque(vm, value),
    }
}

/// Non-finite values are a deliberate lossy encoding preserved for protocol
/// compatibility: both `+Inf` and `-Inf` render `"Infinity"`.
fn float_to_json(f: f64) -> Json {
    if f.is_nan() {
        Json::String("NaN".into())
    } else if f.is_infinite() {
        Json::String("Infinity".into())
    } else {
        Number::from_f64(f).map_or(Json::Null, Json::Number)
    }
}

fn table_to_json(vm: &dyn VmContract, value: &VmValue, depth: u32) -> Json {
    let len = vm.table_len(value).unwrap_or(0);
    if len > 0 {
        let mut arr = Vec::with_capacity(len);
        for i in 1..=len {
            let key = VmValue::Int(i as i64);
            let elem = vm
                .table_iter(value)
                .into_iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v)
                .unwrap_or(VmValue::Nil);
            arr.push(to_json(vm, &elem, depth.saturating_sub(1)));
        }
        return Json::Array(arr);
    }
    let mut obj = Map::new();
    for (k, v) in vm.table_iter(value) {
        if let VmValue::Str(key) = k {
            obj.insert(key, to_json(vm, &v, depth.saturating_sub(1)));
        }
        // non-string keys are skipped, per the object-shaped encoding rule
    }
    Json::Object(obj)
}

/// `{<typeName>: "<hex-address>"}`, preferring a `__name` metafield. The
/// address is the value's stable handle, so repeated marshalling of the
/// same aggregate within one call yields the same token.
fn opaque(vm: &dyn VmContract, value: &VmValue) -> Json {
    let type_name = vm.meta_name(value).unwrap_or_else(|| vm.type_name(value).to_string());
    let mut obj = Map::new();
    obj.insert(type_name, Json::String(identity_token(value)));
    Json::Object(obj)
}

fn identity_token(value: &VmValue) -> String {
    let addr = match value {
        VmValue::Table(h) | VmValue::Function(h) | VmValue::Thread(h) | VmValue::UserData(h) => {
            h.0
        },
        VmValue::LightUserData(a) => *a,
        _ => 0,
    };
    format!("0x{addr:012x}")
}

/// A single-entry object whose value looks like an identity token this
/// marshaller would have produced — used by [`push_json`] to recognize an
/// opaque placeholder and refuse to re-hydrate it.
fn looks_like_opaque_placeholder(obj: &Map<String, Json>) -> bool {
    obj.len() == 1
        && obj.values().next().is_some_and(|v| {
            matches!(v, Json::String(s) if s.starts_with("0x") && s[2..].chars().all(|c| c.is_ascii_hexdigit()))
        })
}

/// Inverse of [`to_json`]: pushes a JSON value into the VM's working area.
/// Objects become tables with string keys; arrays become 1-indexed sequence
/// tables. Opaque placeholders are not re-hydrated — they push as empty
/// tables.
pub fn push_json(vm: &dyn VmContract, value: &Json) -> VmValue {
    match value {
        Json::Null => VmValue::Nil,
        Json::Bool(b) => VmValue::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                VmValue::Int(i)
            } else {
                VmValue::Float(n.as_f64().unwrap_or(0.0))
            }
        },
        Json::String(s) => VmValue::Str(s.clone()),
        Json::Array(items) => {
            let table = vm.new_table_with_index(VmValue::Nil);
            for (i, item) in items.iter().enumerate() {
                let v = push_json(vm, item);
                vm.table_set(&table, VmValue::Int((i + 1) as i64), v);
            }
            table
        },
        Json::Object(obj) if looks_like_opaque_placeholder(obj) => {
            vm.new_table_with_index(VmValue::Nil)
        },
        Json::Object(obj) => {
            let table = vm.new_table_with_index(VmValue::Nil);
            for (k, v) in obj {
                let pushed = push_json(vm, v);
                vm.table_set(&table, VmValue::Str(k.clone()), pushed);
            }
            table
        },
    }
}
