// File: src/builtins.rs
//
// Built-in native functions for the Kestrel runtime: the global natives
// (clock, abs, pow, typeOf) and the methods carried by each built-in
// type. Natives receive the stack index of their first argument; the
// receiver sits one slot below. A returned Err surfaces as a runtime
// error with that message.

use once_cell::sync::Lazy;
use std::time::Instant;

use crate::object::{NativeFn, ObjBody};
use crate::value::Value;
use crate::vm::Vm;

static START: Lazy<Instant> = Lazy::new(Instant::now);

pub fn install_globals(vm: &mut Vm) {
    Lazy::force(&START);

    vm.define_native("clock", native_clock, 0);
    vm.define_native("abs", native_abs, 1);
    vm.define_native("pow", native_pow, 2);
    vm.define_native("typeOf", native_type_of, 1);
}

/// Resolves a method on a built-in receiver: `(name, function, arity)`.
pub fn method_for(vm: &Vm, receiver: Value, name: &str) -> Option<(&'static str, NativeFn, usize)> {
    if !receiver.is_object() {
        return None;
    }

    let entry: (&'static str, NativeFn, usize) = match &vm.heap.get(receiver.as_object()).body {
        ObjBody::Str(_) => match name {
            "length" => ("length", string_length, 0),
            "isEmpty" => ("isEmpty", string_is_empty, 0),
            "toLower" => ("toLower", string_to_lower, 0),
            "toUpper" => ("toUpper", string_to_upper, 0),
            "startsWith" => ("startsWith", string_starts_with, 1),
            "endsWith" => ("endsWith", string_ends_with, 1),
            _ => return None,
        },
        ObjBody::List(_) => match name {
            "append" => ("append", list_append, 1),
            "pop" => ("pop", list_pop, 0),
            "length" => ("length", list_length, 0),
            _ => return None,
        },
        ObjBody::Map(_) => match name {
            "length" => ("length", map_length, 0),
            "isEmpty" => ("isEmpty", map_is_empty, 0),
            "containsKey" => ("containsKey", map_contains_key, 1),
            "getOrDefault" => ("getOrDefault", map_get_or_default, 2),
            "putIfAbsent" => ("putIfAbsent", map_put_if_absent, 2),
            "putAll" => ("putAll", map_put_all, 1),
            "remove" => ("remove", map_remove, 1),
            "clear" => ("clear", map_clear, 0),
            _ => return None,
        },
        ObjBody::Tuple(_) => match name {
            "length" => ("length", tuple_length, 0),
            _ => return None,
        },
        ObjBody::Coroutine(_) => match name {
            "done" => ("done", coroutine_done, 0),
            _ => return None,
        },
        _ => return None,
    };

    Some(entry)
}

// ---- globals --------------------------------------------------------

fn native_clock(_vm: &mut Vm, _base: usize) -> Result<Value, String> {
    Ok(Value::number(START.elapsed().as_secs_f64()))
}

fn native_abs(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let value = vm.native_arg(base, 0);
    if !value.is_number() {
        return Err("Expected a numeric value.".to_string());
    }

    Ok(Value::number(value.as_number().abs()))
}

fn native_pow(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let x = vm.native_arg(base, 0);
    let y = vm.native_arg(base, 1);
    if !x.is_number() || !y.is_number() {
        return Err("Expected numeric values.".to_string());
    }

    Ok(Value::number(x.as_number().powf(y.as_number())))
}

fn native_type_of(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let value = vm.native_arg(base, 0);

    // An instance reports its class; everything else its type name.
    if value.is_object() {
        if let ObjBody::Instance(instance) = &vm.heap.get(value.as_object()).body {
            let name = vm.heap.class(instance.class).name;
            return Ok(name);
        }
    }

    let name = vm.type_name_of(value);
    Ok(vm.intern(name))
}

// ---- string methods -------------------------------------------------

fn native_string(vm: &Vm, base: usize) -> String {
    vm.heap.str_value(vm.native_receiver(base)).to_string()
}

fn string_length(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base);
    Ok(Value::number(vm.heap.str_value(receiver).len() as f64))
}

fn string_is_empty(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base);
    Ok(Value::boolean(vm.heap.str_value(receiver).is_empty()))
}

fn string_to_lower(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let text = native_string(vm, base).to_lowercase();
    Ok(vm.intern(&text))
}

fn string_to_upper(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let text = native_string(vm, base).to_uppercase();
    Ok(vm.intern(&text))
}

fn string_starts_with(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let prefix = vm.native_arg(base, 0);
    if !vm.heap.is_string(prefix) {
        return Err("Expected a string.".to_string());
    }

    let receiver = vm.native_receiver(base);
    let result = vm.heap.str_value(receiver).starts_with(vm.heap.str_value(prefix));
    Ok(Value::boolean(result))
}

fn string_ends_with(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let suffix = vm.native_arg(base, 0);
    if !vm.heap.is_string(suffix) {
        return Err("Expected a string.".to_string());
    }

    let receiver = vm.native_receiver(base);
    let result = vm.heap.str_value(receiver).ends_with(vm.heap.str_value(suffix));
    Ok(Value::boolean(result))
}

// ---- list methods ---------------------------------------------------

fn list_append(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    let value = vm.native_arg(base, 0);
    vm.heap.list_mut(receiver).elements.push(value);
    Ok(Value::NIL)
}

fn list_pop(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    if vm.heap.list(receiver).elements.is_empty() {
        return Err("Cannot pop an empty list.".to_string());
    }

    vm.heap.list_mut(receiver).elements.pop();
    Ok(Value::NIL)
}

fn list_length(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    Ok(Value::number(vm.heap.list(receiver).elements.len() as f64))
}

// ---- map methods ----------------------------------------------------

fn map_length(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    Ok(Value::number(vm.heap.map(receiver).table.len() as f64))
}

fn map_is_empty(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    Ok(Value::boolean(vm.heap.map(receiver).table.is_empty()))
}

fn map_contains_key(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    let key = vm.native_arg(base, 0);
    let hash = vm.heap.value_hash(key);
    Ok(Value::boolean(vm.heap.map(receiver).table.contains(key, hash)))
}

fn map_get_or_default(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    let key = vm.native_arg(base, 0);
    let default = vm.native_arg(base, 1);
    let hash = vm.heap.value_hash(key);
    Ok(vm.heap.map(receiver).table.get(key, hash).unwrap_or(default))
}

fn map_put_if_absent(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    let key = vm.native_arg(base, 0);
    let value = vm.native_arg(base, 1);
    let hash = vm.heap.value_hash(key);

    match vm.heap.map(receiver).table.get(key, hash) {
        Some(existing) => Ok(existing),
        None => {
            vm.heap.map_mut(receiver).table.put(key, hash, value);
            Ok(Value::NIL)
        }
    }
}

fn map_put_all(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let other = vm.native_arg(base, 0);
    if !other.is_object() || !matches!(vm.heap.get(other.as_object()).body, ObjBody::Map(_)) {
        return Err("Expected a map.".to_string());
    }

    let receiver = vm.native_receiver(base).as_object();
    let entries: Vec<(Value, u32, Value)> =
        vm.heap.map(other.as_object()).table.iter().collect();
    for (key, hash, value) in entries {
        vm.heap.map_mut(receiver).table.put(key, hash, value);
    }

    Ok(Value::NIL)
}

fn map_remove(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    let key = vm.native_arg(base, 0);
    let hash = vm.heap.value_hash(key);
    vm.heap.map_mut(receiver).table.remove(key, hash);
    Ok(Value::NIL)
}

fn map_clear(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    vm.heap.map_mut(receiver).table.clear();
    Ok(Value::NIL)
}

// ---- tuple and coroutine methods ------------------------------------

fn tuple_length(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    Ok(Value::number(vm.heap.tuple(receiver).elements.len() as f64))
}

fn coroutine_done(vm: &mut Vm, base: usize) -> Result<Value, String> {
    let receiver = vm.native_receiver(base).as_object();
    Ok(Value::boolean(vm.heap.coroutine(receiver).done))
}
