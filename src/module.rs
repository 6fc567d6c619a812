// File: src/module.rs
//
// The module loader stub. Imports are recorded — a Module object is
// created per path, cached in the VM's registry, and handed back to the
// import opcodes — but nothing is resolved against a filesystem.

use crate::object::{ModuleObj, ObjBody};
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

/// Splits a full import path into directory part and module name, e.g.
/// `"lib/math"` into `("lib/", "math")`.
fn split_path(full: &str) -> (String, String) {
    match full.rfind('/') {
        Some(index) => (full[..index + 1].to_string(), full[index + 1..].to_string()),
        None => (String::new(), full.to_string()),
    }
}

/// Returns the Module object for `path`, creating and registering it on
/// first import. `path` must already be an interned string value.
pub fn import_module(vm: &mut Vm, path: Value) -> Value {
    let hash = vm.heap.value_hash(path);
    if let Some(existing) = vm.modules.get(path, hash) {
        return existing;
    }

    let (directory, name) = split_path(vm.heap.str_value(path));

    vm.heap.push_temporary(path);
    let directory = vm.intern(&directory);
    vm.heap.push_temporary(directory);
    let name = vm.intern(&name);
    vm.heap.push_temporary(name);

    let module = vm.alloc(ObjBody::Module(ModuleObj {
        path: directory,
        name,
        imported: true,
        exports: Table::new(),
    }));

    vm.heap.pop_temporary();
    vm.heap.pop_temporary();
    vm.heap.pop_temporary();

    let value = Value::object(module);
    vm.modules.put(path, hash, value);
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_split_into_directory_and_name() {
        assert_eq!(split_path("math"), ("".to_string(), "math".to_string()));
        assert_eq!(split_path("lib/math"), ("lib/".to_string(), "math".to_string()));
        assert_eq!(split_path("a/b/c"), ("a/b/".to_string(), "c".to_string()));
    }

    #[test]
    fn importing_twice_returns_the_same_module() {
        let mut vm = Vm::new();
        let path = vm.intern("tools/strings");
        let first = import_module(&mut vm, path);
        let second = import_module(&mut vm, path);

        assert_eq!(first, second);
        let module = vm.heap.module(first.as_object());
        assert!(module.imported);
        assert_eq!(vm.heap.str_value(module.name), "strings");
        assert_eq!(vm.heap.str_value(module.path), "tools/");
    }
}
