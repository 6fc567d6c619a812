// Garbage collector tests for the Kestrel VM.
//
// Stress mode collects on every allocation, so any object the VM fails
// to root dies immediately and the run misbehaves; these tests assert
// that allocation-heavy programs produce identical output with stress
// collection enabled, and that unreachable data actually gets swept.

use kestrel::vm::{InterpretStatus, Vm};

fn run_stressed(source: &str) -> Vec<String> {
    let mut vm = Vm::new();
    vm.capture_output();
    vm.set_gc_stress(true);
    let status = vm.interpret(source);
    assert_eq!(status, InterpretStatus::Ok, "program failed under gc stress: {}", source);
    vm.take_output()
}

#[test]
fn string_building_survives_stress_collection() {
    let program = "
        var parts = \"\";
        for (var i = 0; i < 20; i = i + 1) {
            parts = parts + \"x\";
        }
        print parts.length();
        print \"len=${parts.length()}\";
    ";
    assert_eq!(run_stressed(program), ["20", "len=20"]);
}

#[test]
fn classes_and_instances_survive_stress_collection() {
    let program = "
        class Node {
            init(value) { this.value = value; this.next = nil; }
        }

        var head = nil;
        for (var i = 0; i < 10; i = i + 1) {
            var node = Node(i);
            node.next = head;
            head = node;
        }

        var total = 0;
        while (head != nil) {
            total += head.value;
            head = head.next;
        }
        print total;
    ";
    assert_eq!(run_stressed(program), ["45"]);
}

#[test]
fn closures_and_upvalues_survive_stress_collection() {
    let program = "
        fun adder(n) { return \\x -> x + n; }
        var fns = [];
        for (var i = 0; i < 5; i = i + 1) {
            fns.append(adder(i));
        }

        var total = 0;
        for (var f in fns) {
            total += f(10);
        }
        print total;
    ";
    assert_eq!(run_stressed(program), ["60"]);
}

#[test]
fn coroutines_survive_stress_collection() {
    let program = "
        coroutine fun squares(limit) {
            for (var i = 1; i <= limit; i = i + 1) {
                yield i * i;
            }
        }

        var sq = squares(4);
        print sq(); print sq(); print sq(); print sq();
    ";
    assert_eq!(run_stressed(program), ["1", "4", "9", "16"]);
}

#[test]
fn collections_of_collections_survive_stress_collection() {
    let program = "
        var grid = [];
        for (var row in 0..3) {
            var cells = [];
            for (var col in 0..3) {
                cells.append((row, col));
            }
            grid.append(cells);
        }
        print grid;
    ";
    assert_eq!(
        run_stressed(program),
        ["[[(0, 0), (0, 1), (0, 2)], [(1, 0), (1, 1), (1, 2)], [(2, 0), (2, 1), (2, 2)]]"]
    );
}

#[test]
fn garbage_is_actually_reclaimed() {
    let mut vm = Vm::new();
    vm.capture_output();

    // Build a pile of short-lived lists, then drop every reference.
    let status = vm.interpret(
        "
        var keep = nil;
        for (var i = 0; i < 100; i = i + 1) {
            keep = [i, i, i, \"garbage ${i}\"];
        }
        keep = nil;
        ",
    );
    assert_eq!(status, InterpretStatus::Ok);

    let before = vm.heap.object_count();
    vm.set_gc_stress(true);
    let status = vm.interpret("var touch = 1;");
    assert_eq!(status, InterpretStatus::Ok);
    let after = vm.heap.object_count();

    assert!(
        after < before,
        "expected the dropped lists to be swept ({} -> {})",
        before,
        after
    );
}

#[test]
fn interning_survives_collection() {
    let mut vm = Vm::new();
    vm.capture_output();
    vm.set_gc_stress(true);

    let status = vm.interpret(
        "
        var a = \"shared\" + \"-suffix\";
        var b = \"shared\" + \"-suffix\";
        print a == b;
        ",
    );
    assert_eq!(status, InterpretStatus::Ok);

    // Bitwise equality of the values proves both sides interned to the
    // same object.
    assert_eq!(vm.take_output(), ["true"]);
}
