// Integration tests for the Kestrel interpreter.
//
// These run complete programs through the full pipeline (lexer, parser,
// compiler, VM) and assert on the captured `print` output, or on the
// reported status for programs that must fail to compile or run.

use kestrel::vm::{InterpretStatus, Vm};

fn run(source: &str) -> Vec<String> {
    let mut vm = Vm::new();
    vm.capture_output();
    let status = vm.interpret(source);
    assert_eq!(status, InterpretStatus::Ok, "program failed: {}", source);
    vm.take_output()
}

fn status_of(source: &str) -> InterpretStatus {
    let mut vm = Vm::new();
    vm.capture_output();
    vm.interpret(source)
}

// ---- expressions ----------------------------------------------------

#[test]
fn arithmetic_precedence() {
    assert_eq!(run("print 1 + 2 * 3;"), ["7"]);
    assert_eq!(run("print (1 + 2) * 3;"), ["9"]);
    assert_eq!(run("print 10 - 4 / 2;"), ["8"]);
    assert_eq!(run("print 7 % 3;"), ["1"]);
}

#[test]
fn exponentiation_is_right_associative() {
    assert_eq!(run("print 2 ** 3 ** 2;"), ["512"]);
    assert_eq!(run("print 3 ** 2;"), ["9"]);
}

#[test]
fn unary_operators() {
    assert_eq!(run("print -5;"), ["-5"]);
    assert_eq!(run("print !true;"), ["false"]);
    assert_eq!(run("print !nil;"), ["true"]);
    assert_eq!(run("print ~0;"), ["-1"]);
}

#[test]
fn bitwise_operators() {
    assert_eq!(run("print 6 & 3;"), ["2"]);
    assert_eq!(run("print 6 | 3;"), ["7"]);
    assert_eq!(run("print 6 ^ 3;"), ["5"]);
    assert_eq!(run("print 1 << 4;"), ["16"]);
    assert_eq!(run("print 32 >> 2;"), ["8"]);
}

#[test]
fn comparison_and_equality() {
    assert_eq!(run("print 1 < 2;"), ["true"]);
    assert_eq!(run("print 2 <= 1;"), ["false"]);
    assert_eq!(run("print \"a\" == \"a\";"), ["true"]);
    assert_eq!(run("print \"a\" != \"b\";"), ["true"]);
    assert_eq!(run("print nil == nil;"), ["true"]);
    assert_eq!(run("print 1 == \"1\";"), ["false"]);
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(run("print true and 2;"), ["2"]);
    assert_eq!(run("print false and 2;"), ["false"]);
    assert_eq!(run("print nil or \"fallback\";"), ["fallback"]);
    assert_eq!(run("print 1 or unreachable();"), ["1"]);
}

#[test]
fn conditional_and_elvis() {
    assert_eq!(run("print true ? \"yes\" : \"no\";"), ["yes"]);
    assert_eq!(run("print false ? \"yes\" : \"no\";"), ["no"]);
    assert_eq!(run("print nil ?: \"default\";"), ["default"]);
    assert_eq!(run("print 3 ?: \"default\";"), ["3"]);
}

#[test]
fn string_concatenation() {
    assert_eq!(run("print \"foo\" + \"bar\";"), ["foobar"]);
    assert_eq!(status_of("print \"foo\" + 1;"), InterpretStatus::RuntimeError);
}

#[test]
fn string_interpolation() {
    assert_eq!(run("var n = 7; print \"n=$n\";"), ["n=7"]);
    assert_eq!(run("var a = 2; var b = 3; print \"${a} + ${b} = ${a + b}\";"), ["2 + 3 = 5"]);
    assert_eq!(run("print \"no splice: \\$x\";"), ["no splice: $x"]);
    assert_eq!(run("var who = \"world\"; print \"hello, $who!\";"), ["hello, world!"]);
}

#[test]
fn compound_assignment_expansions() {
    assert_eq!(run("var x = 10; x += 5; print x;"), ["15"]);
    assert_eq!(run("var x = 10; x -= 5; print x;"), ["5"]);
    assert_eq!(run("var x = 10; x *= 2; x /= 4; print x;"), ["5"]);
    assert_eq!(run("var x = 7; x %= 4; print x;"), ["3"]);
    assert_eq!(run("var x = 2; x **= 3; print x;"), ["8"]);
    assert_eq!(run("var x = 6; x &= 3; print x;"), ["2"]);
    assert_eq!(run("var x = 6; x |= 1; print x;"), ["7"]);
    assert_eq!(run("var x = 6; x ^= 3; print x;"), ["5"]);
    assert_eq!(run("var x = 1; x <<= 3; x >>= 1; print x;"), ["4"]);
}

#[test]
fn increment_and_decrement() {
    assert_eq!(run("var x = 1; print ++x; print x;"), ["2", "2"]);
    assert_eq!(run("var x = 1; print x++; print x;"), ["1", "2"]);
    assert_eq!(run("var x = 1; print --x; print x--; print x;"), ["0", "0", "-1"]);
}

#[test]
fn compound_assignment_on_fields_and_subscripts() {
    assert_eq!(
        run("class Box { init() { this.n = 1; } } var b = Box(); b.n += 4; print b.n;"),
        ["5"]
    );
    assert_eq!(run("var xs = [1, 2, 3]; xs[1] *= 10; print xs[1];"), ["20"]);
    assert_eq!(
        run("class Box { init() { this.n = 3; } } var b = Box(); b.n++; print b.n;"),
        ["4"]
    );
    assert_eq!(run("var xs = [5]; xs[0]--; print xs[0];"), ["4"]);
}

// ---- variables and scoping ------------------------------------------

#[test]
fn globals_and_locals() {
    assert_eq!(run("var a = 1; { var a = 2; print a; } print a;"), ["2", "1"]);
    assert_eq!(run("var a = \"outer\"; { print a; }"), ["outer"]);
}

#[test]
fn undefined_variable_is_a_runtime_error() {
    assert_eq!(status_of("print missing;"), InterpretStatus::RuntimeError);
    assert_eq!(status_of("missing = 1;"), InterpretStatus::RuntimeError);
}

#[test]
fn duplicate_local_is_a_compile_error() {
    assert_eq!(status_of("{ var a = 1; var a = 2; }"), InterpretStatus::CompileError);
}

#[test]
fn local_in_own_initializer_is_a_compile_error() {
    assert_eq!(status_of("{ var a = a; }"), InterpretStatus::CompileError);
}

#[test]
fn unpacking_declarations_and_assignments() {
    assert_eq!(run("var | a, b, c | = (1, 2, 3); print a; print b; print c;"), ["1", "2", "3"]);
    assert_eq!(run("var a = 0; var b = 0; | a, b | = (4, 5); print a; print b;"), ["4", "5"]);
    assert_eq!(run("var | a, b | = (1, 2); | a, b | = (b, a); print a; print b;"), ["2", "1"]);
    assert_eq!(status_of("var | a, b | = (1, 2, 3);"), InterpretStatus::RuntimeError);
    assert_eq!(status_of("var | a, b | = [1, 2];"), InterpretStatus::RuntimeError);
}

// ---- control flow ---------------------------------------------------

#[test]
fn if_else_branches() {
    assert_eq!(run("if (1 < 2) print \"then\"; else print \"else\";"), ["then"]);
    assert_eq!(run("if (1 > 2) print \"then\"; else print \"else\";"), ["else"]);
    assert_eq!(run("if (false) print \"skipped\";"), Vec::<String>::new());
}

#[test]
fn while_loops() {
    assert_eq!(run("var i = 0; while (i < 3) { print i; i = i + 1; }"), ["0", "1", "2"]);
}

#[test]
fn do_while_runs_body_first() {
    assert_eq!(run("var i = 5; do { print i; i = i + 1; } while (i < 3);"), ["5"]);
    assert_eq!(run("var i = 0; do { print i; i = i + 1; } while (i < 2);"), ["0", "1"]);
}

#[test]
fn for_loops() {
    assert_eq!(run("for (var i = 0; i < 3; i = i + 1) print i;"), ["0", "1", "2"]);
    assert_eq!(run("var i = 0; for (; i < 2; i = i + 1) print i;"), ["0", "1"]);
}

#[test]
fn break_and_continue() {
    assert_eq!(
        run("for (var i = 0; i < 10; i = i + 1) { if (i == 3) break; print i; }"),
        ["0", "1", "2"]
    );
    assert_eq!(
        run("for (var i = 0; i < 5; i = i + 1) { if (i == 2) continue; print i; }"),
        ["0", "1", "3", "4"]
    );
    assert_eq!(run("var i = 0; while (true) { i = i + 1; if (i > 2) break; } print i;"), ["3"]);
}

#[test]
fn break_outside_a_loop_is_a_compile_error() {
    assert_eq!(status_of("break;"), InterpretStatus::CompileError);
    assert_eq!(status_of("continue;"), InterpretStatus::CompileError);
    assert_eq!(
        status_of("when (1) { 1 -> break; }"),
        InterpretStatus::CompileError
    );
}

#[test]
fn when_statement_matches_cases() {
    let program = "
        fun describe(x) {
            when (x) {
                1, 2 -> return \"small\";
                3 -> return \"three\";
                else -> return \"big\";
            }
        }
        print describe(1);
        print describe(2);
        print describe(3);
        print describe(9);
    ";
    assert_eq!(run(program), ["small", "small", "three", "big"]);
}

#[test]
fn when_without_else_falls_through() {
    assert_eq!(run("when (5) { 1 -> print \"one\"; } print \"after\";"), ["after"]);
}

// ---- functions and closures -----------------------------------------

#[test]
fn function_declarations_and_calls() {
    assert_eq!(run("fun add(a, b) { return a + b; } print add(2, 3);"), ["5"]);
    assert_eq!(run("fun twice(x) = x * 2; print twice(21);"), ["42"]);
    assert_eq!(run("fun noisy() { print \"hi\"; } print noisy();"), ["hi", "nil"]);
}

#[test]
fn wrong_arity_is_a_runtime_error() {
    assert_eq!(status_of("fun f(a) { return a; } f();"), InterpretStatus::RuntimeError);
    assert_eq!(status_of("fun f() { } f(1);"), InterpretStatus::RuntimeError);
}

#[test]
fn calling_a_non_callable_is_a_runtime_error() {
    assert_eq!(status_of("var x = 3; x();"), InterpretStatus::RuntimeError);
    assert_eq!(status_of("\"text\"();"), InterpretStatus::RuntimeError);
}

#[test]
fn lambdas() {
    assert_eq!(run("var f = \\x -> x * x; print f(5);"), ["25"]);
    assert_eq!(run("var f = \\ -> 42; print f();"), ["42"]);
    assert_eq!(run("var f = \\a, b -> { return a + b; }; print f(1, 2);"), ["3"]);
}

#[test]
fn closures_capture_a_single_cell() {
    let program = "
        fun makeCounter() { var n = 0; return \\ -> { n = n + 1; return n; }; }
        var c = makeCounter();
        print c(); print c(); print c();
    ";
    assert_eq!(run(program), ["1", "2", "3"]);
}

#[test]
fn two_closures_share_the_same_upvalue() {
    let program = "
        fun makePair() {
            var n = 0;
            var inc = \\ -> { n = n + 1; return n; };
            var get = \\ -> n;
            return (inc, get);
        }
        var | inc, get | = makePair();
        inc(); inc();
        print get();
    ";
    assert_eq!(run(program), ["2"]);
}

#[test]
fn counters_are_independent() {
    let program = "
        fun makeCounter() { var n = 0; return \\ -> { n = n + 1; return n; }; }
        var a = makeCounter();
        var b = makeCounter();
        a(); a(); a();
        print b();
    ";
    assert_eq!(run(program), ["1"]);
}

#[test]
fn recursion() {
    assert_eq!(
        run("fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);"),
        ["55"]
    );
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    assert_eq!(status_of("fun f() { return f(); } f();"), InterpretStatus::RuntimeError);
}

#[test]
fn return_from_script_is_a_compile_error() {
    assert_eq!(status_of("return 1;"), InterpretStatus::CompileError);
}

// ---- classes --------------------------------------------------------

#[test]
fn instances_and_fields() {
    let program = "
        class Point { }
        var p = Point();
        p.x = 3;
        p.y = 4;
        print p.x + p.y;
    ";
    assert_eq!(run(program), ["7"]);
}

#[test]
fn methods_and_this() {
    let program = "
        class Greeter {
            init(name) { this.name = name; }
            greet() { return \"hello, \" + this.name; }
        }
        print Greeter(\"kes\").greet();
    ";
    assert_eq!(run(program), ["hello, kes"]);
}

#[test]
fn initializer_returns_the_instance() {
    let program = "
        class Box { init() { this.v = 1; } }
        print typeOf(Box());
    ";
    assert_eq!(run(program), ["Box"]);
}

#[test]
fn inheritance_and_super() {
    let program = "
        class A { greet() { return \"A\"; } }
        class B < A { greet() { return super.greet() + \"B\"; } }
        print B().greet();
    ";
    assert_eq!(run(program), ["AB"]);
}

#[test]
fn inherited_methods_are_copied() {
    let program = "
        class A { hello() { return \"hi\"; } }
        class B < A { }
        print B().hello();
    ";
    assert_eq!(run(program), ["hi"]);
}

#[test]
fn bound_methods_remember_their_receiver() {
    let program = "
        class Cell {
            init(v) { this.v = v; }
            get() { return this.v; }
        }
        var m = Cell(9).get;
        print m();
    ";
    assert_eq!(run(program), ["9"]);
}

#[test]
fn fields_shadow_methods_on_invocation() {
    let program = "
        class Holder {
            init() { this.f = \\ -> \"field\"; }
            f() { return \"method\"; }
        }
        print Holder().f();
    ";
    assert_eq!(run(program), ["field"]);
}

#[test]
fn static_methods_live_on_the_metaclass() {
    let program = "
        class MathUtil {
            static square(x) { return x * x; }
        }
        print MathUtil.square(6);
    ";
    assert_eq!(run(program), ["36"]);
}

#[test]
fn static_initializer_runs_at_class_end() {
    let program = "
        class Config {
            static init() { this.flag = true; }
        }
        print Config.flag;
    ";
    assert_eq!(run(program), ["true"]);
}

#[test]
fn class_misuse_compile_errors() {
    assert_eq!(
        status_of("class A { init() { return 1; } }"),
        InterpretStatus::CompileError
    );
    assert_eq!(status_of("print this;"), InterpretStatus::CompileError);
    assert_eq!(status_of("class A { f() { return super.f(); } }"), InterpretStatus::CompileError);
    assert_eq!(status_of("class A < A { }"), InterpretStatus::CompileError);
    assert_eq!(
        status_of("class A { static init(x) { } }"),
        InterpretStatus::CompileError
    );
}

#[test]
fn inheriting_from_a_non_class_is_a_runtime_error() {
    assert_eq!(status_of("var NotAClass = 3; class B < NotAClass { }"), InterpretStatus::RuntimeError);
}

#[test]
fn missing_property_is_a_runtime_error() {
    assert_eq!(status_of("class A { } A().missing;"), InterpretStatus::RuntimeError);
    assert_eq!(status_of("class A { } A().missing();"), InterpretStatus::RuntimeError);
}

#[test]
fn default_constructor_takes_no_arguments() {
    assert_eq!(status_of("class A { } A(1);"), InterpretStatus::RuntimeError);
}

// ---- collections ----------------------------------------------------

#[test]
fn list_literals_and_subscripts() {
    assert_eq!(run("var xs = [10, 20, 30]; print xs[0]; print xs[2];"), ["10", "30"]);
    assert_eq!(run("var xs = [1, 2, 3]; print xs[-1];"), ["3"]);
    assert_eq!(run("var xs = [1, 2, 3]; xs[0] = 9; print xs;"), ["[9, 2, 3]"]);
    assert_eq!(status_of("[1, 2, 3][9];"), InterpretStatus::RuntimeError);
    assert_eq!(status_of("[1, 2, 3][\"a\"];"), InterpretStatus::RuntimeError);
}

#[test]
fn list_methods() {
    assert_eq!(run("var xs = []; xs.append(1); xs.append(2); print xs.length();"), ["2"]);
    assert_eq!(run("var xs = [1, 2]; xs.pop(); print xs;"), ["[1]"]);
    assert_eq!(status_of("[].pop();"), InterpretStatus::RuntimeError);
}

#[test]
fn tuples_are_fixed_length() {
    assert_eq!(run("var t = (1, \"two\", 3); print t[1]; print t.length();"), ["two", "3"]);
    assert_eq!(run("var t = (1, 2); print t;"), ["(1, 2)"]);
    assert_eq!(status_of("var t = (1, 2); t[5];"), InterpretStatus::RuntimeError);
}

#[test]
fn maps_store_values_by_key() {
    let program = "
        var ages = @{ \"ada\": 36, \"alan\": 41 };
        print ages[\"ada\"];
        ages[\"grace\"] = 85;
        print ages.length();
        print ages.containsKey(\"alan\");
    ";
    assert_eq!(run(program), ["36", "3", "true"]);
}

#[test]
fn map_methods() {
    assert_eq!(
        run("var m = @{}; print m.isEmpty(); m[1] = \"one\"; print m.getOrDefault(2, \"none\");"),
        ["true", "none"]
    );
    assert_eq!(
        run("var m = @{ 1: \"a\" }; m.putIfAbsent(1, \"b\"); print m[1];"),
        ["a"]
    );
    assert_eq!(
        run("var m = @{ 1: \"a\" }; var n = @{ 2: \"b\" }; m.putAll(n); print m.length();"),
        ["2"]
    );
    assert_eq!(
        run("var m = @{ 1: \"a\" }; m.remove(1); print m.isEmpty();"),
        ["true"]
    );
    assert_eq!(status_of("var m = @{}; m[\"missing\"];"), InterpretStatus::RuntimeError);
}

#[test]
fn numbers_and_strings_work_as_map_keys() {
    let program = "
        var m = @{};
        m[1] = \"one\";
        m[\"two\"] = 2;
        print m[1];
        print m[\"two\"];
    ";
    assert_eq!(run(program), ["one", "2"]);
}

#[test]
fn ranges_subscript_and_print() {
    assert_eq!(run("var r = 0..10:2; print r;"), ["0..10:2"]);
    assert_eq!(run("var r = 0..10:2; print r[2];"), ["4"]);
    assert_eq!(status_of("(0..4)[9];"), InterpretStatus::RuntimeError);
}

// ---- iteration ------------------------------------------------------

#[test]
fn for_in_over_lists() {
    assert_eq!(run("var xs = [10, 20, 30]; for (var x in xs) print x;"), ["10", "20", "30"]);
}

#[test]
fn for_in_over_tuples_and_ranges() {
    assert_eq!(run("for (var x in (1, 2, 3)) print x;"), ["1", "2", "3"]);
    assert_eq!(run("for (var i in 0..3) print i;"), ["0", "1", "2"]);
    assert_eq!(run("for (var i in 0..10:3) print i;"), ["0", "3", "6", "9"]);
    assert_eq!(run("for (var i in 3..0:-1) print i;"), ["3", "2", "1"]);
}

#[test]
fn for_in_with_unpacking_targets() {
    let program = "
        var pairs = [(1, \"one\"), (2, \"two\")];
        for (var | k, v | in pairs) print \"$k=$v\";
    ";
    assert_eq!(run(program), ["1=one", "2=two"]);
}

#[test]
fn for_in_supports_break() {
    assert_eq!(
        run("for (var x in [1, 2, 3, 4]) { if (x == 3) break; print x; }"),
        ["1", "2"]
    );
}

#[test]
fn iterating_a_non_iterable_is_a_runtime_error() {
    assert_eq!(status_of("for (var x in 42) print x;"), InterpretStatus::RuntimeError);
}

// ---- safe navigation ------------------------------------------------

#[test]
fn safe_property_access_short_circuits_on_nil() {
    assert_eq!(run("var x = nil; print x?.anything;"), ["nil"]);
    assert_eq!(run("var x = nil; print x?.method();"), ["nil"]);
    assert_eq!(run("var x = nil; print x?[0];"), ["nil"]);
    assert_eq!(
        run("class A { init() { this.v = 1; } } var a = A(); print a?.v;"),
        ["1"]
    );
}

// ---- coroutines -----------------------------------------------------

#[test]
fn coroutine_yields_values_in_order() {
    let program = "
        coroutine fun gen() { yield 1; yield 2; yield 3; }
        var g = gen();
        print g(); print g(); print g();
    ";
    assert_eq!(run(program), ["1", "2", "3"]);
}

#[test]
fn coroutine_declarations_are_restartable_factories() {
    let program = "
        coroutine fun gen() { yield \"a\"; yield \"b\"; }
        var first = gen();
        var second = gen();
        print first();
        print second();
        print first();
    ";
    assert_eq!(run(program), ["a", "a", "b"]);
}

#[test]
fn resume_argument_becomes_yield_value() {
    let program = "
        coroutine fun echo() {
            var got = yield \"ready\";
            yield got;
        }
        var e = echo();
        print e();
        print e(\"payload\");
    ";
    assert_eq!(run(program), ["ready", "payload"]);
}

#[test]
fn coroutine_parameters_reach_the_body() {
    let program = "
        coroutine fun countFrom(start) {
            yield start;
            yield start + 1;
        }
        var c = countFrom(10);
        print c(); print c();
    ";
    assert_eq!(run(program), ["10", "11"]);
}

#[test]
fn finished_coroutines_yield_nil_and_report_done() {
    let program = "
        coroutine fun one() { yield 1; }
        var c = one();
        print c.done();
        print c();
        print c();
        print c.done();
    ";
    assert_eq!(run(program), ["false", "1", "nil", "true"]);
}

#[test]
fn resuming_a_done_coroutine_is_a_runtime_error() {
    let program = "
        coroutine fun empty() { }
        var c = empty();
        c();
        c();
    ";
    assert_eq!(status_of(program), InterpretStatus::RuntimeError);
}

#[test]
fn explicit_coroutine_expression_wraps_a_callable() {
    let program = "
        var co = coroutine \\ -> { yield 7; };
        print co();
    ";
    assert_eq!(run(program), ["7"]);
}

#[test]
fn yield_misuse_is_a_compile_error() {
    assert_eq!(status_of("yield 1;"), InterpretStatus::CompileError);
    assert_eq!(
        status_of("class A { init() { yield 1; } }"),
        InterpretStatus::CompileError
    );
    assert_eq!(
        status_of("class A { coroutine init() { } }"),
        InterpretStatus::CompileError
    );
}

#[test]
fn coroutines_interleave_with_the_caller() {
    let program = "
        coroutine fun worker() {
            print \"step 1\";
            yield;
            print \"step 2\";
        }
        var w = worker();
        print \"before\";
        w();
        print \"between\";
        w();
        print \"after\";
    ";
    assert_eq!(run(program), ["before", "step 1", "between", "step 2", "after"]);
}

// ---- modules --------------------------------------------------------

#[test]
fn imports_record_modules() {
    assert_eq!(run("import \"geometry\";"), Vec::<String>::new());
    assert_eq!(run("import \"lib/colors\" as colors; print colors;"), ["<module 'colors'>"]);
}

#[test]
fn import_path_must_be_a_string() {
    assert_eq!(status_of("import 42;"), InterpretStatus::RuntimeError);
}

// ---- builtins -------------------------------------------------------

#[test]
fn numeric_builtins() {
    assert_eq!(run("print abs(-3);"), ["3"]);
    assert_eq!(run("print pow(2, 10);"), ["1024"]);
    assert_eq!(status_of("abs(\"x\");"), InterpretStatus::RuntimeError);
    assert_eq!(status_of("pow(1, \"x\");"), InterpretStatus::RuntimeError);
}

#[test]
fn clock_is_monotonic() {
    let output = run("var a = clock(); var b = clock(); print b >= a;");
    assert_eq!(output, ["true"]);
}

#[test]
fn type_of_reports_type_names() {
    assert_eq!(run("print typeOf(1);"), ["Number"]);
    assert_eq!(run("print typeOf(true);"), ["Boolean"]);
    assert_eq!(run("print typeOf(nil);"), ["Nil"]);
    assert_eq!(run("print typeOf(\"s\");"), ["String"]);
    assert_eq!(run("print typeOf([1]);"), ["List"]);
    assert_eq!(run("print typeOf((1, 2));"), ["Tuple"]);
    assert_eq!(run("print typeOf(@{});"), ["Map"]);
    assert_eq!(run("print typeOf(0..1);"), ["Range"]);
    assert_eq!(run("class A { } print typeOf(A());"), ["A"]);
}

#[test]
fn string_methods() {
    assert_eq!(run("print \"kestrel\".length();"), ["7"]);
    assert_eq!(run("print \"\".isEmpty();"), ["true"]);
    assert_eq!(run("print \"MiXeD\".toLower(); print \"MiXeD\".toUpper();"), ["mixed", "MIXED"]);
    assert_eq!(run("print \"kestrel\".startsWith(\"kes\");"), ["true"]);
    assert_eq!(run("print \"kestrel\".endsWith(\"rel\");"), ["true"]);
    assert_eq!(status_of("\"a\".startsWith(1);"), InterpretStatus::RuntimeError);
}

#[test]
fn builtin_methods_bind_as_properties() {
    assert_eq!(run("var m = \"shout\".toUpper; print m();"), ["SHOUT"]);
    assert_eq!(run("var xs = [1]; var append = xs.append; append(2); print xs.length();"), ["2"]);
}

// ---- printing -------------------------------------------------------

#[test]
fn values_print_in_their_canonical_forms() {
    assert_eq!(run("print 1.5;"), ["1.5"]);
    assert_eq!(run("print true; print false; print nil;"), ["true", "false", "nil"]);
    assert_eq!(run("print [1, \"two\", (3, 4)];"), ["[1, two, (3, 4)]"]);
    assert_eq!(run("fun f() { } print f;"), ["<fn f>"]);
    assert_eq!(run("class A { } print A;"), ["A"]);
    assert_eq!(run("class A { } print A();"), ["A instance"]);
    assert_eq!(run("print @{};"), ["<map>"]);
    assert_eq!(run("coroutine fun g() { yield; } print g();"), ["<coroutine 'g'>"]);
}

// ---- stress ---------------------------------------------------------

#[test]
fn interleaved_features_compose() {
    let program = "
        class Stack {
            init() { this.items = []; }
            push(v) { this.items.append(v); return this; }
            size() { return this.items.length(); }
        }

        var s = Stack();
        for (var i in 1..6) s.push(i * i);
        print s.size();
        print s.items;

        var total = 0;
        for (var v in s.items) total += v;
        print total;
    ";
    assert_eq!(run(program), ["5", "[1, 4, 9, 16, 25]", "55"]);
}
