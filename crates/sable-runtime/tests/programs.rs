//! Whole-program tests: compile TypeScript with the emitter, execute on
//! the VM, and assert on captured stdout.

use sable_runtime::{Vm, VmError};

fn run(source: &str) -> String {
    let module = sable_emitter::compile(source, "main.ts").expect("compile");
    let mut vm = Vm::for_tests();
    vm.run_module(module, "main.ts").expect("run");
    vm.captured_stdout()
}

fn run_err(source: &str) -> VmError {
    let module = sable_emitter::compile(source, "main.ts").expect("compile");
    let mut vm = Vm::for_tests();
    vm.run_module(module, "main.ts").expect_err("expected error")
}

// ============================================================================
// Console formatting
// ============================================================================

#[test]
fn console_log_formatting() {
    assert_eq!(run("console.log(42);"), "42\n");
    assert_eq!(run("console.log();"), "\n");
    assert_eq!(run("console.log('a', 1, true);"), "a 1 true\n");
    assert_eq!(run("console.log(null, undefined);"), "null undefined\n");
    assert_eq!(run("console.log([1,2,3]);"), "[1,2,3]\n");
    assert_eq!(run("console.log({});"), "[object Object]\n");
}

#[test]
fn number_printing() {
    assert_eq!(run("console.log(3.25);"), "3.25\n");
    assert_eq!(run("console.log(1/0, -1/0, 0/0);"), "Infinity -Infinity NaN\n");
    assert_eq!(run("console.log(1e21);"), "1e+21\n");
    assert_eq!(run("console.log(0.1 + 0.2);"), "0.30000000000000004\n");
}

// ============================================================================
// Operators and coercion
// ============================================================================

#[test]
fn arithmetic_and_concatenation() {
    assert_eq!(run("console.log(1 + 2 * 3);"), "7\n");
    assert_eq!(run("console.log('a' + 1);"), "a1\n");
    assert_eq!(run("let x: any = undefined; console.log(x + 1);"), "NaN\n");
    assert_eq!(run("console.log(7 % 3, 2 ** 10);"), "1 1024\n");
    assert_eq!(run("console.log(5 | 0, -1 >>> 0);"), "5 4294967295\n");
}

#[test]
fn equality_rules() {
    assert_eq!(run("console.log(NaN === NaN);"), "false\n");
    assert_eq!(run("console.log(0 === -0);"), "true\n");
    assert_eq!(run("console.log('1' == 1, '1' === 1);"), "true false\n");
    assert_eq!(run("console.log(null == undefined, null === undefined);"), "true false\n");
    assert_eq!(run("let a = [1]; let b = [1]; console.log(a === b, a === a);"), "false true\n");
}

#[test]
fn self_identity_law() {
    // v === v for every v except NaN
    assert_eq!(
        run(r#"
            let values: any[] = [1, 'x', true, null, undefined, [1], {a:1}];
            console.log(values.every(v => v === v));
            let n = NaN;
            console.log(n === n);
        "#),
        "true\nfalse\n"
    );
}

#[test]
fn logical_and_ternary() {
    assert_eq!(run("console.log(0 || 'fallback');"), "fallback\n");
    assert_eq!(run("console.log(0 ?? 'fallback');"), "0\n");
    assert_eq!(run("console.log(null ?? 'fallback');"), "fallback\n");
    assert_eq!(run("console.log(1 && 2);"), "2\n");
    assert_eq!(run("console.log(true ? 'y' : 'n');"), "y\n");
}

#[test]
fn typeof_operator() {
    assert_eq!(
        run("console.log(typeof 1, typeof 'x', typeof true, typeof undefined);"),
        "number string boolean undefined\n"
    );
    assert_eq!(run("console.log(typeof null, typeof {});"), "object object\n");
    assert_eq!(run("console.log(typeof console.log);"), "function\n");
    assert_eq!(run("console.log(typeof doesNotExist);"), "undefined\n");
}

#[test]
fn optional_chaining() {
    assert_eq!(run("let o: any = null; console.log(o?.x);"), "undefined\n");
    assert_eq!(run("let o = {x: {y: 5}}; console.log(o.x?.y);"), "5\n");
    assert_eq!(run("let o: any = undefined; console.log(o?.m());"), "undefined\n");
}

// ============================================================================
// Control flow
// ============================================================================

#[test]
fn loops_and_branches() {
    assert_eq!(
        run("let s = 0; for (let i = 1; i <= 4; i++) s += i; console.log(s);"),
        "10\n"
    );
    assert_eq!(
        run("let i = 0; while (i < 3) i++; console.log(i);"),
        "3\n"
    );
    assert_eq!(
        run("let i = 10; do { i++; } while (false); console.log(i);"),
        "11\n"
    );
    assert_eq!(
        run(r#"
            let out = '';
            for (const x of [1, 2, 3]) {
                if (x === 2) continue;
                out += x;
            }
            console.log(out);
        "#),
        "13\n"
    );
}

#[test]
fn labeled_break() {
    assert_eq!(
        run(r#"
            let hits = 0;
            outer: for (let i = 0; i < 3; i++) {
                for (let j = 0; j < 3; j++) {
                    hits++;
                    if (j === 1) continue outer;
                }
            }
            console.log(hits);
        "#),
        "6\n"
    );
}

#[test]
fn switch_statement() {
    let program = r#"
        function label(n: number): string {
            switch (n) {
                case 0: return 'zero';
                case 1:
                case 2: return 'small';
                default: return 'big';
            }
        }
        console.log(label(0), label(1), label(2), label(7));
    "#;
    assert_eq!(run(program), "zero small small big\n");
}

#[test]
fn for_in_enumerates_keys() {
    assert_eq!(
        run("let o = {b: 1, a: 2}; let ks = ''; for (const k in o) ks += k; console.log(ks);"),
        "ba\n"
    );
}

// ============================================================================
// Functions and closures
// ============================================================================

#[test]
fn closure_over_mutated_counter() {
    let program = r#"
        function mk(){let n=0; return ()=>++n;}
        let f=mk();
        console.log(f());
        console.log(f());
        console.log(f());
    "#;
    assert_eq!(run(program), "1\n2\n3\n");
}

#[test]
fn sibling_closures_share_one_cell() {
    let program = r#"
        function pair() {
            let n = 0;
            return [() => ++n, () => n];
        }
        const [inc, get] = pair();
        inc(); inc();
        console.log(get());
    "#;
    assert_eq!(run(program), "2\n");
}

#[test]
fn default_and_rest_parameters() {
    assert_eq!(
        run("function f(a: number, b = 10) { return a + b; } console.log(f(1), f(1, 2));"),
        "11 3\n"
    );
    assert_eq!(
        run("function f(first: number, ...rest: number[]) { return rest.length; } console.log(f(1, 2, 3, 4));"),
        "3\n"
    );
    // Missing arguments below arity read as undefined
    assert_eq!(
        run("function f(a?: number) { return a === undefined; } console.log(f());"),
        "true\n"
    );
}

#[test]
fn function_values_and_bind() {
    assert_eq!(
        run(r#"
            function greet(this: any, punct: string) { return this.name + punct; }
            const bound = greet.bind({name: 'sable'});
            console.log(bound('!'));
        "#),
        "sable!\n"
    );
    assert_eq!(
        run(r#"
            function f(this: any) { return this.tag; }
            const once = f.bind({tag: 'first'});
            const twice = once.bind({tag: 'second'});
            console.log(twice());
        "#),
        "first\n"
    );
}

#[test]
fn higher_order_functions() {
    assert_eq!(
        run(r#"
            const twice = (f: (n: number) => number) => (n: number) => f(f(n));
            const inc = (n: number) => n + 1;
            console.log(twice(inc)(5));
        "#),
        "7\n"
    );
}

// ============================================================================
// Destructuring
// ============================================================================

#[test]
fn destructuring_patterns() {
    assert_eq!(run("let [a, b] = [1, 2]; console.log(a + b);"), "3\n");
    assert_eq!(run("let {x, y} = {x: 3, y: 4}; console.log(x * y);"), "12\n");
    assert_eq!(run("let [a, ...rest] = [1, 2, 3]; console.log(rest.join('+'));"), "2+3\n");
    assert_eq!(
        run("let {a, ...others} = {a: 1, b: 2, c: 3}; console.log(Object.keys(others).join(','));"),
        "b,c\n"
    );
    assert_eq!(run("let {missing = 9} = {}; console.log(missing);"), "9\n");
    assert_eq!(
        run("function dist({x, y}: {x: number, y: number}) { return x + y; } console.log(dist({x: 1, y: 2}));"),
        "3\n"
    );
}

// ============================================================================
// Strings and templates
// ============================================================================

#[test]
fn template_literals() {
    assert_eq!(run("let n = 3; console.log(`n=${n}, n2=${n * n}`);"), "n=3, n2=9\n");
    assert_eq!(run("console.log(`${[1,2]}`);"), "[1,2]\n");
}

#[test]
fn tagged_templates() {
    let program = r#"
        function tag(strings: any, ...values: any[]) {
            return strings.raw.join('|') + '#' + values.join(',');
        }
        console.log(tag`a${1}b${2}c`);
    "#;
    assert_eq!(run(program), "a|b|c#1,2\n");
}

#[test]
fn string_methods() {
    assert_eq!(run("console.log('hello'.slice(-3));"), "llo\n");
    assert_eq!(run("console.log('a-b-c'.split('-').length);"), "3\n");
    assert_eq!(run("console.log('5'.padStart(3, '0'));"), "005\n");
    assert_eq!(run("console.log('Hey'.toUpperCase(), 'Hey'.toLowerCase());"), "HEY hey\n");
    assert_eq!(run("console.log('abcdef'.at(-1), 'abc'.charCodeAt(0));"), "f 97\n");
    assert_eq!(run("console.log('a.b'.replaceAll('.', '-'));"), "a-b\n");
}

// ============================================================================
// Arrays
// ============================================================================

#[test]
fn array_chaining() {
    assert_eq!(
        run("let a=[1,2,3,4,5]; console.log(a.filter(n=>n%2==1).map(n=>n*2).join(','));"),
        "2,6,10\n"
    );
}

#[test]
fn array_boundaries() {
    assert_eq!(run("let a = [1,2,3]; console.log(a.at(-1));"), "3\n");
    assert_eq!(run("let a = [1,2,3]; console.log(a.at(3), a.at(-4));"), "undefined undefined\n");
    assert_eq!(run("let a = [1,2,3,4]; console.log(a.slice(-2).join(','));"), "3,4\n");
}

#[test]
fn non_mutating_array_methods() {
    let program = r#"
        let a = [3, 1, 2];
        let r = a.toReversed();
        let s = a.toSorted((x, y) => x - y);
        let w = a.with(0, 9);
        console.log(a.join(','), r.join(','), s.join(','), w.join(','));
    "#;
    assert_eq!(run(program), "3,1,2 2,1,3 1,2,3 9,1,2\n");
}

#[test]
fn array_from_copies_elementwise() {
    assert_eq!(
        run(r#"
            let arr = [1, 'two', true];
            let copy = Array.from(arr);
            console.log(copy.length, copy[0] === arr[0], copy[1] === arr[1], copy === arr);
        "#),
        "3 true true false\n"
    );
}

#[test]
fn array_reduce_and_spread() {
    assert_eq!(run("console.log([1,2,3].reduce((a, b) => a + b, 0));"), "6\n");
    assert_eq!(run("let a = [1, ...[2, 3], 4]; console.log(a.join(''));"), "1234\n");
    assert_eq!(
        run("function sum(...ns: number[]) { return ns.reduce((a, b) => a + b, 0); } console.log(sum(...[1, 2], 3));"),
        "6\n"
    );
}

// ============================================================================
// Objects, maps, sets
// ============================================================================

#[test]
fn object_literals_and_accessors() {
    assert_eq!(
        run(r#"
            let hidden = 1;
            let o = {
                plain: 2,
                get dynamic() { return hidden * 10; },
                set dynamic(v: number) { hidden = v; },
            };
            console.log(o.dynamic);
            o.dynamic = 4;
            console.log(o.dynamic, o.plain);
        "#),
        "10\n40 2\n"
    );
    assert_eq!(
        run("let x = 1; let o = {x, ['k' + 1]: 2}; console.log(o.x, o.k1);"),
        "1 2\n"
    );
    assert_eq!(
        run("let base = {a: 1}; let o = {...base, b: 2}; console.log(o.a + o.b);"),
        "3\n"
    );
}

#[test]
fn map_and_set_preserve_insertion_order() {
    assert_eq!(
        run(r#"
            let m = new Map<string, number>();
            m.set('z', 1); m.set('a', 2); m.set('m', 3);
            let keys: string[] = [];
            for (const [k, v] of m) keys.push(k);
            console.log(keys.join(''));
            console.log(m.get('a'), m.size);
        "#),
        "zam\n2 3\n"
    );
    assert_eq!(
        run(r#"
            let s = new Set([3, 1, 3, 2]);
            let out: number[] = [];
            s.forEach(v => out.push(v));
            console.log(out.join(','), s.has(1), s.size);
        "#),
        "3,1,2 true 3\n"
    );
}

#[test]
fn json_roundtrip() {
    assert_eq!(
        run(r#"
            let v = {n: 1.5, s: 'x', b: true, a: [1, 'two', null], o: {inner: 2}};
            let back = JSON.parse(JSON.stringify(v));
            console.log(back.n, back.s, back.b, back.a[1], back.o.inner);
            console.log(JSON.stringify(back.a));
        "#),
        "1.5 x true two 2\n[1,\"two\",null]\n"
    );
}

#[test]
fn enums_and_namespaces() {
    assert_eq!(
        run(r#"
            enum Color { Red, Green = 5, Blue }
            console.log(Color.Red, Color.Green, Color.Blue, Color[5]);
        "#),
        "0 5 6 Green\n"
    );
    assert_eq!(
        run(r#"
            namespace Geometry {
                export function area(w: number, h: number) { return w * h; }
            }
            console.log(Geometry.area(3, 4));
        "#),
        "12\n"
    );
}

// ============================================================================
// Classes
// ============================================================================

#[test]
fn private_field_encapsulation() {
    let program = r#"
        class C { #x=0; inc(){this.#x++;} get(){return this.#x;}}
        let c=new C(); c.inc(); c.inc(); console.log(c.get());
    "#;
    assert_eq!(run(program), "2\n");
}

#[test]
fn class_with_constructor_and_methods() {
    let program = r#"
        class Point {
            x: number;
            y: number;
            constructor(x: number, y: number) { this.x = x; this.y = y; }
            norm2(): number { return this.x * this.x + this.y * this.y; }
        }
        let p = new Point(3, 4);
        console.log(p.x, p.y, p.norm2());
    "#;
    assert_eq!(run(program), "3 4 25\n");
}

#[test]
fn inheritance_and_super() {
    let program = r#"
        class Animal {
            name: string;
            constructor(name: string) { this.name = name; }
            speak(): string { return this.name + ' makes a sound'; }
        }
        class Dog extends Animal {
            constructor(name: string) { super(name); }
            speak(): string { return super.speak() + ': woof'; }
        }
        let d = new Dog('Rex');
        console.log(d.speak());
        console.log(d instanceof Dog, d instanceof Animal);
    "#;
    assert_eq!(run(program), "Rex makes a sound: woof\ntrue true\n");
}

#[test]
fn implicit_derived_constructor_forwards_arguments() {
    let program = r#"
        class Base {
            value: number;
            constructor(value: number) { this.value = value; }
        }
        class Child extends Base {}
        console.log(new Child(42).value);
    "#;
    assert_eq!(run(program), "42\n");
}

#[test]
fn field_initializers_and_statics() {
    let program = r#"
        class Counter {
            count = 100;
            static created = 0;
            static bump() { Counter.created++; }
        }
        Counter.bump(); Counter.bump();
        console.log(new Counter().count, Counter.created);
    "#;
    assert_eq!(run(program), "100 2\n");
}

#[test]
fn getters_setters_on_classes() {
    let program = r#"
        class Box {
            #w = 0;
            get width() { return this.#w; }
            set width(v: number) { this.#w = v < 0 ? 0 : v; }
        }
        let b = new Box();
        b.width = -5;
        console.log(b.width);
        b.width = 7;
        console.log(b.width);
    "#;
    assert_eq!(run(program), "0\n7\n");
}

#[test]
fn private_methods_dispatch_on_the_declaring_class() {
    let program = r#"
        class Calc {
            #scale(n: number) { return n * 10; }
            apply(n: number) { return this.#scale(n) + 1; }
        }
        console.log(new Calc().apply(4));
    "#;
    assert_eq!(run(program), "41\n");
}

#[test]
fn undeclared_assignments_land_in_extras() {
    let program = r#"
        class Bag {}
        let b: any = new Bag();
        b.later = 'dynamic';
        console.log(b.later);
        console.log('later' in b);
    "#;
    assert_eq!(run(program), "dynamic\ntrue\n");
}

#[test]
fn property_roundtrip_through_dynamic_path() {
    // Declared-slot reads agree between typed and dynamic access
    let program = r#"
        class P { x = 7; }
        let p = new P();
        let dynamic: any = p;
        console.log(p.x === dynamic['x']);
    "#;
    assert_eq!(run(program), "true\n");
}

#[test]
fn readonly_writes_outside_ctor_are_rejected() {
    let source = r#"
        class C {
            readonly id: number;
            constructor() { this.id = 1; }
            reset() { this.id = 0; }
        }
    "#;
    assert!(matches!(
        sable_emitter::compile(source, "main.ts"),
        Err(sable_emitter::CompileError::ReadonlyAssignment { .. })
    ));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn try_catch_finally_ordering() {
    let program = r#"
        function f(): string {
            let trace = '';
            try {
                trace += 'try;';
                throw new Error('boom');
            } catch (e: any) {
                trace += 'catch:' + e.message + ';';
            } finally {
                trace += 'finally;';
            }
            return trace;
        }
        console.log(f());
    "#;
    assert_eq!(run(program), "try;catch:boom;finally;\n");
}

#[test]
fn finally_runs_on_early_return() {
    let program = r#"
        let log = '';
        function f() {
            try {
                return 'ret';
            } finally {
                log += 'cleanup';
            }
        }
        console.log(f(), log);
    "#;
    assert_eq!(run(program), "ret cleanup\n");
}

#[test]
fn anything_can_be_thrown() {
    assert_eq!(
        run("try { throw 42; } catch (e) { console.log(typeof e, e); }"),
        "number 42\n"
    );
    assert_eq!(
        run("try { throw 'text'; } catch (e) { console.log(e); }"),
        "text\n"
    );
}

#[test]
fn uncaught_errors_propagate() {
    let error = run_err("null.x;");
    assert!(matches!(error, VmError::Thrown(_) | VmError::Type(_)));
}

#[test]
fn error_objects_carry_name_and_message() {
    assert_eq!(
        run(r#"
            try { undefined.x; } catch (e: any) {
                console.log(e instanceof TypeError, e instanceof Error, e.name);
            }
        "#),
        "true true TypeError\n"
    );
}

// ============================================================================
// Modules
// ============================================================================

#[test]
fn crypto_digest_determinism() {
    let program = r#"
        import * as c from 'crypto';
        let h = c.createHash('sha256');
        h.update('hello');
        console.log(h.digest('hex'));
    "#;
    assert_eq!(
        run(program),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\n"
    );
}

#[test]
fn incremental_hash_updates_match_single_update() {
    let program = r#"
        import * as c from 'crypto';
        let split = c.createHash('sha256');
        split.update('hel');
        split.update('lo');
        let whole = c.createHash('sha256');
        whole.update('hello');
        console.log(split.digest('hex') === whole.digest('hex'));
    "#;
    assert_eq!(run(program), "true\n");
}

#[test]
fn named_imports_read_export_slots() {
    let dep = r#"
        export const answer = 42;
        export function double(n: number) { return n * 2; }
        export default 'dflt';
    "#;
    let main = r#"
        import dflt, { answer, double } from './dep';
        console.log(answer, double(4), dflt);
    "#;

    let module = sable_emitter::compile(main, "main.ts").expect("compile main");
    let dep_source = dep.to_string();
    let mut vm = Vm::for_tests();
    vm.set_loader(Box::new(move |path: &str| {
        assert!(path.contains("dep"), "unexpected module path {path}");
        sable_emitter::compile(&dep_source, path)
            .map_err(|e| VmError::Internal(e.to_string()))
    }));
    vm.run_module(module, "main.ts").expect("run");
    assert_eq!(vm.captured_stdout(), "42 8 dflt\n");
}

#[test]
fn buffer_encodings() {
    assert_eq!(
        run(r#"
            let b = Buffer.from('abc');
            console.log(b.length, b.toString('hex'), b.toString('base64'), b.toString('utf8'));
        "#),
        "3 616263 YWJj abc\n"
    );
}

#[test]
fn bigint_arithmetic() {
    assert_eq!(
        run("let a = 9007199254740993n; console.log(a + 1n);"),
        "9007199254740994\n"
    );
}

#[test]
fn regex_literals_and_methods() {
    assert_eq!(run(r"console.log(/\d+/.test('abc123'));"), "true\n");
    assert_eq!(
        run(r"let m = 'a1b22'.match(/(\d+)b(\d+)/); console.log(m[1], m[2]);"),
        "1 22\n"
    );
}
