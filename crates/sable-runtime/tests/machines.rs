//! State machines end to end: generators, async functions, async
//! generators, delegation, suspension across loops and try regions, and
//! the promise/microtask ordering guarantees.

use sable_runtime::Vm;

fn run(source: &str) -> String {
    let module = sable_emitter::compile(source, "main.ts").expect("compile");
    let mut vm = Vm::for_tests();
    vm.run_module(module, "main.ts").expect("run");
    vm.captured_stdout()
}

// ============================================================================
// Generators
// ============================================================================

#[test]
fn generator_with_yield_delegation() {
    let program = r#"
        function* g(){ yield 1; yield* [2,3]; yield 4; }
        for(const x of g()) console.log(x);
    "#;
    assert_eq!(run(program), "1\n2\n3\n4\n");
}

#[test]
fn generator_protocol_records() {
    let program = r#"
        function* g() { yield 'a'; return 'end'; }
        let it = g();
        let first = it.next();
        console.log(first.value, first.done);
        let second = it.next();
        console.log(second.value, second.done);
        let third = it.next();
        console.log(third.value, third.done);
    "#;
    assert_eq!(run(program), "a false\nend true\nundefined true\n");
}

#[test]
fn generator_receives_sent_values() {
    let program = r#"
        function* echo() {
            let got = yield 'first';
            yield 'got:' + got;
        }
        let it = echo();
        console.log(it.next().value);
        console.log(it.next('payload').value);
    "#;
    assert_eq!(run(program), "first\ngot:payload\n");
}

#[test]
fn generator_locals_survive_suspension() {
    // The loop counter and accumulator are hoisted across each yield
    let program = r#"
        function* counters() {
            let total = 0;
            for (let i = 1; i <= 3; i++) {
                total += i;
                yield total;
            }
        }
        console.log([...counters()].join(','));
    "#;
    assert_eq!(run(program), "1,3,6\n");
}

#[test]
fn generator_delegates_to_another_generator() {
    let program = r#"
        function* inner() { yield 'i1'; yield 'i2'; }
        function* outer() { yield 'o1'; yield* inner(); yield 'o2'; }
        console.log([...outer()].join(' '));
    "#;
    assert_eq!(run(program), "o1 i1 i2 o2\n");
}

#[test]
fn generator_try_finally_across_yield() {
    let program = r#"
        function* g() {
            try {
                yield 1;
                throw new Error('inside');
            } catch (e: any) {
                yield 'caught:' + e.message;
            }
            yield 'after';
        }
        for (const v of g()) console.log(v);
    "#;
    assert_eq!(run(program), "1\ncaught:inside\nafter\n");
}

#[test]
fn generator_throw_routes_through_handlers() {
    let program = r#"
        function* g() {
            try {
                yield 'start';
            } catch (e) {
                yield 'recovered:' + e;
            }
        }
        let it = g();
        console.log(it.next().value);
        console.log(it.throw('bang').value);
    "#;
    assert_eq!(run(program), "start\nrecovered:bang\n");
}

#[test]
fn generator_reentrancy_is_rejected() {
    let program = r#"
        let it: any;
        function* g() {
            try {
                it.next();
            } catch (e: any) {
                console.log('blocked:' + e.name);
            }
            yield 'done';
        }
        it = g();
        console.log(it.next().value);
    "#;
    assert_eq!(run(program), "blocked:TypeError\ndone\n");
}

#[test]
fn spread_consumes_generators() {
    let program = r#"
        function* g() { yield* [10, 20]; }
        console.log(Math.max(...g()));
    "#;
    assert_eq!(run(program), "20\n");
}

// ============================================================================
// Async functions
// ============================================================================

#[test]
fn async_await_over_promise_all() {
    let program = r#"
        async function f(){ let r = await Promise.all([Promise.resolve(1), Promise.resolve(2)]); return r[0]+r[1]; }
        f().then(v=>console.log(v));
    "#;
    assert_eq!(run(program), "3\n");
}

#[test]
fn await_non_promise_resumes_synchronously() {
    let program = r#"
        async function f() {
            let v = await 5;
            return v + 1;
        }
        f().then(v => console.log(v));
    "#;
    assert_eq!(run(program), "6\n");
}

#[test]
fn async_rejection_reaches_catch() {
    let program = r#"
        async function fails() { throw new Error('nope'); }
        fails().catch((e: any) => console.log('caught', e.message));
    "#;
    assert_eq!(run(program), "caught nope\n");
}

#[test]
fn await_in_try_catches_rejections() {
    let program = r#"
        async function f() {
            try {
                await Promise.reject(new Error('bad'));
                return 'unreachable';
            } catch (e: any) {
                return 'handled:' + e.message;
            }
        }
        f().then(v => console.log(v));
    "#;
    assert_eq!(run(program), "handled:bad\n");
}

#[test]
fn async_locals_survive_suspension() {
    let program = r#"
        async function acc() {
            let total = 0;
            for (let i = 1; i <= 3; i++) {
                total += await Promise.resolve(i);
            }
            return total;
        }
        acc().then(v => console.log(v));
    "#;
    assert_eq!(run(program), "6\n");
}

#[test]
fn async_chains_sequence() {
    let program = r#"
        async function step(n: number) { return n * 10; }
        async function pipeline() {
            let a = await step(1);
            let b = await step(a + 1);
            return b;
        }
        pipeline().then(v => console.log(v));
    "#;
    assert_eq!(run(program), "110\n");
}

// ============================================================================
// Promise combinators and ordering
// ============================================================================

#[test]
fn then_runs_as_microtask_after_sync_code() {
    let program = r#"
        Promise.resolve('later').then(v => console.log(v));
        console.log('first');
    "#;
    assert_eq!(run(program), "first\nlater\n");
}

#[test]
fn microtask_ordering_is_fifo() {
    let program = r#"
        Promise.resolve(1).then(() => console.log('a'));
        Promise.resolve(2).then(() => console.log('b'));
        console.log('sync');
    "#;
    assert_eq!(run(program), "sync\na\nb\n");
}

#[test]
fn promise_all_preserves_index_order() {
    let program = r#"
        let slow = new Promise(resolve => {
            Promise.resolve().then(() => Promise.resolve()).then(() => resolve('slow'));
        });
        Promise.all([slow, Promise.resolve('fast')]).then(r => console.log(r.join(',')));
    "#;
    assert_eq!(run(program), "slow,fast\n");
}

#[test]
fn promise_all_empty_resolves_immediately() {
    let program = r#"
        Promise.all([]).then(r => console.log('len', r.length));
    "#;
    assert_eq!(run(program), "len 0\n");
}

#[test]
fn promise_all_rejects_on_first_failure() {
    let program = r#"
        Promise.all([Promise.resolve(1), Promise.reject('bad')])
            .then(() => console.log('unreachable'))
            .catch(e => console.log('rejected', e));
    "#;
    assert_eq!(run(program), "rejected bad\n");
}

#[test]
fn promise_race_and_any() {
    let program = r#"
        Promise.race([Promise.resolve('winner'), new Promise(() => {})])
            .then(v => console.log(v));
        Promise.any([Promise.reject('x'), Promise.resolve('ok')])
            .then(v => console.log(v));
    "#;
    assert_eq!(run(program), "winner\nok\n");
}

#[test]
fn promise_chaining_transforms_values() {
    let program = r#"
        Promise.resolve(2)
            .then(v => v * 3)
            .then(v => Promise.resolve(v + 1))
            .then(v => console.log(v));
    "#;
    assert_eq!(run(program), "7\n");
}

#[test]
fn promise_finally_passes_values_through() {
    let program = r#"
        Promise.resolve('kept')
            .finally(() => console.log('cleanup'))
            .then(v => console.log(v));
    "#;
    assert_eq!(run(program), "cleanup\nkept\n");
}

#[test]
fn executor_constructor_resolves() {
    let program = r#"
        new Promise<string>((resolve, reject) => resolve('built'))
            .then(v => console.log(v));
    "#;
    assert_eq!(run(program), "built\n");
}

#[test]
fn unhandled_rejections_reach_stderr() {
    let module = sable_emitter::compile("Promise.reject('lost');", "main.ts").expect("compile");
    let mut vm = Vm::for_tests();
    vm.run_module(module, "main.ts").expect("run");
    assert!(vm.captured_stderr().contains("lost"));
}

// ============================================================================
// Async generators
// ============================================================================

#[test]
fn async_generator_for_await() {
    let program = r#"
        async function* gen() {
            yield 1;
            yield await Promise.resolve(2);
            yield 3;
        }
        async function main() {
            for await (const v of gen()) console.log(v);
        }
        main();
    "#;
    assert_eq!(run(program), "1\n2\n3\n");
}

#[test]
fn for_await_accepts_sync_iterables() {
    // Async iteration probes the async protocol, then falls back to sync
    let program = r#"
        async function main() {
            for await (const v of [7, 8]) console.log(v);
        }
        main();
    "#;
    assert_eq!(run(program), "7\n8\n");
}

#[test]
fn async_generator_delegates_to_sync_iterable() {
    let program = r#"
        async function* gen() {
            yield* [1, 2];
            yield 3;
        }
        async function main() {
            for await (const v of gen()) console.log(v);
        }
        main();
    "#;
    assert_eq!(run(program), "1\n2\n3\n");
}

#[test]
fn top_level_await_drives_the_entry_module() {
    let program = r#"
        let v = await Promise.resolve('top');
        console.log(v);
    "#;
    assert_eq!(run(program), "top\n");
}
