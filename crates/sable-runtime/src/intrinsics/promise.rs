//! Promise statics and instance methods.
//!
//! `Promise.all` resolves in input-index order; `race`/`any` settle with
//! the first matching settlement; `all([])` resolves immediately while
//! `race([])` stays pending forever.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::iterator::collect_into;
use crate::promise::{PromiseData, ReactionHandler};
use crate::value::{ObjectData, PropKey, Value};
use crate::vm::Vm;

use super::arg;

fn recv(args: &[Value]) -> VmResult<Rc<PromiseData>> {
    match args.first() {
        Some(Value::Promise(p)) => Ok(p.clone()),
        _ => Err(VmError::type_error("Receiver is not a Promise")),
    }
}

/// `new Promise(executor)`
pub fn new_promise(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let executor = arg(args, 0);
    if !executor.is_callable() {
        return Err(VmError::type_error("Promise resolver is not a function"));
    }
    let promise = PromiseData::new();

    let resolve_target = promise.clone();
    let resolve = Value::native("resolve", move |vm, _this, args| {
        vm.resolve_promise(&resolve_target, args.first().cloned().unwrap_or(Value::Undefined));
        Ok(Value::Undefined)
    });
    let reject_target = promise.clone();
    let reject = Value::native("reject", move |vm, _this, args| {
        vm.reject_promise(&reject_target, args.first().cloned().unwrap_or(Value::Undefined));
        Ok(Value::Undefined)
    });

    if let Err(e) = vm.call_value(&executor, Value::Undefined, &[resolve, reject]) {
        if !e.is_catchable() {
            return Err(e);
        }
        let reason = vm.error_to_value(e);
        vm.reject_promise(&promise, reason);
    }
    Ok(Value::Promise(promise))
}

pub fn resolve(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    Ok(Value::Promise(vm.promise_of(arg(args, 0))))
}

pub fn reject(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    // Routed through the VM so unhandled rejections get reported
    let promise = PromiseData::new();
    vm.reject_promise(&promise, arg(args, 0));
    Ok(Value::Promise(promise))
}

pub fn all(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let mut items = Vec::new();
    collect_into(vm, &arg(args, 0), &mut items)?;

    let result = PromiseData::new();
    if items.is_empty() {
        vm.resolve_promise(&result, Value::array(Vec::new()));
        return Ok(Value::Promise(result));
    }

    let slots = Rc::new(RefCell::new(vec![Value::Undefined; items.len()]));
    let remaining = Rc::new(Cell::new(items.len()));

    for (i, item) in items.into_iter().enumerate() {
        let inner = vm.promise_of(item);
        let slots = slots.clone();
        let remaining = remaining.clone();
        let result_ok = result.clone();
        let result_err = result.clone();
        vm.promise_react(
            &inner,
            ReactionHandler::Native(Box::new(move |vm, value| {
                slots.borrow_mut()[i] = value;
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let values = std::mem::take(&mut *slots.borrow_mut());
                    vm.resolve_promise(&result_ok, Value::array(values));
                }
            })),
            ReactionHandler::Native(Box::new(move |vm, reason| {
                vm.reject_promise(&result_err, reason);
            })),
        );
    }
    Ok(Value::Promise(result))
}

pub fn all_settled(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let mut items = Vec::new();
    collect_into(vm, &arg(args, 0), &mut items)?;

    let result = PromiseData::new();
    if items.is_empty() {
        vm.resolve_promise(&result, Value::array(Vec::new()));
        return Ok(Value::Promise(result));
    }

    let slots = Rc::new(RefCell::new(vec![Value::Undefined; items.len()]));
    let remaining = Rc::new(Cell::new(items.len()));

    for (i, item) in items.into_iter().enumerate() {
        let inner = vm.promise_of(item);
        let finish = {
            let slots = slots.clone();
            let remaining = remaining.clone();
            let result = result.clone();
            move |vm: &mut Vm, entry: Value| {
                slots.borrow_mut()[i] = entry;
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let values = std::mem::take(&mut *slots.borrow_mut());
                    vm.resolve_promise(&result, Value::array(values));
                }
            }
        };
        let finish_err = finish.clone();
        vm.promise_react(
            &inner,
            ReactionHandler::Native(Box::new(move |vm, value| {
                let entry = ObjectData::new();
                entry.set_data(PropKey::str("status"), Value::str("fulfilled"));
                entry.set_data(PropKey::str("value"), value);
                finish(vm, Value::Object(Rc::new(entry)));
            })),
            ReactionHandler::Native(Box::new(move |vm, reason| {
                let entry = ObjectData::new();
                entry.set_data(PropKey::str("status"), Value::str("rejected"));
                entry.set_data(PropKey::str("reason"), reason);
                finish_err(vm, Value::Object(Rc::new(entry)));
            })),
        );
    }
    Ok(Value::Promise(result))
}

pub fn race(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let mut items = Vec::new();
    collect_into(vm, &arg(args, 0), &mut items)?;

    // race([]) never settles
    let result = PromiseData::new();
    for item in items {
        let inner = vm.promise_of(item);
        let result_ok = result.clone();
        let result_err = result.clone();
        vm.promise_react(
            &inner,
            ReactionHandler::Native(Box::new(move |vm, value| {
                vm.resolve_promise(&result_ok, value);
            })),
            ReactionHandler::Native(Box::new(move |vm, reason| {
                vm.reject_promise(&result_err, reason);
            })),
        );
    }
    Ok(Value::Promise(result))
}

pub fn any(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let mut items = Vec::new();
    collect_into(vm, &arg(args, 0), &mut items)?;

    let result = PromiseData::new();
    if items.is_empty() {
        let reason = vm.make_error("AggregateError", "All promises were rejected");
        vm.reject_promise(&result, reason);
        return Ok(Value::Promise(result));
    }

    let remaining = Rc::new(Cell::new(items.len()));
    for item in items {
        let inner = vm.promise_of(item);
        let result_ok = result.clone();
        let result_err = result.clone();
        let remaining = remaining.clone();
        vm.promise_react(
            &inner,
            ReactionHandler::Native(Box::new(move |vm, value| {
                vm.resolve_promise(&result_ok, value);
            })),
            ReactionHandler::Native(Box::new(move |vm, _reason| {
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let reason = vm.make_error("AggregateError", "All promises were rejected");
                    vm.reject_promise(&result_err, reason);
                }
            })),
        );
    }
    Ok(Value::Promise(result))
}

pub fn then(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let promise = recv(args)?;
    let on_f = match arg(args, 1) {
        v if v.is_callable() => ReactionHandler::Call(v),
        _ => ReactionHandler::PassThrough,
    };
    let on_r = match arg(args, 2) {
        v if v.is_callable() => ReactionHandler::Call(v),
        _ => ReactionHandler::PassThrough,
    };
    Ok(Value::Promise(vm.promise_then(&promise, on_f, on_r)))
}

pub fn catch(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let promise = recv(args)?;
    let on_r = match arg(args, 1) {
        v if v.is_callable() => ReactionHandler::Call(v),
        _ => ReactionHandler::PassThrough,
    };
    Ok(Value::Promise(vm.promise_then(
        &promise,
        ReactionHandler::PassThrough,
        on_r,
    )))
}

pub fn finally(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let promise = recv(args)?;
    let cb = arg(args, 1);
    if !cb.is_callable() {
        return Ok(Value::Promise(vm.promise_then(
            &promise,
            ReactionHandler::PassThrough,
            ReactionHandler::PassThrough,
        )));
    }

    let derived = PromiseData::new();
    let derived_ok = derived.clone();
    let derived_err = derived.clone();
    let cb_ok = cb.clone();
    vm.promise_react(
        &promise,
        ReactionHandler::Native(Box::new(move |vm, value| {
            match vm.call_value(&cb_ok, Value::Undefined, &[]) {
                Ok(_) => vm.resolve_promise(&derived_ok, value),
                Err(e) => {
                    let reason = vm.error_to_value(e);
                    vm.reject_promise(&derived_ok, reason);
                }
            }
        })),
        ReactionHandler::Native(Box::new(move |vm, reason| {
            match vm.call_value(&cb, Value::Undefined, &[]) {
                Ok(_) => vm.reject_promise(&derived_err, reason),
                Err(e) => {
                    let new_reason = vm.error_to_value(e);
                    vm.reject_promise(&derived_err, new_reason);
                }
            }
        })),
    );
    Ok(Value::Promise(derived))
}
