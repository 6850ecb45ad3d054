//! Foreign bridge integration tests
//!
//! Extern references, owned externs and their destructor/move hooks,
//! native function dispatch, and interaction with the collector.

use std::cell::Cell;
use std::rc::Rc;

use tarn_runtime::{Error, NIL, Result, Runtime, RuntimeOptions, Value, car, cdr};

fn rt() -> Runtime {
    Runtime::new(RuntimeOptions { heap_size: 1024 * 1024, load_stdlib: false }).unwrap()
}

/// Drop-counting payload for owned-extern lifecycle tests.
#[derive(Debug)]
struct Probe {
    drops: Rc<Cell<u32>>,
    tag: i64,
}

impl Drop for Probe {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn native_counter_observes_host_state() {
    struct Counter {
        hits: i64,
    }

    fn increment(rt: &mut Runtime, args: Value, _data: *mut ()) -> Result<Value> {
        let counter = rt.get_extern_reference::<Counter>(car(args)?)?;
        let step = car(cdr(args)?)?.as_int()?;
        // Safety: the host keeps the counter alive for the runtime's life.
        unsafe { (*counter).hits += step }
        Ok(NIL)
    }

    fn value(rt: &mut Runtime, args: Value, _data: *mut ()) -> Result<Value> {
        let counter = rt.get_extern_reference::<Counter>(car(args)?)?;
        // Safety: see `increment`.
        Ok(Value::from_int(unsafe { (*counter).hits }))
    }

    let mut counter = Box::new(Counter { hits: 0 });
    let p: *mut Counter = &mut *counter;

    let mut rt = rt();
    let ext = rt.make_extern_reference(p).unwrap();
    rt.define_global("c", ext);
    rt.define_fn("counter/increment", increment).unwrap();
    rt.define_fn("counter/value", value).unwrap();

    rt.load_source("(counter/increment c 1)").unwrap();
    rt.load_source("(counter/increment c 1)").unwrap();
    assert_eq!(rt.load_source("(counter/value c)").unwrap(), Value::from_int(2));
    assert_eq!(counter.hits, 2);
}

#[test]
fn context_pointer_reaches_the_native() {
    fn bump(_rt: &mut Runtime, _args: Value, data: *mut ()) -> Result<Value> {
        // Safety: registration passed a pointer to a live Cell.
        let calls = unsafe { &*(data as *const Cell<u32>) };
        calls.set(calls.get() + 1);
        Ok(NIL)
    }

    let calls = Box::new(Cell::new(0u32));
    let mut rt = rt();
    rt.define_fn_with("bump!", bump, &*calls as *const Cell<u32> as *mut ()).unwrap();
    rt.load_source("(bump!) (bump!) (bump!)").unwrap();
    assert_eq!(calls.get(), 3);
}

#[test]
fn extern_unpacking_checks_the_fingerprint() {
    let mut value = 7u32;
    let mut rt = rt();
    let ext = rt.make_extern_reference(&mut value as *mut u32).unwrap();

    assert!(rt.get_extern_reference::<u32>(ext).is_ok());
    match rt.get_extern_reference::<i64>(ext) {
        Err(Error::ForeignTypeMismatch { .. }) => {}
        other => panic!("expected foreign type mismatch, got {other:?}"),
    }
}

#[test]
fn applying_a_data_extern_is_a_typed_error() {
    let mut value = 7u32;
    let mut rt = rt();
    let ext = rt.make_extern_reference(&mut value as *mut u32).unwrap();
    rt.define_global("d", ext);
    match rt.load_source("(d 1)") {
        Err(Error::TypeMismatch { .. }) => {}
        other => panic!("expected type mismatch, got {other:?}"),
    }
}

#[test]
fn unreachable_owned_extern_is_destroyed_exactly_once() {
    let drops = Rc::new(Cell::new(0));
    let mut rt = rt();

    rt.make_owned_extern(Probe { drops: Rc::clone(&drops), tag: 1 }).unwrap();
    assert_eq!(drops.get(), 0);

    rt.collect_garbage().unwrap();
    assert_eq!(drops.get(), 1, "unreachable block runs its destructor once");

    rt.collect_garbage().unwrap();
    assert_eq!(drops.get(), 1, "a destroyed block is never revisited");
}

#[test]
fn reachable_owned_extern_moves_without_destruction() {
    let drops = Rc::new(Cell::new(0));
    let mut rt = rt();

    let v = rt.make_owned_extern(Probe { drops: Rc::clone(&drops), tag: 42 }).unwrap();
    let h = rt.handle_for(v);

    rt.collect_garbage().unwrap();
    assert_eq!(drops.get(), 0, "reachable blocks move, they do not die");

    let p = rt.get_extern_reference::<Probe>(h.get()).unwrap();
    // Safety: the block is owned and was just relocated by the collector.
    assert_eq!(unsafe { (*p).tag }, 42, "move hook must carry the payload");

    drop(h);
    rt.collect_garbage().unwrap();
    assert_eq!(drops.get(), 1, "dropping the last root frees the block");
}

#[test]
fn owned_extern_is_usable_from_script_across_collections() {
    struct Thing {
        x: i64,
        y: i64,
    }

    fn poke(rt: &mut Runtime, args: Value, _data: *mut ()) -> Result<Value> {
        let t = rt.get_extern_reference::<Thing>(car(args)?)?;
        // Safety: the payload is arena-owned and live.
        unsafe {
            (*t).x *= (*t).y;
            (*t).y += 1;
        }
        Ok(NIL)
    }

    let mut rt = rt();
    let v = rt.make_owned_extern(Thing { x: 1, y: 1 }).unwrap();
    let h = rt.handle_for(v);
    rt.define_global("v", v);
    rt.define_fn("thing/poke", poke).unwrap();

    rt.load_source("(thing/poke v)").unwrap();
    let t = rt.get_extern_reference::<Thing>(h.get()).unwrap();
    assert_eq!(unsafe { ((*t).x, (*t).y) }, (1, 2));

    rt.collect_garbage().unwrap();

    rt.load_source("(thing/poke v)").unwrap();
    let t = rt.get_extern_reference::<Thing>(h.get()).unwrap();
    assert_eq!(unsafe { ((*t).x, (*t).y) }, (2, 3));
}

#[test]
fn take_owned_extern_rescues_the_payload() {
    let drops = Rc::new(Cell::new(0));
    let mut rt = rt();

    let v = rt.make_owned_extern(Probe { drops: Rc::clone(&drops), tag: 9 }).unwrap();
    let taken = rt.take_owned_extern::<Probe>(v).unwrap();
    assert_eq!(taken.tag, 9);
    assert_eq!(drops.get(), 0);

    // The block left the owned set, so collection must not destroy it.
    rt.collect_garbage().unwrap();
    assert_eq!(drops.get(), 0);

    drop(taken);
    assert_eq!(drops.get(), 1);

    rt.collect_garbage().unwrap();
    assert_eq!(drops.get(), 1);
}

#[test]
fn take_rejects_a_plain_reference() {
    let mut host_value = Probe { drops: Rc::new(Cell::new(0)), tag: 0 };
    let mut rt = rt();
    let ext = rt.make_extern_reference(&mut host_value as *mut Probe).unwrap();
    match rt.take_owned_extern::<Probe>(ext) {
        Err(Error::ForeignTypeMismatch { .. }) => {}
        other => panic!("taking a borrowed reference must fail, got {other:?}"),
    }
}

#[test]
fn runtime_drop_destroys_remaining_owned_externs() {
    let drops = Rc::new(Cell::new(0));
    {
        let mut rt = rt();
        let v = rt.make_owned_extern(Probe { drops: Rc::clone(&drops), tag: 3 }).unwrap();
        rt.define_global("keep", v);
        assert_eq!(drops.get(), 0);
    }
    assert_eq!(drops.get(), 1, "runtime teardown must run owned destructors");
}

#[test]
fn two_references_to_one_owned_block_stay_aliased() {
    struct Slot {
        n: i64,
    }

    let mut rt = rt();
    let v = rt.make_owned_extern(Slot { n: 5 }).unwrap();
    // A second, independent cell referencing the same owned payload.
    let p = rt.get_extern_reference::<Slot>(v).unwrap();
    let alias = rt.make_extern_reference(p).unwrap();
    let list = rt.make_list(&[v, alias]).unwrap();
    let h = rt.handle_for(list);

    rt.collect_garbage().unwrap();

    let a = car(h.get()).unwrap();
    let b = car(cdr(h.get()).unwrap()).unwrap();
    let pa = rt.get_extern_reference::<Slot>(a).unwrap();
    let pb = rt.get_extern_reference::<Slot>(b).unwrap();
    assert_eq!(pa, pb, "one block must move once, not twice");
    // Safety: the payload is owned and live after the move.
    assert_eq!(unsafe { (*pa).n }, 5);
}
