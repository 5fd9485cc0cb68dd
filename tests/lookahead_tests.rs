mod common;

use inkvm::{ExternalFunction, StoryBuilder, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn counting(counter: &Rc<Cell<u32>>) -> ExternalFunction {
    let counter = Rc::clone(counter);
    ExternalFunction::void(move |_| {
        counter.set(counter.get() + 1);
        Ok(())
    })
}

/// A lookahead-safe external runs once more than the logical call count:
/// the runner executes it speculatively while resolving glue.
#[test]
fn safe_external_is_called_during_lookahead() {
    let story = common::lookahead_story();
    let mut runner = story.new_runner(None).expect("runner");
    let calls = Rc::new(Cell::new(0));
    runner.bind("foo", counting(&calls).lookahead_safe());

    assert_eq!(runner.getline().unwrap(), "Call1 glued to Call 2\n");
    assert_eq!(calls.get(), 3);
    assert_eq!(runner.getline().unwrap(), "Call 3 is separated\n");
    assert_eq!(calls.get(), 4);
    assert!(!runner.can_continue());
}

/// An unsafe external forces a line boundary before it and runs exactly once
/// per call site.
#[test]
fn unsafe_external_ends_the_line() {
    let story = common::lookahead_story();
    let mut runner = story.new_runner(None).expect("runner");
    let calls = Rc::new(Cell::new(0));
    runner.bind("foo", counting(&calls));

    assert_eq!(runner.getline().unwrap(), "Call1\n");
    assert_eq!(calls.get(), 1);
    assert_eq!(runner.getline().unwrap(), "glued to Call 2\n");
    assert_eq!(calls.get(), 2);
    assert_eq!(runner.getline().unwrap(), "Call 3 is separated\n");
    assert_eq!(calls.get(), 3);
    assert!(!runner.can_continue());
}

#[test]
fn rolled_back_writes_notify_once() {
    let story = common::counter_story();
    let mut runner = story.new_runner(None).expect("runner");
    let seen: Rc<RefCell<Vec<(Value, Option<Value>)>>> = Rc::default();
    let log = Rc::clone(&seen);
    runner
        .globals()
        .observe("counter", move |new, old| {
            log.borrow_mut().push((new.clone(), old.cloned()));
            Ok(())
        })
        .unwrap();

    assert_eq!(runner.getline().unwrap(), "Start\n");
    assert_eq!(runner.globals().get("counter").unwrap(), Value::Int(0));
    assert_eq!(runner.getline().unwrap(), "Middle\n");
    assert_eq!(runner.globals().get("counter").unwrap(), Value::Int(1));
    assert_eq!(runner.getline().unwrap(), "End\n");
    assert_eq!(runner.globals().get("counter").unwrap(), Value::Int(5));

    assert_eq!(
        *seen.borrow(),
        vec![
            (Value::Int(0), None),
            (Value::Int(1), Some(Value::Int(0))),
            (Value::Int(5), Some(Value::Int(1))),
        ]
    );
}

#[test]
fn committed_lookahead_delivers_deferred_notification() {
    let mut b = StoryBuilder::new();
    b.global_int("gold", 0)
        .line("You find ")
        .start_eval()
        .int(3)
        .end_eval()
        .set_var("gold")
        .glue()
        .line("coins.")
        .done();
    let story = b.story().unwrap();
    let mut runner = story.new_runner(None).unwrap();
    let seen: Rc<RefCell<Vec<Value>>> = Rc::default();
    let log = Rc::clone(&seen);
    runner
        .globals()
        .observe("gold", move |new, _| {
            log.borrow_mut().push(new.clone());
            Ok(())
        })
        .unwrap();

    assert_eq!(runner.getline().unwrap(), "You find coins.\n");
    assert_eq!(*seen.borrow(), vec![Value::Int(0), Value::Int(3)]);
}

#[test]
fn failing_observer_during_commit_is_reported() {
    let story = common::counter_story();
    let mut runner = story.new_runner(None).unwrap();
    runner
        .globals()
        .observe_delta("counter", |_, _| anyhow::bail!("display gone"))
        .unwrap();

    assert_eq!(runner.getline().unwrap(), "Start\n");
    assert!(runner.take_callback_errors().is_empty());
    assert_eq!(runner.getline().unwrap(), "Middle\n");
    let errors = runner.take_callback_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_callback());
    assert_eq!(runner.globals().get("counter").unwrap(), Value::Int(1));
}

/// A second runner on the same store is continued from inside the first
/// runner's lookahead. Its own rollback must leave the first runner's
/// speculative writes journaled.
#[test]
fn nested_runner_rollback_keeps_outer_lookahead() {
    let mut b = StoryBuilder::new();
    b.global_int("counter", 0)
        .line("A")
        .start_eval()
        .call_external("peek", 0)
        .pop()
        .get_var("counter")
        .int(1)
        .op(inkvm::types::Command::Add)
        .end_eval()
        .set_var("counter")
        .line("B")
        .done();
    let story = b.story().unwrap();
    let globals = story.new_globals();
    let mut runner = story.new_runner(Some(globals.clone())).unwrap();
    let other = Rc::new(RefCell::new(story.new_runner(Some(globals.clone())).unwrap()));

    let peeked: Rc<RefCell<Vec<Option<String>>>> = Rc::default();
    let log = Rc::clone(&peeked);
    let inner = Rc::clone(&other);
    runner.bind(
        "peek",
        ExternalFunction::void(move |_| {
            log.borrow_mut().push(inner.borrow_mut().getline().ok());
            Ok(())
        })
        .lookahead_safe(),
    );

    let fired = Rc::new(Cell::new(0));
    let count = Rc::clone(&fired);
    globals
        .observe_ping("counter", move || {
            count.set(count.get() + 1);
            Ok(())
        })
        .unwrap();

    assert_eq!(runner.getline().unwrap(), "A\n");
    assert_eq!(globals.get("counter").unwrap(), Value::Int(0));
    assert_eq!(fired.get(), 1);

    assert_eq!(runner.getline().unwrap(), "B\n");
    assert_eq!(globals.get("counter").unwrap(), Value::Int(1));
    assert_eq!(fired.get(), 2);
    assert_eq!(*peeked.borrow(), [Some("A\n".to_string()), None]);
    assert!(other.borrow().globals().ptr_eq(&globals));
}
