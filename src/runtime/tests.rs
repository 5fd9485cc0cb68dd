//! Tests for the runtime module

use super::*;
use crate::story::StoryBuilder;
use crate::types::command::{Command, flags};

fn runner(builder: &StoryBuilder) -> Runner {
    builder
        .story()
        .expect("story builds")
        .new_runner_with_config(None, RunnerConfig::default().with_seed(42))
        .expect("runner")
}

#[test]
fn runtime_glue_joins_lines() {
    let mut b = StoryBuilder::new();
    b.line("Hello ").glue().line("world").line("Bye").done();
    let mut runner = runner(&b);

    assert_eq!(runner.getline().unwrap(), "Hello world\n");
    assert_eq!(runner.getline().unwrap(), "Bye\n");
    assert!(!runner.can_continue());
    assert_eq!(runner.status(), RunnerStatus::Idle);
}

#[test]
fn runtime_without_lookahead_ends_at_newline() {
    let mut b = StoryBuilder::new();
    b.line("A").glue().line("B").done();
    let story = b.story().unwrap();
    let config = RunnerConfig::default().with_seed(1).without_lookahead();
    let mut runner = story.new_runner_with_config(None, config).unwrap();

    assert_eq!(runner.getline().unwrap(), "A\n");
    assert_eq!(runner.getline().unwrap(), "B\n");
}

#[test]
fn runtime_function_result_is_output() {
    let mut b = StoryBuilder::new();
    b.text("Total: ")
        .start_eval()
        .int(2)
        .int(3)
        .call_function("add")
        .output()
        .end_eval()
        .newline()
        .done();
    b.begin_function("add")
        .temp("b")
        .temp("a")
        .start_eval()
        .get_var("a")
        .get_var("b")
        .op(Command::Add)
        .end_eval()
        .ret_function()
        .end_container();
    let mut runner = runner(&b);

    assert_eq!(runner.getline().unwrap(), "Total: 5\n");
}

#[test]
fn runtime_tunnel_returns_to_caller() {
    let mut b = StoryBuilder::new();
    b.tunnel("aside").line("Back").done();
    b.begin_knot("aside")
        .line("Aside")
        .tunnel_return()
        .end_container();
    let mut runner = runner(&b);

    assert_eq!(runner.getline().unwrap(), "Aside\n");
    assert_eq!(runner.visit_count("aside"), Some(1));
    assert_eq!(runner.getline().unwrap(), "Back\n");
    assert!(!runner.can_continue());
}

#[test]
fn runtime_thread_works_on_a_copy_of_the_stack() {
    let mut b = StoryBuilder::new();
    b.start_eval()
        .int(1)
        .temp("n")
        .end_eval()
        .thread("side")
        .output_var("n")
        .newline()
        .done();
    b.begin_knot("side")
        .start_eval()
        .int(2)
        .end_eval()
        .set_var("n")
        .text("Side ")
        .output_var("n")
        .newline()
        .done()
        .end_container();
    let mut runner = runner(&b);

    assert_eq!(runner.getline().unwrap(), "Side 2\n");
    assert_eq!(runner.state.threads.len(), 1);
    assert_eq!(runner.getline().unwrap(), "1\n");
    assert!(runner.state.threads.is_empty());
    assert!(!runner.is_ended());
}

#[test]
fn runtime_choosing_a_thread_choice_continues_in_the_thread() {
    let mut b = StoryBuilder::new();
    b.line("Hub")
        .thread("extra")
        .choice_text("Stay", &[], "stay")
        .done();
    b.begin_knot("extra")
        .start_eval()
        .int(7)
        .temp("coins")
        .end_eval()
        .choice_text("Leave", &[], "leave")
        .done()
        .end_container();
    b.begin_knot("leave")
        .text("Coins: ")
        .output_var("coins")
        .newline()
        .end()
        .end_container();
    b.begin_knot("stay").line("Stayed").end().end_container();
    let mut runner = runner(&b);

    assert_eq!(runner.getall().unwrap(), "Hub\n");
    let texts: Vec<_> = runner.choices().iter().map(|c| c.text().to_string()).collect();
    assert_eq!(texts, ["Leave", "Stay"]);
    runner.choose(0).unwrap();
    assert!(runner.state.threads.is_empty());
    assert_eq!(runner.getall().unwrap(), "Coins: 7\n");
}

#[test]
fn runtime_ref_parameters_write_through() {
    let mut b = StoryBuilder::new();
    b.global_int("score", 1)
        .start_eval()
        .int(10)
        .temp("bonus")
        .pointer("score")
        .int(5)
        .call_function("add_to")
        .pop()
        .pointer("bonus")
        .int(3)
        .call_function("add_to")
        .pop()
        .end_eval()
        .output_var("score")
        .text(" ")
        .output_var("bonus")
        .newline()
        .done();
    b.begin_function("add_to")
        .temp("amount")
        .temp("x")
        .start_eval()
        .get_var("x")
        .get_var("amount")
        .op(Command::Add)
        .end_eval()
        .reassign_temp("x")
        .end_container();
    let mut runner = runner(&b);

    assert_eq!(runner.getline().unwrap(), "6 13\n");
    assert_eq!(runner.globals().get("score").unwrap(), Value::Int(6));
}

#[test]
fn runtime_pointer_to_a_pointer_stays_one_hop() {
    let mut b = StoryBuilder::new();
    b.global_int("hp", 3)
        .start_eval()
        .pointer("hp")
        .call_function("outer")
        .pop()
        .end_eval()
        .output_var("hp")
        .newline()
        .done();
    b.begin_function("outer")
        .temp("target")
        .start_eval()
        .pointer("target")
        .call_function("heal")
        .pop()
        .end_eval()
        .end_container();
    b.begin_function("heal")
        .temp("x")
        .start_eval()
        .get_var("x")
        .int(4)
        .op(Command::Add)
        .end_eval()
        .reassign_temp("x")
        .end_container();
    let mut runner = runner(&b);

    assert_eq!(runner.getline().unwrap(), "7\n");
}

#[test]
fn runtime_conditional_divert_with_temp() {
    let mut b = StoryBuilder::new();
    let skip = b.label();
    b.start_eval()
        .int(1)
        .temp("x")
        .get_var("x")
        .int(1)
        .op(Command::IsEqual)
        .end_eval()
        .divert_if(skip)
        .line("not shown")
        .place(skip)
        .line("shown")
        .done();
    let mut runner = runner(&b);

    assert_eq!(runner.getall().unwrap(), "shown\n");
}

#[test]
fn runtime_read_count_after_knot() {
    let mut b = StoryBuilder::new();
    b.begin_knot("intro").line("Hi").end_container();
    b.start_eval()
        .read_count("intro")
        .end_eval()
        .output()
        .newline()
        .done();
    let mut runner = runner(&b);

    assert_eq!(runner.getline().unwrap(), "Hi\n");
    assert_eq!(runner.getline().unwrap(), "1\n");
}

fn hub_story() -> StoryBuilder {
    let mut b = StoryBuilder::new();
    b.begin_knot("hub")
        .start_eval()
        .start_str()
        .text("Once")
        .end_str()
        .end_eval()
        .choice(
            "once",
            flags::CHOICE_HAS_CHOICE_ONLY_CONTENT | flags::CHOICE_IS_ONCE_ONLY,
        )
        .choice("out", flags::CHOICE_IS_INVISIBLE_DEFAULT)
        .done()
        .end_container();
    b.begin_knot("once")
        .line("Picked")
        .divert("hub")
        .end_container();
    b.begin_knot("out").line("Fallback").end().end_container();
    b
}

#[test]
fn runtime_once_only_choice_then_fallback() {
    let mut runner = runner(&hub_story());

    assert_eq!(runner.getline().unwrap(), "");
    assert_eq!(runner.status(), RunnerStatus::HasChoices);
    assert_eq!(runner.num_choices(), 1);
    assert_eq!(runner.get_choice(0).map(Choice::text), Some("Once"));

    runner.choose(0).unwrap();
    assert_eq!(runner.getline().unwrap(), "Picked\n");
    assert_eq!(runner.getline().unwrap(), "Fallback\n");
    assert!(runner.is_ended());
    assert!(!runner.has_choices());
    assert_eq!(runner.turn(), 2);
}

#[test]
fn runtime_choice_tags_stay_on_choice() {
    let mut b = StoryBuilder::new();
    b.line("Pick")
        .choice_text("Red", &["color"], "red")
        .done();
    b.begin_knot("red").line("Red it is").end().end_container();
    let mut runner = runner(&b);

    assert_eq!(runner.getline().unwrap(), "Pick\n");
    assert!(!runner.has_tags());
    let choice = runner.get_choice(0).unwrap();
    assert_eq!(choice.text(), "Red");
    assert_eq!(choice.tags(), ["color".to_string()]);
}

#[test]
fn runtime_invalid_choice_leaves_state() {
    let mut b = StoryBuilder::new();
    b.line("Pick").choice_text("Only", &[], "only").done();
    b.begin_knot("only").line("Done").end().end_container();
    let mut runner = runner(&b);
    runner.getline().unwrap();

    let err = runner.choose(5).unwrap_err();
    assert!(matches!(
        err,
        InkError::InvalidChoiceIndex {
            index: 5,
            available: 1
        }
    ));
    assert_eq!(runner.num_choices(), 1);
    runner.choose(0).unwrap();
    assert_eq!(runner.getline().unwrap(), "Done\n");
}

#[test]
fn runtime_getline_without_content_is_invalid_state() {
    let mut b = StoryBuilder::new();
    b.line("Only").done();
    let mut runner = runner(&b);
    runner.getline().unwrap();

    assert!(matches!(runner.getline(), Err(InkError::InvalidState { .. })));
    assert!(matches!(runner.choose(0), Err(InkError::InvalidChoiceIndex { .. })));
}

#[test]
fn runtime_error_is_fatal() {
    let mut b = StoryBuilder::new();
    b.start_eval()
        .int(1)
        .int(0)
        .op(Command::Divide)
        .end_eval()
        .output()
        .done();
    let mut runner = runner(&b);

    assert!(matches!(runner.getline(), Err(InkError::Runtime { .. })));
    assert_eq!(runner.status(), RunnerStatus::Error);
    assert!(!runner.can_continue());
    assert!(matches!(runner.getline(), Err(InkError::InvalidState { .. })));
}

#[test]
fn runtime_lookahead_error_surfaces_on_next_line() {
    let mut b = StoryBuilder::new();
    b.line("Safe")
        .start_eval()
        .int(1)
        .int(0)
        .op(Command::Mod)
        .end_eval()
        .output()
        .done();
    let mut runner = runner(&b);

    assert_eq!(runner.getline().unwrap(), "Safe\n");
    assert!(runner.can_continue());
    assert!(matches!(runner.getline(), Err(InkError::Runtime { .. })));
}

#[test]
fn runtime_random_is_seeded() {
    let mut b = StoryBuilder::new();
    for _ in 0..5 {
        b.start_eval()
            .int(1)
            .int(6)
            .op(Command::Random)
            .end_eval()
            .output()
            .newline();
    }
    b.done();
    let first = runner(&b).getall().unwrap();
    let second = runner(&b).getall().unwrap();

    assert_eq!(first, second);
    for line in first.lines() {
        let roll: i32 = line.parse().unwrap();
        assert!((1..=6).contains(&roll));
    }
}

#[test]
fn runtime_shuffle_shows_every_element_once_per_loop() {
    let mut b = StoryBuilder::new();
    b.begin_knot("shuffle")
        .start_eval()
        .op(Command::Visit)
        .int(3)
        .emit(Command::Sequence, flags::SEQUENCE_SHUFFLE, 0)
        .end_eval()
        .output()
        .newline()
        .done()
        .end_container();
    let mut runner = runner(&b);

    let mut seen = Vec::new();
    for _ in 0..3 {
        runner.move_to("shuffle").unwrap();
        seen.push(runner.getline().unwrap());
    }
    seen.sort();
    assert_eq!(seen, ["0\n", "1\n", "2\n"]);
}

#[test]
fn runtime_shuffle_rejects_negative_visit_count() {
    let mut b = StoryBuilder::new();
    b.start_eval()
        .int(-1)
        .int(3)
        .emit(Command::Sequence, flags::SEQUENCE_SHUFFLE, 0)
        .end_eval()
        .output()
        .newline()
        .done();
    let mut runner = runner(&b);

    assert!(matches!(runner.getline(), Err(InkError::Runtime { .. })));
    assert_eq!(runner.status(), RunnerStatus::Error);
}

#[test]
fn runtime_move_to_unknown_path() {
    let mut b = StoryBuilder::new();
    b.done();
    let mut runner = runner(&b);
    assert!(matches!(
        runner.move_to("nowhere"),
        Err(InkError::InvalidState { .. })
    ));
}

#[test]
fn runtime_list_operations_update_globals() {
    let mut b = StoryBuilder::new();
    b.list("items", &[("sword", 1), ("shield", 2), ("bow", 3)])
        .global_list("inv", &["items.sword"])
        .start_eval()
        .get_var("inv")
        .list_value(&["items.shield"])
        .op(Command::Add)
        .end_eval()
        .set_var("inv")
        .start_eval()
        .get_var("inv")
        .op(Command::ListCount)
        .end_eval()
        .output()
        .newline()
        .done();
    let mut runner = runner(&b);

    assert_eq!(runner.getline().unwrap(), "2\n");
    let inv = runner.globals().get("inv").unwrap();
    let list = inv.as_list().unwrap();
    assert!(list.contains("shield"));
    assert!(!list.contains("bow"));
}

mod externals {
    use super::*;
    use crate::functions::ExternalFunction;

    fn doubling_story() -> StoryBuilder {
        let mut b = StoryBuilder::new();
        b.start_eval()
            .int(4)
            .call_external("double", 1)
            .output()
            .end_eval()
            .newline()
            .done();
        b.begin_function("double")
            .temp("x")
            .start_eval()
            .get_var("x")
            .int(2)
            .op(Command::Multiply)
            .end_eval()
            .ret_function()
            .end_container();
        b
    }

    #[test]
    fn unbound_external_uses_story_function() {
        let mut runner = runner(&doubling_story());
        assert_eq!(runner.getline().unwrap(), "8\n");
    }

    #[test]
    fn bound_external_wins_over_fallback() {
        let mut runner = runner(&doubling_story());
        runner.bind(
            "double",
            ExternalFunction::returning(|args| Ok(Value::Int(args[0].as_int().unwrap() * 3)))
                .arity(1),
        );
        assert_eq!(runner.getline().unwrap(), "12\n");
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let mut runner = runner(&doubling_story());
        runner.bind(
            "double",
            ExternalFunction::returning(|_| Ok(Value::Int(0))).arity(2),
        );
        assert!(matches!(
            runner.getline(),
            Err(InkError::ExternalArity {
                expected: 2,
                actual: 1,
                ..
            })
        ));
        assert_eq!(runner.status(), RunnerStatus::Error);
    }

    #[test]
    fn missing_return_value() {
        let mut runner = runner(&doubling_story());
        runner.bind("double", ExternalFunction::returning(|_| Ok(Value::None)));
        assert!(matches!(
            runner.getline(),
            Err(InkError::ExternalReturnMissing { .. })
        ));
    }

    #[test]
    fn unbound_without_fallback() {
        let mut b = StoryBuilder::new();
        b.start_eval()
            .call_external("missing", 0)
            .pop()
            .end_eval()
            .line("never")
            .done();
        let mut runner = runner(&b);
        assert!(matches!(
            runner.getline(),
            Err(InkError::UnboundExternal { name }) if name == "missing"
        ));
    }

    #[test]
    fn failing_callback_is_isolated() {
        let mut b = StoryBuilder::new();
        b.start_eval()
            .call_external("notify", 0)
            .output()
            .end_eval()
            .line("after")
            .done();
        let mut runner = runner(&b);
        runner.bind(
            "notify",
            ExternalFunction::void(|_| anyhow::bail!("host unavailable")),
        );

        assert_eq!(runner.getline().unwrap(), "after\n");
        let errors = runner.take_callback_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_callback());
        assert!(runner.take_callback_errors().is_empty());
    }
}
