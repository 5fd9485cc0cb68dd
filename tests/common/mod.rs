//! Story fixtures shared by the integration tests

#![allow(dead_code)]

use inkvm::{Story, StoryBuilder};

/// Three lines, each preceded by an external call; the second is glued to
/// the first.
pub fn lookahead_story() -> Story {
    let mut b = StoryBuilder::new();
    b.start_eval()
        .call_external("foo", 0)
        .output()
        .end_eval()
        .line("Call1 ")
        .start_eval()
        .call_external("foo", 0)
        .output()
        .end_eval()
        .glue()
        .line("glued to Call 2")
        .start_eval()
        .call_external("foo", 0)
        .output()
        .end_eval()
        .line("Call 3 is separated")
        .done();
    b.story().expect("lookahead story builds")
}

/// Global tag, a knot with header tags and a tagged choice.
pub fn tags_story() -> Story {
    let mut b = StoryBuilder::new();
    b.tag("global_tag")
        .text("Hello")
        .tag("first_line")
        .newline()
        .divert("meadow");
    b.begin_knot("meadow")
        .tag("knot_tag")
        .text("A quiet meadow")
        .tag("scenery")
        .newline()
        .choice_text("Rest", &["choice_tag"], "rest")
        .done()
        .end_container();
    b.begin_knot("rest").line("You rest.").end().end_container();
    b.story().expect("tags story builds")
}

/// A counter bumped between lines.
pub fn counter_story() -> Story {
    let mut b = StoryBuilder::new();
    b.global_int("counter", 0)
        .line("Start")
        .start_eval()
        .get_var("counter")
        .int(1)
        .op(inkvm::types::Command::Add)
        .end_eval()
        .set_var("counter")
        .line("Middle")
        .start_eval()
        .int(5)
        .end_eval()
        .set_var("counter")
        .line("End")
        .done();
    b.story().expect("counter story builds")
}

/// A hub with three choices; the third leads to a second choice point.
pub fn crossroads_story() -> Story {
    let mut b = StoryBuilder::new();
    b.global_int("mood", 0).divert("start");
    b.begin_knot("start")
        .line("Where to?")
        .choice_text("North", &[], "north")
        .choice_text("East", &[], "east")
        .choice_text("South", &[], "south")
        .done()
        .end_container();
    b.begin_knot("north").line("Cold wind.").end().end_container();
    b.begin_knot("east").line("Sunrise.").end().end_container();
    b.begin_knot("south")
        .line("You head south.")
        .start_eval()
        .get_var("mood")
        .int(1)
        .op(inkvm::types::Command::Add)
        .end_eval()
        .set_var("mood")
        .line("A river blocks the way.")
        .choice_text("Swim", &["wet"], "swim")
        .choice_text("Turn back", &[], "start")
        .done()
        .end_container();
    b.begin_knot("swim")
        .line("Brr!")
        .text("Mood: ")
        .output_var("mood")
        .newline()
        .end()
        .end_container();
    b.story().expect("crossroads story builds")
}

/// A camp knot threading in a chatter knot: its lines come first, then its
/// choice joins the camp's own.
pub fn campfire_story() -> Story {
    let mut b = StoryBuilder::new();
    b.divert("camp");
    b.begin_knot("camp")
        .line("Camp.")
        .thread("chatter")
        .choice_text("Rest", &[], "rest")
        .done()
        .end_container();
    b.begin_knot("chatter")
        .start_eval()
        .text("weather")
        .temp("topic")
        .end_eval()
        .line("The fire crackles.")
        .line("An owl hoots.")
        .choice_text("Talk", &[], "talk")
        .done()
        .end_container();
    b.begin_knot("talk")
        .text("You talk about the ")
        .output_var("topic")
        .text(".")
        .newline()
        .end()
        .end_container();
    b.begin_knot("rest").line("You rest.").end().end_container();
    b.story().expect("campfire story builds")
}
