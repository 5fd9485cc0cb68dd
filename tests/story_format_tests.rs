mod common;

use inkvm::{InkError, Story, StoryBuilder, Value};

fn bytes() -> Vec<u8> {
    let mut b = StoryBuilder::new();
    b.global_int("mood", 0)
        .line("Hi")
        .divert("cave")
        .begin_knot("cave")
        .line("Dark.")
        .end()
        .end_container();
    b.build().expect("builds")
}

#[test]
fn loads_built_story() {
    let story = Story::from_bytes(&bytes()).expect("loads");
    assert_eq!(story.knots().collect::<Vec<_>>(), ["cave"]);
    assert_eq!(
        story.declared_globals().collect::<Vec<_>>(),
        [("mood", &Value::Int(0))]
    );

    let mut runner = story.new_runner(None).unwrap();
    assert_eq!(runner.getall().unwrap(), "Hi\nDark.\n");
    assert!(runner.is_ended());
}

#[test]
fn rejects_bad_magic() {
    let mut data = bytes();
    data[0] = b'X';
    assert!(matches!(
        Story::from_bytes(&data),
        Err(InkError::InvalidStoryFormat { .. })
    ));
    assert!(matches!(
        Story::from_bytes(&[]),
        Err(InkError::InvalidStoryFormat { .. })
    ));
}

#[test]
fn rejects_newer_version() {
    let mut data = bytes();
    data[4] = 2;
    assert!(matches!(
        Story::from_bytes(&data),
        Err(InkError::UnsupportedVersion {
            found: 2,
            supported: 1
        })
    ));
}

#[test]
fn rejects_truncated_and_trailing_data() {
    let data = bytes();
    assert!(matches!(
        Story::from_bytes(&data[..data.len() - 3]),
        Err(InkError::InvalidStoryFormat { .. })
    ));
    let mut padded = data.clone();
    padded.push(0);
    assert!(matches!(
        Story::from_bytes(&padded),
        Err(InkError::InvalidStoryFormat { .. })
    ));
}

#[test]
fn builder_reports_unknown_paths() {
    let mut b = StoryBuilder::new();
    b.divert("nowhere").done();
    assert!(matches!(b.build(), Err(InkError::InvalidStoryFormat { .. })));
}

#[test]
fn runners_of_one_story_are_independent() {
    let story = common::crossroads_story();
    let mut first = story.new_runner(None).unwrap();
    let second = story.new_runner(None).unwrap();
    first.getall().unwrap();
    assert_eq!(first.num_choices(), 3);
    assert!(second.can_continue());
    assert_eq!(second.num_choices(), 0);
}
