// tests/sideband.rs

//! Sideband round trips: a child relay asking through `SidebandPrompter`
//! and a driver answering through `sideband::drive`, over socket pairs.

use shelly::callback::{CallbackRelay, Question, QuestionKind};
use shelly::relay::sideband::{self, Decision, Prompt, SidebandPrompter};
use std::io::{BufReader, Write};
use std::os::unix::net::UnixStream;
use std::thread;

fn yes_no(prompt: &str, default_answer: i32) -> Question {
    Question {
        kind: QuestionKind::ReplacePkg,
        prompt: prompt.into(),
        default_answer,
        providers: Vec::new(),
    }
}

fn providers() -> Question {
    Question {
        kind: QuestionKind::SelectProvider,
        prompt: "java-runtime".into(),
        default_answer: 0,
        providers: vec![
            "extra/jre-openjdk".into(),
            "extra/jre17-openjdk".into(),
            "extra/jre11-openjdk".into(),
        ],
    }
}

/// Run `questions` through a child relay while `decide` answers them
fn round_trip<F>(questions: Vec<Question>, decide: F) -> (Vec<i32>, Vec<Prompt>, String)
where
    F: FnMut(&Prompt) -> Decision,
{
    let (child_errors, driver_errors) = UnixStream::pair().unwrap();
    let (mut driver_input, child_input) = UnixStream::pair().unwrap();

    let child = thread::spawn(move || {
        let mut log = child_errors.try_clone().unwrap();
        writeln!(log, "loading packages...").unwrap();
        drop(log);

        let prompter = SidebandPrompter::new(BufReader::new(child_input), child_errors);
        let relay = CallbackRelay::new().on_question(move |question| prompter.ask(question));
        questions.iter().map(|q| relay.answer(q)).collect::<Vec<_>>()
    });

    let mut prompts = Vec::new();
    let mut decide = decide;
    let mut output = Vec::new();
    sideband::drive(
        BufReader::new(driver_errors),
        &mut driver_input,
        &mut output,
        |prompt| {
            prompts.push(prompt.clone());
            decide(prompt)
        },
    )
    .unwrap();

    let answers = child.join().unwrap();
    (answers, prompts, String::from_utf8(output).unwrap())
}

#[test]
fn test_yes_no_and_provider_answers_reach_the_child() {
    let (answers, prompts, output) = round_trip(
        vec![yes_no("Replace foo with core/bar?", 1), providers()],
        |prompt| match prompt {
            Prompt::YesNo { .. } => Decision::No,
            Prompt::SelectProvider { options, .. } => Decision::Index(options.len() - 1),
        },
    );

    assert_eq!(answers, vec![0, 2]);
    assert_eq!(output, "loading packages...\n");
    assert_eq!(
        prompts[0],
        Prompt::YesNo {
            text: "Replace foo with core/bar?".into()
        }
    );
    assert!(matches!(
        &prompts[1],
        Prompt::SelectProvider { name, options }
            if name == "java-runtime" && options[1] == "extra/jre17-openjdk"
    ));
}

#[test]
fn test_out_of_range_provider_falls_back_to_first() {
    let (answers, _, _) = round_trip(vec![providers()], |_| Decision::Index(7));
    assert_eq!(answers, vec![0]);
}

#[test]
fn test_automatic_decisions_keep_native_defaults() {
    let mut replace = yes_no("Replace foo with core/bar?", 1);
    replace.kind = QuestionKind::ReplacePkg;
    let mut remove = yes_no("Remove 2 packages?", 0);
    remove.kind = QuestionKind::RemovePkgs;
    let mut provider = providers();
    provider.default_answer = 2;

    let (answers, prompts, _) = round_trip(vec![remove, replace, provider], Decision::automatic);
    assert_eq!(prompts.len(), 3);
    assert_eq!(answers, vec![0, 1, 2]);
}

#[test]
fn test_multiline_prompt_stays_on_one_line() {
    let (answers, prompts, _) = round_trip(
        vec![yes_no("File is corrupted.\nDelete it?", 1)],
        |_| Decision::Yes,
    );
    assert_eq!(answers, vec![1]);
    assert_eq!(
        prompts,
        vec![Prompt::YesNo {
            text: "File is corrupted. Delete it?".into()
        }]
    );
}
