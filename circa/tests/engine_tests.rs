//! End-to-end tests for the script engine through the public API.

use circa::event::EventKind;
use circa::host::RecordingHost;
use circa::script::{loader, Interp, LoadErrorKind, Value};

fn interp(src: &str) -> Interp {
    Interp::new(loader::load_str("test.cs", src).expect("load failed"))
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

fn call(i: &mut Interp, name: &str, a: &[&str], relaxed: bool) -> String {
    let mut host = RecordingHost::new();
    i.runf(&mut host, name, &args(a), relaxed).expect("runf failed")
}

#[test]
fn exact_binding_exposes_formals() {
    let mut i = interp("function f(a, b) {\nreturn %a+%b\n}");
    assert_eq!(call(&mut i, "f", &["x", "y"], false), "x+y");
}

#[test]
fn variadic_binding_vectors() {
    let mut i = interp("function f(...) {\nreturn %1=%2=%3=%0\n}");
    assert_eq!(call(&mut i, "f", &["a", "b", "c"], false), "a=b=c=a b c");
}

#[test]
fn relaxed_arity_underflow_and_overflow() {
    let mut i = interp("function f(x, y, z) {\nreturn %x,%y,%z\n}");
    assert_eq!(call(&mut i, "f", &["1"], true), "1,,");
    assert_eq!(call(&mut i, "f", &["1", "2", "3", "4", "5"], true), "1,2,3 4 5");
}

#[test]
fn while_break_continue_nesting() {
    let mut i = interp(
        "function f() {\n\
         var %log\n\
         var %i 0\n\
         while (%i < 3) {\n\
         inc %i\n\
         if (%i == 2) {\n\
         continue\n\
         }\n\
         var %j 0\n\
         while (%j < 9) {\n\
         inc %j\n\
         if (%j == 2) {\n\
         break\n\
         }\n\
         }\n\
         var %log %log(%i:%j)\n\
         }\n\
         return %log\n\
         }",
    );
    // i=2 is skipped by continue; the inner loop always breaks at j=2.
    assert_eq!(call(&mut i, "f", &[], false), "(1:2)(3:2)");
}

#[test]
fn extraction_round_trips() {
    let mut i = interp("");
    let mut host = RecordingHost::new();
    i.env_mut().set("a", Value::from("1"));
    i.env_mut().set("b", Value::from("2"));

    let out = circa::script::expand::extract(&mut i, &mut host, "%a-%b").unwrap();
    assert_eq!(out, "1-2");
    let out = circa::script::expand::extract(&mut i, &mut host, "$glue(x,y,z)").unwrap();
    assert_eq!(out, "xyz");
    let out =
        circa::script::expand::extract(&mut i, &mut host, "$glue($glue(a,b),c)").unwrap();
    assert_eq!(out, "abc");
}

#[test]
fn local_shadowing_leaves_global_intact() {
    let mut i = interp("function f() {\nlocal var %x 2\nreturn %x\n}");
    i.env_mut().set("x", Value::from("1"));
    assert_eq!(call(&mut i, "f", &[], false), "2");
    assert_eq!(i.env().get("x").unwrap().as_text(), "1");
}

#[test]
fn malformed_header_fails_with_line() {
    let err = loader::load_str("bad.cs", "function f( { }").unwrap_err();
    assert_eq!(err.kind, LoadErrorKind::MalformedHeader);
    assert_eq!(err.line, 1);
    assert_eq!(err.file, "bad.cs");
}

#[test]
fn reload_same_source_is_idempotent() {
    let src = "script \"s\" {\n\
               meta {\n\
               command greet doGreet\n\
               event te_join onJoin\n\
               event te_join logJoin\n\
               timer poll 30 doPoll\n\
               }\n\
               function doGreet(who) {\nsay hi %who\n}\n\
               function onJoin(who, chan) {\n}\n\
               function logJoin(who, chan) {\n}\n\
               function doPoll(name) {\n}\n\
               }";
    let a = loader::load_str("s.cs", src).unwrap();
    let b = loader::load_str("s.cs", src).unwrap();
    assert_eq!(a, b);
}

#[test]
fn event_dispatch_runs_bindings_in_order() {
    let mut i = interp(
        "meta {\n\
         event te_msg first\n\
         event te_msg second\n\
         }\n\
         function first(who, text) {\nvar %trace %trace+1(%who)\n}\n\
         function second(who, text) {\nvar %trace %trace+2(%text)\n}",
    );
    let mut host = RecordingHost::new();
    let errors = i.fire_event(&mut host, EventKind::Msg, &args(&["ferris", "hello"]));
    assert!(errors.is_empty());
    assert_eq!(i.env().get("trace").unwrap().as_text(), "+1(ferris)+2(hello)");
}

#[test]
fn runtime_error_aborts_chain_but_not_state() {
    let mut i = interp(
        "function f() {\nvar %before yes\nfclose 99\nvar %after yes\n}",
    );
    let mut host = RecordingHost::new();
    assert!(i.runf(&mut host, "f", &[], false).is_err());
    assert_eq!(i.env().get("before").unwrap().as_text(), "yes");
    assert!(i.env().get("after").is_none());
}

#[test]
fn functions_calling_functions() {
    let mut i = interp(
        "function outer(n) {\nreturn $inner(%n)!\n}\n\
         function inner(n) {\nreturn $calc(%n * 2)\n}",
    );
    assert_eq!(call(&mut i, "outer", &["21"], false), "42!");
}

#[test]
fn full_script_drives_host_commands() {
    let mut i = interp(
        "script \"autogreet\" {\n\
         meta {\n\
         event te_join onJoin\n\
         }\n\
         function onJoin(who, chan) {\n\
         if (%who != circa) {\n\
         msg %chan welcome, %who!\n\
         }\n\
         }\n\
         }",
    );
    let mut host = RecordingHost::new();
    let errors = i.fire_event(&mut host, EventKind::Join, &args(&["ferris", "#rust"]));
    assert!(errors.is_empty());
    assert_eq!(host.commands, vec!["msg #rust welcome, ferris!"]);

    // Our own join is filtered by the condition.
    host.commands.clear();
    let errors = i.fire_event(&mut host, EventKind::Join, &args(&["circa", "#rust"]));
    assert!(errors.is_empty());
    assert!(host.commands.is_empty());
}

#[test]
fn binary_and_text_variables_share_names() {
    let mut i = interp("function f() {\nvar %x text\n}");
    call(&mut i, "f", &[], false);
    assert!(!i.env().get("x").unwrap().is_binary());
    i.env_mut().set("x", Value::Binary(vec![1, 2]));
    assert!(i.env().get("x").unwrap().is_binary());
}

#[test]
fn comments_and_escapes_survive_loading() {
    let mut i = interp(
        "function f() {\n\
         ; this line disappears\n\
         return 100\\% done\\; really\n\
         }",
    );
    assert_eq!(call(&mut i, "f", &[], false), "100% done; really");
}

#[test]
fn replace_program_discards_environment() {
    let mut i = interp("function f() {\nvar %kept 1\n}");
    call(&mut i, "f", &[], false);
    assert_eq!(i.env().get("kept").unwrap().as_text(), "1");

    i.replace_program(loader::load_str("new.cs", "function g() {\nreturn [%kept]\n}").unwrap());
    assert!(i.program().function("f").is_none());
    assert!(i.env().get("kept").is_none());
    assert_eq!(call(&mut i, "g", &[], false), "[]");
}
