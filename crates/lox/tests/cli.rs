//! End-to-end "source -> stdout / exit code" scenarios, driving the built
//! `lox` binary exactly the way a user invoking it from a shell would.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn lox() -> Command {
    Command::cargo_bin("lox").expect("lox binary should build")
}

fn source_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".lox")
        .tempfile()
        .expect("create temp source file");
    file.write_all(contents.as_bytes()).expect("write source");
    file
}

fn run_ok(source: &str) -> String {
    let file = source_file(source);
    let assert = lox().arg(file.path()).assert().success();
    String::from_utf8(assert.get_output().stdout.clone()).unwrap()
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(run_ok("print 1 + 2 * 3;"), "6\n");
}

#[test]
fn block_scoping_shadows_then_restores() {
    assert_eq!(
        run_ok("var a=1; { var a=2; print a; } print a;"),
        "2\n1\n"
    );
}

#[test]
fn recursive_fibonacci() {
    assert_eq!(
        run_ok("fun fib(n){ if (n<2) return n; return fib(n-1)+fib(n-2); } print fib(10);"),
        "55\n"
    );
}

#[test]
fn closures_capture_mutable_upvalues() {
    let source = "fun mk(){ var i=0; fun inc(){ i=i+1; return i; } return inc; } \
                  var c=mk(); print c(); print c(); print c();";
    assert_eq!(run_ok(source), "1\n2\n3\n");
}

#[test]
fn single_inheritance_dispatches_to_superclass_method() {
    let source = "class A { greet(){ print \"hi\"; } } class B < A {} B().greet();";
    assert_eq!(run_ok(source), "hi\n");
}

#[test]
fn initializer_runs_on_construction() {
    let source = "class Cake { init(f){ this.f=f; } \
                  taste(){ print \"The \"+this.f+\" cake\"; } } \
                  Cake(\"lemon\").taste();";
    assert_eq!(run_ok(source), "The lemon cake\n");
}

#[test]
fn unterminated_string_is_a_compile_error() {
    let file = source_file("print \"oops;");
    lox()
        .arg(file.path())
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Unterminated string."));
}

#[test]
fn adding_number_and_string_is_a_runtime_error() {
    let file = source_file("1 + \"a\";");
    lox()
        .arg(file.path())
        .assert()
        .code(70)
        .stderr(predicate::str::contains("Operands must be two numbers or two strings."));
}

#[test]
fn reading_local_in_its_own_initializer_is_a_compile_error() {
    let file = source_file("{ var a = a; }");
    lox()
        .arg(file.path())
        .assert()
        .code(65)
        .stderr(predicate::str::contains(
            "Can't read local variable in its own initializer.",
        ));
}

#[test]
fn class_cannot_inherit_from_itself() {
    let file = source_file("class A < A {}");
    lox()
        .arg(file.path())
        .assert()
        .code(65)
        .stderr(predicate::str::contains(
            "A class can't inherit from itself.",
        ));
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    let file = source_file("fun rec(n) { return rec(n+1); } rec(0);");
    lox()
        .arg(file.path())
        .assert()
        .code(70)
        .stderr(predicate::str::contains("Stack overflow."));
}

#[test]
fn two_path_arguments_is_a_usage_error() {
    let a = source_file("print 1;");
    let b = source_file("print 2;");
    lox()
        .arg(a.path())
        .arg(b.path())
        .assert()
        .code(64)
        .stderr(predicate::str::contains("Usage: lox [path]"));
}

#[test]
fn missing_file_exits_seventy_four() {
    lox()
        .arg("/nonexistent/path/does/not/exist.lox")
        .assert()
        .code(74);
}
