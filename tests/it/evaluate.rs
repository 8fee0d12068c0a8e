use jsonnet_bridge::*;

use crate::{aliens, fixtures};

#[test]
fn demo() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    vm.ext_var("color", "purple");

    let output = vm.evaluate_snippet("demo", r#""dark " + std.extVar("color")"#)?;
    assert_eq!(output, r#""dark purple""#);
    Ok(())
}

#[test]
fn simple() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    vm.tla_var("color", "purple");
    vm.tla_var("size", "XXL");
    vm.tla_code("gooselevel", "1234 * 10 + 5");
    vm.ext_var("color", "purple");
    vm.ext_var("size", "XXL");
    vm.ext_code("gooselevel", "1234 * 10 + 5");
    vm.import_resolver(aliens());

    assert_eq!(vm.evaluate_snippet("test1", "20 + 22")?, "42");
    assert_eq!(
        vm.evaluate_snippet("test2", "function(color, size, gooselevel) color")?,
        r#""purple""#
    );
    assert_eq!(
        vm.evaluate_snippet("test2", r#"std.extVar("color")"#)?,
        r#""purple""#
    );
    assert_eq!(
        vm.evaluate_snippet("test2", r#"std.extVar("gooselevel")"#)?,
        "12345"
    );

    let options = EvaluateOptions::new("test2")
        .snippet(r#""whee""#)
        .string_output(true);
    assert_eq!(vm.evaluate(options)?, "whee");

    // string output only applies to the call it was requested for
    assert_eq!(vm.evaluate_snippet("test2", r#""whee""#)?, r#""whee""#);

    let output = vm.evaluate_snippet(
        "test3",
        r#"
local a = import "alien.conf";
local b = import "human.conf";
a.name + b.name
"#,
    )?;
    assert_eq!(output, r#""MorkMendy""#);

    let output = vm.evaluate_snippet(
        "test4",
        r#"
local a = import "alien.conf";
local b = a { type: "fictitious" };
b.type + b.name
"#,
    )?;
    assert_eq!(output, r#""fictitiousMork""#);
    Ok(())
}

#[test]
fn file_script() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    let output = vm.evaluate_file(fixtures().join("test2.jsonnet"))?;

    assert_eq!(
        output,
        "{\n   \"awk\": \"/usr/bin/awk\",\n   \"shell\": \"/bin/csh\"\n}"
    );
    Ok(())
}

#[test]
fn misc_settings_with_default_importer() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    vm.max_stack(10);
    vm.max_trace(10);
    vm.gc_min_objects(10);
    vm.gc_growth_trigger(2.0);
    vm.jpath_add(&fixtures());

    let output = vm.evaluate_snippet(
        "Misc",
        r#"
local a = import "test2.jsonnet";
a.awk + a.shell
"#,
    )?;
    assert_eq!(output, r#""/usr/bin/awk/bin/csh""#);
    Ok(())
}

#[test]
fn max_stack_is_enforced() {
    let mut vm = JsonnetVm::new();
    vm.max_stack(10);

    let error = vm
        .evaluate_snippet(
            "<test>",
            "local f(n) = if n == 0 then 0 else 1 + f(n - 1); f(100)",
        )
        .expect_err("deep recursion did not hit the stack limit");
    assert_eq!(error.kind(), ErrorKind::Vm);
}

#[test]
fn evaluation_error_carries_message() {
    let mut vm = JsonnetVm::new();
    let error = vm
        .evaluate_snippet("<test>", r#"error "boom (test string 0xDEADBEEF)""#)
        .expect_err("error expression did not fail");

    assert_eq!(error.kind(), ErrorKind::Vm);
    assert!(error.to_string().contains("0xDEADBEEF"), "{error}");
}

#[test]
fn evaluate_raw_keeps_trailing_newline() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    let output = vm.evaluate_raw(EvaluateOptions::new("<test>").snippet("[1, 2]"))?;
    let text = output.to_str()?;

    assert!(text.ends_with('\n'));
    assert_eq!(text.split_whitespace().collect::<String>(), "[1,2]");
    Ok(())
}

#[test]
fn evaluate_multi() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    let options = EvaluateOptions::new("<test>").snippet(r#"{ "a.json": 1, "b.json": { x: "y" } }"#);

    let files: Vec<(String, String)> = vm
        .evaluate_multi(options)?
        .map(|(name, json)| (name, json.split_whitespace().collect()))
        .collect();

    assert_eq!(
        files,
        vec![
            ("a.json".to_owned(), "1".to_owned()),
            ("b.json".to_owned(), r#"{"x":"y"}"#.to_owned()),
        ]
    );
    Ok(())
}

#[test]
fn evaluate_multi_lending() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    let options = EvaluateOptions::new("<test>").snippet(r#"{ "only.json": true }"#);

    let mut iter = vm.evaluate_multi(options)?;
    let (name, json) = iter.next_lending().expect("no output files");
    assert_eq!(name, "only.json");
    assert_eq!(json.trim(), "true");
    assert!(iter.next_lending().is_none());
    Ok(())
}

#[test]
fn evaluate_stream() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    let options = EvaluateOptions::new("<test>").snippet(r#"[1, "two", { three: 3 }]"#);

    let docs: Vec<String> = vm
        .evaluate_stream(options)?
        .map(|doc| doc.split_whitespace().collect())
        .collect();

    assert_eq!(docs, vec!["1", r#""two""#, r#"{"three":3}"#]);
    Ok(())
}

#[test]
fn evaluate_stream_rejects_non_arrays() {
    let mut vm = JsonnetVm::new();
    let result = vm.evaluate_stream(EvaluateOptions::new("<test>").snippet("{}"));

    assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Vm));
}

#[test]
fn with_config() -> anyhow::Result<()> {
    let config = VmConfig::new()
        .max_stack(50)
        .max_trace(5)
        .gc_min_objects(10)
        .gc_growth_trigger(2.0)
        .jpath(fixtures())
        .ext_var("color", "purple")
        .ext_code("size", "6 * 7")
        .tla_var("name", "Mork")
        .tla_code("count", "2");

    let mut vm = JsonnetVm::with_config(&config)?;
    let output = vm.evaluate(
        EvaluateOptions::new("<test>")
            .snippet(
                r#"
function(name, count)
    std.join(" ", [name, std.extVar("color"), std.toString(std.extVar("size") * count),
                   (import "test2.jsonnet").awk])
"#,
            )
            .string_output(true),
    )?;

    assert_eq!(output, "Mork purple 84 /usr/bin/awk");
    Ok(())
}

#[test]
fn with_config_rejects_nul_bytes() {
    let config = VmConfig::new().tla_var("na\0me", "Mork");
    let error = JsonnetVm::with_config(&config).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn config_file_importer_matches_jpath() -> anyhow::Result<()> {
    let config = VmConfig::new().jpath(fixtures());

    let mut vm = JsonnetVm::with_config(&config)?;
    vm.import_resolver(config.file_importer());

    let output = vm.evaluate_snippet("<test>", r#"(import "test2.jsonnet").shell"#)?;
    assert_eq!(output, r#""/bin/csh""#);
    Ok(())
}

#[test]
fn debug_output_names_context() {
    let mut vm = JsonnetVm::new();
    vm.import_resolver(aliens());
    let ctx = vm.context().unwrap();

    let debug = format!("{vm:?}");
    assert!(debug.contains(&format!("{ctx:?}")), "{debug}");
}
