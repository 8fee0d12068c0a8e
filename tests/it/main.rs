use std::path::{Path, PathBuf};

use jsonnet_bridge::*;

mod evaluate;
mod format;
#[cfg(feature = "json")]
mod json;

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// A couple of hardwired imports.
fn aliens() -> MemoryImporter {
    MemoryImporter::new()
        .with_file(
            "alien.conf",
            r#"{ type: "alien", origin: "Ork", name: "Mork" }"#,
        )
        .with_file(
            "human.conf",
            r#"{ type: "human", origin: "Earth", name: "Mendy" }"#,
        )
}

#[test]
fn evaluate_base64() {
    let jsonnet = "std.base64('Hello, World!')";
    let mut vm = JsonnetVm::new();
    let json = vm
        .evaluate_snippet("<test>", jsonnet)
        .expect("failed to evaluate the snippet");

    assert_eq!(json.trim(), "\"SGVsbG8sIFdvcmxkIQ==\"");
}

#[test]
fn version_is_not_empty() {
    assert!(!version().is_empty());
}

#[test]
fn import_callback() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    vm.import_callback(|base, rel| {
        if rel == Path::new("data.libsonnet") {
            return Ok((
                PathBuf::from("data.libsonnet"),
                br#" "Here's the file contents!" "#.to_vec(),
            ));
        }

        Err(format!("could not import `{}`", base.join(rel).display()))
    });

    let jsonnet = r#"
local data = import "data.libsonnet";

"the data was: " + data
"#;

    let options = EvaluateOptions::new("<example 6>")
        .snippet(jsonnet)
        .string_output(true);
    let output = vm.evaluate(options)?;

    assert_eq!(output, "the data was: Here's the file contents!");
    Ok(())
}

#[test]
fn import_callback_error_reaches_evaluation() {
    let mut vm = JsonnetVm::new();
    vm.import_callback(|_, rel| -> Result<(PathBuf, Vec<u8>), String> {
        Err(format!("Cannot import {:?} (test string 0xDEADBEEF)", rel))
    });

    let error = vm
        .evaluate_snippet("<test>", r#"import "nowhere.libsonnet""#)
        .expect_err("import of a missing file succeeded");
    let message = error.to_string();

    assert_eq!(error.kind(), ErrorKind::Vm);
    assert!(
        message.contains("0xDEADBEEF"),
        "error message did not contain test string:\n{message}"
    );
}

#[test]
fn native_callback() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    vm.native_callback("cbrt", ["x"], |vm, args| {
        if args.len() != 1 {
            return Err(format!("expected 1 argument, got {} instead", args.len()));
        }

        let Some(x) = args[0].as_number() else {
            return Err("argument was of the wrong type, expected a number".into());
        };

        Ok(JsonValue::number(vm, x.cbrt()))
    });

    let jsonnet = r#"
local cbrt = std.native("cbrt");
cbrt(8)
"#;

    let output = vm.evaluate_snippet("<example 7>", jsonnet)?;
    let output: f64 = output.parse()?;

    assert!((output - 2.0).abs() < 1e-10, "2.0 != {output}");
    Ok(())
}

#[test]
fn native_callback_simple() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    vm.native_callback("call_it_foo", ["param"], |vm, _| {
        Ok(JsonValue::string(vm, "Foo"))
    });
    vm.native_callback("call_it_bar", ["param"], |vm, _| {
        Ok(JsonValue::string(vm, "Bar"))
    });

    let jsonnet = r#"
local call_it_foo(vars) = std.native("call_it_foo")(vars);
local call_it_bar(vars) = std.native("call_it_bar")(vars);
{
    footest: call_it_foo(""),
    bartest: call_it_bar(""),
}
"#;

    let output = vm.evaluate_snippet("testfoo", jsonnet)?;
    assert_eq!(
        output,
        "{\n   \"bartest\": \"Bar\",\n   \"footest\": \"Foo\"\n}"
    );
    Ok(())
}

#[test]
fn native_callback_builds_structures() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    vm.native_callback("describe", ["name", "count"], |vm, args| {
        let name = args[0].extract_string().ok_or("name must be a string")?;
        let count = args[1].as_number().ok_or("count must be a number")?;

        let tags = [JsonValue::string(vm, &name), JsonValue::null(vm)];
        Ok(JsonValue::object(
            vm,
            [
                ("name", JsonValue::string(vm, &name)),
                ("even", JsonValue::bool(vm, count as i64 % 2 == 0)),
                ("tags", JsonValue::array(vm, &tags)),
            ],
        ))
    });

    let output = vm.evaluate_snippet(
        "<test>",
        r#"local d = std.native("describe")("widget", 4); [d.name, d.even, d.tags]"#,
    )?;
    let compact: String = output.split_whitespace().collect();

    assert_eq!(compact, r#"["widget",true,["widget",null]]"#);
    Ok(())
}

#[test]
fn native_callback_string_arguments() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    vm.native_callback("shout", ["text"], |vm, args| {
        let text = args[0].extract_string().ok_or("text must be a string")?;

        // Every extraction hands back an independent copy.
        for _ in 0..1000 {
            if args[0].extract_string().as_deref() != Some(text.as_str()) {
                return Err("string argument changed between extractions".into());
            }
        }
        if args[0].as_number().is_some() || args[0].extract_string().is_none() {
            return Err("string argument reported the wrong type".into());
        }

        Ok(JsonValue::string(vm, &text.to_uppercase()))
    });

    let output = vm.evaluate_snippet(
        "<test>",
        r#"[std.native("shout")(s) for s in ["mork", "mendy"]]"#,
    )?;
    let compact: String = output.split_whitespace().collect();

    assert_eq!(compact, r#"["MORK","MENDY"]"#);
    Ok(())
}

#[test]
fn native_callback_non_string_argument() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    vm.native_callback("kind", ["x"], |vm, args| {
        let kind = match args[0].extract_string() {
            Some(_) => "string",
            None => "other",
        };
        Ok(JsonValue::string(vm, kind))
    });

    let output = vm.evaluate_snippet("<test>", r#"std.native("kind")(42)"#)?;
    assert_eq!(output, r#""other""#);
    Ok(())
}

// go-jsonnet drops the message returned by a failing native callback and
// reports a generic evaluation error instead.
#[test]
fn native_callback_failure() {
    let mut vm = JsonnetVm::new();
    vm.native_callback("testfn", ["x"], |_, _| {
        Err("test function failed (test string 0xDEADBEEF)".into())
    });

    let jsonnet = r#"{ footest: std.native("testfn")("testing") }"#;
    let error = vm
        .evaluate_snippet("testfoo", jsonnet)
        .expect_err("failing native callback did not fail the evaluation");

    assert_eq!(error.kind(), ErrorKind::Vm);
    assert!(!error.to_string().is_empty());
}

#[test]
fn native_callback_panic_fails_evaluation() {
    let mut vm = JsonnetVm::new();
    vm.native_callback("explode", ["x"], |_, _| panic!("native callback exploded"));

    let error = vm
        .evaluate_snippet("<test>", r#"std.native("explode")(1)"#)
        .expect_err("panicking native callback did not fail the evaluation");

    assert_eq!(error.kind(), ErrorKind::Vm);
    assert!(!error.to_string().is_empty());

    // The VM stays usable afterwards.
    assert_eq!(vm.evaluate_snippet("<test>", "1 + 1").unwrap(), "2");
}
