use jsonnet_bridge::{EvaluateOptions, ErrorKind, JsonnetVm, VmConfig};
use serde::{Deserialize, Serialize};

const TEST_PROGRAM: &str = r#"std.extVar('value')"#;

#[test]
fn ext_string() {
    let mut vm = JsonnetVm::new();
    let text = "here's a test string!";

    vm.ext_json("value", text).unwrap();
    let output = vm
        .evaluate(
            EvaluateOptions::new("<test>")
                .snippet(TEST_PROGRAM)
                .string_output(true),
        )
        .expect("failed to evaluate the test program");

    assert_eq!(output, text);
}

#[test]
fn ext_string_weird() {
    let mut vm = JsonnetVm::new();
    let text = "\
  escaped quote: \\\"
unescaped quote: \"
   single quote: '
";

    vm.ext_json("value", text).unwrap();
    let output = match vm.evaluate(
        EvaluateOptions::new("<test>")
            .snippet(TEST_PROGRAM)
            .string_output(true),
    ) {
        Ok(output) => output,
        Err(e) => panic!("failed to evaluate the test program:\n{e}"),
    };

    assert_eq!(output, text);
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
struct Complex {
    data: String,
    number: i32,
    option: Option<u64>,
    null: (),
    boolean: bool,
}

fn complex() -> Complex {
    Complex {
        data: "a data string".into(),
        number: -5,
        option: Some(77),
        null: (),
        boolean: false,
    }
}

#[test]
fn ext_complex() {
    let value = complex();

    let mut vm = JsonnetVm::new();
    vm.ext_json("value", &value).unwrap();

    let options = EvaluateOptions::new("<test>").snippet(TEST_PROGRAM);
    let output: Complex = match vm.evaluate_json(options) {
        Ok(output) => output,
        Err(e) => panic!("failed to evaluate the test program:\n{e}"),
    };

    assert_eq!(output, value);
}

#[test]
fn tla_complex() -> anyhow::Result<()> {
    let value = complex();

    let mut vm = JsonnetVm::new();
    vm.tla_json("value", &value)?;

    let options = EvaluateOptions::new("<test>").snippet("function(value) value { number: 6 }");
    let output: Complex = vm.evaluate_json(options)?;

    assert_eq!(output, Complex { number: 6, ..value });
    Ok(())
}

#[test]
fn evaluate_json_reports_mismatched_types() {
    let mut vm = JsonnetVm::new();
    let options = EvaluateOptions::new("<test>").snippet(r#"{ data: 1 }"#);

    let error = vm.evaluate_json::<Complex>(options).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Json);
}

#[test]
fn evaluate_json_ignores_string_output() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    let options = EvaluateOptions::new("<test>")
        .snippet(r#""quoted""#)
        .string_output(true);

    let output: String = vm.evaluate_json(options)?;
    assert_eq!(output, "quoted");
    Ok(())
}

#[test]
fn config_from_json() -> anyhow::Result<()> {
    let config: VmConfig = serde_json::from_value(serde_json::json!({
        "max-stack": 100,
        "ext-vars": { "color": "purple" },
        "tla-code": { "gooselevel": "1234 * 10 + 5" },
    }))?;

    let mut vm = JsonnetVm::with_config(&config)?;
    let output: serde_json::Value = vm.evaluate_json(
        EvaluateOptions::new("<test>")
            .snippet(r#"function(gooselevel) [std.extVar("color"), gooselevel]"#),
    )?;

    assert_eq!(output, serde_json::json!(["purple", 12345]));
    Ok(())
}
