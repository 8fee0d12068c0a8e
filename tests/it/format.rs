use jsonnet_bridge::*;

const MESSY: &str = r#"{
    "quoted": "keys",
    "notevaluated": 20 + 22,
    "trailing": "comma",}
"#;

const TIDY: &str = r#"{
    quoted: "keys",
    notevaluated: 20 + 22,
    trailing: "comma" }
"#;

#[test]
fn format_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("messy.jsonnet");
    std::fs::write(&path, MESSY)?;

    let mut vm = JsonnetVm::new();
    assert_eq!(vm.format_file(&path)?, TIDY);
    Ok(())
}

#[test]
fn format_snippet() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    assert_eq!(vm.format_snippet("testfoo", MESSY)?, TIDY);
    Ok(())
}

#[test]
fn format_indent() -> anyhow::Result<()> {
    let data = r#"{
  "quoted": "keys",
 "notevaluated": 20 + 22,
   "trailing": "comma",}
"#;

    let mut vm = JsonnetVm::new();
    vm.fmt_indent(1);
    let output = vm.format_snippet("testfoo", data)?;

    assert_eq!(
        output,
        r#"{
 quoted: "keys",
 notevaluated: 20 + 22,
 trailing: "comma" }
"#
    );
    Ok(())
}

#[test]
fn format_does_not_evaluate() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    let output = vm.format_snippet("<test>", r#"error "never evaluated""#)?;

    assert!(output.contains("never evaluated"), "{output}");
    Ok(())
}

#[test]
fn format_reports_parse_errors() {
    let mut vm = JsonnetVm::new();
    let error = vm
        .format_snippet("broken.jsonnet", "{ a: ")
        .expect_err("formatted a snippet that does not parse");

    assert_eq!(error.kind(), ErrorKind::Vm);
    assert!(!error.to_string().is_empty());
}

#[test]
fn format_missing_file() {
    let dir = tempfile::tempdir().unwrap();

    let mut vm = JsonnetVm::new();
    let error = vm
        .format_file(dir.path().join("nope.jsonnet"))
        .expect_err("formatted a file that does not exist");

    assert_eq!(error.kind(), ErrorKind::Vm);
}

#[test]
fn format_string_style() -> anyhow::Result<()> {
    let mut vm = JsonnetVm::new();
    vm.fmt_string(StringStyle::Double);
    assert_eq!(vm.format_snippet("<test>", "'hi'")?.trim_end(), r#""hi""#);

    vm.fmt_string(StringStyle::Leave);
    assert_eq!(vm.format_snippet("<test>", "'hi'")?.trim_end(), "'hi'");
    Ok(())
}
