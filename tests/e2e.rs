use std::process::Command;

fn run(args: &[&str]) -> (String, String, bool) {
    let args: Vec<String> = args
        .iter()
        .map(|arg| match arg.strip_suffix(".csv") {
            Some(_) => format!("tests/fixtures/{arg}"),
            None => arg.to_string(),
        })
        .collect();
    let output = Command::new(env!("CARGO_BIN_EXE_bourse"))
        .args(&args)
        .env("RUST_LOG", "warn")
        .env("BOURSE_ADMIN_PIN", "e2e")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

const HEADER: &str = "drink,name,price,total,since_evaluation,discounted";

#[test]
fn evaluation_discounts_least_sold_drink() {
    let (stdout, stderr, success) = run(&["catalog.csv", "sales.csv", "--evaluate"]);

    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            HEADER,
            "1,Bier,2,7,0,false",
            "2,Lillet,3,7,0,false",
            "3,Korn,4,4,0,true",
        ]
    );
}

#[test]
fn ties_go_to_lowest_drink_id() {
    let (stdout, _, success) = run(&["catalog.csv", "sales_tie.csv", "--evaluate"]);

    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[1], "1,Bier,2,2,0,true");
    assert_eq!(lines[2], "2,Lillet,3,2,0,false");
    assert_eq!(lines[3], "3,Korn,4,6,0,false");
}

#[test]
fn rejected_sales_warn_but_do_not_block() {
    let (stdout, stderr, success) = run(&["catalog.csv", "sales_with_errors.csv", "--evaluate"]);

    assert!(success);
    assert!(stderr.contains("unknown drink 9"));
    assert!(stderr.contains("non-positive amount 0"));
    assert!(stderr.contains("line 5: failed to parse row"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[1], "1,Bier,2,5,0,false");
    assert_eq!(lines[2], "2,Lillet,3,3,0,false");
    assert_eq!(lines[3], "3,Korn,4,1,0,true");
}

#[test]
fn evaluation_without_sales_sets_no_discount() {
    let (stdout, _, success) = run(&["catalog.csv", "--evaluate"]);

    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1..].iter().all(|line| line.ends_with(",0,0,false")));
}

#[test]
fn duplicate_catalog_fails() {
    let (stdout, stderr, success) = run(&["catalog_duplicate.csv", "--evaluate"]);

    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("duplicate drink id 1"));
}

#[test]
fn missing_arguments_print_usage() {
    let (_, stderr, success) = run(&[]);

    assert!(!success);
    assert!(stderr.contains("usage: bourse"));
}
