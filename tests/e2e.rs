use std::process::Command;

fn run(args: &[&str]) -> (String, String, Option<i32>) {
    let output = Command::new(env!("CARGO_BIN_EXE_booking-ledger"))
        .args(args.iter().map(|f| format!("tests/fixtures/{f}")))
        .env("RUST_LOG", "warn")
        .env("PAYMENT_DEADLINE", "2026-05-20")
        .env("BOOKING_REFERENCE_PREFIX", "CAMP")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

/// Report rows with the random reference suffix dropped.
fn rows(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(|line| {
            let mut fields: Vec<&str> = line.split(',').collect();
            let reference = fields[1];
            assert_eq!(reference.len(), "CAMP-20260101-XXXX".len(), "{reference}");
            let prefix = &reference[..reference.len() - 5];
            fields[1] = prefix;
            fields.join(",")
        })
        .collect()
}

#[test]
fn replay_applies_each_event_once() {
    let (stdout, stderr, code) = run(&["bookings.csv", "events.jsonl"]);

    assert_eq!(code, Some(0), "{stderr}");
    assert_eq!(
        stdout.lines().next(),
        Some("booking,reference,total,paid,outstanding,payment_status,booking_status")
    );
    assert_eq!(
        rows(&stdout),
        vec![
            "1,CAMP-20260101,100.00,75.00,25.00,partial,confirmed",
            "2,CAMP-20260101,255.00,85.00,170.00,failed,confirmed",
            "3,CAMP-20260102,50.00,0.00,50.00,unpaid,pending",
        ]
    );
    assert!(stderr.contains("retry ceiling reached"));
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, code) = run(&["bookings_with_errors.csv", "events_with_errors.jsonl"]);

    assert_eq!(code, Some(0), "{stderr}");
    assert!(stderr.contains("unknown payment plan 'weekly'"));
    assert!(stderr.contains("total must be greater than zero"));
    assert!(stderr.contains("line 2: malformed event payload"));
    assert!(stderr.contains("booking 7 not found"));
    assert!(stderr.contains("charged amount differs from expected amount"));

    assert_eq!(
        rows(&stdout),
        vec!["1,CAMP-20260101,100.00,100.00,0.00,paid,confirmed"]
    );
}

#[test]
fn missing_arguments_print_usage() {
    let output = Command::new(env!("CARGO_BIN_EXE_booking-ledger"))
        .output()
        .expect("failed to run binary");

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage: booking-ledger"));
    assert!(output.stdout.is_empty());
}
