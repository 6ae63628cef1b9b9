use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn script(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "op, user, account, tx, amount").unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let input = script(&[
        "user, alice, , ,",
        "open, 1, , , 10000",
        "use, 1, 1000000000, , 1000",
        "cancel, , 1000000000, @3, 1000",
        "use, 1, 1000000000, , 50000",
        "cancel, , 1000000000, @3, 1000",
    ]);

    let mut cmd = Command::new(cargo_bin!("balance-ledger"));
    cmd.arg(input.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "line,op,account,result,transaction_id,amount,detail",
        ))
        .stdout(predicate::str::contains("1,user,,ok,,,user=1"))
        .stdout(predicate::str::contains("2,open,1000000000,ok,,,balance=10000"))
        .stdout(predicate::str::contains("use balance=9000"))
        .stdout(predicate::str::contains("cancel balance=10000"))
        .stdout(predicate::str::contains(
            "5,use,1000000000,error,,,amount 50000 exceeds the balance 10000",
        ))
        .stdout(predicate::str::contains("6,cancel,1000000000,error,,,transaction"))
        .stdout(predicate::str::contains("account,owner,status,balance"))
        .stdout(predicate::str::contains("1000000000,1,active,10000"));

    Ok(())
}

#[test]
fn test_cli_json_output() -> Result<(), Box<dyn std::error::Error>> {
    let input = script(&[
        "user, alice, , ,",
        "open, 1, , , 500",
        "use, 1, 1000000000, , 200",
    ]);

    let output = Command::new(cargo_bin!("balance-ledger"))
        .arg(input.path())
        .arg("--json")
        .output()?;
    assert!(output.status.success());

    let lines: Vec<serde_json::Value> = String::from_utf8(output.stdout)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[2]["op"], "use");
    assert_eq!(lines[2]["result"], "S");
    assert_eq!(lines[2]["transaction_id"].as_str().map(str::len), Some(32));
    assert_eq!(lines[3]["account"], "1000000000");
    assert_eq!(lines[3]["balance"], 300);

    Ok(())
}

#[test]
fn test_cli_reports_unreadable_lines_and_continues() {
    let input = script(&[
        "user, alice, , ,",
        "withdraw, 1, 1000000000, , 5",
        "open, 1, , , 100",
    ]);

    Command::new(cargo_bin!("balance-ledger"))
        .arg(input.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("2,?,,error"))
        .stdout(predicate::str::contains("1000000000,1,active,100"))
        .stderr(predicate::str::contains("Error reading command on line 2"));
}

#[test]
fn test_cli_config_from_env() {
    let input = script(&[
        "user, alice, , ,",
        "open, 1, , ,",
        "open, 1, , ,",
    ]);

    Command::new(cargo_bin!("balance-ledger"))
        .arg(input.path())
        .env("LEDGER_MAX_ACCOUNTS_PER_USER", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "3,open,,error,,,user 1 already owns the maximum of 1 accounts",
        ));
}

#[test]
fn test_cli_missing_input_fails() {
    Command::new(cargo_bin!("balance-ledger"))
        .arg("does-not-exist.csv")
        .assert()
        .failure();
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_cli_db_path_requires_feature() {
    let input = script(&["user, alice, , ,"]);

    Command::new(cargo_bin!("balance-ledger"))
        .arg(input.path())
        .arg("--db-path")
        .arg("ledger-db")
        .assert()
        .failure()
        .stderr(predicate::str::contains("storage-rocksdb"));
}

#[cfg(not(feature = "lock-redis"))]
#[test]
fn test_cli_lock_url_requires_feature() {
    let input = script(&["user, alice, , ,"]);

    Command::new(cargo_bin!("balance-ledger"))
        .arg(input.path())
        .env("LEDGER_LOCK_URL", "redis://127.0.0.1:6379")
        .assert()
        .failure()
        .stderr(predicate::str::contains("lock-redis"));
}
