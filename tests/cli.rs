//! End-to-end tests of the `jn` binary against a throwaway plugin home.

use assert_cmd::prelude::*;
use predicates::prelude::*;

mod common;
use crate::common::Fixture;

#[test]
fn cat_reads_a_csv_file() {
    let fixture = Fixture::new();
    fixture.write_file("data.csv", "a,b\n1,2\n");
    fixture
        .jn()
        .args(&["cat", "data.csv"])
        .assert()
        .success()
        .stdout("{\"a\":\"1\",\"b\":\"2\"}\n");
}

#[test]
fn cat_reads_a_compressed_csv_file() {
    let fixture = Fixture::new();
    fixture.write_file("data.csv", "a,b\n1,2\n");
    fixture.gzip("data.csv");
    fixture
        .jn()
        .args(&["cat", "data.csv.gz"])
        .assert()
        .success()
        .stdout("{\"a\":\"1\",\"b\":\"2\"}\n");
}

#[test]
fn cat_reads_a_profile_address() {
    let fixture = Fixture::new();
    fixture
        .jn()
        .args(&["cat", "@seq/integers?count=2"])
        .assert()
        .success()
        .stdout("{\"i\":0}\n{\"i\":1}\n");
}

#[test]
fn head_stops_an_endless_producer() {
    let fixture = Fixture::new();
    // The producer is unbounded; the count-bounded consumer closes the pipe
    // after one record and SIGPIPE takes care of the rest. The --timeout is
    // a backstop so a propagation bug fails the test instead of hanging it.
    fixture
        .jn()
        .args(&["--timeout", "10s", "head", "-n", "1", "@seq/integers"])
        .assert()
        .success()
        .stdout("{\"i\":0}\n");
}

#[test]
fn tail_keeps_the_last_records() {
    let fixture = Fixture::new();
    fixture
        .jn()
        .args(&["tail", "-n", "2", "@seq/integers?count=5"])
        .assert()
        .success()
        .stdout("{\"i\":3}\n{\"i\":4}\n");
}

/// Runs a jn command feeding the given bytes on stdin, returning the
/// captured output.
fn run_with_stdin(
    mut command: std::process::Command,
    args: &[&str],
    stdin: &str,
) -> std::process::Output {
    use std::io::Write;
    use std::process::Stdio;
    let mut child = command
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn jn");
    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(stdin.as_bytes())
        .expect("feed stdin");
    child.wait_with_output().expect("wait for jn")
}

#[test]
fn put_writes_an_ndjson_file() {
    let fixture = Fixture::new();
    let output = run_with_stdin(
        fixture.jn(),
        &["put", "out.ndjson"],
        "{\"a\":1}\n{\"a\":2}\n",
    );
    assert!(output.status.success());
    let written = std::fs::read_to_string(fixture.home().join("out.ndjson")).unwrap();
    assert_eq!(written, "{\"a\":1}\n{\"a\":2}\n");
}

#[test]
fn filter_runs_the_filter_plugin() {
    let fixture = Fixture::new();
    let output = run_with_stdin(
        fixture.jn(),
        &["filter", "paris"],
        "{\"city\":\"paris\"}\n{\"city\":\"oslo\"}\n",
    );
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).unwrap(),
        "{\"city\":\"paris\"}\n"
    );
}

#[test]
fn leftover_parameters_become_a_filter_stage() {
    let fixture = Fixture::new();
    fixture.write_file("data.csv", "a,b\n1,2\n");
    // `delimiter` is a csv config param; `city` is not, so it surfaces as a
    // synthesized downstream filter stage (which passes records through
    // when given no expression).
    fixture
        .jn()
        .args(&["cat", "data.csv?delimiter=,&city=paris"])
        .assert()
        .success()
        .stdout("{\"a\":\"1\",\"b\":\"2\"}\n");
}

#[test]
fn cat_reads_a_url_through_its_protocol_plugin() {
    let fixture = Fixture::new();
    fixture
        .jn()
        .args(&["cat", "http://example.com/data"])
        .assert()
        .success()
        .stdout("{\"url\":\"http://example.com/data\"}\n");
}

#[test]
fn merge_concatenates_sources() {
    let fixture = Fixture::new();
    fixture.write_file("a.ndjson", "{\"n\":1}\n");
    fixture.write_file("b.ndjson", "{\"n\":2}\n");
    fixture
        .jn()
        .args(&["merge", "a.ndjson", "b.ndjson"])
        .assert()
        .success()
        .stdout("{\"n\":1}\n{\"n\":2}\n");
}

#[test]
fn failing_stage_code_is_surfaced() {
    let fixture = Fixture::new();
    fixture.write_file("data.fail", "whatever\n");
    fixture
        .jn()
        .args(&["cat", "data.fail"])
        .assert()
        .failure()
        .code(7)
        .stderr(predicate::str::contains("this format always fails"));
}

#[test]
fn unknown_format_is_reported() {
    let fixture = Fixture::new();
    fixture.write_file("data.xyz", "whatever\n");
    fixture
        .jn()
        .args(&["cat", "data.xyz"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("No plugin recognizes"));
}

#[test]
fn unknown_profile_is_reported() {
    let fixture = Fixture::new();
    fixture
        .jn()
        .args(&["cat", "@nope/x"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn bad_numeric_parameter_is_reported() {
    let fixture = Fixture::new();
    fixture.write_file("data.csv", "a,b\n1,2\n");
    fixture
        .jn()
        .args(&["cat", "data.csv?delimiter=12_000"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("numeric-looking"));
}

#[test]
fn malformed_query_is_reported() {
    let fixture = Fixture::new();
    fixture.write_file("data.csv", "a,b\n1,2\n");
    fixture
        .jn()
        .args(&["cat", "data.csv?oops"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Invalid address"));
}

#[test]
fn template_parameters_substitute() {
    let fixture = Fixture::new();
    fixture
        .jn()
        .args(&[
            "--param",
            "n=2",
            "cat",
            "@seq/integers?count=${params.n}",
        ])
        .assert()
        .success()
        .stdout("{\"i\":0}\n{\"i\":1}\n");
}

#[test]
fn missing_template_key_is_a_hard_error() {
    let fixture = Fixture::new();
    fixture
        .jn()
        .args(&["cat", "@seq/integers?count=${params.n}"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("${params.n}"));
}

#[test]
fn plugins_lists_the_registry() {
    let fixture = Fixture::new();
    fixture
        .jn()
        .arg("plugins")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("csv")
                .and(predicate::str::contains("gz"))
                .and(predicate::str::contains("ndjson"))
                .and(predicate::str::contains("seq")),
        );
}

#[test]
fn plugins_json_emits_ndjson() {
    let fixture = Fixture::new();
    let output = fixture.jn().args(&["plugins", "--json"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    for line in stdout.lines() {
        let value: serde_json::Value = serde_json::from_str(line).expect("JSON per line");
        assert!(value.get("metadata").is_some());
    }
}

#[test]
fn profiles_inspects_a_namespace() {
    let fixture = Fixture::new();
    fixture
        .jn()
        .args(&["profiles", "seq"])
        .assert()
        .success()
        .stdout(predicate::str::contains("integers"));
}

#[test]
fn registry_cache_round_trips() {
    let fixture = Fixture::new();
    let cache = fixture.home().join("cache.json");
    let mut first = std::process::Command::new(assert_cmd::cargo::cargo_bin("jn"));
    first
        .env("JN_HOME", fixture.home())
        .env("HOME", fixture.home())
        .env("JN_REGISTRY_CACHE", &cache)
        .current_dir(fixture.home())
        .arg("plugins");
    first.assert().success().stdout(predicate::str::contains("csv"));
    assert!(cache.is_file());

    let mut second = std::process::Command::new(assert_cmd::cargo::cargo_bin("jn"));
    second
        .env("JN_HOME", fixture.home())
        .env("HOME", fixture.home())
        .env("JN_REGISTRY_CACHE", &cache)
        .current_dir(fixture.home())
        .arg("plugins");
    second.assert().success().stdout(predicate::str::contains("csv"));
}

#[test]
fn put_compressed_file_chains_the_compressor() {
    let fixture = Fixture::new();
    let output = run_with_stdin(fixture.jn(), &["put", "out.ndjson.gz"], "{\"a\":1}\n");
    assert!(output.status.success());
    // Decompressing the sink file gives back the records.
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg("gzip -dc out.ndjson.gz")
        .current_dir(fixture.home())
        .output()
        .unwrap();
    assert_eq!(String::from_utf8(output.stdout).unwrap(), "{\"a\":1}\n");
}
