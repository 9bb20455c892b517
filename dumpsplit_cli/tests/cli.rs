/// End-to-end tests for the `dumpsplit` binary.
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

// ── helpers ───────────────────────────────────────────────────────────────

fn dumpsplit() -> Command {
    let mut cmd = Command::cargo_bin("dumpsplit").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Two blocks at 4 and 500, CRCs 0x3000ea37 and 0x1a2b3c4d, then a trailer
/// carrying `file_crc`.
fn write_two_block_file(path: &Path, file_crc: u32) {
    let mut data = vec![0u8; 1_000];
    data[..4].copy_from_slice(b"BZh9");
    for (offset, crc) in [(4usize, 0x3000_ea37u32), (500, 0x1a2b_3c4d)] {
        data[offset..offset + 6].copy_from_slice(b"1AY&SY");
        data[offset + 6..offset + 10].copy_from_slice(&crc.to_be_bytes());
    }
    data.extend_from_slice(&[0x17, 0x72, 0x45, 0x38, 0x50, 0x90]);
    data.extend_from_slice(&file_crc.to_be_bytes());
    fs::write(path, data).unwrap();
}

// ── argument handling ──────────────────────────────────────────────────────

#[test]
fn no_subcommand_prints_usage() {
    dumpsplit()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn split_requires_files_and_size() {
    let out = tempfile::tempdir().unwrap();
    dumpsplit()
        .args(["split", "-o"])
        .arg(out.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--files").and(predicate::str::contains("--splitsize")));
}

#[test]
fn zero_batch_size_is_rejected() {
    let out = tempfile::tempdir().unwrap();
    dumpsplit()
        .args(["split", "-f", "a.bz2:10", "-s", "1M", "-b", "0", "-o"])
        .arg(out.path())
        .assert()
        .failure();
}

#[test]
fn bad_split_size_is_rejected() {
    let out = tempfile::tempdir().unwrap();
    dumpsplit()
        .args(["split", "-f", "a.bz2:10", "-s", "12X", "-o"])
        .arg(out.path())
        .assert()
        .failure();
}

#[test]
fn check_range_wants_a_real_date() {
    dumpsplit()
        .args(["check-range", "-w", "enwiki", "-d", "2017-02-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("YYYYMMDD"));
}

// ── crcs ───────────────────────────────────────────────────────────────────

#[test]
fn crcs_lists_blocks_and_matching_file_crc() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("two.bz2");
    write_two_block_file(&input, 0x7a2a_e823);

    dumpsplit()
        .args(["crcs", "-i"])
        .arg(&input)
        .assert()
        .success()
        .stdout(
            predicate::str::contains(
                "Block_CRC: 0x3000ea37 ( 805366327 ), Cumul_CRC: 0x3000ea37 ( 805366327 ) Offset: 4",
            )
            .and(predicate::str::contains("Cumul_CRC: 0x7a2ae823 ( 2049632291 ) Offset: 500"))
                .and(predicate::str::contains("File CRC: 0x7a2ae823"))
                .and(predicate::str::contains("And now the big finish, the computed crc")),
        );
}

#[test]
fn crcs_fails_on_trailer_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad.bz2");
    write_two_block_file(&input, 0x0bad_0bad);

    dumpsplit()
        .args(["crcs", "-i"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not match"));
}

#[test]
fn crcs_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("two.bz2");
    write_two_block_file(&input, 0x7a2a_e823);

    let output = dumpsplit().args(["crcs", "--json", "-i"]).arg(&input).output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["computed_crc"], 2_049_632_291u64);
    assert_eq!(report["file_crc"], 2_049_632_291u64);
    assert_eq!(report["blocks"].as_array().unwrap().len(), 2);
    assert_eq!(report["blocks"][1]["offset"], 500);
}

#[test]
fn crcs_on_missing_file_fails() {
    dumpsplit()
        .args(["crcs", "-i", "/no/such/file.bz2"])
        .assert()
        .failure();
}

// ── munge-crcs ─────────────────────────────────────────────────────────────

#[test]
fn munge_crcs_folds_a_listing() {
    let dir = tempfile::tempdir().unwrap();
    let listing = dir.path().join("crcs.txt");
    fs::write(
        &listing,
        "# from the scanner\noffset:65258451445 CRC:0x3000ea37\noffset:65259333023 CRC:0x1a2b3c4d\n",
    )
    .unwrap();

    dumpsplit()
        .args(["munge-crcs", "-i"])
        .arg(&listing)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Cumul_CRC: 0x7a2ae823 ( 2049632291 ) Offset: 65259333023")
                .and(predicate::str::contains("File CRC: 0x7a2ae823")),
        );
}

#[test]
fn munge_crcs_rejects_garbage_entries() {
    let dir = tempfile::tempdir().unwrap();
    let listing = dir.path().join("crcs.txt");
    fs::write(&listing, "offset:12 CRC:0xnothex\n").unwrap();

    dumpsplit()
        .args(["munge-crcs", "-i"])
        .arg(&listing)
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 1"));
}

// ── split ──────────────────────────────────────────────────────────────────

#[cfg(unix)]
mod split {
    use super::*;
    use std::fs::File;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    const INPUT: &str = "enwiki-20170201-pages-meta-history9.xml-p000000001p000000500.bz2";

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A 100 MB sparse input plus helpers: the decompressor reports pages
    /// 1, 200 and 350 at the three 30 MB offsets, the writer copies its
    /// input to the named output.
    fn setup(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let input = dir.join(INPUT);
        File::create(&input).unwrap().set_len(100_000_000).unwrap();
        let decompress = script(
            dir,
            "fromoffset.sh",
            r#"case "$2" in
  0) id=1 ;;
  30000000) id=200 ;;
  60000000) id=350 ;;
  *) exit 1 ;;
esac
printf '  <page>\n    <title>T</title>\n    <ns>0</ns>\n    <id>%s</id>\n' "$id""#,
        );
        let write = script(dir, "writeupto.sh", r#"cat > "$2/${4%%:*}""#);
        (input, decompress, write)
    }

    #[test]
    fn dry_run_prints_every_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let (input, decompress, write) = setup(dir.path());

        dumpsplit()
            .args(["split", "-s", "30M", "-b", "2", "--dryrun", "-f"])
            .arg(&input)
            .arg("-o")
            .arg(out.path())
            .env("DUMPSPLIT_DECOMPRESS_TOOL", &decompress)
            .env("DUMPSPLIT_WRITE_TOOL", &write)
            .assert()
            .success()
            .stdout(
                predicate::str::contains("would run: ")
                    .and(predicate::str::contains(
                        "-f enwiki-20170201-pages-meta-history9.xml-p1p199.bz2:1:200",
                    ))
                    .and(predicate::str::contains(
                        "-f enwiki-20170201-pages-meta-history9.xml-p200p349.bz2:200:350",
                    ))
                    .and(predicate::str::contains(
                        "-f enwiki-20170201-pages-meta-history9.xml-p350p500.bz2:350:501",
                    )),
            );
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn split_writes_pieces_and_second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let (input, decompress, write) = setup(dir.path());

        let run = || {
            let mut cmd = dumpsplit();
            cmd.args(["split", "-s", "30M", "-b", "3", "-f"])
                .arg(&input)
                .arg("-o")
                .arg(out.path())
                .args(["--decompress-tool"])
                .arg(&decompress)
                .args(["--write-tool"])
                .arg(&write);
            cmd
        };

        run()
            .assert()
            .success()
            .stderr(predicate::str::contains("pipelines run  : 3"));
        let piece = out.path().join("enwiki-20170201-pages-meta-history9.xml-p200p349.bz2");
        assert!(fs::read_to_string(&piece).unwrap().contains("<id>200</id>"));

        run()
            .assert()
            .success()
            .stderr(predicate::str::contains("pipelines run  : 0"));
    }

    #[test]
    fn failing_writer_makes_split_fail() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let (input, decompress, _) = setup(dir.path());
        let write = script(dir.path(), "broken.sh", "cat > /dev/null; exit 1");

        dumpsplit()
            .args(["split", "-s", "30M", "-f"])
            .arg(&input)
            .arg("-o")
            .arg(out.path())
            .env("DUMPSPLIT_DECOMPRESS_TOOL", &decompress)
            .env("DUMPSPLIT_WRITE_TOOL", &write)
            .assert()
            .failure()
            .stderr(
                predicate::str::contains("The following commands failed from batch 1")
                    .and(predicate::str::contains("3 split pipeline(s) failed")),
            );
    }

    #[test]
    fn missing_output_directory_fails_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let (input, decompress, write) = setup(dir.path());

        dumpsplit()
            .args(["split", "-s", "30M", "-f"])
            .arg(&input)
            .arg("-o")
            .arg(dir.path().join("missing"))
            .env("DUMPSPLIT_DECOMPRESS_TOOL", &decompress)
            .env("DUMPSPLIT_WRITE_TOOL", &write)
            .assert()
            .failure()
            .stderr(predicate::str::contains("planning split"));
    }
}

// ── check-range ────────────────────────────────────────────────────────────

#[test]
fn check_range_needs_a_run_or_files() {
    dumpsplit().arg("check-range").assert().failure();
}

#[cfg(unix)]
#[test]
fn check_range_reports_unknown_last_page_as_bad() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("enwiki-20170201-pages-meta-history1.xml-p000000001p000000500.bz2");
    fs::write(&input, b"").unwrap();

    let decompress = dir.path().join("fromoffset.sh");
    fs::write(
        &decompress,
        "#!/bin/sh\nprintf '<mediawiki>\\n  <siteinfo>\\n    <base>https://en.wikipedia.org/wiki/Main_Page</base>\\n  </siteinfo>\\n  <page>\\n    <title>A</title>\\n    <ns>0</ns>\\n    <id>1</id>\\n'\n",
    )
    .unwrap();
    let last_id = dir.path().join("getlastid.sh");
    fs::write(&last_id, "#!/bin/sh\nexit 1\n").unwrap();
    for tool in [&decompress, &last_id] {
        fs::set_permissions(tool, fs::Permissions::from_mode(0o755)).unwrap();
    }

    dumpsplit()
        .args(["check-range", "-f"])
        .arg(&input)
        .env("DUMPSPLIT_DECOMPRESS_TOOL", &decompress)
        .env("DUMPSPLIT_LAST_ID_TOOL", &last_id)
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "BAD {} first_claimed/has: 1 1 last_claimed/has: 500 None",
            input.display()
        )));
}
