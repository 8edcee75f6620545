//! Shared fixtures for the integration tests: a throwaway JN_HOME with a
//! plugin directory holding the bundled null plugins and a few script
//! plugins.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub const CSV_SH: &str = r#"#!/bin/sh
# jn-plugin:
#   name: csv
#   role: format
#   modes: read
#   matches: [".*\\.csv$"]
#   config_params: delimiter
# end-jn-plugin
exec awk -F, '
NR == 1 { n = split($0, header, FS); next }
{
  printf "{"
  for (i = 1; i <= n; i++) {
    printf "%s\"%s\":\"%s\"", (i > 1 ? "," : ""), header[i], $i
  }
  print "}"
}'
"#;

pub const GZ_SH: &str = r#"#!/bin/sh
# jn-plugin:
#   name: gz
#   role: compression
#   modes: raw, write
#   matches: ["\\.gz$"]
# end-jn-plugin
mode=raw
for arg in "$@"; do
  case "$arg" in
    --mode=write) mode=write ;;
  esac
done
if [ "$mode" = write ]; then
  exec gzip -c
else
  exec gzip -dc
fi
"#;

pub const GREP_SH: &str = r#"#!/bin/sh
# jn-plugin:
#   name: grep
#   role: filter
#   modes: filter
#   matches: []
# end-jn-plugin
pattern=
for arg in "$@"; do
  case "$arg" in
    --expr=*) pattern="${arg#--expr=}" ;;
  esac
done
if [ -n "$pattern" ]; then
  grep -e "$pattern"
  exit 0
fi
exec cat
"#;

pub const WEB_SH: &str = r#"#!/bin/sh
# jn-plugin:
#   name: web
#   role: protocol
#   namespace: web
#   modes: read, raw
#   matches: ["^https?://"]
# end-jn-plugin
url=
for arg in "$@"; do
  case "$arg" in
    --*) ;;
    *) url="$arg" ;;
  esac
done
printf '{"url":"%s"}\n' "$url"
"#;

pub const FAIL_SH: &str = r#"#!/bin/sh
# jn-plugin:
#   name: fail
#   role: format
#   modes: read
#   matches: ["\\.fail$"]
# end-jn-plugin
echo "this format always fails" >&2
exit 7
"#;

pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let plugins = dir.path().join("plugins");
        fs::create_dir_all(&plugins).expect("plugins dir");

        for bin in &["jn-null", "jn-seq"] {
            let source = assert_cmd::cargo::cargo_bin(bin);
            let target = plugins.join(bin);
            fs::copy(&source, &target).expect("copy bundled plugin");
        }

        write_script(&plugins.join("csv.sh"), CSV_SH);
        write_script(&plugins.join("gzcat.sh"), GZ_SH);
        write_script(&plugins.join("grep.sh"), GREP_SH);
        write_script(&plugins.join("web.sh"), WEB_SH);
        write_script(&plugins.join("fail.sh"), FAIL_SH);

        Fixture { dir }
    }

    pub fn home(&self) -> &Path {
        self.dir.path()
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    /// A `jn` command isolated to this fixture: bundled layer under the
    /// fixture, user layer pointed at the (empty) fixture home, cache off.
    pub fn jn(&self) -> Command {
        let mut command = Command::new(assert_cmd::cargo::cargo_bin("jn"));
        command
            .env("JN_HOME", self.home())
            .env("HOME", self.home())
            .env_remove("JN_REGISTRY_CACHE")
            .arg("--no-registry-cache")
            .current_dir(self.home());
        command
    }

    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).expect("write fixture file");
        path
    }

    /// Compresses a fixture file with the system gzip.
    pub fn gzip(&self, name: &str) {
        let status = Command::new("sh")
            .arg("-c")
            .arg(format!("gzip -c {} > {}.gz", name, name))
            .current_dir(self.home())
            .status()
            .expect("run gzip");
        assert!(status.success(), "gzip failed");
    }
}

pub fn write_script(path: &Path, content: &str) {
    fs::write(path, content).expect("write script");
    set_executable(path);
}

#[cfg(unix)]
pub fn set_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path).expect("stat").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).expect("chmod");
}
