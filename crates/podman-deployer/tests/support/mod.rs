#![allow(dead_code)]
#![cfg(unix)]

use serde_json::{json, Value};
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use podman_deployer::Config;

/// Stands in for the podman binary. State lives next to the script:
/// `calls.log` (argv per invocation), `images`, `containers/` and
/// `running/` markers, and `fail_<subcommand>` switches.
const FAKE_PODMAN: &str = r#"#!/bin/sh
dir="$(cd "$(dirname "$0")" && pwd)"
echo "$*" >> "$dir/calls.log"
cmd="$1"
if [ -e "$dir/fail_$cmd" ]; then
  echo "forced $cmd failure" >&2
  exit 125
fi
case "$cmd" in
  image)
    [ -e "$dir/images" ] && cat "$dir/images"
    ;;
  pull)
    for last; do :; done
    echo "$last" >> "$dir/images"
    ;;
  ps)
    filter=""
    prev=""
    for a in "$@"; do
      [ "$prev" = "--filter" ] && filter="$a"
      prev="$a"
    done
    name="${filter#name=^}"
    name="${name%\$}"
    if [ "$2" = "-a" ]; then
      [ -e "$dir/containers/$name" ] && echo "$name"
    else
      [ -e "$dir/running/$name" ] && echo "$name"
    fi
    ;;
  run)
    name=""
    prev=""
    for a in "$@"; do
      [ "$prev" = "--name" ] && name="$a"
      prev="$a"
    done
    mkdir -p "$dir/containers" "$dir/running"
    touch "$dir/containers/$name" "$dir/running/$name"
    while IFS= read -r line; do
      [ -e "$dir/running/$name" ] || break
      echo "echo:$line"
    done
    rm -f "$dir/running/$name"
    ;;
  kill)
    if [ ! -e "$dir/running/$2" ]; then
      echo "no container with name or ID \"$2\" found" >&2
      exit 125
    fi
    rm -f "$dir/running/$2"
    ;;
  rm)
    rm -f "$dir/running/$3" "$dir/containers/$3"
    ;;
  *)
    echo "unknown command $cmd" >&2
    exit 2
    ;;
esac
exit 0
"#;

pub const IMAGE: &str = "quay.io/arcalot/podman-deployer-test-helper:0.1.0";

pub struct FakePodman {
    _temp: TempDir,
    root: PathBuf,
    script: PathBuf,
}

impl FakePodman {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        let script = root.join("podman");
        fs::write(&script, FAKE_PODMAN).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        Self {
            _temp: temp,
            root,
            script,
        }
    }

    pub fn path(&self) -> &Path {
        &self.script
    }

    /// A validated config pointing at this binary, with `deployment` merged in.
    pub fn config(&self, deployment: Value) -> Config {
        self.config_with(json!({}), deployment)
    }

    pub fn config_with(&self, podman: Value, deployment: Value) -> Config {
        let mut podman = podman;
        podman["path"] = json!(self.script.to_string_lossy());
        Config::from_value(json!({ "podman": podman, "deployment": deployment })).unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.root.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn calls_to(&self, subcommand: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|line| line.split(' ').next() == Some(subcommand))
            .collect()
    }

    pub fn add_image(&self, image: &str) {
        let path = self.root.join("images");
        let mut images = fs::read_to_string(&path).unwrap_or_default();
        images.push_str(image);
        images.push('\n');
        fs::write(path, images).unwrap();
    }

    pub fn fail(&self, subcommand: &str) {
        fs::write(self.root.join(format!("fail_{}", subcommand)), "").unwrap();
    }

    pub fn recover(&self, subcommand: &str) {
        let _ = fs::remove_file(self.root.join(format!("fail_{}", subcommand)));
    }

    pub fn set_mode(&self, mode: u32) {
        fs::set_permissions(&self.script, fs::Permissions::from_mode(mode)).unwrap();
    }

    /// Marks a container as exited without removing it.
    pub fn stop(&self, name: &str) {
        let _ = fs::remove_file(self.root.join("running").join(name));
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.root.join("running").join(name).exists()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.root.join("containers").join(name).exists()
    }
}

/// Reads until a full line has arrived or the stream ends.
pub fn read_line<R: Read>(reader: R) -> String {
    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).unwrap();
    line
}
