//! Translation of deployment settings into container CLI flags.
//!
//! The CLI parses flags order-sensitively and the image reference must come
//! after all of them, so the builder only ever appends.

/// Flags for an interactive run with stdin, stdout and stderr attached.
pub fn base_run_args() -> Vec<String> {
    ["run", "-i", "-a", "stdin", "-a", "stdout", "-a", "stderr"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub struct ArgsBuilder<'a> {
    args: &'a mut Vec<String>,
}

impl<'a> ArgsBuilder<'a> {
    pub fn new(args: &'a mut Vec<String>) -> Self {
        Self { args }
    }

    /// Appends `-e KEY=VALUE` for every entry with exactly one `=`. Other
    /// entries are dropped.
    pub fn set_env<S: AsRef<str>>(&mut self, env: &[S]) -> &mut Self {
        for entry in env {
            let entry = entry.as_ref();
            if entry.split('=').count() == 2 {
                self.push("-e", entry);
            }
        }
        self
    }

    /// Appends `-v SPEC` for every bind spec with at least one `:`. Option
    /// suffixes such as `:ro` are kept verbatim.
    pub fn set_volumes<S: AsRef<str>>(&mut self, binds: &[S]) -> &mut Self {
        for bind in binds {
            let bind = bind.as_ref();
            if bind.split(':').count() >= 2 {
                self.push("-v", bind);
            }
        }
        self
    }

    pub fn set_cgroup_ns(&mut self, cgroup_ns: &str) -> &mut Self {
        self.push_non_empty("--cgroupns", cgroup_ns)
    }

    pub fn set_container_name(&mut self, name: &str) -> &mut Self {
        self.push_non_empty("--name", name)
    }

    pub fn set_network_mode(&mut self, network_mode: &str) -> &mut Self {
        self.push_non_empty("--network", network_mode)
    }

    fn push_non_empty(&mut self, flag: &str, value: &str) -> &mut Self {
        if !value.is_empty() {
            self.push(flag, value);
        }
        self
    }

    fn push(&mut self, flag: &str, value: &str) {
        self.args.push(flag.to_string());
        self.args.push(value.to_string());
    }
}
