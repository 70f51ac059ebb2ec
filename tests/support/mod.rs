//! In-memory stand-in for a remote host.
#![allow(
    dead_code,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::new_without_default
)]

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use pagelift::{CommandOutput, DeployError, DeployResult, RemoteShell};
use zip::write::SimpleFileOptions;

const DEFAULT_FILE_MODE: u32 = 0o664;
const DEFAULT_DIR_MODE: u32 = 0o775;

enum Rule {
    Contains(String),
    EndsWith(String),
}

impl Rule {
    fn matches(&self, command: &str) -> bool {
        match self {
            Self::Contains(p) => command.contains(p.as_str()),
            Self::EndsWith(p) => command.ends_with(p.as_str()),
        }
    }
}

#[derive(Default)]
struct Host {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    modes: BTreeMap<String, u32>,
    links: BTreeSet<String>,
    log: Vec<String>,
    stdin: Vec<Vec<u8>>,
}

/// Transport failure returned instead of a command result.
#[derive(Clone, Copy)]
enum Fault {
    Timeout,
    Disconnect,
}

/// A remote filesystem plus a small command interpreter. Commands that
/// match a scripted rule return the scripted output instead.
pub struct FakeRemote {
    username: String,
    password: Option<String>,
    host: Mutex<Host>,
    rules: Vec<(Rule, CommandOutput)>,
    faults: Vec<(Rule, Fault)>,
    denied_writes: Vec<String>,
    truncated_uploads: Vec<String>,
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn fail(stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        let remote = Self {
            username: "deploy".to_string(),
            password: Some("pw".to_string()),
            host: Mutex::new(Host::default()),
            rules: Vec::new(),
            faults: Vec::new(),
            denied_writes: Vec::new(),
            truncated_uploads: Vec::new(),
        };
        for dir in [
            "/etc/nginx/sites-available",
            "/etc/nginx/sites-enabled",
            "/tmp",
            "/var/www",
            "/home/deploy",
        ] {
            remote.mkdir_p(dir);
        }
        remote
    }

    /// Any command containing `pattern` returns `output`. Earlier rules
    /// win.
    #[must_use]
    pub fn on(mut self, pattern: &str, output: CommandOutput) -> Self {
        self.rules.push((Rule::Contains(pattern.to_string()), output));
        self
    }

    /// Any command ending with `suffix` returns `output`.
    #[must_use]
    pub fn on_suffix(mut self, suffix: &str, output: CommandOutput) -> Self {
        self.rules.push((Rule::EndsWith(suffix.to_string()), output));
        self
    }

    /// Any command containing `pattern` times out.
    #[must_use]
    pub fn on_timeout(mut self, pattern: &str) -> Self {
        self.faults
            .push((Rule::Contains(pattern.to_string()), Fault::Timeout));
        self
    }

    /// Any command containing `pattern` loses the connection.
    #[must_use]
    pub fn on_disconnect(mut self, pattern: &str) -> Self {
        self.faults
            .push((Rule::Contains(pattern.to_string()), Fault::Disconnect));
        self
    }

    /// Uploads and writes to paths starting with `prefix` are refused.
    #[must_use]
    pub fn deny_writes(mut self, prefix: &str) -> Self {
        self.denied_writes.push(prefix.to_string());
        self
    }

    /// Uploads to paths ending with `suffix` lose their last byte.
    #[must_use]
    pub fn truncate_uploads(mut self, suffix: &str) -> Self {
        self.truncated_uploads.push(suffix.to_string());
        self
    }

    /// Place a file on the host, creating its parent directories.
    #[must_use]
    pub fn seed(self, path: &str, content: &[u8]) -> Self {
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.mkdir_p(parent);
        }
        self.store(content, path).unwrap();
        self
    }

    #[must_use]
    pub fn without_password(mut self) -> Self {
        self.password = None;
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.host.lock().unwrap().log.clone()
    }

    pub fn ran(&self, fragment: &str) -> bool {
        self.commands().iter().any(|c| c.contains(fragment))
    }

    pub fn position(&self, fragment: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(fragment))
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.host.lock().unwrap().files.get(path).cloned()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.host.lock().unwrap().files.keys().cloned().collect()
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        self.host.lock().unwrap().modes.get(path).copied()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.host.lock().unwrap().dirs.contains(path)
    }

    pub fn is_link(&self, path: &str) -> bool {
        self.host.lock().unwrap().links.contains(path)
    }

    pub fn stdin_inputs(&self) -> Vec<Vec<u8>> {
        self.host.lock().unwrap().stdin.clone()
    }

    fn mkdir_p(&self, path: &str) {
        let mut host = self.host.lock().unwrap();
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            if host.dirs.insert(current.clone()) {
                host.modes.insert(current.clone(), DEFAULT_DIR_MODE);
            }
        }
    }

    fn store(&self, content: &[u8], remote_path: &str) -> DeployResult<()> {
        if self.denied_writes.iter().any(|p| remote_path.starts_with(p)) {
            return Err(DeployError::remote(
                &format!("write {remote_path}"),
                "Permission denied",
            ));
        }
        let parent = remote_path.rsplit_once('/').map_or("", |(parent, _)| parent);
        let mut host = self.host.lock().unwrap();
        if !parent.is_empty() && !host.dirs.contains(parent) {
            return Err(DeployError::remote(
                &format!("write {remote_path}"),
                "No such file",
            ));
        }

        let mut bytes = content.to_vec();
        if self.truncated_uploads.iter().any(|s| remote_path.ends_with(s)) {
            bytes.pop();
        }
        host.files.insert(remote_path.to_string(), bytes);
        host.modes
            .entry(remote_path.to_string())
            .or_insert(DEFAULT_FILE_MODE);
        Ok(())
    }

    fn interpret(&self, command: &str) -> CommandOutput {
        let mut words: Vec<String> = command.split_whitespace().map(unquote).collect();

        // sudo -S -p '' / sudo -n / sudo -u <user>
        if words.first().is_some_and(|w| w == "sudo") {
            words.remove(0);
            loop {
                match words.first().map(String::as_str) {
                    Some("-S" | "-n") => {
                        words.remove(0);
                    }
                    Some("-p" | "-u") => {
                        words.drain(..2.min(words.len()));
                    }
                    _ => break,
                }
            }
        }
        let args: Vec<&str> = words.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["mkdir", "-p", path] => {
                self.mkdir_p(path);
                ok("")
            }
            ["chmod", mode, path] => {
                let mut host = self.host.lock().unwrap();
                if host.files.contains_key(*path) || host.dirs.contains(*path) {
                    let mode = u32::from_str_radix(mode, 8).unwrap_or(0);
                    host.modes.insert((*path).to_string(), mode);
                    ok("")
                } else {
                    fail(&format!("chmod: cannot access '{path}': No such file or directory"))
                }
            }
            ["test", flag, path] => {
                let host = self.host.lock().unwrap();
                let exists = match *flag {
                    "-f" => host.files.contains_key(*path),
                    "-d" | "-x" => host.dirs.contains(*path),
                    "-L" => host.links.contains(*path),
                    "-r" => host.files.contains_key(*path) || host.dirs.contains(*path),
                    _ => false,
                };
                if exists { ok("") } else { fail("") }
            }
            ["stat", "-c", "%s", path] => {
                let host = self.host.lock().unwrap();
                host.files.get(*path).map_or_else(
                    || fail(&format!("stat: cannot statx '{path}': No such file or directory")),
                    |content| ok(&format!("{}\n", content.len())),
                )
            }
            ["stat", "-c", "%a", path] => {
                let host = self.host.lock().unwrap();
                host.modes.get(*path).map_or_else(
                    || fail(&format!("stat: cannot statx '{path}': No such file or directory")),
                    |mode| ok(&format!("{mode:o}\n")),
                )
            }
            ["ln", "-sf", _, link] => {
                self.host.lock().unwrap().links.insert((*link).to_string());
                ok("")
            }
            ["mv", from, to] => {
                let mut host = self.host.lock().unwrap();
                match host.files.remove(*from) {
                    Some(content) => {
                        host.files.insert((*to).to_string(), content);
                        let mode = host.modes.remove(*from).unwrap_or(DEFAULT_FILE_MODE);
                        host.modes.insert((*to).to_string(), mode);
                        ok("")
                    }
                    None => fail(&format!("mv: cannot stat '{from}': No such file or directory")),
                }
            }
            ["which", tool] => ok(&format!("/usr/bin/{tool}\n")),
            ["systemctl", "is-active", _] => ok("active\n"),
            ["nginx", "-t"] => CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: "nginx: configuration file /etc/nginx/nginx.conf test is successful"
                    .to_string(),
            },
            ["curl", ..] => ok("HTTP/1.1 200 OK\nServer: nginx\n"),
            _ => ok(""),
        }
    }
}

impl RemoteShell for FakeRemote {
    fn username(&self) -> &str {
        &self.username
    }

    fn sudo_password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    fn execute_with_input(
        &self,
        command: &str,
        input: &[u8],
        timeout: Duration,
    ) -> DeployResult<CommandOutput> {
        {
            let mut host = self.host.lock().unwrap();
            host.log.push(command.to_string());
            if !input.is_empty() {
                host.stdin.push(input.to_vec());
            }
        }

        if let Some((_, fault)) = self.faults.iter().find(|(rule, _)| rule.matches(command)) {
            return Err(match fault {
                Fault::Timeout => DeployError::Timeout {
                    command: command.to_string(),
                    seconds: timeout.as_secs(),
                },
                Fault::Disconnect => {
                    DeployError::Connection("connection reset by peer".to_string())
                }
            });
        }

        if let Some((_, output)) = self.rules.iter().find(|(rule, _)| rule.matches(command)) {
            return Ok(output.clone());
        }
        Ok(self.interpret(command))
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> DeployResult<()> {
        let content = std::fs::read(local_path)?;
        self.store(&content, remote_path)
    }

    fn write_file(&self, content: &[u8], remote_path: &str) -> DeployResult<()> {
        self.store(content, remote_path)
    }
}

fn unquote(word: &str) -> String {
    word.strip_prefix('\'')
        .and_then(|w| w.strip_suffix('\''))
        .unwrap_or(word)
        .to_string()
}

/// Write a zip bundle with the given entries.
pub fn bundle(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    {
        let mut zip = zip::ZipWriter::new(file.as_file_mut());
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }
    file
}

/// The usual four-file site.
pub fn full_site() -> tempfile::NamedTempFile {
    bundle(&[
        ("index.html", b"<!doctype html><h1>Shop</h1>"),
        ("styles.css", b"h1 { color: teal; }"),
        ("images/logo.png", b"\x89PNG fake logo"),
        ("images/hero.jpg", b"\xff\xd8 fake hero"),
    ])
}
