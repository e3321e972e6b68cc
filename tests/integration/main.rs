//! Integration tests for shboost

use assert_cmd::{cargo::cargo_bin_cmd, Command};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch directory with its own config and cache roots
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let ws = Self {
            dir: TempDir::new().unwrap(),
        };
        fs::create_dir_all(ws.path("bin")).unwrap();
        ws.write_script("bin/fakevenv", &fake_venv(&ws.path("calls.log")));
        ws.write_config("");
        ws
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn write_config(&self, extra: &str) {
        let config = format!(
            "[paths]\n\
             env_root = \"{}\"\n\
             mount_root = \"{}\"\n\
             scripts_root = \"{}\"\n\
             \n\
             [lock]\n\
             timeout_secs = 60\n\
             \n\
             [env]\n\
             create_command = \"{}\"\n\
             upgrade_pip = false\n\
             {extra}",
            self.path("envs").display(),
            self.path("mounts").display(),
            self.path("scripts").display(),
            self.path("bin/fakevenv").display(),
        );
        fs::write(self.path("config.toml"), config).unwrap();
    }

    fn write_script(&self, rel: &str, text: &str) {
        let path = self.path(rel);
        fs::write(&path, text).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn shboost(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("shboost");
        cmd.current_dir(self.dir.path())
            .env("SHBOOST_CONFIG", self.path("config.toml"))
            .env_remove("SHBOOST_ENV_ROOT")
            .env_remove("SHBOOST_MOUNT_ROOT")
            .env_remove("SHBOOST_SCRIPTS_ROOT")
            .env_remove("DISPLAY");
        cmd
    }

    /// Tar the files in `files` into `name`
    fn tar(&self, name: &str, files: &[(&str, &str)]) -> Vec<u8> {
        let src = self.path(&format!("{name}.src"));
        fs::create_dir_all(&src).unwrap();
        for (file, content) in files {
            fs::write(src.join(file), content).unwrap();
        }
        sh(self.dir.path(), &format!("tar -cf {name} -C {name}.src ."));
        fs::remove_dir_all(&src).unwrap();
        fs::read(self.path(name)).unwrap()
    }

    fn calls(&self) -> String {
        fs::read_to_string(self.path("calls.log")).unwrap_or_default()
    }
}

/// Stand-in for `virtualenv`: creates a python that only records its arguments
fn fake_venv(log: &Path) -> String {
    let log = log.display();
    format!(
        "#!/bin/bash\n\
         set -eu\n\
         echo create >> '{log}'\n\
         sleep 0.2\n\
         mkdir -p \"$1/bin\"\n\
         printf '#!/bin/bash\\necho \"python $*\" >> %s\\n' '{log}' > \"$1/bin/python\"\n\
         chmod +x \"$1/bin/python\"\n"
    )
}

fn sh(dir: &Path, script: &str) -> String {
    let out = std::process::Command::new("bash")
        .arg("-c")
        .arg(script)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "{script}: {:?}", out);
    String::from_utf8(out.stdout).unwrap()
}

fn stdout_of(cmd: &mut Command) -> String {
    let out = cmd.output().unwrap();
    assert!(out.status.success(), "{:?}", out);
    String::from_utf8(out.stdout).unwrap()
}

mod cli_tests {
    use super::*;
    use predicates::prelude::*;

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("shboost")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("fragments for workflow jobs"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("shboost")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("shboost"));
    }

    #[test]
    fn config_path_follows_env() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[archive]"))
            .stdout(predicate::str::contains("timeout_secs = 60"));
    }

    #[test]
    fn root_override_beats_the_file() {
        let ws = Workspace::new();
        let scratch = ws.path("scratch/mounts");
        ws.shboost()
            .env("SHBOOST_MOUNT_ROOT", &scratch)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains(scratch.display().to_string()))
            .stdout(predicate::str::contains(ws.path("envs").display().to_string()));

        ws.tar("data.tar", &[("hello.txt", "hi")]);
        ws.shboost()
            .env("SHBOOST_MOUNT_ROOT", &scratch)
            .args(["run", "--input", "data.tar", "--", "true"])
            .assert()
            .success();
        assert!(fs::read_dir(&scratch).unwrap().count() > 0);
        assert!(!ws.path("mounts").exists());
    }

    #[test]
    fn render_with_datalad() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["render", "--datalad", "ds", "--", "cp {input} {output}"])
            .assert()
            .success()
            .stdout(predicate::str::contains("datalad get -d"))
            .stdout(predicate::str::contains("datalad unlock -d"))
            .stdout(predicate::str::contains("datalad save").not());
    }

    #[test]
    fn invalid_config_is_reported() {
        let ws = Workspace::new();
        ws.write_config("[general]\nlog_format = \"xml\"\n");
        ws.shboost()
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn hash_ignores_package_order() {
        let ws = Workspace::new();
        let a = stdout_of(ws.shboost().args(["hash", "-p", "numpy", "-p", "pandas"]));
        let b = stdout_of(ws.shboost().args(["hash", "-p", "pandas", "-p", " numpy"]));
        assert_eq!(a, b);
        assert_eq!(a.trim().len(), 32);
    }

    #[test]
    fn hash_of_archive_matches_the_shell() {
        let ws = Workspace::new();
        let rust = stdout_of(ws.shboost().args(["hash", "--archive", "sub/../data.tar"]));
        let shell = sh(
            ws.dir.path(),
            "printf '%s' \"$(realpath -ms -- data.tar)\" | sha256sum | cut -c1-32",
        );
        assert_eq!(rust.trim(), shell.trim());
    }

    #[test]
    fn render_bare_command() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["render", "--", "cat {input}"])
            .assert()
            .success()
            .stdout("cat {input}\n");
    }

    #[test]
    fn malformed_template_is_rejected() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["render", "--xvfb", "--", "awk '{print $1}'"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid template"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn cache_list_empty() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries found."));
    }
}

mod archive_tests {
    use super::*;
    use predicates::prelude::*;

    #[test]
    fn input_archive_is_untouched() {
        let ws = Workspace::new();
        let before = ws.tar("data.tar", &[("hello.txt", "hi")]);

        ws.shboost()
            .args(["run", "--input", "data.tar", "--", "cat data.tar/hello.txt"])
            .assert()
            .success()
            .stdout(predicate::str::contains("hi"));

        let archive = ws.path("data.tar");
        assert!(!archive.is_symlink());
        assert_eq!(fs::read(&archive).unwrap(), before);
        assert!(!ws.path("data.tar.swp").exists());
    }

    #[test]
    fn unchanged_extraction_is_reused() {
        let ws = Workspace::new();
        ws.tar("data.tar", &[("hello.txt", "hi")]);
        let run = |ws: &Workspace| {
            ws.shboost()
                .args(["run", "--input", "data.tar", "--", "ls data.tar/"])
                .assert()
                .success()
        };
        run(&ws).stderr(predicate::str::contains("extracting archive"));
        run(&ws).stderr(predicate::str::contains("reusing extracted archive"));
    }

    #[test]
    fn failing_job_restores_the_archive() {
        let ws = Workspace::new();
        let before = ws.tar("data.tar", &[("hello.txt", "hi")]);

        ws.shboost()
            .args(["run", "--input", "data.tar", "--", "exit 4"])
            .assert()
            .code(4);

        assert!(!ws.path("data.tar").is_symlink());
        assert_eq!(fs::read(ws.path("data.tar")).unwrap(), before);
        assert!(!ws.path("data.tar.swp").exists());
    }

    #[test]
    fn modify_repacks_changes() {
        let ws = Workspace::new();
        ws.tar("db.tar", &[("a.txt", "a")]);

        ws.shboost()
            .args(["run", "--modify", "db.tar", "--", "echo b > db.tar/b.txt"])
            .assert()
            .success();

        let archive = ws.path("db.tar");
        assert!(archive.is_file() && !archive.is_symlink());
        let listing = sh(ws.dir.path(), "tar -tf db.tar");
        assert!(listing.contains("a.txt"));
        assert!(listing.contains("b.txt"));
        assert!(!ws.path("db.tar.swp").exists());
        assert!(!ws.path(".partial.db.tar").exists());
    }

    #[test]
    fn output_archive_is_created() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["run", "--output", "out/new.tar", "--", "echo x > out/new.tar/f.txt"])
            .assert()
            .success();

        assert!(ws.path("out/new.tar").is_file());
        assert!(sh(ws.dir.path(), "tar -tf out/new.tar").contains("f.txt"));
    }

    #[test]
    fn mount_commands_drive_the_same_layout() {
        let ws = Workspace::new();
        let before = ws.tar("data.tar", &[("hello.txt", "hi")]);

        ws.shboost().args(["mount", "open", "data.tar"]).assert().success();
        assert!(ws.path("data.tar").is_symlink());
        assert_eq!(fs::read_to_string(ws.path("data.tar/hello.txt")).unwrap(), "hi");
        let state = stdout_of(ws.shboost().args(["mount", "status", "data.tar", "-f", "plain"]));
        assert_eq!(state.trim(), "mounted");

        ws.shboost().args(["mount", "close", "data.tar"]).assert().success();
        assert_eq!(fs::read(ws.path("data.tar")).unwrap(), before);

        // The job fragment reuses what the CLI extracted
        ws.shboost()
            .args(["run", "--input", "data.tar", "--", "cat data.tar/hello.txt"])
            .assert()
            .success()
            .stderr(predicate::str::contains("reusing extracted archive"));
    }

    #[test]
    fn restore_after_a_killed_job() {
        let ws = Workspace::new();
        let before = ws.tar("data.tar", &[("hello.txt", "hi")]);
        let key = stdout_of(ws.shboost().args(["hash", "--archive", "data.tar"]));
        let mount = ws.path("mounts").join(key.trim());
        fs::create_dir_all(&mount).unwrap();
        fs::rename(ws.path("data.tar"), ws.path("data.tar.swp")).unwrap();
        std::os::unix::fs::symlink(&mount, ws.path("data.tar")).unwrap();

        ws.shboost().args(["mount", "restore", "data.tar"]).assert().success();
        assert!(!ws.path("data.tar").is_symlink());
        assert_eq!(fs::read(ws.path("data.tar")).unwrap(), before);
    }

    #[test]
    fn restore_keeps_a_user_link() {
        let ws = Workspace::new();
        ws.tar("real.tar", &[("hello.txt", "hi")]);
        std::os::unix::fs::symlink("real.tar", ws.path("link.tar")).unwrap();

        ws.shboost().args(["mount", "restore", "link.tar"]).assert().success();
        assert_eq!(fs::read_link(ws.path("link.tar")).unwrap(), PathBuf::from("real.tar"));
    }

    #[test]
    fn linked_input_is_mounted_and_put_back() {
        let ws = Workspace::new();
        ws.tar("real.tar", &[("hello.txt", "hi")]);
        std::os::unix::fs::symlink("real.tar", ws.path("link.tar")).unwrap();

        ws.shboost()
            .args(["run", "--input", "link.tar", "--", "cat link.tar/hello.txt"])
            .assert()
            .success()
            .stdout(predicate::str::contains("hi"));

        assert_eq!(fs::read_link(ws.path("link.tar")).unwrap(), PathBuf::from("real.tar"));
        assert!(!ws.path("link.tar.swp").exists());
    }

    fn assert_untouched(ws: &Workspace, name: &str, before: &[u8]) {
        let archive = ws.path(name);
        assert!(!archive.is_symlink(), "{name} is still linked");
        assert_eq!(fs::read(&archive).unwrap(), before, "{name} changed");
        assert!(!ws.path(&format!("{name}.swp")).exists());
        assert!(!ws.path(&format!(".partial.{name}")).exists());
    }

    #[test]
    fn corrupt_input_stays_in_place() {
        let ws = Workspace::new();
        fs::write(ws.path("bad.tar"), "not a tar at all").unwrap();

        ws.shboost()
            .args(["run", "--input", "bad.tar", "--", "echo ran"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("ran").not())
            .stderr(predicate::str::contains("failed to mount input archive"));

        assert_untouched(&ws, "bad.tar", b"not a tar at all");
    }

    #[test]
    fn corrupt_linked_input_keeps_the_link() {
        let ws = Workspace::new();
        fs::write(ws.path("real.tar"), "not a tar at all").unwrap();
        std::os::unix::fs::symlink("real.tar", ws.path("link.tar")).unwrap();

        ws.shboost()
            .args(["run", "--input", "link.tar", "--", "true"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to mount input archive"));

        assert_eq!(fs::read_link(ws.path("link.tar")).unwrap(), PathBuf::from("real.tar"));
        assert_eq!(fs::read(ws.path("real.tar")).unwrap(), b"not a tar at all");
        assert!(!ws.path("link.tar.swp").exists());
    }

    #[test]
    fn corrupt_slot_leaves_the_others_alone() {
        let ws = Workspace::new();
        fs::write(ws.path("bad.tar"), "not a tar at all").unwrap();
        let good = ws.tar("good.tar", &[("hello.txt", "hi")]);

        ws.shboost()
            .args(["run", "--input", "bad.tar", "--input", "good.tar", "--", "true"])
            .assert()
            .failure();
        assert_untouched(&ws, "bad.tar", b"not a tar at all");
        assert_untouched(&ws, "good.tar", &good);

        // a later slot failing puts the earlier, opened slot back
        ws.shboost()
            .args(["run", "--input", "good.tar", "--input", "bad.tar", "--", "true"])
            .assert()
            .failure();
        assert_untouched(&ws, "good.tar", &good);
        assert_untouched(&ws, "bad.tar", b"not a tar at all");
    }

    #[test]
    fn failed_repack_restores_the_original() {
        let ws = Workspace::new();
        // plain tar under a compressed name: reading never needs xz, packing
        // runs the failing stand-in
        let before = ws.tar("db.tar.xz", &[("a.txt", "a")]);
        ws.write_script(
            "bin/xz",
            "#!/bin/bash
             if [[ \" $* \" == *\" -d \"* ]]; then exec cat; fi
             echo 'xz: no space left' >&2
             exit 1
",
        );
        let path = format!(
            "{}:{}",
            ws.path("bin").display(),
            std::env::var("PATH").unwrap_or_default()
        );

        ws.shboost()
            .env("PATH", path)
            .args(["run", "--modify", "db.tar.xz", "--", "echo b > db.tar.xz/b.txt"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to repack archive"));

        assert_untouched(&ws, "db.tar.xz", &before);
    }

    #[test]
    fn unchanged_modify_honours_always() {
        let ws = Workspace::new();
        let before = ws.tar("db.tar", &[("a.txt", "a")]);
        let key = stdout_of(ws.shboost().args(["hash", "--archive", "db.tar"]));
        let mount = ws.path("mounts").join(key.trim());

        ws.shboost()
            .args(["run", "--modify", "db.tar", "--clear-mounts", "always", "--", "ls db.tar/"])
            .assert()
            .success();
        assert_untouched(&ws, "db.tar", &before);
        assert!(!mount.exists());

        ws.shboost()
            .args(["run", "--modify", "db.tar", "--clear-mounts", "never", "--", "ls db.tar/"])
            .assert()
            .success();
        assert_untouched(&ws, "db.tar", &before);
        assert!(mount.is_dir());
    }
}

mod env_tests {
    use super::*;
    use predicates::prelude::*;

    #[test]
    fn command_sees_the_environment_first_on_path() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["run", "-p", "black", "--", "command -v python"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/venv/bin/python"));

        let calls = ws.calls();
        assert_eq!(calls.matches("create").count(), 1);
        assert!(calls.contains("python -m pip install black"));
    }

    #[test]
    fn concurrent_jobs_build_once() {
        let ws = Workspace::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_shboost"));
                cmd.current_dir(ws.dir.path())
                    .env("SHBOOST_CONFIG", ws.path("config.toml"))
                    .args(["run", "-p", "black", "-p", "isort", "--", "true"]);
                std::thread::spawn(move || cmd.output().unwrap())
            })
            .collect();
        for handle in handles {
            let out = handle.join().unwrap();
            assert!(out.status.success(), "{:?}", out);
        }
        assert_eq!(ws.calls().matches("create").count(), 1);
    }

    #[test]
    fn python_mode_runs_the_environment_python() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["run", "-p", "black", "--env-mode", "python", "--", "-c pass"])
            .assert()
            .success();
        assert!(ws.calls().contains("python -c pass"));
    }

    #[test]
    fn failed_build_leaves_no_entry() {
        let ws = Workspace::new();
        let config = fs::read_to_string(ws.path("config.toml")).unwrap();
        let broken = config.replace(&ws.path("bin/fakevenv").display().to_string(), "false");
        fs::write(ws.path("config.toml"), broken).unwrap();

        ws.shboost()
            .args(["run", "-p", "black", "--", "true"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ERROR (key="));

        let entries: Vec<_> = fs::read_dir(ws.path("envs"))
            .unwrap()
            .flatten()
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn ensure_builds_in_process_and_lists() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["env", "ensure", "-p", "black"])
            .assert()
            .success()
            .stdout(predicate::str::contains("venv"));
        ws.shboost()
            .args(["run", "-p", "black", "--", "true"])
            .assert()
            .success();
        assert_eq!(ws.calls().matches("create").count(), 1);

        ws.shboost()
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"environment\""))
            .stdout(predicate::str::contains("\"ready\""));
    }
}

mod boost_tests {
    use super::*;
    use predicates::prelude::*;

    fn artifacts(ws: &Workspace) -> Vec<PathBuf> {
        fs::read_dir(ws.path("scripts"))
            .map(|it| it.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn jobs_differing_in_fields_share_one_artifact() {
        let ws = Workspace::new();
        let first = stdout_of(ws.shboost().args(["render", "--boost", "--xvfb", "--", "glxinfo {input}"]));
        let second = stdout_of(ws.shboost().args(["render", "--boost", "--xvfb", "--", "glxinfo {input}"]));
        assert_eq!(first, second);
        assert!(first.contains("## > glxinfo {input}"));
        assert!(first.contains("\x1b[?1049h"));
        assert_eq!(artifacts(&ws).len(), 1);

        let script = fs::read_to_string(&artifacts(&ws)[0]).unwrap();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("${1}"));
    }

    #[test]
    fn debug_shows_the_call() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["render", "--boost", "--debug", "--xvfb", "--", "glxinfo {input}"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("# shboost: packaged script"))
            .stdout(predicate::str::contains("'{input}'"))
            .stdout(predicate::str::contains("\x1b[?1049h").not());
    }

    #[test]
    fn boosted_script_runs() {
        let ws = Workspace::new();
        ws.shboost()
            .args(["run", "--boost", "-x", "A=5", "--", "exit $A"])
            .assert()
            .code(5);
        assert_eq!(artifacts(&ws).len(), 1);
    }
}

mod display_tests {
    use super::*;
    use predicates::prelude::*;
    use serial_test::serial;

    fn with_fake_xvfb(ws: &Workspace) -> String {
        ws.write_script(
            "bin/xvfb-run",
            "#!/bin/bash\n\
             echo fake-xvfb >&2\n\
             while [[ \"$1\" == -* ]]; do\n\
             if [[ \"$1\" == -s ]]; then shift; fi\n\
             shift\n\
             done\n\
             DISPLAY=:99 exec \"$@\"\n",
        );
        format!(
            "{}:{}",
            ws.path("bin").display(),
            std::env::var("PATH").unwrap_or_default()
        )
    }

    #[test]
    #[serial]
    fn launches_a_display_when_missing() {
        let ws = Workspace::new();
        let path = with_fake_xvfb(&ws);
        ws.shboost()
            .env("PATH", path)
            .args(["run", "--xvfb", "--", "echo \"display=$DISPLAY\""])
            .assert()
            .success()
            .stdout("display=:99\n")
            .stderr(predicate::str::contains("fake-xvfb"));
    }

    #[test]
    #[serial]
    fn keeps_an_existing_display() {
        let ws = Workspace::new();
        let path = with_fake_xvfb(&ws);
        ws.shboost()
            .env("PATH", path)
            .env("DISPLAY", ":7")
            .args(["run", "--xvfb", "--", "echo \"it's $DISPLAY\""])
            .assert()
            .success()
            .stdout("it's :7\n")
            .stderr(predicate::str::contains("fake-xvfb").not());
    }
}
