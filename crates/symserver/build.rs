use std::process::Command;

fn git_describe() -> Option<String> {
    let cmd = Command::new("git")
        .args(["describe", "--always", "--dirty=-modified"])
        .output()
        .ok()?;

    if !cmd.status.success() {
        return None;
    }

    Some(String::from_utf8_lossy(&cmd.stdout).trim().to_owned())
}

fn main() {
    let version = git_describe().unwrap_or_else(|| "unknown".to_owned());
    println!("cargo:rustc-env=SYMSERVER_GIT_VERSION={version}");
    println!("cargo:rerun-if-env-changed=SYMSERVER_GIT_VERSION");
}
