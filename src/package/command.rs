use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};

/// Substitute `{key}` placeholders in every argument.
pub fn expand(argv: &[String], vars: &[(&str, String)]) -> Vec<String> {
    argv.iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), value)
            })
        })
        .collect()
}

/// Run `argv` in `cwd` and wait for it. Any non-zero exit is an error.
pub fn run_checked(argv: &[String], cwd: &Path) -> Result<()> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command");
    };
    let rendered = argv.join(" ");
    log::info!("running `{}` in {}", rendered, cwd.display());

    let status = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .status()
        .with_context(|| format!("failed to start `{}`", rendered))?;
    if !status.success() {
        bail!("`{}` failed with {}", rendered, status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expands_placeholders() {
        let argv = strings(&["tar", "-czf", "{dist}/{name}.tar.gz", "-C", "{stage}", "."]);
        let vars = [
            ("dist", "/tmp/dist".to_string()),
            ("name", "demo".to_string()),
            ("stage", "/tmp/stage".to_string()),
        ];
        assert_eq!(
            expand(&argv, &vars),
            strings(&["tar", "-czf", "/tmp/dist/demo.tar.gz", "-C", "/tmp/stage", "."])
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(run_checked(&[], Path::new(".")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        run_checked(&strings(&["sh", "-c", "exit 0"]), dir.path()).unwrap();
        let err = run_checked(&strings(&["sh", "-c", "exit 3"]), dir.path()).unwrap_err();
        assert!(err.to_string().contains("exit 3"));
    }

    #[test]
    fn missing_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_checked(&strings(&["definitely-not-a-real-tool-4821"]), dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }
}
