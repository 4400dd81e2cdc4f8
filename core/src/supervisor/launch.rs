use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

/// Everything needed to launch the supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl LaunchSpec {
    /// `java -Xmx<max> -Xms<min> -jar <jar> nogui`, run from `cwd`.
    pub fn java_server(
        java: impl Into<PathBuf>,
        jar_name: &str,
        max_memory: &str,
        min_memory: &str,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: java.into(),
            args: vec![
                format!("-Xmx{max_memory}"),
                format!("-Xms{min_memory}"),
                "-jar".to_string(),
                jar_name.to_string(),
                "nogui".to_string(),
            ],
            cwd: cwd.into(),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Command with all three standard streams piped. The child is killed if
    /// its handle is dropped, and on Linux also when this process dies.
    pub(crate) fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "linux")]
        {
            let parent_pid = std::process::id() as libc::pid_t;
            // SAFETY: the hook only issues async-signal-safe libc calls.
            unsafe {
                command.pre_exec(move || {
                    super::process_death::set_parent_death(parent_pid);
                    Ok(())
                });
            }
        }

        command
    }

    pub(crate) fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn java_server_uses_fixed_resource_flags() {
        let spec = LaunchSpec::java_server("java", "minecraft_server.jar", "1024M", "1024M", "server");

        assert_eq!(
            spec.args,
            vec!["-Xmx1024M", "-Xms1024M", "-jar", "minecraft_server.jar", "nogui"]
        );
        assert_eq!(spec.cwd, PathBuf::from("server"));
        assert_eq!(
            spec.display(),
            "java -Xmx1024M -Xms1024M -jar minecraft_server.jar nogui"
        );
    }

    #[test]
    fn with_cwd_replaces_working_directory() {
        let spec = LaunchSpec::java_server("java", "a.jar", "512M", "256M", "server")
            .with_cwd("server.partial");

        assert_eq!(spec.cwd, PathBuf::from("server.partial"));
    }
}
