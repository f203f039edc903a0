use std::{
    mem,
    process::{Child, ChildStdout, ExitStatus},
};
use tokio::runtime::Handle;
use tracing::debug;

/// Handle for a child process which ensures that it is killed and reaped on drop.
///
/// Reaping happens on the blocking pool of the runtime the container was
/// created on, so dropping one from a non-async thread never waits on the process.
#[derive(Debug)]
pub struct ChildContainer {
    child: Option<Child>,
    handle: Option<Handle>,
}

impl ChildContainer {
    /// Takes ownership of a spawned process.
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self {
            child: Some(child),
            handle: Handle::try_current().ok(),
        }
    }

    /// Takes the process's piped standard output, if it has not already been taken.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.as_mut().and_then(|c| c.stdout.take())
    }

    /// Returns the process's exit status, if it has exited.
    pub fn try_wait(&mut self) -> Option<ExitStatus> {
        self.child.as_mut().and_then(|c| c.try_wait().ok().flatten())
    }
}

impl From<Child> for ChildContainer {
    fn from(child: Child) -> Self {
        Self::new(child)
    }
}

impl Drop for ChildContainer {
    fn drop(&mut self) {
        let Some(child) = mem::take(&mut self.child) else {
            return;
        };

        match self.handle.take().or_else(|| Handle::try_current().ok()) {
            Some(handle) => {
                handle.spawn_blocking(move || cleanup_child_process(child));
            },
            None => {
                std::thread::spawn(move || cleanup_child_process(child));
            },
        }
    }
}

fn cleanup_child_process(mut child: Child) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!("Child process already exited: {}.", status);
        return;
    }

    if let Err(e) = child.kill().and_then(|()| child.wait().map(|_| ())) {
        debug!("Error awaiting child process: {:?}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::{
        process::{Command, Stdio},
        time::Duration,
    };

    fn alive(pid: u32) -> bool {
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(Stdio::null())
            .status()
            .map_or(false, |s| s.success())
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn drops_off_the_runtime_are_reaped_on_it() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let container = ChildContainer::new(child);
        assert!(container.handle.is_some());

        // Scheduler threads have no runtime context of their own.
        std::thread::spawn(move || drop(container)).join().unwrap();

        while alive(pid) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
