use super::*;

/// The process to observe. Without a pid every process on the host is
/// observed.
#[derive(Deserialize, Default)]
pub struct Target {
    #[serde(default)]
    pid: Option<u32>,
}

impl Target {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(super) fn set_pid(&mut self, pid: u32) {
        self.pid = Some(pid);
    }
}
