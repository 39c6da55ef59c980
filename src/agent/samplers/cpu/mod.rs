#[cfg(target_os = "linux")]
mod ipc;
