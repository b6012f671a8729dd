use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "tapsync.sock";

pub fn tapsync_root(home: &Path) -> PathBuf {
    home.join(".tapsync")
}

pub fn run_dir(home: &Path) -> PathBuf {
    tapsync_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}
