/// Shells a terminal session may start
pub const ALLOWED_SHELLS: &[&str] = &["sh", "bash"];

/// Check a requested shell against the allow-list.
///
/// The shell name becomes the exec command verbatim, so anything that isn't
/// an exact allow-list entry is rejected.
pub fn is_valid_shell(shell: &str) -> bool {
    ALLOWED_SHELLS.contains(&shell)
}
