pub mod down;
pub mod hosts;
pub mod init;
pub mod logs;
pub mod status;
pub mod tls;
pub mod up;

use lo1_orchestration::plugins::PluginRegistry;

/// The compile-time plugin registration point. Typed plugins implement
/// `lo1_orchestration::plugins::Plugin` and are registered here.
pub fn plugin_registry() -> PluginRegistry {
    PluginRegistry::new()
}
