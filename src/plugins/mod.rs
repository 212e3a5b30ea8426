pub mod process;
pub mod random;

use crate::core::job::PluginRegistry;

/// Every plugin bundled with the agent.
pub fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(process::NAME, process::factory());
    registry.register(random::NAME, random::factory());
    registry
}
