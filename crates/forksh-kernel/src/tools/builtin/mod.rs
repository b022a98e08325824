//! Built-in commands.

mod echo;
mod fake;
mod file;
mod fork;
mod help;
mod read;
mod status;
mod stop;
mod workers;
mod write;

use super::ToolRegistry;

/// Register all built-in tools with the registry.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register(echo::Echo);
    registry.register(fake::Fake);
    registry.register(file::File);
    registry.register(fork::Fork);
    registry.register(fork::Start);
    registry.register(help::Exit);
    registry.register(help::Help);
    registry.register(read::Read);
    registry.register(status::Status);
    registry.register(stop::Stop);
    registry.register(workers::Workers);
    registry.register(write::Write);
}
