pub mod daemon;
pub mod diff;
pub mod events;
pub mod ping;
pub mod record;
pub mod replay;
pub mod settings;
pub mod stop;
pub mod tab;
pub mod utils;

#[cfg(test)]
#[path = "../commands_test.rs"]
mod commands_test;
