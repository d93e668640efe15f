pub mod adapter;
pub mod commands;
pub mod gateway;
pub mod normalize;
pub mod send;

pub use adapter::DiscordPlatform;
pub use commands::CommandHandler;
pub use gateway::DiscordGateway;
