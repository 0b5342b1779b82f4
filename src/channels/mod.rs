//! Platform clients behind the forum and chat seams.

pub mod discord;
pub mod reddit;

pub use discord::{DiscordClient, DiscordConfig};
pub use reddit::{RedditClient, RedditConfig};
