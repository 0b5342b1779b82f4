//! Cerberus: relays posts between a Reddit subreddit and Discord channels.

pub mod channels;
pub mod chat;
pub mod config;
pub mod error;
pub mod forum;
pub mod relay;
pub mod supervisor;
