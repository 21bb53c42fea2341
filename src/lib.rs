//! A Discord bot that rewrites messages through Google's Gemini API.
//!
//! The rewrite call itself lives in [`rewrite`] and has no Discord
//! dependencies. Everything else is the bot around it: gateway and REST
//! transport, command routing, handlers and the event loop in [`bot`].

pub mod bot;
pub mod commands;
pub mod config;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod http;
pub mod logging;
pub mod rewrite;
pub mod types;

pub use bot::{run, serve, Bot, BotError};
pub use config::Config;
pub use rewrite::{RewriteClient, RewriteError, RewriteResult};
