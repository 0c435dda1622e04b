pub mod api;
pub mod auth;
pub mod bridge;
pub mod browser;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod pipe;
pub mod session;
pub mod totp;
