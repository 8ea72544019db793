// src/qeteam/mod.rs

pub mod agent;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod console;
pub mod event;
pub mod group_chat;
pub mod message;
pub mod selection;
pub mod termination;
pub mod tool_protocol;
pub mod tool_protocols;
pub mod tools;
pub mod user_proxy;
pub mod workflow;

pub use group_chat::GroupChat;
pub use termination::Termination;
