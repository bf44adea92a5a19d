//! Ports and I/O-free logic for chatkeep.
//!
//! This crate defines the traits the infrastructure layer implements
//! (`SecretProtector`, `ConversationRepository`), the single-flight
//! `InitGate` used to set up shared state, and the `ChatService` that the
//! message-send pipeline talks to. It never depends on `chatkeep-infra` or
//! any database/IO crate.

pub mod gate;
pub mod protect;
pub mod repository;
pub mod service;
