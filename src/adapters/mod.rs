//! Inbound HTTP handlers and outbound collaborator clients

pub mod chat_handler;
pub mod embeddings;
pub mod health_handler;
pub mod relay;
pub mod rest_store;
