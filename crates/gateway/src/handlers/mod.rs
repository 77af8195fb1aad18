//! HTTP request handlers

pub mod corpus;
pub mod health;
pub mod query;
