//! Client-side entity sync core for the GTM workspace: normalizes service
//! payloads, keeps local drafts, caches persisted records and reconciles all
//! three on every page.

pub mod auth;
pub mod cache;
pub mod collections;
pub mod config;
pub mod drafts;
pub mod errors;
pub mod models;
pub mod normalize;
pub mod page;
pub mod remote;
pub mod state;
pub mod storage;
