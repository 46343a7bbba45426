//! Normalize plaintext credential dumps and bulk-load them into a
//! partitioned full-text index.
//!
//! The pipeline runs in two stages. [`ingest`] turns `identifier:secret`
//! lines into seven-column rows appended to an intermediate file.
//! [`dispatch`] reads that file back and submits upserts to an
//! [`engine::IndexEngine`], one partition per leading identifier character.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod ingest;
pub mod observability;
