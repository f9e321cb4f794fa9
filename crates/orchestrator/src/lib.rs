//! The Job Executor: dispatches one generation request at a time to a
//! [`backend::GenerationBackend`], polls its progress, paints live
//! previews, supports cooperative cancellation and places the results into
//! a [`cyanic_core::document::Document`].

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod preview;
pub mod reconciler;
