//! Domain logic for assembling generation requests and placing their
//! results: contributor merging, size negotiation, backend normalisation,
//! result pruning and placement planning, the document capability and
//! persisted settings. Nothing here touches the network.

pub mod backend;
pub mod contributor;
pub mod document;
pub mod error;
pub mod imaging;
pub mod instructions;
pub mod merge;
pub mod request;
pub mod result;
pub mod settings;
pub mod types;
