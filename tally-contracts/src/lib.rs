//! Tally Contracts
//!
//! Concrete contracts that consume the verification core: fungible cash and
//! a non-fungible ownable asset. Each exposes `verify` (consensus) plus
//! `generate_*` builder helpers (convenience only, not consensus).

pub mod cash;
pub mod asset;
