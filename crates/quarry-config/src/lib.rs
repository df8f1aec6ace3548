// crates/quarry-config/src/lib.rs
// ============================================================================
// Module: Quarry Config Library
// Description: Canonical configuration model and validation.
// Purpose: Single source of truth for quarry.toml semantics.
// Dependencies: quarry-core, quarry-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `quarry-config` loads `quarry.toml`, validates it fail-closed, and turns
//! it into the typed values the engine and coordinator are built from.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
