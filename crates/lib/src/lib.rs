//! cachet-lib: rule keys and artifact caching for a target-graph build.
//!
//! The pieces, bottom-up:
//! - `target`: parsed, interned build target names
//! - `rule` / `resolver`: the declared target graph and the rules built from it
//! - `hasher` / `rulekey`: content hashing and the rule keys derived from it
//! - `cache`: artifact storage keyed by rule key, in one or more tiers
//! - `engine`: the parallel build that consults the cache before running steps
//! - `config` / `context`: project settings and the wiring between the above

pub mod cache;
pub mod config;
pub mod consts;
pub mod context;
pub mod engine;
pub mod fs;
pub mod hasher;
pub mod platform;
pub mod resolver;
pub mod rule;
pub mod rulekey;
pub mod target;
pub mod tool;
pub mod util;
