//! Artifact caches addressed by rule key.

mod archive;
mod dir;
mod memory;
mod tiered;
mod types;

pub use archive::{pack_output, unpack_artifact};
pub use dir::DirArtifactCache;
pub use memory::MemoryArtifactCache;
pub use tiered::{CacheHit, TieredArtifactCache};
pub use types::{Artifact, ArtifactCache, ArtifactMetadata, CacheError, CacheMode, InvalidCacheMode};
