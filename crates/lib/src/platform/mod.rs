//! Host platform detection and default directories.
//!
//! The platform triple selects per-platform tool configuration
//! (`[tools."cc@x86_64-linux"]` wins over `[tools.cc]`).

pub mod arch;
pub mod os;
pub mod paths;

use arch::Arch;
use os::Os;
use std::fmt;

/// Architecture and OS pair, rendered as a triple such as `aarch64-darwin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// The host platform, or `None` when it is not one we know a triple for.
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

/// Host platform triple, if supported.
pub fn platform_triple() -> Option<String> {
  Platform::current().map(|p| p.triple())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn triple_joins_arch_and_os() {
    assert_eq!(Platform::new(Arch::Aarch64, Os::MacOs).triple(), "aarch64-darwin");
    assert_eq!(Platform::new(Arch::X86_64, Os::Linux).to_string(), "x86_64-linux");
  }
}
