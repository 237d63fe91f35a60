use std::{fmt, str::FromStr};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// A normalized Kubernetes semantic version
///
/// Cluster versions come in many shapes - `v1.21.0-alpha.1`, `v1.19.10-gke.1600`,
/// `1.16` - but deprecation thresholds only care about the numeric
/// `major.minor.patch` prefix. The pre-release/vendor suffix is discarded
/// during parsing
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
  pub major: u32,
  pub minor: u32,
  pub patch: u32,
}

impl Version {
  /// Bump the minor version, leaving major and patch unchanged
  ///
  /// Used for the "removed in the next (two) release(s)" look-ahead. Removals
  /// that would land via a major version bump are intentionally not covered:
  /// the rule table expresses Kubernetes removals as minor bumps
  pub fn with_minor_offset(&self, steps: u32) -> Self {
    Self {
      major: self.major,
      minor: self.minor.saturating_add(steps),
      patch: self.patch,
    }
  }
}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
  }
}

impl FromStr for Version {
  type Err = anyhow::Error;

  /// Parse the numeric prefix of a version string, accepting `(v?)(\d+\.\d+\.?\d*)(.*)`
  ///
  /// `v1.18.16` parses as `1.18.16`, `v1.21.0-rc.0` as `1.21.0`, `1.16` as
  /// `1.16.0`. Strings without a `major.minor` numeric prefix (e.g. `v1a.12.0`)
  /// are invalid
  fn from_str(version: &str) -> Result<Self> {
    let stripped = version.strip_prefix('v').unwrap_or(version);

    let mut rest = stripped;
    let major = take_number(&mut rest);
    let Some(major) = major else {
      bail!("Invalid version '{version}', expected '[v]MAJOR.MINOR[.PATCH]'")
    };

    if !rest.starts_with('.') {
      bail!("Invalid version '{version}', expected '[v]MAJOR.MINOR[.PATCH]'")
    }
    rest = &rest[1..];

    let Some(minor) = take_number(&mut rest) else {
      bail!("Invalid version '{version}', expected '[v]MAJOR.MINOR[.PATCH]'")
    };

    // Patch is optional; anything trailing it (`-alpha.1`, `-eks-123`) is ignored
    let patch = match rest.strip_prefix('.') {
      Some(remainder) => {
        rest = remainder;
        take_number(&mut rest).unwrap_or(0)
      }
      None => 0,
    };

    Ok(Self { major, minor, patch })
  }
}

/// Consume a leading run of ASCII digits, advancing the slice past them
fn take_number(s: &mut &str) -> Option<u32> {
  let digits: usize = s.chars().take_while(|c| c.is_ascii_digit()).count();
  if digits == 0 {
    return None;
  }

  let (num, rest) = s.split_at(digits);
  *s = rest;
  num.parse().ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_valid_versions() {
    let cases = vec![
      ("v1.18.16", (1, 18, 16)),
      ("1.18.16", (1, 18, 16)),
      ("v1.21.0-alpha.1", (1, 21, 0)),
      ("v1.21.0-rc.0", (1, 21, 0)),
      ("v1.19.10-gke.1600", (1, 19, 10)),
      ("v1.20.7-eks-123456", (1, 20, 7)),
      ("1.16", (1, 16, 0)),
      ("v1.9.0", (1, 9, 0)),
    ];

    for (input, (major, minor, patch)) in cases {
      let version: Version = input.parse().unwrap();
      assert_eq!(version, Version { major, minor, patch }, "parse({input})");
    }
  }

  #[test]
  fn parse_invalid_versions() {
    for input in ["v1a.12.0", "", "125", "va.b.c", "one.two"] {
      assert!(input.parse::<Version>().is_err(), "should fail on '{input}'");
    }
  }

  #[test]
  fn normalized_display() {
    let version: Version = "v1.21.0-rc.0".parse().unwrap();
    assert_eq!(version.to_string(), "1.21.0");
  }

  #[test]
  fn comparison_is_reflexive_for_equality() {
    let a: Version = "v1.16.0".parse().unwrap();
    let b: Version = "1.16.0".parse().unwrap();
    assert!(a >= b);
    assert!(b >= a);
  }

  #[test]
  fn comparison_orders_by_component() {
    let base: Version = "1.16.0".parse().unwrap();
    assert!("1.16.1".parse::<Version>().unwrap() > base);
    assert!("1.17.0".parse::<Version>().unwrap() > base);
    assert!("2.0.0".parse::<Version>().unwrap() > base);
    assert!("1.15.9".parse::<Version>().unwrap() < base);
  }

  #[test]
  fn minor_offset_leaves_major_and_patch() {
    let version: Version = "1.12.4".parse().unwrap();
    assert_eq!(version.with_minor_offset(1).to_string(), "1.13.4");
    assert_eq!(version.with_minor_offset(2).to_string(), "1.14.4");
  }

  #[test]
  fn minor_offset_saturates_at_the_maximum() {
    let version: Version = format!("1.{}.0", u32::MAX).parse().unwrap();
    assert_eq!(version.with_minor_offset(2).minor, u32::MAX);
  }
}
