//! Liveness challenge selection.

use rand::Rng;

use facegate_common::Challenge;

/// Pick one member of the fixed catalog, uniformly at random.
///
/// Sampling is with replacement: consecutive picks may repeat, which is
/// acceptable for usability and deliberately not hardened into
/// without-replacement sampling.
pub fn pick() -> Challenge {
    let idx = rand::rng().random_range(0..Challenge::CATALOG.len());
    Challenge::CATALOG[idx]
}
