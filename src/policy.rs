//! Read assignment policies
//!
//! A read whose k-mers hit more than one taxon is ambiguous. The policy decides
//! which taxon, if any, the read is assigned to.

use crate::taxonomy::Taxonomy;

/// A global seed for the random number generators of the crate
///
/// Bloom filter seeds are drawn from an RNG seeded with this value, so filters
/// with the same sizing hash identically across runs and machines.
pub const RNG_SEED: u64 = 42;

/// Policy for assigning reads that hit several taxa
///
/// The default policy is `Unclassified`, which leaves ambiguous reads without
/// an assignment. Their per-taxon hit statistics are still recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AmbiguityPolicy {
    /// Leave ambiguous reads unassigned (default policy)
    #[default]
    Unclassified,

    /// Assign the taxon of the first matching k-mer in the read
    FirstHit,

    /// Assign the least common ancestor of every hit taxon
    ///
    /// Requires a [`Taxonomy`]; the read stays unassigned when the taxa share
    /// no ancestor.
    LowestCommonAncestor,
}
impl AmbiguityPolicy {
    /// Whether the policy needs a taxonomy to resolve assignments
    #[must_use]
    pub fn needs_taxonomy(&self) -> bool {
        matches!(self, Self::LowestCommonAncestor)
    }

    /// Resolves the assignment of a read
    ///
    /// # Arguments
    ///
    /// * `taxa` - The distinct taxa hit by the read, in order of first hit
    /// * `taxonomy` - Used only by `LowestCommonAncestor`
    ///
    /// # Returns
    ///
    /// The assigned taxon, or `None` when the read has no hits or the policy
    /// leaves it unassigned.
    pub fn resolve(&self, taxa: &[&str], taxonomy: Option<&dyn Taxonomy>) -> Option<String> {
        match taxa {
            [] => None,
            [single] => Some((*single).to_string()),
            [first, rest @ ..] => match self {
                Self::Unclassified => None,
                Self::FirstHit => Some((*first).to_string()),
                Self::LowestCommonAncestor => {
                    let taxonomy = taxonomy?;
                    rest.iter().try_fold((*first).to_string(), |acc, taxon| {
                        taxonomy.least_common_ancestor(&acc, taxon)
                    })
                }
            },
        }
    }
}
