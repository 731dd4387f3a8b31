//! Capability tags and capability sets
//!
//! A [`Capability`] is a closed enumeration of privileged operation classes.
//! A [`CapabilitySet`] is a bit set over it, so subset and membership checks
//! are a single mask operation. Sets decoded from untrusted input reject any
//! bit that does not name a capability.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Privileged operation classes gated at the syscall boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Capability {
    /// Core execution rights: spawn, time, scheduler interaction
    CoreExec = 0x01,
    /// Console, logging and UART output
    IO = 0x02,
    /// RAM-only secret storage and keyslots
    SecureMem = 0x03,
    /// Entropy, hashing and signature services
    Crypto = 0x04,
    /// Inter-module messaging
    IPC = 0x05,
    /// Persistent storage access
    Storage = 0x06,
    /// Network operations
    Network = 0x07,
    /// Module validation and loading
    ModuleLoad = 0x08,
    /// Dynamic memory allocation beyond the declared budget
    MemoryAlloc = 0x09,
}

impl Capability {
    /// Every capability, in tag order
    pub const ALL: [Capability; 9] = [
        Capability::CoreExec,
        Capability::IO,
        Capability::SecureMem,
        Capability::Crypto,
        Capability::IPC,
        Capability::Storage,
        Capability::Network,
        Capability::ModuleLoad,
        Capability::MemoryAlloc,
    ];

    /// Wire tag of this capability
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Resolve a wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|cap| cap.tag() == tag)
    }

    const fn bit(self) -> u16 {
        1 << (self as u8 - 1)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Set of capabilities stored as bit flags
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    const VALID_BITS: u16 = (1 << Capability::ALL.len()) - 1;

    /// The empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every capability
    pub const fn all() -> Self {
        Self(Self::VALID_BITS)
    }

    /// Build a set from a list of capabilities
    pub fn from_capabilities(caps: &[Capability]) -> Self {
        caps.iter().copied().collect()
    }

    /// Decode raw bits, rejecting bits that name no capability
    pub fn from_bits(bits: u16) -> Option<Self> {
        if bits & !Self::VALID_BITS == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// Raw bit representation
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Add a capability
    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }

    /// Remove a capability
    pub fn remove(&mut self, cap: Capability) {
        self.0 &= !cap.bit();
    }

    /// Membership test
    pub const fn contains(self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// True when every member of `self` is also in `other`
    pub const fn is_subset_of(self, other: CapabilitySet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Members of `self` that are not in `other`
    pub const fn difference(self, other: CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 & !other.0)
    }

    /// Members common to both sets
    pub const fn intersection(self, other: CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 & other.0)
    }

    /// True when no capability is present
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of capabilities present
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate members in tag order
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |cap| self.contains(*cap))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = CapabilitySet::empty();
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

impl From<Capability> for CapabilitySet {
    fn from(cap: Capability) -> Self {
        CapabilitySet(cap.bit())
    }
}

impl TryFrom<u16> for CapabilitySet {
    type Error = String;

    fn try_from(bits: u16) -> Result<Self, Self::Error> {
        CapabilitySet::from_bits(bits).ok_or_else(|| format!("unknown capability bits {bits:#06x}"))
    }
}

impl From<CapabilitySet> for u16 {
    fn from(set: CapabilitySet) -> Self {
        set.0
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, cap) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{cap}")?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilitySet{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_membership_and_subset() {
        let io_net = CapabilitySet::from_capabilities(&[Capability::IO, Capability::Network]);
        assert!(io_net.contains(Capability::IO));
        assert!(!io_net.contains(Capability::IPC));
        assert!(CapabilitySet::from(Capability::IO).is_subset_of(io_net));
        assert!(!io_net.is_subset_of(Capability::IO.into()));
        assert!(CapabilitySet::empty().is_subset_of(io_net));
        assert_eq!(io_net.len(), 2);
    }

    #[test]
    fn test_difference_names_overreach() {
        let declared = CapabilitySet::from(Capability::IO);
        let requested = CapabilitySet::from_capabilities(&[Capability::IO, Capability::Crypto]);
        assert_eq!(requested.difference(declared), Capability::Crypto.into());
    }

    #[test]
    fn test_unknown_bits_rejected() {
        assert!(CapabilitySet::from_bits(1 << 12).is_none());
        assert_eq!(CapabilitySet::from_bits(0b11), Some(CapabilitySet::from_capabilities(&[
            Capability::CoreExec,
            Capability::IO
        ])));
    }

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(Capability::CoreExec.tag(), 0x01);
        assert_eq!(Capability::MemoryAlloc.tag(), 0x09);
        assert_eq!(Capability::from_tag(0x07), Some(Capability::Network));
        assert_eq!(Capability::from_tag(0x00), None);
        assert_eq!(Capability::from_tag(0x0a), None);
    }

    #[test]
    fn test_display() {
        let set = CapabilitySet::from_capabilities(&[Capability::Network, Capability::IO]);
        assert_eq!(set.to_string(), "{IO, Network}");
        assert_eq!(CapabilitySet::empty().to_string(), "{}");
    }

    proptest! {
        #[test]
        fn subset_matches_iterated_membership(a in 0u16..512, b in 0u16..512) {
            let a = CapabilitySet::from_bits(a).unwrap_or_default();
            let b = CapabilitySet::from_bits(b).unwrap_or_default();
            let by_iter = a.iter().all(|cap| b.contains(cap));
            prop_assert_eq!(a.is_subset_of(b), by_iter);
        }

        #[test]
        fn bits_round_trip_through_iter(bits in 0u16..512) {
            let set = CapabilitySet::from_bits(bits).unwrap_or_default();
            let rebuilt: CapabilitySet = set.iter().collect();
            prop_assert_eq!(set, rebuilt);
        }
    }
}
