use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address: {0:?}")]
pub struct MacParseError(String);

/// Absolute trailing-byte difference budget for two addresses to count as
/// aliases of one node.
const SAME_NODE_DELTA_MAX: u16 = 2;

/// Difference budget for the looser derived-interface check. Kept separate
/// from [`SAME_NODE_DELTA_MAX`]; the two checks answer different questions
/// and must not share a threshold.
const DERIVED_DELTA_MAX: u16 = 4;

/// A MAC address, stored as its six octets.
///
/// The canonical text form is lowercase colon-separated hex, which is also
/// the serialized form (so addresses can key JSON maps).
#[derive(PartialEq, Eq, Hash, Copy, Clone, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Decide whether `other` is plausibly another address of the same
    /// physical node (e.g. a bridge or mesh interface sharing the burned-in
    /// address). Deterministic and side-effect-free; may both under- and
    /// over-match.
    pub fn likely_same_node(&self, other: &MacAddress) -> bool {
        self.similar(other, 0, SAME_NODE_DELTA_MAX)
    }

    /// Decide whether `other` is plausibly an automatically derived virtual
    /// interface of this address. Looser than [`likely_same_node`]: one of
    /// the middle bytes may differ and the difference budget is larger.
    ///
    /// [`likely_same_node`]: MacAddress::likely_same_node
    pub fn likely_derived_interface(&self, other: &MacAddress) -> bool {
        self.similar(other, 1, DERIVED_DELTA_MAX)
    }

    fn similar(&self, other: &MacAddress, max_mid_diffs: usize, delta_max: u16) -> bool {
        if self == other {
            return true;
        }
        let a = self.0;
        let b = other.0;

        // The first byte may only differ in the locally-administered bit.
        if a[0] | 0x02 != b[0] | 0x02 {
            return false;
        }

        let mid_diffs = (a[1] != b[1]) as usize + (a[2] != b[2]) as usize;
        if mid_diffs > max_mid_diffs {
            return false;
        }

        let deltas: Vec<u16> = a[3..]
            .iter()
            .zip(&b[3..])
            .filter(|(x, y)| x != y)
            .map(|(x, y)| (*x as i16 - *y as i16).unsigned_abs())
            .collect();

        if deltas.len() > 2 {
            return false;
        }
        if deltas.is_empty() {
            return true;
        }
        deltas.iter().sum::<u16>() < delta_max
    }

    /// Derive the EUI-64 style host identifier: the locally-administered bit
    /// is flipped and `ff:fe` is inserted between the OUI and NIC halves.
    pub fn to_host_id(&self) -> String {
        let o = self.0;
        let b = [o[0] ^ 0x02, o[1], o[2], 0xff, 0xfe, o[3], o[4], o[5]];
        format!(
            "{:02x}{:02x}:{:02x}{:02x}:{:02x}{:02x}:{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| MacParseError(s.to_string()))?;
            if part.is_empty() || part.len() > 2 {
                return Err(MacParseError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacParseError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
