//! Routing slips: the ordered list of kernel URIs an envelope has passed
//! through.
//!
//! Command slips record each hop twice: `uri?tag=arrived` when the
//! command reaches a kernel and the plain `uri` when that kernel is done
//! with it. Event slips record each kernel that republished the event.
//! Both use the same append primitive, which rejects duplicates.

use crate::error::RoutingSlipError;
use crate::uri;
use serde::{Deserialize, Serialize};

/// Ordered, duplicate-free list of normalized kernel URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct RoutingSlip {
    entries: Vec<String>,
}

fn strip_query(entry: &str) -> &str {
    entry.split_once('?').map_or(entry, |(head, _)| head)
}

fn canonical(entry: &str) -> Result<String, RoutingSlipError> {
    uri::normalize_with_query(entry).map_err(|_| RoutingSlipError::InvalidUri(entry.to_owned()))
}

impl RoutingSlip {
    /// An empty slip.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a slip from URIs, normalizing each and dropping duplicates.
    pub fn from_uris<I, S>(uris: I) -> Result<Self, RoutingSlipError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut slip = Self::new();
        for u in uris {
            let entry = canonical(u.as_ref())?;
            if !slip.entries.contains(&entry) {
                slip.entries.push(entry);
            }
        }
        Ok(slip)
    }

    fn append(&mut self, entry: String) -> Result<(), RoutingSlipError> {
        if self.entries.contains(&entry) {
            return Err(RoutingSlipError::AlreadyStamped {
                uri: entry,
                slip: self.to_string(),
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Append a normalized URI. Fails if the URI is already present.
    pub fn stamp(&mut self, uri: &str) -> Result<(), RoutingSlipError> {
        let entry = canonical(uri)?;
        self.append(entry)
    }

    /// Record that a command arrived at the kernel with this URI.
    pub fn stamp_as_arrived(&mut self, uri: &str) -> Result<(), RoutingSlipError> {
        let entry = uri::with_tag(uri, uri::ARRIVED_TAG)
            .map_err(|_| RoutingSlipError::InvalidUri(uri.to_owned()))?;
        self.append(entry)
    }

    /// Record that the kernel with this URI finished handling a command.
    /// The arrival stamp must already be present.
    pub fn stamp_as_completed(&mut self, uri: &str) -> Result<(), RoutingSlipError> {
        let arrived = uri::with_tag(uri, uri::ARRIVED_TAG)
            .map_err(|_| RoutingSlipError::InvalidUri(uri.to_owned()))?;
        if !self.entries.contains(&arrived) {
            return Err(RoutingSlipError::NotArrived {
                uri: arrived,
                slip: self.to_string(),
            });
        }
        let entry = uri::normalize(uri).map_err(|_| RoutingSlipError::InvalidUri(uri.to_owned()))?;
        self.append(entry)
    }

    /// Whether the slip holds `uri`. With `ignore_query`, entries match on
    /// their query-less form.
    pub fn contains(&self, uri: &str, ignore_query: bool) -> bool {
        if ignore_query {
            let Ok(needle) = uri::normalize(uri) else {
                return false;
            };
            self.entries.iter().any(|e| strip_query(e) == needle)
        } else {
            let Ok(needle) = uri::normalize_with_query(uri) else {
                return false;
            };
            self.entries.iter().any(|e| *e == needle)
        }
    }

    /// Whether `prefix` is a non-empty prefix of this slip, comparing
    /// entries without their query strings.
    pub fn starts_with(&self, prefix: &RoutingSlip) -> bool {
        if prefix.entries.is_empty() || prefix.entries.len() > self.entries.len() {
            return false;
        }
        self.entries
            .iter()
            .zip(&prefix.entries)
            .all(|(a, b)| strip_query(a) == strip_query(b))
    }

    /// Extend this slip with the entries of `other` that it does not
    /// already cover. When `other` starts with this slip, the shared
    /// prefix is skipped. The operation is all-or-nothing: if any
    /// remaining entry is already present, nothing is appended.
    pub fn continue_with(&mut self, other: &RoutingSlip) -> Result<(), RoutingSlipError> {
        let remainder = if other.starts_with(self) {
            &other.entries[self.entries.len()..]
        } else {
            &other.entries[..]
        };

        let mut pending: Vec<String> = Vec::with_capacity(remainder.len());
        for entry in remainder {
            let entry = canonical(entry)?;
            if self.entries.contains(&entry) || pending.contains(&entry) {
                return Err(RoutingSlipError::ContinuationConflict {
                    uri: entry,
                    slip: self.to_string(),
                    other: other.to_string(),
                });
            }
            pending.push(entry);
        }
        self.entries.extend(pending);
        Ok(())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the slip is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first entry, typically the origin of the envelope.
    pub fn first(&self) -> Option<&str> {
        self.entries.first().map(String::as_str)
    }

    /// Iterate over entries in stamp order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Entries as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.entries
    }
}

impl std::fmt::Display for RoutingSlip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.entries.join(","))
    }
}

impl TryFrom<Vec<String>> for RoutingSlip {
    type Error = RoutingSlipError;

    /// Accept a slip received over the wire. Entries are kept verbatim so
    /// that they round-trip unchanged; duplicates are rejected.
    fn try_from(entries: Vec<String>) -> Result<Self, Self::Error> {
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].contains(entry) {
                return Err(RoutingSlipError::AlreadyStamped {
                    uri: entry.clone(),
                    slip: entries[..i].join(","),
                });
            }
        }
        Ok(Self { entries })
    }
}

impl From<RoutingSlip> for Vec<String> {
    fn from(slip: RoutingSlip) -> Self {
        slip.entries
    }
}
