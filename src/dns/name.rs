use crate::dns::wire::{WireReader, WireWriter};
use crate::error::{Result, TdnsError};
use serde::{Deserialize, Serialize};

/// Maximum total length of an encoded domain name (RFC 1035).
pub const MAX_NAME_LEN: usize = 255;
/// Maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;

/// A fully qualified domain name, stored as its label sequence.
///
/// Comparison and hashing are case-insensitive per RFC 4343; the original
/// case of labels is preserved for presentation unless the owner zone has
/// fold-case enabled, in which case [`Name::fold_case`] is applied on
/// ingest.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Name {
    labels: Vec<String>,
}

impl Name {
    /// The root name ".".
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    pub fn from_labels(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Parse presentation format. Accepts both "www.example.com." and
    /// "www.example.com"; escapes are limited to `\.` and `\\`, which is
    /// what our zone files contain in practice.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TdnsError::ParseError("empty domain name".into()));
        }
        if s == "." {
            return Ok(Self::root());
        }
        let mut labels = Vec::new();
        let mut cur = String::new();
        let mut escape = false;
        for c in s.chars() {
            if escape {
                cur.push(c);
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '.' {
                if cur.is_empty() {
                    return Err(TdnsError::ParseError(format!("empty label in {:?}", s)));
                }
                labels.push(std::mem::take(&mut cur));
            } else {
                cur.push(c);
            }
        }
        if escape {
            return Err(TdnsError::ParseError(format!("dangling escape in {:?}", s)));
        }
        if !cur.is_empty() {
            labels.push(cur);
        }
        let name = Self { labels };
        if name.labels.iter().any(|l| l.len() > MAX_LABEL_LEN) || name.wire_len() > MAX_NAME_LEN {
            return Err(TdnsError::ParseError(format!("name too long: {:?}", s)));
        }
        Ok(name)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Length of the uncompressed wire encoding.
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// True if `self` is equal to or below `ancestor`.
    pub fn is_subdomain_of(&self, ancestor: &Name) -> bool {
        if ancestor.labels.len() > self.labels.len() {
            return false;
        }
        let skip = self.labels.len() - ancestor.labels.len();
        self.labels[skip..]
            .iter()
            .zip(&ancestor.labels)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// The name with the leftmost label removed; None at the root.
    pub fn parent(&self) -> Option<Name> {
        if self.labels.is_empty() {
            None
        } else {
            Some(Name {
                labels: self.labels[1..].to_vec(),
            })
        }
    }

    /// Replace the leftmost label with "*" (wildcard owner covering this name).
    pub fn to_wildcard(&self) -> Option<Name> {
        self.parent().map(|p| {
            let mut labels = vec!["*".to_string()];
            labels.extend(p.labels);
            Name { labels }
        })
    }

    pub fn is_wildcard(&self) -> bool {
        self.labels.first().map(|l| l == "*").unwrap_or(false)
    }

    /// Prepend `label` to this name.
    pub fn prepend(&self, label: &str) -> Name {
        let mut labels = vec![label.to_string()];
        labels.extend(self.labels.iter().cloned());
        Name { labels }
    }

    /// Lowercase every label in place.
    pub fn fold_case(&mut self) {
        for l in &mut self.labels {
            l.make_ascii_lowercase();
        }
    }

    /// Lowercased copy, the canonical form used for DNSSEC and SIG(0).
    pub fn canonical(&self) -> Name {
        let mut n = self.clone();
        n.fold_case();
        n
    }

    /// Uncompressed wire form with labels lowercased (RFC 4034 §6.2).
    pub fn to_canonical_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        for label in &self.labels {
            out.push(label.len() as u8);
            out.extend(label.to_ascii_lowercase().into_bytes());
        }
        out.push(0);
        out
    }

    /// Uncompressed wire form preserving case.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        for label in &self.labels {
            out.push(label.len() as u8);
            out.extend(label.as_bytes());
        }
        out.push(0);
        out
    }

    /// Write with compression through the message writer.
    pub fn write(&self, w: &mut WireWriter) {
        w.write_name(self);
    }

    /// Read a possibly compressed name.
    pub fn read(r: &mut WireReader<'_>) -> Result<Self> {
        r.read_name()
    }

    /// Canonical ordering per RFC 4034 §6.1: labels compared right to
    /// left, case-insensitively, as octet strings.
    pub fn canonical_cmp(&self, other: &Name) -> std::cmp::Ordering {
        let a = self.labels.iter().rev();
        let b = other.labels.iter().rev();
        for (la, lb) in a.zip(b) {
            let ord = la
                .to_ascii_lowercase()
                .as_bytes()
                .cmp(lb.to_ascii_lowercase().as_bytes());
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        self.labels.len().cmp(&other.labels.len())
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(&other.labels)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for Name {}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for label in &self.labels {
            for b in label.bytes() {
                state.write_u8(b.to_ascii_lowercase());
            }
            state.write_u8(b'.');
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.canonical_cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical_cmp(other)
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.labels.is_empty() {
            return f.write_str(".");
        }
        for label in &self.labels {
            write!(f, "{}.", label)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Name {
    type Err = TdnsError;

    fn from_str(s: &str) -> Result<Self> {
        Name::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let n = Name::parse("www.Example.COM.").unwrap();
        assert_eq!(n.label_count(), 3);
        assert_eq!(n.to_string(), "www.Example.COM.");
        assert_eq!(Name::root().to_string(), ".");
    }

    #[test]
    fn test_case_insensitive_eq() {
        let a = Name::parse("WWW.example.com").unwrap();
        let b = Name::parse("www.EXAMPLE.com.").unwrap();
        assert_eq!(a, b);
        use std::collections::HashMap;
        let mut m = HashMap::new();
        m.insert(a, 1);
        assert!(m.contains_key(&b));
    }

    #[test]
    fn test_subdomain() {
        let apex = Name::parse("example.com").unwrap();
        let www = Name::parse("www.example.com").unwrap();
        let other = Name::parse("example.net").unwrap();
        assert!(www.is_subdomain_of(&apex));
        assert!(apex.is_subdomain_of(&apex));
        assert!(!other.is_subdomain_of(&apex));
        assert!(www.is_subdomain_of(&Name::root()));
    }

    #[test]
    fn test_wildcard_owner() {
        let n = Name::parse("host.child.example.com").unwrap();
        assert_eq!(
            n.to_wildcard().unwrap(),
            Name::parse("*.child.example.com").unwrap()
        );
        assert!(Name::root().to_wildcard().is_none());
    }

    #[test]
    fn test_canonical_ordering() {
        // RFC 4034 §6.1 example ordering
        let mut names = vec![
            Name::parse("x.w.example").unwrap(),
            Name::parse("example").unwrap(),
            Name::parse("a.example").unwrap(),
            Name::parse("Z.a.example").unwrap(),
            Name::parse("z.example").unwrap(),
            Name::parse("yljkjljk.a.example").unwrap(),
        ];
        names.sort();
        let sorted: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        assert_eq!(
            sorted,
            vec![
                "example.",
                "a.example.",
                "yljkjljk.a.example.",
                "Z.a.example.",
                "x.w.example.",
                "z.example.",
            ]
        );
    }
}
