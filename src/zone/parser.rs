//! RFC 1035 master-file parser and writer.
//!
//! Supports $ORIGIN, $TTL and $INCLUDE, parenthesized record
//! continuation, quoted strings and comments. Parsed records are handed
//! to the zone's RRset sorter, so a zone file ingest and an AXFR ingest
//! land in identical storage.

use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::rdata::RData;
use crate::dns::record::ResourceRecord;
use crate::error::{Result, TdnsError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const DEFAULT_TTL: u32 = 3600;
const MAX_INCLUDE_DEPTH: usize = 8;

pub struct ParsedZone {
    pub origin: Name,
    pub records: Vec<ResourceRecord>,
}

pub struct ZoneFileParser {
    origin: Option<Name>,
    default_ttl: u32,
    last_owner: Option<Name>,
    base_dir: PathBuf,
    line_number: usize,
    include_depth: usize,
}

impl ZoneFileParser {
    pub fn new() -> Self {
        Self {
            origin: None,
            default_ttl: DEFAULT_TTL,
            last_owner: None,
            base_dir: PathBuf::from("."),
            line_number: 0,
            include_depth: 0,
        }
    }

    /// Use `origin` when the file does not carry $ORIGIN.
    pub fn with_origin(origin: Name) -> Self {
        let mut p = Self::new();
        p.origin = Some(origin);
        p
    }

    pub fn parse_file<P: AsRef<Path>>(&mut self, path: P) -> Result<ParsedZone> {
        let path = path.as_ref();
        debug!(file = %path.display(), "parsing zone file");
        if let Some(dir) = path.parent() {
            self.base_dir = dir.to_path_buf();
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| TdnsError::ZoneFileError(format!("{}: {}", path.display(), e)))?;
        self.parse(&contents)
    }

    pub fn parse(&mut self, contents: &str) -> Result<ParsedZone> {
        let mut records = Vec::new();
        self.parse_into(contents, &mut records)?;
        let origin = self
            .origin
            .clone()
            .ok_or_else(|| TdnsError::ZoneFileError("missing $ORIGIN and no SOA owner".into()))?;
        Ok(ParsedZone { origin, records })
    }

    fn parse_into(&mut self, contents: &str, records: &mut Vec<ResourceRecord>) -> Result<()> {
        self.line_number = 0;
        let mut pending = String::new();
        let mut paren_depth: usize = 0;
        let mut paren_start = 0;

        for raw_line in contents.lines() {
            self.line_number += 1;
            let line = strip_comment(raw_line);

            if paren_depth > 0 {
                pending.push(' ');
            }
            let opens = line.matches('(').count();
            let closes = line.matches(')').count();
            if paren_depth == 0 && opens > closes {
                paren_start = self.line_number;
            }
            pending.push_str(&line.replace(['(', ')'], " "));
            paren_depth = (paren_depth + opens).saturating_sub(closes);
            if paren_depth > 0 {
                continue;
            }

            let complete = std::mem::take(&mut pending);
            if complete.trim().is_empty() {
                continue;
            }
            trace!(line = self.line_number, "parsing {:?}", complete.trim());
            self.parse_line(&complete, complete.starts_with([' ', '\t']), records)
                .map_err(|e| {
                    TdnsError::ZoneFileError(format!(
                        "line {}: {}",
                        if paren_start > 0 && paren_start < self.line_number {
                            paren_start
                        } else {
                            self.line_number
                        },
                        e
                    ))
                })?;
            paren_start = 0;
        }

        if paren_depth > 0 {
            return Err(TdnsError::ZoneFileError(format!(
                "unclosed parentheses starting at line {}",
                paren_start
            )));
        }
        Ok(())
    }

    fn parse_line(
        &mut self,
        line: &str,
        owner_omitted: bool,
        records: &mut Vec<ResourceRecord>,
    ) -> Result<()> {
        let tokens = tokenize(line);
        if tokens.is_empty() {
            return Ok(());
        }

        if tokens[0].starts_with('$') {
            return self.parse_directive(&tokens, records);
        }

        let mut idx = 0;
        let owner = if owner_omitted {
            self.last_owner
                .clone()
                .ok_or_else(|| TdnsError::ZoneFileError("record without owner".into()))?
        } else {
            let name = self.resolve_name(&tokens[0])?;
            idx = 1;
            name
        };

        // [ttl] [class] type, in either order for ttl/class
        let mut ttl = self.default_ttl;
        let mut class = RRClass::IN;
        let rtype = loop {
            let tok = tokens
                .get(idx)
                .ok_or_else(|| TdnsError::ZoneFileError("record without type".into()))?;
            if let Ok(v) = tok.parse::<u32>() {
                ttl = v;
                idx += 1;
                continue;
            }
            match tok.to_ascii_uppercase().as_str() {
                "IN" => {
                    class = RRClass::IN;
                    idx += 1;
                    continue;
                }
                "CH" => {
                    class = RRClass::CH;
                    idx += 1;
                    continue;
                }
                _ => {}
            }
            break RRType::from_mnemonic(tok)
                .ok_or_else(|| TdnsError::ZoneFileError(format!("unknown rrtype {:?}", tok)))?;
        };
        idx += 1;

        let rdata_tokens: Vec<&str> = tokens[idx..]
            .iter()
            .map(|s| s.as_str())
            .collect();
        // resolve relative names in rdata before typed parsing
        let resolved: Vec<String> = rdata_tokens
            .iter()
            .enumerate()
            .map(|(i, t)| self.resolve_rdata_name(rtype, i, t))
            .collect();
        let resolved_refs: Vec<&str> = resolved.iter().map(|s| s.as_str()).collect();
        let rdata = RData::parse_presentation(rtype, &resolved_refs)?;

        self.last_owner = Some(owner.clone());
        if rtype == RRType::SOA && self.origin.is_none() {
            self.origin = Some(owner.clone());
        }
        records.push(ResourceRecord {
            name: owner,
            rtype,
            class,
            ttl,
            rdata,
        });
        Ok(())
    }

    fn parse_directive(&mut self, tokens: &[String], records: &mut Vec<ResourceRecord>) -> Result<()> {
        match tokens[0].to_ascii_uppercase().as_str() {
            "$ORIGIN" => {
                let arg = tokens
                    .get(1)
                    .ok_or_else(|| TdnsError::ZoneFileError("$ORIGIN without name".into()))?;
                self.origin = Some(Name::parse(arg)?);
                Ok(())
            }
            "$TTL" => {
                let arg = tokens
                    .get(1)
                    .ok_or_else(|| TdnsError::ZoneFileError("$TTL without value".into()))?;
                self.default_ttl = arg
                    .parse()
                    .map_err(|_| TdnsError::ZoneFileError(format!("bad $TTL {:?}", arg)))?;
                Ok(())
            }
            "$INCLUDE" => {
                if self.include_depth >= MAX_INCLUDE_DEPTH {
                    return Err(TdnsError::ZoneFileError("$INCLUDE nesting too deep".into()));
                }
                let file = tokens
                    .get(1)
                    .ok_or_else(|| TdnsError::ZoneFileError("$INCLUDE without file".into()))?;
                let path = self.base_dir.join(file);
                let contents = fs::read_to_string(&path)
                    .map_err(|e| TdnsError::ZoneFileError(format!("{}: {}", path.display(), e)))?;

                let mut sub = ZoneFileParser {
                    origin: match tokens.get(2) {
                        Some(o) => Some(Name::parse(o)?),
                        None => self.origin.clone(),
                    },
                    default_ttl: self.default_ttl,
                    last_owner: None,
                    base_dir: self.base_dir.clone(),
                    line_number: 0,
                    include_depth: self.include_depth + 1,
                };
                sub.parse_into(&contents, records)
            }
            other => Err(TdnsError::ZoneFileError(format!(
                "unknown directive {:?}",
                other
            ))),
        }
    }

    fn resolve_name(&self, token: &str) -> Result<Name> {
        if token == "@" {
            return self
                .origin
                .clone()
                .ok_or_else(|| TdnsError::ZoneFileError("@ without $ORIGIN".into()));
        }
        if token.ends_with('.') {
            return Name::parse(token);
        }
        let origin = self
            .origin
            .clone()
            .ok_or_else(|| TdnsError::ZoneFileError(format!("relative name {:?} without $ORIGIN", token)))?;
        let rel = Name::parse(token)?;
        let mut labels = rel.labels().to_vec();
        labels.extend(origin.labels().iter().cloned());
        Ok(Name::from_labels(labels))
    }

    /// Name-valued rdata fields written relative get the origin appended.
    /// Only fields that are names are touched; everything else passes
    /// through untouched.
    fn resolve_rdata_name(&self, rtype: RRType, idx: usize, token: &str) -> String {
        let is_name_field = match rtype {
            RRType::NS | RRType::CNAME | RRType::PTR => idx == 0,
            RRType::MX => idx == 1,
            RRType::SOA => idx == 0 || idx == 1,
            RRType::SRV => idx == 3,
            _ => false,
        };
        if is_name_field && !token.ends_with('.') && !token.starts_with('"') {
            if let Some(origin) = &self.origin {
                return format!("{}.{}", token, origin);
            }
        }
        token.to_string()
    }
}

impl Default for ZoneFileParser {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_comment(line: &str) -> String {
    let mut out = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                out.push(c);
            }
            ';' if !in_quotes => break,
            _ => out.push(c),
        }
    }
    out
}

fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
            }
            _ => cur.push(c),
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

/// Serialize a zone back to master-file form, SOA first, then the rest
/// of the apex, then every other owner in canonical order.
pub fn write_zone_file(zone: &crate::zone::zone::Zone, path: &Path) -> Result<usize> {
    let mut out = String::new();
    out.push_str(&format!("$ORIGIN {}\n", zone.name));
    let soa_set = zone
        .soa_rrset()
        .ok_or_else(|| TdnsError::MissingSoa(zone.name.to_string()))?;
    out.push_str(&format!("$TTL {}\n\n", soa_set.ttl()));

    let mut count = 0usize;
    let mut emit = |set: &crate::zone::rrset::Rrset, out: &mut String| {
        for rr in set.rrs.iter().chain(set.rrsigs.iter()) {
            out.push_str(&rr.to_string());
            out.push('\n');
            count += 1;
        }
    };

    emit(&soa_set, &mut out);
    if let Some(apex) = zone.get_owner(&zone.name) {
        for rtype in apex.types() {
            if rtype == RRType::SOA {
                continue;
            }
            if let Some(set) = apex.get(rtype) {
                emit(&set, &mut out);
            }
        }
    }
    for owner in zone.owners_sorted() {
        if owner.name == zone.name {
            continue;
        }
        for rtype in owner.types() {
            if let Some(set) = owner.get(rtype) {
                emit(&set, &mut out);
            }
        }
    }

    fs::write(path, out).map_err(|e| TdnsError::ZoneFileError(format!("{}: {}", path.display(), e)))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZONE: &str = r#"
$ORIGIN example.com.
$TTL 3600

@   IN  SOA ns1.example.com. admin.example.com. (
        2024010100 ; serial
        3600       ; refresh
        900        ; retry
        604800     ; expire
        86400 )    ; minimum
@   IN  NS  ns1
ns1 IN  A   192.0.2.1
www 300 IN A 192.0.2.10
txt IN TXT "hello world" "second string"
"#;

    #[test]
    fn test_parse_basic_zone() {
        let mut parser = ZoneFileParser::new();
        let parsed = parser.parse(ZONE).unwrap();
        assert_eq!(parsed.origin, Name::parse("example.com").unwrap());
        assert_eq!(parsed.records.len(), 5);

        let soa = &parsed.records[0];
        assert_eq!(soa.rtype, RRType::SOA);
        if let RData::Soa(soa) = &soa.rdata {
            assert_eq!(soa.serial, 2024010100);
        } else {
            panic!("expected SOA rdata");
        }

        // relative NS rdata resolved against the origin
        let ns = &parsed.records[1];
        assert_eq!(ns.rdata, RData::Ns(Name::parse("ns1.example.com").unwrap()));

        let www = parsed
            .records
            .iter()
            .find(|r| r.name == Name::parse("www.example.com").unwrap())
            .unwrap();
        assert_eq!(www.ttl, 300);
    }

    #[test]
    fn test_quoted_txt_with_semicolon() {
        let mut parser = ZoneFileParser::with_origin(Name::parse("example.com").unwrap());
        let parsed = parser.parse("t IN TXT \"has ; semicolon\"\n").unwrap();
        assert_eq!(
            parsed.records[0].rdata,
            RData::Txt(vec!["has ; semicolon".into()])
        );
    }

    #[test]
    fn test_include() {
        let dir = tempfile::tempdir().unwrap();
        let inc = dir.path().join("sub.zone");
        fs::write(&inc, "extra IN A 192.0.2.99\n").unwrap();
        let main = dir.path().join("main.zone");
        fs::write(
            &main,
            format!(
                "$ORIGIN example.com.\n@ IN SOA ns1.example.com. admin.example.com. 1 2 3 4 5\n$INCLUDE {}\n",
                inc.file_name().unwrap().to_string_lossy()
            ),
        )
        .unwrap();

        let mut parser = ZoneFileParser::new();
        let parsed = parser.parse_file(&main).unwrap();
        assert!(parsed
            .records
            .iter()
            .any(|r| r.name == Name::parse("extra.example.com").unwrap()));
    }

    #[test]
    fn test_unclosed_parens_rejected() {
        let mut parser = ZoneFileParser::with_origin(Name::parse("example.com").unwrap());
        assert!(parser.parse("@ IN SOA ns1. admin. ( 1 2 3\n").is_err());
    }
}
