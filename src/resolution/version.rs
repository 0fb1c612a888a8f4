// Catalog ids and version ordering
//
// Ids look like `mcp_server:hello-sse@1.0.0`. Versions are dotted numbers
// with an optional `-prerelease` tail; anything else sorts below them.

use std::cmp::Ordering;
use std::fmt;

use crate::errors::{MatrixError, Result};

pub const DEFAULT_KIND: &str = "mcp_server";

/// `[type:]name[@version]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    pub kind: Option<String>,
    pub name: String,
    pub version: Option<String>,
}

impl Specifier {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (kind, rest) = match input.split_once(':') {
            Some((kind, rest)) => (Some(kind.trim()), rest),
            None => (None, input),
        };
        let (name, version) = match rest.rsplit_once('@') {
            Some((name, version)) => (name.trim(), Some(version.trim())),
            None => (rest.trim(), None),
        };

        if name.is_empty()
            || kind.is_some_and(str::is_empty)
            || version.is_some_and(str::is_empty)
        {
            return Err(MatrixError::InvalidArguments(format!(
                "'{}' is not a valid specifier (expected [type:]name[@version])",
                input
            )));
        }

        Ok(Self {
            kind: kind.map(String::from),
            name: name.to_string(),
            version: version.map(String::from),
        })
    }

    /// Type, name and version all present: nothing to resolve
    pub fn is_fully_qualified(&self) -> bool {
        self.kind.is_some() && self.version.is_some()
    }

    /// Does catalog id `id` satisfy this specifier?
    pub fn matches(&self, id: &Specifier) -> bool {
        id.name.eq_ignore_ascii_case(&self.name)
            && self.kind.as_ref().map_or(true, |k| id.kind.as_ref() == Some(k))
            && self
                .version
                .as_ref()
                .map_or(true, |v| id.version.as_ref() == Some(v))
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kind) = &self.kind {
            write!(f, "{}:", kind)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, "@{}", version)?;
        }
        Ok(())
    }
}

/// Alias suggested for an id: `mcp_server:hello-sse@1.0.0` -> `hello-sse`
pub fn suggest_alias(id: &str) -> String {
    let core = id.split_once(':').map_or(id, |(_, rest)| rest);
    let core = core.split_once('@').map_or(core, |(name, _)| name);
    core.replace('/', "-")
}

#[derive(Debug, Clone)]
pub struct Version {
    numbers: Vec<u64>,
    pre: Option<String>,
}

impl Version {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().trim_start_matches('v');
        let (core, pre) = match text.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (text, None),
        };
        // Build metadata never affects ordering
        let core = core.split('+').next().unwrap_or(core);
        let numbers = core
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        if numbers.is_empty() {
            return None;
        }
        Some(Self { numbers, pre })
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.numbers.len().max(other.numbers.len());
        for i in 0..width {
            let a = self.numbers.get(i).copied().unwrap_or(0);
            let b = other.numbers.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => compare_prerelease(a, b),
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Highest stable version, else highest pre-release, else the last id
/// without a parsable version
pub fn pick_preferred<'a>(ids: &[&'a Specifier]) -> Option<&'a Specifier> {
    let versioned = |stable: bool| {
        ids.iter()
            .filter_map(|id| {
                let version = Version::parse(id.version.as_deref()?)?;
                (version.is_prerelease() != stable).then_some((version, *id))
            })
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, id)| id)
    };

    versioned(true)
        .or_else(|| versioned(false))
        .or_else(|| ids.last().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_specifier() {
        let s = Specifier::parse("mcp_server:hello-sse@1.0.0").unwrap();
        assert_eq!(s.kind.as_deref(), Some("mcp_server"));
        assert_eq!(s.name, "hello-sse");
        assert_eq!(s.version.as_deref(), Some("1.0.0"));
        assert!(s.is_fully_qualified());
        assert_eq!(s.to_string(), "mcp_server:hello-sse@1.0.0");

        let bare = Specifier::parse("hello").unwrap();
        assert_eq!(bare.kind, None);
        assert!(!bare.is_fully_qualified());

        assert!(Specifier::parse("").is_err());
        assert!(Specifier::parse("hello@").is_err());
        assert!(Specifier::parse(":hello").is_err());
    }

    #[test]
    fn test_suggest_alias() {
        assert_eq!(suggest_alias("mcp_server:hello-sse@1.0.0"), "hello-sse");
        assert_eq!(suggest_alias("tool:org/thing@2"), "org-thing");
        assert_eq!(suggest_alias("plain"), "plain");
    }

    #[test]
    fn test_version_ordering() {
        let v = |s: &str| Version::parse(s).unwrap();
        assert!(v("0.2.0") > v("0.1.0"));
        assert!(v("0.10.0") > v("0.9.9"));
        assert!(v("1.0.0") > v("1.0.0-rc1"));
        assert!(v("1.0.0-rc.2") > v("1.0.0-rc.1"));
        assert!(v("1.0.0-beta") > v("1.0.0-alpha"));
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(Version::parse("latest").is_none());
    }

    #[test]
    fn test_stable_preferred_over_newer_prerelease() {
        let ids: Vec<Specifier> = ["mcp_server:hello@0.1.0", "mcp_server:hello@0.2.0-rc1"]
            .iter()
            .map(|s| Specifier::parse(s).unwrap())
            .collect();
        let refs: Vec<&Specifier> = ids.iter().collect();
        assert_eq!(pick_preferred(&refs).unwrap().to_string(), "mcp_server:hello@0.1.0");

        let only_pre = vec![&ids[1]];
        assert_eq!(pick_preferred(&only_pre).unwrap().to_string(), "mcp_server:hello@0.2.0-rc1");
    }
}
