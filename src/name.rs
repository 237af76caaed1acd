use serde::{Serialize, Serializer, Deserialize, Deserializer};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use crate::error::Error;

pub const CONTENT_PREFIX:   &str = "__content_of__";
pub const FIELD_PREFIX:     &str = "__field_of__";
pub const ADDRESS_PREFIX:   &str = "__address_of__";
const AT:                   &str = "__at__";
const IN:                   &str = "__in__";
const END:                  &str = "__end";

pub const RETURN_VALUE:     &str = "__retval__";
pub const MALLOC:           &str = "__malloc__";
pub const STRING_PREFIX:    &str = "__string__";


/// function scoped identifier. globals have a single component
#[derive(Debug, Default, Clone, PartialEq, PartialOrd, Eq, Ord)]
pub struct Name (pub Vec<String>);


impl Name {
    pub fn global(ident: &str) -> Self {
        Name(vec![ident.to_string()])
    }

    pub fn scoped(function: &str, ident: &str) -> Self {
        Name(vec![function.to_string(), ident.to_string()])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_global(&self) -> bool {
        self.0.len() < 2
    }

    pub fn ident(&self) -> &str {
        self.0.last().map(|s|s.as_str()).unwrap_or("")
    }

    pub fn function(&self) -> Option<&str> {
        if self.0.len() > 1 {
            Some(&self.0[0])
        } else {
            None
        }
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("::"))
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.split("::").map(|s|s.to_string()).collect())
    }
}

impl From<&String> for Name {
    fn from(s: &String) -> Self {
        Name(s.split("::").map(|s|s.to_string()).collect())
    }
}


/// Everything that can carry an SSA index.
///
/// Pointer contents, struct fields and addresses live in the same namespace
/// as ordinary variables. They render to prefixed strings which other tools
/// parse back, so the rendering is stable:
///
/// ```text
/// f::x                                    plain
/// __content_of__f::p__at__3__end          *p while p had index 3
/// __field_of__s__in__[39:8]__end          bits 39..8 of s
/// __address_of__x                         &x
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Plain(Name),
    Content {
        base:   Box<Key>,
        index:  u32,
    },
    Field {
        owner:  Box<Key>,
        msb:    u32,
        lsb:    u32,
    },
    Address {
        base:   Box<Key>,
    },
}

impl Key {
    pub fn plain(name: Name) -> Self {
        Key::Plain(name)
    }

    pub fn global(ident: &str) -> Self {
        Key::Plain(Name::global(ident))
    }

    pub fn scoped(function: &str, ident: &str) -> Self {
        Key::Plain(Name::scoped(function, ident))
    }

    pub fn content(base: Key, index: u32) -> Self {
        Key::Content{base: Box::new(base), index}
    }

    pub fn field(owner: Key, msb: u32, lsb: u32) -> Self {
        Key::Field{owner: Box::new(owner), msb, lsb}
    }

    pub fn address(base: Key) -> Self {
        Key::Address{base: Box::new(base)}
    }

    pub fn return_value(function: &str) -> Self {
        Key::scoped(function, RETURN_VALUE)
    }

    pub fn is_plain(&self) -> bool {
        match self {
            Key::Plain(_) => true,
            _ => false,
        }
    }

    pub fn is_content(&self) -> bool {
        match self {
            Key::Content{..} => true,
            _ => false,
        }
    }

    pub fn is_address(&self) -> bool {
        match self {
            Key::Address{..} => true,
            _ => false,
        }
    }

    /// the variable all synthetic wrappers eventually refer to
    pub fn root(&self) -> &Name {
        match self {
            Key::Plain(n) => n,
            Key::Content{base, ..} | Key::Address{base} => base.root(),
            Key::Field{owner, ..} => owner.root(),
        }
    }

    /// rendering of one occurrence, `key@index`
    pub fn instance(&self, index: u32) -> String {
        format!("{}@{}", self, index)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Plain(name) => write!(f, "{}", name),
            Key::Content{base, index} => write!(f, "{}{}{}{}{}", CONTENT_PREFIX, base, AT, index, END),
            Key::Field{owner, msb, lsb} => write!(f, "{}{}{}[{}:{}]{}", FIELD_PREFIX, owner, IN, msb, lsb, END),
            Key::Address{base} => write!(f, "{}{}", ADDRESS_PREFIX, base),
        }
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Error::InvalidKey(s.to_string());

        if s.starts_with(CONTENT_PREFIX) {
            let rest = &s[CONTENT_PREFIX.len()..];
            if !rest.ends_with(END) {
                return Err(bad());
            }
            let rest = &rest[..rest.len() - END.len()];
            let at = rest.rfind(AT).ok_or_else(bad)?;
            let index = rest[at + AT.len()..].parse::<u32>().map_err(|_|bad())?;
            let base  = rest[..at].parse::<Key>()?;
            return Ok(Key::content(base, index));
        }

        if s.starts_with(FIELD_PREFIX) {
            let rest = &s[FIELD_PREFIX.len()..];
            if !rest.ends_with(END) {
                return Err(bad());
            }
            let rest = &rest[..rest.len() - END.len()];
            let at = rest.rfind(IN).ok_or_else(bad)?;
            let range = &rest[at + IN.len()..];
            if !range.starts_with('[') || !range.ends_with(']') {
                return Err(bad());
            }
            let mut parts = range[1..range.len() - 1].split(':');
            let msb = parts.next().and_then(|v|v.parse::<u32>().ok()).ok_or_else(bad)?;
            let lsb = parts.next().and_then(|v|v.parse::<u32>().ok()).ok_or_else(bad)?;
            if parts.next().is_some() || lsb > msb {
                return Err(bad());
            }
            let owner = rest[..at].parse::<Key>()?;
            return Ok(Key::field(owner, msb, lsb));
        }

        if s.starts_with(ADDRESS_PREFIX) {
            let base = s[ADDRESS_PREFIX.len()..].parse::<Key>()?;
            return Ok(Key::address(base));
        }

        if s.is_empty() || s.split("::").any(|p|p.is_empty()) {
            return Err(bad());
        }
        Ok(Key::Plain(Name::from(s)))
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<Key>().map_err(serde::de::Error::custom)
    }
}


/// splits a rendered occurrence `key@index` into its parts.
/// symbols without a numeric suffix are unindexed.
pub fn split_instance(symbol: &str) -> (&str, Option<u32>) {
    if let Some(at) = symbol.rfind('@') {
        if let Ok(index) = symbol[at + 1..].parse::<u32>() {
            return (&symbol[..at], Some(index));
        }
    }
    (symbol, None)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_rendering() {
        assert_eq!(Key::scoped("main", "x").to_string(), "main::x");
        assert_eq!(Key::global("g").to_string(), "g");
        assert_eq!(Key::return_value("f").to_string(), "f::__retval__");
        assert_eq!(Key::scoped("main", "x").instance(4), "main::x@4");
    }

    #[test]
    fn synthetic_rendering() {
        let p = Key::scoped("main", "p");
        assert_eq!(Key::content(p.clone(), 3).to_string(), "__content_of__main::p__at__3__end");
        assert_eq!(Key::address(p.clone()).to_string(), "__address_of__main::p");
        assert_eq!(Key::field(Key::global("s"), 39, 8).to_string(), "__field_of__s__in__[39:8]__end");
    }

    #[test]
    fn nested_keys_parse_back() {
        let s   = Key::scoped("main", "s");
        let pp  = Key::content(Key::content(Key::scoped("f", RETURN_VALUE), 2), 7);
        let fld = Key::content(Key::field(Key::content(s, 1), 63, 0), 4);
        for key in vec![pp, fld, Key::address(Key::global("x")), Key::global(MALLOC)] {
            let rendered = key.to_string();
            assert_eq!(rendered.parse::<Key>().unwrap(), key, "{}", rendered);
        }
    }

    #[test]
    fn malformed_keys() {
        assert!("".parse::<Key>().is_err());
        assert!("__content_of__p__at__x__end".parse::<Key>().is_err());
        assert!("__field_of__s__in__[1:8]__end".parse::<Key>().is_err());
        assert!("main::".parse::<Key>().is_err());
    }

    #[test]
    fn instances() {
        assert_eq!(split_instance("main::x@12"), ("main::x", Some(12)));
        assert_eq!(split_instance("__address_of__x"), ("__address_of__x", None));
        assert_eq!(split_instance("a@b"), ("a@b", None));
    }

    #[test]
    fn roots() {
        let k = Key::content(Key::field(Key::scoped("f", "s"), 7, 0), 2);
        assert_eq!(k.root(), &Name::scoped("f", "s"));
    }
}
