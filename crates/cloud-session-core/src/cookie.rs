//! Tokenizer for the `Cookie` request header.
//!
//! Grammar: `name=value; name=value`. Whitespace around pairs is ignored,
//! a value wrapped in double quotes is unwrapped, and segments without `=`
//! or with an empty name are skipped.

/// One `name=value` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePair<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// Parsed `Cookie` header, borrowing from the raw value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies<'a> {
    pairs: Vec<CookiePair<'a>>,
}

impl<'a> Cookies<'a> {
    /// Tokenize a raw header value.
    #[must_use]
    pub fn parse(raw: &'a str) -> Self {
        let pairs = raw
            .split(';')
            .filter_map(|segment| {
                let (name, value) = segment.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                Some(CookiePair { name, value })
            })
            .collect();
        Self { pairs }
    }

    /// Collect every `Cookie` header of a request.
    #[must_use]
    pub fn from_headers(headers: &'a http::HeaderMap) -> Self {
        let pairs = headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|raw| Self::parse(raw).pairs)
            .collect();
        Self { pairs }
    }

    /// First value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.pairs.iter().find(|p| p.name == name).map(|p| p.value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CookiePair<'a>> {
        self.pairs.iter()
    }
}
