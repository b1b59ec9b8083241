//! # Registry filter expressions.
//!
//! [`Filter`] is the LDAP-style expression language used to select registry entries:
//!
//! ```text
//! (&(objectClass=com.acme.Cache)(|(region=eu*)(tier>=2))(!(disabled=true)))
//! ```
//!
//! Supported items: `=` (equality, presence `attr=*`, substrings `a*b*c`), `~=`
//! (case- and whitespace-insensitive equality), `>=` and `<=`. Attribute names are
//! matched case-insensitively. Array-valued properties match if any element matches.
//! Numbers compare numerically, strings lexicographically.
//!
//! ```rust
//! use scrim::Filter;
//! use serde_json::json;
//!
//! let filter: Filter = "(&(objectClass=Foo)(rank>=2))".parse().unwrap();
//! let props = json!({ "objectClass": ["Foo", "Bar"], "rank": 3 });
//! assert!(filter.matches(props.as_object().unwrap()));
//! ```

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::FilterError;
use crate::properties::{OBJECT_CLASS, Properties};

/// Parsed filter expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    /// All sub-filters match.
    And(Vec<Filter>),
    /// At least one sub-filter matches.
    Or(Vec<Filter>),
    /// Sub-filter does not match.
    Not(Box<Filter>),
    /// `attr=value`.
    Equal { attr: String, value: String },
    /// `attr~=value`.
    Approx { attr: String, value: String },
    /// `attr>=value`.
    GreaterEq { attr: String, value: String },
    /// `attr<=value`.
    LessEq { attr: String, value: String },
    /// `attr=*`.
    Present { attr: String },
    /// `attr=a*b*c`; `parts` are the literal pieces around each `*`
    /// (first and last may be empty).
    Substring { attr: String, parts: Vec<String> },
}

#[derive(Clone, Copy)]
enum Cmp {
    Eq,
    Approx,
    Ge,
    Le,
}

impl Filter {
    /// `(objectClass=<service_type>)`.
    pub fn object_class(service_type: &str) -> Self {
        Filter::Equal {
            attr: OBJECT_CLASS.to_string(),
            value: service_type.to_string(),
        }
    }

    /// Conjunction of `filters`, flattening nested `And`s; a single filter is returned as-is.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut flat = Vec::new();
        for f in filters {
            match f {
                Filter::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or(Filter::And(Vec::new()))
        } else {
            Filter::And(flat)
        }
    }

    /// Evaluates the filter against a property map.
    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            Filter::And(fs) => fs.iter().all(|f| f.matches(props)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(props)),
            Filter::Not(f) => !f.matches(props),
            Filter::Present { attr } => lookup(props, attr).is_some(),
            Filter::Equal { attr, value } => test(props, attr, |v| compare(v, Cmp::Eq, value)),
            Filter::Approx { attr, value } => {
                test(props, attr, |v| compare(v, Cmp::Approx, value))
            }
            Filter::GreaterEq { attr, value } => test(props, attr, |v| compare(v, Cmp::Ge, value)),
            Filter::LessEq { attr, value } => test(props, attr, |v| compare(v, Cmp::Le, value)),
            Filter::Substring { attr, parts } => test(props, attr, |v| substring(v, parts)),
        }
    }
}

fn lookup<'p>(props: &'p Properties, attr: &str) -> Option<&'p Value> {
    props.get(attr).or_else(|| {
        props
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(attr))
            .map(|(_, v)| v)
    })
}

fn test(props: &Properties, attr: &str, pred: impl Fn(&Value) -> bool + Copy) -> bool {
    match lookup(props, attr) {
        Some(Value::Array(items)) => items.iter().any(pred),
        Some(v) => pred(v),
        None => false,
    }
}

fn compare(value: &Value, cmp: Cmp, target: &str) -> bool {
    match value {
        Value::String(s) => match cmp {
            Cmp::Eq => s == target,
            Cmp::Approx => normalize(s) == normalize(target),
            Cmp::Ge => s.as_str() >= target,
            Cmp::Le => s.as_str() <= target,
        },
        Value::Number(n) => {
            let ordering = match (n.as_i64(), target.trim().parse::<i64>()) {
                (Some(a), Ok(b)) => a.cmp(&b),
                _ => match (n.as_f64(), target.trim().parse::<f64>()) {
                    (Some(a), Ok(b)) => match a.partial_cmp(&b) {
                        Some(o) => o,
                        None => return false,
                    },
                    _ => return false,
                },
            };
            match cmp {
                Cmp::Eq | Cmp::Approx => ordering.is_eq(),
                Cmp::Ge => ordering.is_ge(),
                Cmp::Le => ordering.is_le(),
            }
        }
        Value::Bool(b) => match cmp {
            Cmp::Eq | Cmp::Approx => target.trim().eq_ignore_ascii_case(if *b { "true" } else { "false" }),
            Cmp::Ge | Cmp::Le => false,
        },
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    }
}

fn substring(value: &Value, parts: &[String]) -> bool {
    let Value::String(s) = value else {
        return false;
    };
    let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
        return false;
    };
    if !s.starts_with(first.as_str()) {
        return false;
    }
    let mut rest = &s[first.len()..];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle.as_str()) {
            Some(at) => rest = &rest[at + middle.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last.as_str())
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

// ---- Parsing ----

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut p = Parser {
            chars: s.chars().collect(),
            pos: 0,
        };
        p.skip_ws();
        let f = p.filter()?;
        p.skip_ws();
        if p.pos < p.chars.len() {
            return Err(FilterError::Trailing { offset: p.pos });
        }
        Ok(f)
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Result<char, FilterError> {
        let c = self
            .peek()
            .ok_or(FilterError::UnexpectedEnd { offset: self.pos })?;
        self.pos += 1;
        Ok(c)
    }

    fn expect(&mut self, want: char) -> Result<(), FilterError> {
        let offset = self.pos;
        match self.bump()? {
            c if c == want => Ok(()),
            found => Err(FilterError::Unexpected { found, offset }),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn filter(&mut self) -> Result<Filter, FilterError> {
        self.expect('(')?;
        self.skip_ws();
        let f = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_ws();
                let inner = self.filter()?;
                self.skip_ws();
                Filter::Not(Box::new(inner))
            }
            Some(_) => self.item()?,
            None => return Err(FilterError::UnexpectedEnd { offset: self.pos }),
        };
        self.expect(')')?;
        Ok(f)
    }

    fn list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut out = Vec::new();
        self.skip_ws();
        while self.peek() == Some('(') {
            out.push(self.filter()?);
            self.skip_ws();
        }
        if out.is_empty() {
            return match self.peek() {
                Some(found) => Err(FilterError::Unexpected {
                    found,
                    offset: self.pos,
                }),
                None => Err(FilterError::UnexpectedEnd { offset: self.pos }),
            };
        }
        Ok(out)
    }

    fn item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        let mut attr = String::new();
        loop {
            match self.peek() {
                Some('=' | '~' | '<' | '>') => break,
                Some(found @ ('(' | ')')) => {
                    return Err(FilterError::Unexpected {
                        found,
                        offset: self.pos,
                    });
                }
                Some(c) => {
                    attr.push(c);
                    self.pos += 1;
                }
                None => return Err(FilterError::UnexpectedEnd { offset: self.pos }),
            }
        }
        let attr = attr.trim().to_string();
        if attr.is_empty() {
            return Err(FilterError::EmptyAttribute { offset: start });
        }

        let op_at = self.pos;
        let op = match self.bump()? {
            '=' => Cmp::Eq,
            c @ ('~' | '<' | '>') => {
                self.expect('=')?;
                match c {
                    '~' => Cmp::Approx,
                    '<' => Cmp::Le,
                    _ => Cmp::Ge,
                }
            }
            found => return Err(FilterError::Unexpected { found, offset: op_at }),
        };

        let parts = self.value()?;
        Ok(match op {
            Cmp::Eq if parts.len() == 1 => Filter::Equal {
                attr,
                value: parts.into_iter().next().unwrap_or_default(),
            },
            Cmp::Eq if parts.len() == 2 && parts.iter().all(String::is_empty) => {
                Filter::Present { attr }
            }
            Cmp::Eq => Filter::Substring { attr, parts },
            Cmp::Approx => Filter::Approx {
                attr,
                value: parts.join("*"),
            },
            Cmp::Ge => Filter::GreaterEq {
                attr,
                value: parts.join("*"),
            },
            Cmp::Le => Filter::LessEq {
                attr,
                value: parts.join("*"),
            },
        })
    }

    /// Reads a value up to the closing paren, splitting on unescaped `*`.
    fn value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                Some(')') => break,
                Some('(') => {
                    return Err(FilterError::Unexpected {
                        found: '(',
                        offset: self.pos,
                    });
                }
                Some('\\') => {
                    self.pos += 1;
                    let c = self.bump()?;
                    if let Some(last) = parts.last_mut() {
                        last.push(c);
                    }
                }
                Some('*') => {
                    self.pos += 1;
                    parts.push(String::new());
                }
                Some(c) => {
                    self.pos += 1;
                    if let Some(last) = parts.last_mut() {
                        last.push(c);
                    }
                }
                None => return Err(FilterError::UnexpectedEnd { offset: self.pos }),
            }
        }
        Ok(parts)
    }
}

// ---- Rendering ----

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(fs) => {
                f.write_str("(&")?;
                for x in fs {
                    write!(f, "{x}")?;
                }
                f.write_str(")")
            }
            Filter::Or(fs) => {
                f.write_str("(|")?;
                for x in fs {
                    write!(f, "{x}")?;
                }
                f.write_str(")")
            }
            Filter::Not(x) => write!(f, "(!{x})"),
            Filter::Equal { attr, value } => write!(f, "({attr}={})", escape(value)),
            Filter::Approx { attr, value } => write!(f, "({attr}~={})", escape(value)),
            Filter::GreaterEq { attr, value } => write!(f, "({attr}>={})", escape(value)),
            Filter::LessEq { attr, value } => write!(f, "({attr}<={})", escape(value)),
            Filter::Present { attr } => write!(f, "({attr}=*)"),
            Filter::Substring { attr, parts } => {
                let rendered: Vec<String> = parts.iter().map(|p| escape(p)).collect();
                write!(f, "({attr}={})", rendered.join("*"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(v: Value) -> Properties {
        v.as_object().cloned().unwrap_or_default()
    }

    fn parse(s: &str) -> Filter {
        s.parse().unwrap_or_else(|e| panic!("{s}: {e}"))
    }

    #[test]
    fn object_class_matches_any_array_element() {
        let f = Filter::object_class("Foo");
        assert!(f.matches(&props(json!({ "objectClass": ["Bar", "Foo"] }))));
        assert!(!f.matches(&props(json!({ "objectClass": ["Bar"] }))));
    }

    #[test]
    fn composite_filters() {
        let f = parse("(&(a=1)(|(b=x)(b=y))(!(c=*)))");
        assert!(f.matches(&props(json!({ "a": 1, "b": "y" }))));
        assert!(!f.matches(&props(json!({ "a": 1, "b": "y", "c": false }))));
        assert!(!f.matches(&props(json!({ "a": 2, "b": "x" }))));
    }

    #[test]
    fn numeric_and_string_ordering() {
        let ge = parse("(rank>=10)");
        assert!(ge.matches(&props(json!({ "rank": 10 }))));
        assert!(!ge.matches(&props(json!({ "rank": 9 }))));
        assert!(parse("(v<=1.5)").matches(&props(json!({ "v": 1.25 }))));
        assert!(parse("(name>=m)").matches(&props(json!({ "name": "zeta" }))));
    }

    #[test]
    fn substring_and_presence() {
        assert_eq!(parse("(a=*)"), Filter::Present { attr: "a".into() });
        let f = parse("(host=eu-*-prod*)");
        assert!(f.matches(&props(json!({ "host": "eu-west-prod-1" }))));
        assert!(!f.matches(&props(json!({ "host": "us-west-prod-1" }))));
        assert!(parse("(x=a*a)").matches(&props(json!({ "x": "aa" }))));
        assert!(!parse("(x=ab*ba)").matches(&props(json!({ "x": "aba" }))));
    }

    #[test]
    fn attribute_lookup_ignores_case_and_approx_ignores_spaces() {
        let f = parse("(OBJECTCLASS~=foo  bar)");
        assert!(f.matches(&props(json!({ "objectClass": "Foo Bar" }))));
    }

    #[test]
    fn escapes_round_trip_through_display() {
        let f = parse(r"(path=a\*b\(c\))");
        assert_eq!(
            f,
            Filter::Equal {
                attr: "path".into(),
                value: "a*b(c)".into()
            }
        );
        assert_eq!(parse(&f.to_string()), f);
    }

    #[test]
    fn all_flattens_nested_conjunctions() {
        let f = Filter::all([
            Filter::object_class("Foo"),
            parse("(&(a=1)(b=2))"),
        ]);
        assert_eq!(f.to_string(), "(&(objectClass=Foo)(a=1)(b=2))");
        assert_eq!(Filter::all([Filter::object_class("Foo")]), Filter::object_class("Foo"));
    }

    #[test]
    fn syntax_errors_report_offsets() {
        assert_eq!(
            "(a=1".parse::<Filter>(),
            Err(FilterError::UnexpectedEnd { offset: 4 })
        );
        assert_eq!(
            "(=1)".parse::<Filter>(),
            Err(FilterError::EmptyAttribute { offset: 1 })
        );
        assert_eq!(
            "(a=1)x".parse::<Filter>(),
            Err(FilterError::Trailing { offset: 5 })
        );
        assert!(matches!("(&)".parse::<Filter>(), Err(FilterError::Unexpected { found: ')', .. })));
    }
}
