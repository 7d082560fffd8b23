use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::io::Write;

use serde_json::Value;
use xxhash_rust::xxh64::Xxh64;

use crate::datapoint::MetricValue;
use crate::errors::{IdentityError, Result};

/// Immutable (name, tags) pair identifying one time series.
///
/// Everything needed to emit a datapoint for this series is rendered once here, so the
/// hot path only copies bytes and appends the timestamp and value text.
#[derive(Debug)]
pub struct MetricIdentity {
    name: String,
    tags: BTreeMap<String, String>,
    content_hash: u64,
    // `"metric":"<name>"`
    name_fragment: Box<[u8]>,
    // `"<key>":"<value>"` per tag, in key order
    tag_fragments: Vec<Box<[u8]>>,
    // `"tags":{...}`
    tags_fragment: Box<[u8]>,
}

impl MetricIdentity {
    /// Validate, normalize and pre-render an identity.
    ///
    /// The name is trimmed and must not be empty. Tag keys and values are trimmed, pairs
    /// with an empty side are dropped and a repeated key keeps the last value seen.
    pub fn new<I, K, V>(name: &str, tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let (name, tags) = normalize(name, tags)?;
        let hash = content_hash(&name, &tags);
        Ok(Self::from_normalized(name, tags, hash))
    }

    pub(crate) fn from_normalized(
        name: String,
        tags: BTreeMap<String, String>,
        content_hash: u64,
    ) -> Self {
        let name_fragment = format!("\"metric\":{}", Value::from(name.as_str())).into_bytes();

        let tag_fragments: Vec<Box<[u8]>> = tags
            .iter()
            .map(|(k, v)| {
                format!("{}:{}", Value::from(k.as_str()), Value::from(v.as_str()))
                    .into_bytes()
                    .into_boxed_slice()
            })
            .collect();

        let mut tags_fragment = b"\"tags\":{".to_vec();
        for (i, frag) in tag_fragments.iter().enumerate() {
            if i > 0 {
                tags_fragment.push(b',');
            }
            tags_fragment.extend_from_slice(frag);
        }
        tags_fragment.push(b'}');

        Self {
            name,
            tags,
            content_hash,
            name_fragment: name_fragment.into_boxed_slice(),
            tag_fragments,
            tags_fragment: tags_fragment.into_boxed_slice(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// 64-bit content hash over name and tags; the identity cache key.
    pub fn content_hash(&self) -> u64 {
        self.content_hash
    }

    /// Pre-rendered `"<key>":"<value>"` fragments, in key order.
    pub fn tag_fragments(&self) -> &[Box<[u8]>] {
        &self.tag_fragments
    }

    /// True when this identity was built from the given normalized name and tags.
    pub(crate) fn matches(&self, name: &str, tags: &BTreeMap<String, String>) -> bool {
        self.name == name && &self.tags == tags
    }

    /// Append one JSON datapoint object for this series to `out`.
    ///
    /// Output shape: `{"metric":..,"timestamp":..,"value":..,"tags":{..}}`.
    pub fn render_datapoint(&self, timestamp: i64, value: MetricValue, out: &mut Vec<u8>) {
        out.reserve(self.name_fragment.len() + self.tags_fragment.len() + 48);
        out.push(b'{');
        out.extend_from_slice(&self.name_fragment);
        // writes into a Vec cannot fail
        let _ = write!(out, ",\"timestamp\":{},\"value\":", timestamp);
        let _ = match value {
            MetricValue::Integer(v) => write!(out, "{}", v),
            MetricValue::Float(v) => write!(out, "{}", v),
        };
        out.push(b',');
        out.extend_from_slice(&self.tags_fragment);
        out.push(b'}');
    }
}

impl PartialEq for MetricIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.content_hash == other.content_hash
            && self.name == other.name
            && self.tags == other.tags
    }
}

impl Eq for MetricIdentity {}

impl Hash for MetricIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.content_hash);
    }
}

impl Display for MetricIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}

pub(crate) fn normalize<I, K, V>(name: &str, tags: I) -> Result<(String, BTreeMap<String, String>)>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let name = name.trim();
    if name.is_empty() {
        return Err(IdentityError::EmptyName);
    }

    let mut normalized = BTreeMap::new();
    for (k, v) in tags {
        let (k, v) = (k.as_ref().trim(), v.as_ref().trim());
        if k.is_empty() || v.is_empty() {
            continue;
        }
        normalized.insert(k.to_string(), v.to_string());
    }
    Ok((name.to_string(), normalized))
}

/// xxHash64 over `name \0 k1 \0 v1 \0 ...` in key order.
pub(crate) fn content_hash(name: &str, tags: &BTreeMap<String, String>) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(name.as_bytes());
    for (k, v) in tags {
        hasher.update(&[0]);
        hasher.update(k.as_bytes());
        hasher.update(&[0]);
        hasher.update(v.as_bytes());
    }
    hasher.digest()
}
