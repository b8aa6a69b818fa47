use std::borrow::Cow;

use metrics::Label;

/// A key/value pair attached to a metric.
///
/// Tags are written in the order they are given, and no uniqueness is enforced: two tags with the same key are both
/// written. Neither the key nor the value are escaped, so they must not contain `;`, `=`, `|`, `:`, or newlines.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    key: Cow<'static, str>,
    value: Cow<'static, str>,
}

impl Tag {
    /// Creates a `Tag` from the given key and value.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        Self { key: key.into(), value: value.into() }
    }

    /// Creates a `Tag` from a static key and value.
    pub const fn from_static_parts(key: &'static str, value: &'static str) -> Self {
        Self { key: Cow::Borrowed(key), value: Cow::Borrowed(value) }
    }

    /// Key of this tag.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value of this tag.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl<K, V> From<(K, V)> for Tag
where
    K: Into<Cow<'static, str>>,
    V: Into<Cow<'static, str>>,
{
    fn from((key, value): (K, V)) -> Self {
        Tag::new(key, value)
    }
}

impl From<&Label> for Tag {
    fn from(label: &Label) -> Self {
        Tag::new(label.key().to_owned(), label.value().to_owned())
    }
}
