//! Namespace and key prefixing.
//!
//! A [`Namespace`] scopes every key a provider touches so that independent
//! providers sharing one backing store (one Redis instance, one table) never
//! collide. Segments are joined with `:` within a group and `/` between the
//! root prefix and the group, mirroring the sentinel-tagged layout used by
//! most distributed-lock libraries' key schemes.

use std::fmt;

/// Delimiter between the root prefix and a key's group segment.
pub const ROOT_DELIMITER: &str = "/";
/// Delimiter between segments within a group.
pub const SEGMENT_DELIMITER: &str = ":";

const ROOT_SENTINEL: &str = "_rt";
const GROUP_SENTINEL: &str = "_gp";
const KEY_SENTINEL: &str = "_ky";

/// Error constructing a [`Namespace`] or [`Key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceError {
    /// A segment was empty.
    EmptySegment,
    /// A segment contained a reserved delimiter (`:` or `/`).
    ReservedCharacter { segment: String },
    /// A segment contained one of the sentinel tokens (`_rt`, `_gp`, `_ky`)
    /// reserved for the prefixed-key layout.
    ReservedSentinel { segment: String },
}

impl fmt::Display for NamespaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySegment => write!(f, "namespace segment must not be empty"),
            Self::ReservedCharacter { segment } => {
                write!(f, "segment {:?} contains a reserved delimiter (':' or '/')", segment)
            }
            Self::ReservedSentinel { segment } => {
                write!(f, "segment {:?} contains a reserved sentinel token (_rt, _gp, or _ky)", segment)
            }
        }
    }
}

impl std::error::Error for NamespaceError {}

fn validate_segment(segment: &str) -> Result<(), NamespaceError> {
    if segment.is_empty() {
        return Err(NamespaceError::EmptySegment);
    }
    if segment.contains(SEGMENT_DELIMITER) || segment.contains(ROOT_DELIMITER) {
        return Err(NamespaceError::ReservedCharacter { segment: segment.to_string() });
    }
    if segment.contains(ROOT_SENTINEL) || segment.contains(GROUP_SENTINEL) || segment.contains(KEY_SENTINEL) {
        return Err(NamespaceError::ReservedSentinel { segment: segment.to_string() });
    }
    Ok(())
}

/// Scopes keys under a root prefix and an optional group, so multiple
/// providers (locks, semaphores, caches, circuit breakers) can share one
/// physical backend without key collisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    root: String,
    group: Option<String>,
}

impl Namespace {
    /// Construct a namespace with only a root prefix.
    pub fn new(root: impl Into<String>) -> Result<Self, NamespaceError> {
        let root = root.into();
        validate_segment(&root)?;
        Ok(Self { root, group: None })
    }

    /// Derive a child namespace sharing the same root but scoped to `group`,
    /// e.g. `Namespace::new("myapp")?.with_group("locks")`.
    pub fn with_group(&self, group: impl Into<String>) -> Result<Self, NamespaceError> {
        let group = group.into();
        validate_segment(&group)?;
        Ok(Self { root: self.root.clone(), group: Some(group) })
    }

    /// Append an additional root segment, e.g. turning `myapp` into `myapp/tenant-42`.
    pub fn append_root(&self, segment: impl Into<String>) -> Result<Self, NamespaceError> {
        let segment = segment.into();
        validate_segment(&segment)?;
        Ok(Self { root: format!("{}{}{}", self.root, ROOT_DELIMITER, segment), group: self.group.clone() })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// The namespace's own prefixed form (no key segments), e.g. `_rt:myapp/_gp:locks`.
    pub fn prefixed(&self) -> String {
        match &self.group {
            Some(group) => {
                format!("{}{}{}{}{}{}{}", ROOT_SENTINEL, SEGMENT_DELIMITER, self.root, ROOT_DELIMITER, GROUP_SENTINEL, SEGMENT_DELIMITER, group)
            }
            None => format!("{}{}{}", ROOT_SENTINEL, SEGMENT_DELIMITER, self.root),
        }
    }

    /// Build a fully-qualified [`Key`] from one or more segments under this namespace.
    pub fn key(&self, segments: impl IntoIterator<Item = impl Into<String>>) -> Result<Key, NamespaceError> {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(NamespaceError::EmptySegment);
        }
        for s in &segments {
            validate_segment(s)?;
        }
        Ok(Key { namespace: self.clone(), segments })
    }
}

/// A fully-qualified key: a [`Namespace`] plus one or more user segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    namespace: Namespace,
    segments: Vec<String>,
}

impl Key {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The fully joined, adapter-facing string form, e.g.
    /// `_rt:myapp/_gp:locks/_ky:checkout:order-42`.
    pub fn prefixed(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.namespace.prefixed(),
            ROOT_DELIMITER,
            KEY_SENTINEL,
            SEGMENT_DELIMITER,
            self.segments.join(SEGMENT_DELIMITER)
        )
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefixed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_only_namespace_prefixes() {
        let ns = Namespace::new("myapp").unwrap();
        assert_eq!(ns.prefixed(), "_rt:myapp");
    }

    #[test]
    fn grouped_namespace_prefixes() {
        let ns = Namespace::new("myapp").unwrap().with_group("locks").unwrap();
        assert_eq!(ns.prefixed(), "_rt:myapp/_gp:locks");
    }

    #[test]
    fn append_root_joins_with_slash() {
        let ns = Namespace::new("myapp").unwrap().append_root("tenant-42").unwrap();
        assert_eq!(ns.root(), "myapp/tenant-42");
    }

    #[test]
    fn key_prefixed_form_includes_sentinel() {
        let ns = Namespace::new("myapp").unwrap().with_group("locks").unwrap();
        let key = ns.key(["checkout", "order-42"]).unwrap();
        assert_eq!(key.prefixed(), "_rt:myapp/_gp:locks/_ky:checkout:order-42");
    }

    #[test]
    fn rejects_empty_segment() {
        assert_eq!(Namespace::new("").unwrap_err(), NamespaceError::EmptySegment);
    }

    #[test]
    fn rejects_segment_with_delimiter() {
        let err = Namespace::new("bad:name").unwrap_err();
        assert!(matches!(err, NamespaceError::ReservedCharacter { .. }));
    }

    #[test]
    fn rejects_segment_containing_sentinel_tokens() {
        assert!(matches!(Namespace::new("_rt").unwrap_err(), NamespaceError::ReservedSentinel { .. }));
        assert!(matches!(Namespace::new("myapp").unwrap().with_group("_gp-suffix").unwrap_err(), NamespaceError::ReservedSentinel { .. }));
        let ns = Namespace::new("myapp").unwrap();
        assert!(matches!(ns.key(["prefix_ky_suffix"]).unwrap_err(), NamespaceError::ReservedSentinel { .. }));
    }

    #[test]
    fn keys_in_different_namespaces_differ() {
        let a = Namespace::new("app-a").unwrap().key(["x"]).unwrap();
        let b = Namespace::new("app-b").unwrap().key(["x"]).unwrap();
        assert_ne!(a.prefixed(), b.prefixed());
    }

    #[test]
    fn same_segments_same_namespace_equal() {
        let ns = Namespace::new("myapp").unwrap();
        let a = ns.key(["x", "y"]).unwrap();
        let b = ns.key(["x", "y"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.prefixed(), b.prefixed());
    }
}
