//! JSON helpers shared across the execution pipeline.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
use serde_json_bytes::Value;

/// A JSON object in response data.
pub type Object = Map<ByteString, Value>;

/// One segment of a response path.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// A list index.
    Index(usize),
    /// An object key.
    Key(String),
}

/// A path into response data, as serialized in the `path` member of a GraphQL
/// error or an incremental payload.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn child(&self, element: PathElement) -> Self {
        let mut segments = self.0.clone();
        segments.push(element);
        Self(segments)
    }

    /// The part of `self` below `ancestor`, or `None` when they are equal.
    ///
    /// Callers guarantee that `ancestor` is a prefix of `self`.
    pub(crate) fn slice_from(&self, ancestor: &Path) -> Option<Path> {
        debug_assert!(self.0.starts_with(&ancestor.0));
        if self.0.len() == ancestor.0.len() {
            None
        } else {
            Some(Path(self.0[ancestor.0.len()..].to_vec()))
        }
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<T: IntoIterator<Item = PathElement>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            match element {
                PathElement::Index(index) => write!(f, "/{index}")?,
                PathElement::Key(key) => write!(f, "/{key}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_serialization() {
        let path = Path(vec![
            PathElement::Key("hero".to_owned()),
            PathElement::Key("friends".to_owned()),
            PathElement::Index(1),
            PathElement::Key("name".to_owned()),
        ]);
        assert_eq!(
            serde_json::to_string(&path).unwrap(),
            r#"["hero","friends",1,"name"]"#
        );
        assert_eq!(path.to_string(), "/hero/friends/1/name");
    }

    #[test]
    fn slice_from_ancestor() {
        let ancestor = Path(vec![PathElement::Key("hero".to_owned())]);
        let path = ancestor.child(PathElement::Key("friends".to_owned()));
        assert_eq!(
            path.slice_from(&ancestor),
            Some(Path(vec![PathElement::Key("friends".to_owned())]))
        );
        assert_eq!(ancestor.slice_from(&ancestor), None);
    }
}
