use std::{collections::BTreeMap, sync::Arc};

/// The label whose value selects the pods that serve the impersonation proxy.
pub const APP_LABEL: &str = "app";

pub type Map = BTreeMap<String, String>;

/// Labels stamped onto every resource the controller creates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Labels(Arc<Map>);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid label {0:?} (expected key=value)")]
pub struct InvalidLabel(String);

// === Labels ===

impl Labels {
    /// Returns the value of the `app` label, which is also used as the
    /// Services' pod selector.
    pub fn app(&self) -> Option<&str> {
        self.0.get(APP_LABEL).map(String::as_str)
    }

    pub fn to_map(&self) -> Map {
        (*self.0).clone()
    }

    /// The pod selector shared by the generated Services.
    pub fn selector(&self) -> Map {
        std::iter::once((
            APP_LABEL.to_string(),
            self.app().unwrap_or_default().to_string(),
        ))
        .collect()
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Map>()
            .into()
    }
}

impl std::str::FromStr for Labels {
    type Err = InvalidLabel;

    /// Parses a comma-separated list of `key=value` pairs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|kv| !kv.is_empty())
            .map(|kv| match kv.split_once('=') {
                Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
                _ => Err(InvalidLabel(kv.to_string())),
            })
            .collect::<Result<Map, _>>()
            .map(Into::into)
    }
}
