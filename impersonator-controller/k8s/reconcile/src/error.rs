use crate::{process::ProxyError, resolve::ResolveError, store::StoreError};
use impersonator_controller_core::{CaError, PairError, ValidationError};
use std::fmt;

/// Why a sync pass failed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not get CredentialIssuer to update: {name:?} not found")]
    MissingCredentialIssuer { name: String },

    #[error("could not load CredentialIssuer: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("could not load CA from secret {secret:?}: {source}")]
    LoadCa {
        secret: String,
        #[source]
        source: CaError,
    },

    #[error("could not create impersonation CA: {0}")]
    CreateCa(#[source] CaError),

    #[error("could not create impersonation cert: {0}")]
    IssueCert(#[source] CaError),

    #[error("could not load the impersonator's TLS certificate and key from secret {secret:?}: {source}")]
    LoadServingCert {
        secret: String,
        #[source]
        source: PairError,
    },

    #[error("could not load the impersonator's credential signing secret {secret:?}: not found")]
    MissingSigner { secret: String },

    #[error("could not set the impersonator's credential signing secret {secret:?}: {source}")]
    LoadSigner {
        secret: String,
        #[source]
        source: PairError,
    },

    #[error("{}", Joined(.0))]
    Aggregate(Vec<Error>),
}

struct Joined<'a>(&'a [Error]);

// === impl Error ===

impl Error {
    /// Combines errors; returns `None` if there are none.
    pub fn aggregate(errors: impl IntoIterator<Item = Error>) -> Option<Self> {
        let mut errors = errors
            .into_iter()
            .flat_map(|e| match e {
                Self::Aggregate(inner) => inner,
                e => vec![e],
            })
            .collect::<Vec<_>>();
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Returns true if the failure was a race with another writer, which is
    /// reported as pending rather than as a setup error.
    pub fn is_pending(&self) -> bool {
        match self {
            Self::Store(error) => error.is_pending(),
            Self::Aggregate(errors) => errors.iter().any(Self::is_pending),
            _ => false,
        }
    }
}

impl From<Vec<ProxyError>> for Error {
    fn from(errors: Vec<ProxyError>) -> Self {
        Self::aggregate(errors.into_iter().map(Self::Proxy))
            .unwrap_or(Self::Proxy(ProxyError::Lost))
    }
}

impl fmt::Display for Joined<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            fmt::Display::fmt(error, f)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> Error {
        StoreError::Conflict {
            kind: "Service",
            name: "proxy-lb".into(),
        }
        .into()
    }

    #[test]
    fn aggregate_flattens_and_collapses() {
        assert!(Error::aggregate(vec![]).is_none());

        let single = Error::aggregate(vec![ProxyError::UnexpectedShutdown.into()]).unwrap();
        assert_eq!(single.to_string(), "unexpected shutdown of proxy server");

        let nested = Error::aggregate(vec![
            ProxyError::UnexpectedShutdown.into(),
            Error::Aggregate(vec![conflict(), StoreError::NoNodes.into()]),
        ])
        .unwrap();
        assert_eq!(
            nested.to_string(),
            "[unexpected shutdown of proxy server, Service \"proxy-lb\" was modified concurrently, no nodes found]"
        );
    }

    #[test]
    fn races_are_pending() {
        assert!(conflict().is_pending());
        assert!(Error::Aggregate(vec![StoreError::NoNodes.into(), conflict()]).is_pending());
        assert!(!Error::from(StoreError::NoNodes).is_pending());
        assert!(!Error::from(ValidationError::Missing).is_pending());
    }
}
