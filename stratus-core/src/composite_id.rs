//! Composite identifiers
//!
//! Some remote objects have no single natural id; their state key is an
//! ordered tuple of remote ids joined with a delimiter (`vpc-1#igw-2`). Decoding
//! always checks the arity, so a corrupt id is rejected before any remote call
//! instead of being silently truncated or padded.

use thiserror::Error;

/// Delimiter used in persisted state keys
pub const STATE_DELIMITER: char = '#';

/// Delimiter the remote control plane uses for compound primary identifiers
pub const REMOTE_DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error(
        "corrupt identifier '{id}': expected {expected} components separated by '{delimiter}', found {found}"
    )]
    Arity {
        id: String,
        expected: usize,
        found: usize,
        delimiter: char,
    },

    #[error("corrupt identifier '{id}': component {index} is empty")]
    EmptyComponent { id: String, index: usize },

    #[error("identifier component '{component}' contains the delimiter '{delimiter}'")]
    DelimiterInComponent { component: String, delimiter: char },

    #[error("identifier component '{component}' is invalid: {reason}")]
    InvalidComponent { component: String, reason: String },

    #[error("identifier has no components")]
    NoComponents,

    #[error("invalid {kind}: {source}")]
    Key {
        kind: &'static str,
        source: Box<IdError>,
    },
}

impl IdError {
    /// Attribute the error to a typed key; already-attributed errors are kept as is
    pub fn for_key(self, kind: &'static str) -> Self {
        match self {
            IdError::Key { .. } => self,
            other => IdError::Key {
                kind,
                source: Box::new(other),
            },
        }
    }
}

/// An ordered, validated list of identifier components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeId {
    parts: Vec<String>,
}

impl CompositeId {
    /// Build from components, rejecting empty ones and ones containing either delimiter
    pub fn new<I, S>(parts: I) -> Result<Self, IdError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        if parts.is_empty() {
            return Err(IdError::NoComponents);
        }
        for (index, part) in parts.iter().enumerate() {
            if part.is_empty() {
                return Err(IdError::EmptyComponent {
                    id: parts.join(&STATE_DELIMITER.to_string()),
                    index,
                });
            }
            for delimiter in [STATE_DELIMITER, REMOTE_DELIMITER] {
                if part.contains(delimiter) {
                    return Err(IdError::DelimiterInComponent {
                        component: part.clone(),
                        delimiter,
                    });
                }
            }
        }
        Ok(Self { parts })
    }

    /// Split `s` on `delimiter`, requiring exactly `arity` non-empty components
    pub fn decode(s: &str, arity: usize, delimiter: char) -> Result<Self, IdError> {
        let parts: Vec<&str> = s.split(delimiter).collect();
        if parts.len() != arity {
            return Err(IdError::Arity {
                id: s.to_string(),
                expected: arity,
                found: parts.len(),
                delimiter,
            });
        }
        if let Some(index) = parts.iter().position(|p| p.is_empty()) {
            return Err(IdError::EmptyComponent {
                id: s.to_string(),
                index,
            });
        }
        Self::new(parts)
    }

    pub fn encode(&self, delimiter: char) -> String {
        self.parts.join(&delimiter.to_string())
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<String> {
        self.parts
    }
}

impl std::fmt::Display for CompositeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode(STATE_DELIMITER))
    }
}

/// A product-specific identifier persisted as a composite state key
///
/// Usually implemented through [`composite_key!`](crate::composite_key).
pub trait CompositeKey: Sized {
    /// Human-readable kind, used in error messages
    const KIND: &'static str;
    /// Number of components
    const ARITY: usize;

    fn components(&self) -> Vec<&str>;

    fn from_components(parts: Vec<String>) -> Result<Self, IdError>;

    /// Encode into the persisted state key
    fn encode(&self) -> String {
        self.components().join(&STATE_DELIMITER.to_string())
    }

    /// Decode a persisted state key, validating arity
    fn decode(s: &str) -> Result<Self, IdError> {
        CompositeId::decode(s, Self::ARITY, STATE_DELIMITER)
            .and_then(|id| Self::from_components(id.into_parts()))
            .map_err(|e| e.for_key(Self::KIND))
    }

    /// The control plane's compound identifier for the same components
    fn to_remote(&self) -> String {
        self.components().join(&REMOTE_DELIMITER.to_string())
    }
}

/// Declare a typed composite identifier
///
/// Generates the struct (all components are `String`s), a validating `new`,
/// [`CompositeKey`], `Display`, `FromStr`, and serde support through the
/// state-key string form.
///
/// ```
/// stratus_core::composite_key! {
///     /// Route in a route table
///     pub struct RouteKey { route_table_id, destination }
/// }
///
/// use stratus_core::composite_id::CompositeKey;
/// let key = RouteKey::new("rtb-1", "0.0.0.0/0").unwrap();
/// assert_eq!(key.encode(), "rtb-1#0.0.0.0/0");
/// assert_eq!(RouteKey::decode("rtb-1#0.0.0.0/0").unwrap(), key);
/// ```
#[macro_export]
macro_rules! composite_key {
    (@count) => { 0usize };
    (@count $head:ident $($tail:ident)*) => { 1usize + $crate::composite_key!(@count $($tail)*) };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident { $($field:ident),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        $vis struct $name {
            $(pub $field: String,)+
        }

        impl $name {
            #[allow(clippy::too_many_arguments)]
            pub fn new($($field: impl Into<String>),+) -> Result<Self, $crate::composite_id::IdError> {
                let parts: Vec<String> = vec![$($field.into()),+];
                let id = $crate::composite_id::CompositeId::new(parts)?;
                <Self as $crate::composite_id::CompositeKey>::from_components(id.into_parts())
            }
        }

        impl $crate::composite_id::CompositeKey for $name {
            const KIND: &'static str = stringify!($name);
            const ARITY: usize = $crate::composite_key!(@count $($field)+);

            fn components(&self) -> Vec<&str> {
                vec![$(self.$field.as_str()),+]
            }

            fn from_components(parts: Vec<String>) -> Result<Self, $crate::composite_id::IdError> {
                let found = parts.len();
                if found != <Self as $crate::composite_id::CompositeKey>::ARITY {
                    return Err($crate::composite_id::IdError::Arity {
                        id: parts.join(&$crate::composite_id::STATE_DELIMITER.to_string()),
                        expected: <Self as $crate::composite_id::CompositeKey>::ARITY,
                        found,
                        delimiter: $crate::composite_id::STATE_DELIMITER,
                    });
                }
                let mut parts = parts.into_iter();
                Ok(Self {
                    $($field: parts.next().unwrap_or_default(),)+
                })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&$crate::composite_id::CompositeKey::encode(self))
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::composite_id::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <Self as $crate::composite_id::CompositeKey>::decode(s)
            }
        }

        impl $crate::__private::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: $crate::__private::serde::Serializer,
            {
                serializer.serialize_str(&$crate::composite_id::CompositeKey::encode(self))
            }
        }

        impl<'de> $crate::__private::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: $crate::__private::serde::Deserializer<'de>,
            {
                let s = <String as $crate::__private::serde::Deserialize>::deserialize(deserializer)?;
                <Self as $crate::composite_id::CompositeKey>::decode(&s)
                    .map_err(<D::Error as $crate::__private::serde::de::Error>::custom)
            }
        }
    };
}
