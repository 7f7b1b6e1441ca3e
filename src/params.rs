//! Controlled vocabulary and user parameters attached to mzIdentML elements.
use std::num::ParseFloatError;
use std::str;

pub trait ParamLike {
    fn name(&self) -> &str;
    fn value(&self) -> Option<&str>;

    /// Whether the `value` attribute was present on the source element
    fn has_value(&self) -> bool {
        self.value().is_some()
    }

    fn coerce<T: str::FromStr>(&self) -> Option<Result<T, T::Err>> {
        self.value().map(|v| v.trim().parse::<T>())
    }

    /// Parse the value as a double. Rust's float parsing does not consult the
    /// process locale, so `"1.5"` always means one and a half.
    fn to_f64(&self) -> Option<Result<f64, ParseFloatError>> {
        self.coerce::<f64>()
    }
}

/// A `cvParam` or `userParam`. Unlike mzML, mzIdentML makes `value` optional,
/// and an absent value is distinct from an empty one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: Option<String>,
}

impl Param {
    pub fn new() -> Param {
        Param::default()
    }

    pub fn new_key_value<K: Into<String>, V: Into<String>>(name: K, value: V) -> Param {
        Param {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

impl ParamLike for Param {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}
