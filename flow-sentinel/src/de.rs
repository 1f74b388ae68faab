use serde::{Deserialize, Deserializer};
use std::{fmt::Display, str::FromStr};

/// Deserialize a `String` as the desired type, eg/ decimal strings `"0.5000"` sent by exchanges.
pub fn de_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let data: &str = Deserialize::deserialize(deserializer)?;
    data.parse::<T>().map_err(serde::de::Error::custom)
}
