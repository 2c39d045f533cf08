//! Serialize addresses as `0x`-prefixed hex strings.
//!
//! Use with `#[serde(serialize_with = "serde_address::serialize")]`.

use serde::Serializer;

pub fn serialize<S>(address: &usize, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&format_args!("{address:#x}"))
}

/// Same as [`serialize`] for optional addresses; `None` becomes `null`.
pub fn serialize_option<S>(address: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match address {
        Some(address) => serialize(address, serializer),
        None => serializer.serialize_none(),
    }
}
