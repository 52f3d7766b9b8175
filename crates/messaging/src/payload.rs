use std::fmt::Debug;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed message body that can be published and consumed.
///
/// The module and type names drive destination naming (see
/// [`Destination::of`](crate::destination::Destination::of)). Both default to
/// values derived from the Rust type path: the defining crate and the bare
/// type name. Implementors override `module` when the crate name is not the
/// name other deployments expect.
///
/// Rust type paths spell crate names with `_`, so a type in crate
/// `billing-service` defaults to module `billing_service` and destinations
/// named `billing_service.*`. Producers elsewhere that name the module
/// `billing-service` need an explicit `module` override to match.
pub trait Payload: Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static {
    /// Short name of the module that owns the message.
    ///
    /// Defaults to the defining crate's name as it appears in type paths
    /// (hyphens become underscores).
    #[must_use]
    fn module() -> &'static str {
        crate_name(std::any::type_name::<Self>())
    }

    /// Bare name of the message type.
    #[must_use]
    fn type_name() -> &'static str {
        bare_type_name(std::any::type_name::<Self>())
    }
}

fn without_generics(path: &'static str) -> &'static str {
    path.find('<').map_or(path, |idx| &path[..idx])
}

pub(crate) fn crate_name(path: &'static str) -> &'static str {
    let path = without_generics(path);
    path.split("::").next().unwrap_or(path)
}

pub(crate) fn bare_type_name(path: &'static str) -> &'static str {
    let path = without_generics(path);
    path.rsplit("::").next().unwrap_or(path)
}

/// Encodes a payload as JSON.
///
/// # Errors
///
/// Returns the serializer error if the value cannot be represented.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(value).map(Bytes::from)
}

/// Decodes a JSON payload.
///
/// # Errors
///
/// Returns the deserializer error for malformed or mismatched input.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(bytes)
}
