//! Dynamic bridge to a vendor's JavaScript object model
//!
//! A vendor SDK is reached the way a `wasm-bindgen` binding reaches a JS
//! global: construct an object by class path, invoke methods with JSON
//! arguments, attach listeners. Other native objects are passed as arguments
//! through [`object_arg`].

use crate::provider::ProviderKind;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;

/// Id of a native object living on the vendor side
pub type NativeId = u64;

pub type ListenerId = u64;

/// A vendor-side resource: a real object, or something the vendor addresses
/// by name on the map (Mapbox sources and style layers)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeRef {
    Object(NativeId),
    Named(String),
}

impl NativeRef {
    pub fn object_id(&self) -> Option<NativeId> {
        match self {
            NativeRef::Object(id) => Some(*id),
            NativeRef::Named(_) => None,
        }
    }

    /// JSON form used when passing the resource as a call argument
    pub fn to_arg(&self) -> Value {
        match self {
            NativeRef::Object(id) => object_arg(*id),
            NativeRef::Named(name) => Value::String(name.clone()),
        }
    }
}

/// Marks a JSON argument as a reference to a native object
pub fn object_arg(id: NativeId) -> Value {
    json!({ "$ref": id })
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SdkFault {
    #[error("vendor script unavailable: {0}")]
    ScriptUnavailable(String),
    #[error("unknown class {0}")]
    UnknownClass(String),
    #[error("{method} failed: {message}")]
    Call { method: String, message: String },
    #[error("native object {0} no longer exists")]
    Released(NativeId),
    #[error("{0} is not supported by this vendor")]
    Unsupported(String),
}

pub type SdkResult<T> = std::result::Result<T, SdkFault>;

/// Listener attached on the vendor side; receives the vendor event object
/// serialized to JSON
pub type NativeCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Which script to inject and which global signals it is ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    pub provider: ProviderKind,
    pub url: String,
    pub global: &'static str,
}

pub trait VendorSdk: Send + Sync {
    /// Injects the vendor script and resolves once `request.global` exists
    fn load(&self, request: &ScriptRequest) -> BoxFuture<'static, SdkResult<()>>;

    /// `new <class>(...args)`
    fn construct(&self, class: &str, args: Vec<Value>) -> SdkResult<NativeId>;

    /// `target.<method>(...args)`; dotted methods walk properties first
    fn invoke(&self, target: NativeId, method: &str, args: Vec<Value>) -> SdkResult<Value>;

    /// Drops the binding's reference to an object
    fn release(&self, target: NativeId);

    fn listen(&self, target: NativeId, event: &str, callback: NativeCallback)
        -> SdkResult<ListenerId>;

    fn unlisten(&self, listener: ListenerId);
}
