//! Server reflection: lets clients discover the registered services and
//! methods through an ordinary unary call.

use std::collections::BTreeMap;
use std::sync::Arc;

use callchain_core::{CallContext, CallError, MethodName};
use serde::Serialize;
use serde_json::{json, Value};

use super::router::MethodRouter;

pub const REFLECTION_SERVICE: &str = "rpc.reflection.ServerReflection";
pub const LIST_SERVICES: &str = "ListServices";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub methods: Vec<String>,
}

/// Registers `ListServices` on `router`.
///
/// The listing is a snapshot taken at registration time and includes the
/// reflection service itself.
///
/// # Errors
///
/// Returns an error if the reflection method name fails to parse.
pub fn register(router: &mut MethodRouter) -> Result<(), CallError> {
    let method = MethodName::from_parts(REFLECTION_SERVICE, LIST_SERVICES)?;

    let mut services = router.services();
    let own = services.entry(REFLECTION_SERVICE.to_string()).or_default();
    if !own.iter().any(|m| m == LIST_SERVICES) {
        own.push(LIST_SERVICES.to_string());
        own.sort();
    }
    let listing = Arc::new(json!({ "services": descriptors(services) }));

    router.register(method, move |_ctx: CallContext, _req: Value| {
        let listing = Arc::clone(&listing);
        async move { Ok::<_, CallError>(listing.as_ref().clone()) }
    });
    Ok(())
}

/// Services on `router` with their methods, both sorted.
#[must_use]
pub fn describe(router: &MethodRouter) -> Vec<ServiceDescriptor> {
    descriptors(router.services())
}

fn descriptors(services: BTreeMap<String, Vec<String>>) -> Vec<ServiceDescriptor> {
    services
        .into_iter()
        .map(|(name, methods)| ServiceDescriptor { name, methods })
        .collect()
}
