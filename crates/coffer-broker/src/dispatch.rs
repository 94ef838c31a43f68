//! The static method table
//!
//! Every callable member is declared once, at broker construction, as a
//! `{interface, member} → MethodSpec` row: a wire signature plus a typed
//! handler closure. There is no runtime signature discovery; a member
//! that is not in the table does not exist.
//!
//! Property access (`Get`/`GetAll`/`Set`) is sugar over the same table:
//! the request is rewritten to a property member (`Get:Label`) and flows
//! through the identical lookup/validate/invoke pipeline.

use std::collections::HashMap;

use serde_json::Value;

use coffer_core::{CofferError, CofferResult};

use crate::broker::{Broker, CallCtx};
use crate::paths::ParsedPath;
use crate::wire::WireType;

pub type Handler =
    Box<dyn Fn(&Broker, &CallCtx, &ParsedPath, &[Value]) -> CofferResult<Value> + Send + Sync>;

pub struct MethodSpec {
    pub args: Vec<WireType>,
    pub handler: Handler,
}

#[derive(Default)]
pub struct DispatchTable {
    methods: HashMap<String, MethodSpec>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        interface: &'static str,
        member: &str,
        args: Vec<WireType>,
        handler: Handler,
    ) {
        let previous = self
            .methods
            .insert(format!("{interface}.{member}"), MethodSpec { args, handler });
        debug_assert!(previous.is_none(), "duplicate method {interface}.{member}");
    }

    pub fn lookup(&self, interface: &str, member: &str) -> CofferResult<&MethodSpec> {
        self.methods
            .get(&format!("{interface}.{member}"))
            .ok_or_else(|| CofferError::Broker(format!("no such method: {interface}.{member}")))
    }
}

/// Rewrite a property-style request into its table member.
///
/// `Get(name)` → `Get:<name>` with no arguments, `Set(name, value)` →
/// `Set:<name>` with the value, `GetAll()` passes through. Returns
/// `None` for ordinary method calls.
pub fn rewrite_property_request(
    member: &str,
    args: &[Value],
) -> CofferResult<Option<(String, Vec<Value>)>> {
    match member {
        "Get" => {
            let [Value::String(name)] = args else {
                return Err(CofferError::Validation(
                    "Get: expected a single property name".into(),
                ));
            };
            Ok(Some((format!("Get:{name}"), Vec::new())))
        }
        "Set" => {
            let [Value::String(name), value] = args else {
                return Err(CofferError::Validation(
                    "Set: expected a property name and a value".into(),
                ));
            };
            Ok(Some((format!("Set:{name}"), vec![value.clone()])))
        }
        _ => Ok(None),
    }
}
