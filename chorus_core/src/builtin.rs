//! Built-in capability modules.

use serde_json::{json, Value};

use crate::capability::{CapabilityModule, HandlerTable};
use crate::error::HandlerError;
use crate::protocol::Payload;

/// Registry name of [`DiagnosticsModule`].
pub const DIAGNOSTICS: &str = "diagnostics";

/// Liveness and plumbing checks: `ping`, `echo`, `fail`.
pub struct DiagnosticsModule;

impl CapabilityModule for DiagnosticsModule {
    fn name(&self) -> &str {
        DIAGNOSTICS
    }

    fn install(&self, table: &mut HandlerTable) {
        table.register("ping", |_| {
            let mut out = Payload::new();
            out.insert("pong".into(), json!(true));
            Ok(out)
        });
        
        table.register("echo", |data| Ok(data.clone()));
        
        table.register("fail", |data| {
            let reason = data
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("requested failure");
            Err(HandlerError::Failed(reason.to_string()))
        });
    }
}
